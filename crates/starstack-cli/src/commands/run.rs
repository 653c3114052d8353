use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use starstack_core::calibration::MasterKind;
use starstack_core::io::image_io::{load_raw_image, save_image};
use starstack_core::pipeline::{
    ChannelLayout, LiveStacker, SolveOutcome, StackObserver, StackReport, SubEvent, SubId,
};
use tracing::warn;

use super::manifest::Manifest;
use crate::summary::{print_session_summary, print_stack_report};

#[derive(Args)]
pub struct RunArgs {
    /// Session manifest (TOML)
    pub manifest: PathBuf,

    /// Output file path, overriding the manifest
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Reports rejected subs above the progress bar.
struct ProgressObserver {
    pb: ProgressBar,
}

impl StackObserver for ProgressObserver {
    fn sub_event(&self, sub: SubId, event: SubEvent) {
        if let SubEvent::Failed(status) = event {
            self.pb.println(format!("  sub {sub}: {status}"));
        }
    }

    fn stack_complete(&self, report: &StackReport) {
        self.pb
            .set_message(format!("{} subs, SNR {:.2}", report.total_subs, report.snr));
    }
}

pub fn run(args: &RunArgs) -> Result<()> {
    let manifest = Manifest::load(&args.manifest)?;
    let output_path = args.output.clone().unwrap_or_else(|| manifest.output.clone());

    print_session_summary(&manifest.config, &output_path, manifest.subs.len());

    let pb = ProgressBar::new(manifest.subs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg:30} [{bar:40}] {pos}/{len}")?
            .progress_chars("=> "),
    );

    let observer = Arc::new(ProgressObserver { pb: pb.clone() });
    let mut stacker = LiveStacker::new(manifest.config.clone()).with_observer(observer);
    stacker.set_star_centers(manifest.stars.clone());
    stacker.set_bayer(manifest.bayer.clone());

    let masters = [
        (MasterKind::Dark, manifest.masters.dark.as_ref()),
        (MasterKind::Flat, manifest.masters.flat.as_ref()),
    ];
    for (kind, path) in masters {
        let Some(path) = path else { continue };
        let raw = load_raw_image(path)
            .with_context(|| format!("Failed to load master {kind} {}", path.display()))?;
        stacker
            .add_master(kind, &raw.as_raw())
            .with_context(|| format!("Rejected master {kind} {}", path.display()))?;
    }

    let mut last_report = None;
    for (i, entry) in manifest.subs.iter().enumerate() {
        let name = entry
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        pb.set_message(name);

        let raw = load_raw_image(&entry.path)
            .with_context(|| format!("Failed to load sub {}", entry.path.display()))?;
        match stacker.add_sub(&raw.as_raw()) {
            Ok(_) => {
                stacker.solver_done(SolveOutcome::from(&entry.solve))?;
            }
            Err(e) => {
                warn!(path = %entry.path.display(), error = %e, "Sub rejected");
                pb.println(format!("  skipped {}: {e}", entry.path.display()));
            }
        }

        if (i + 1) % manifest.stack_every == 0 {
            if let Some(report) = stacker.stack()? {
                last_report = Some(report);
            }
        }
        pb.inc(1);
    }

    if let Some(report) = stacker.stack()? {
        last_report = Some(report);
    }
    pb.finish_with_message("Done");

    let output = stacker
        .output(ChannelLayout::Planar)
        .context("No subs could be stacked")?;
    save_image(&output, &output_path)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    if let Some(ref report) = last_report {
        print_stack_report(report, &stacker.metrics());
    }
    println!("\nOutput saved to {}", output_path.display());

    Ok(())
}
