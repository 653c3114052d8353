use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use starstack_core::align::Wcs;
use starstack_core::pipeline::{BayerInfo, LiveStackConfig, SolveOutcome};
use starstack_core::postprocess::StarCenter;

/// A recorded capture session: settings, masters and the subs in arrival
/// order together with what the plate solver said about each.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub output: PathBuf,
    /// Run a stack pass after every this many subs.
    #[serde(default = "default_stack_every")]
    pub stack_every: usize,
    #[serde(default)]
    pub config: LiveStackConfig,
    #[serde(default)]
    pub masters: Masters,
    /// Colour filter layout of the camera, carried into the output.
    #[serde(default)]
    pub bayer: Option<BayerInfo>,
    /// Star centres on the composite grid, for star-based PSFs.
    #[serde(default)]
    pub stars: Vec<StarCenter>,
    #[serde(default)]
    pub subs: Vec<SubEntry>,
}

fn default_stack_every() -> usize {
    1
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Masters {
    pub dark: Option<PathBuf>,
    pub flat: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubEntry {
    pub path: PathBuf,
    pub solve: SolveEntry,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SolveEntry {
    Solved {
        wcs: Wcs,
        #[serde(default = "unknown_hfr")]
        hfr: f64,
        #[serde(default)]
        num_stars: i32,
    },
    Failed,
    TimedOut,
}

fn unknown_hfr() -> f64 {
    -1.0
}

impl From<&SolveEntry> for SolveOutcome {
    fn from(entry: &SolveEntry) -> Self {
        match entry {
            SolveEntry::Solved {
                wcs,
                hfr,
                num_stars,
            } => SolveOutcome::from_solver(Some(wcs), false, true, *hfr, *num_stars),
            SolveEntry::Failed => SolveOutcome::Failed,
            SolveEntry::TimedOut => SolveOutcome::TimedOut,
        }
    }
}

impl Manifest {
    /// Read a manifest, resolving relative paths against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let mut manifest: Self = toml::from_str(&contents).context("Invalid session manifest")?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut manifest.output);
        if let Some(ref mut dark) = manifest.masters.dark {
            resolve(dark);
        }
        if let Some(ref mut flat) = manifest.masters.flat {
            resolve(flat);
        }
        for sub in &mut manifest.subs {
            resolve(&mut sub.path);
        }
        manifest.stack_every = manifest.stack_every.max(1);
        Ok(manifest)
    }

    /// A manifest with default settings and one example sub of each kind.
    pub fn template() -> Self {
        let wcs = Wcs::from_scale_rotation((2000.5, 1500.5), (83.8221, -5.3911), 1.2, 0.0);
        Self {
            output: PathBuf::from("stack.tiff"),
            stack_every: default_stack_every(),
            config: LiveStackConfig::default(),
            masters: Masters {
                dark: Some(PathBuf::from("master_dark.tiff")),
                flat: Some(PathBuf::from("master_flat.tiff")),
            },
            bayer: None,
            stars: Vec::new(),
            subs: vec![
                SubEntry {
                    path: PathBuf::from("sub_0001.tiff"),
                    solve: SolveEntry::Solved {
                        wcs,
                        hfr: 2.4,
                        num_stars: 180,
                    },
                },
                SubEntry {
                    path: PathBuf::from("sub_0002.tiff"),
                    solve: SolveEntry::TimedOut,
                },
            ],
        }
    }
}
