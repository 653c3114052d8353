use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use super::manifest::Manifest;

#[derive(Args)]
pub struct ConfigArgs {
    /// Write the manifest to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Print or save a template session manifest with default settings.
pub fn run(args: &ConfigArgs) -> Result<()> {
    let toml_str = toml::to_string_pretty(&Manifest::template())?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &toml_str)
            .with_context(|| format!("Failed to write manifest to {}", path.display()))?;
        println!("Template manifest saved to {}", path.display());
    } else {
        print!("{}", toml_str);
    }

    Ok(())
}
