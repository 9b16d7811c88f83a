//! Convert command - move a workbook between xls and xlsx.

use std::fs;
use std::path::PathBuf;

use clap::Args;
use console::style;

use docfill_core::pipeline::{extension_of, save_atomic};
use docfill_core::workbook::bridge::convert_bytes;

use super::{explain, load_config};

/// Arguments for the convert command.
#[derive(Args)]
pub struct ConvertArgs {
    /// Workbook to convert (xls or xlsx)
    #[arg(required = true)]
    input: PathBuf,

    /// Output workbook; its extension selects the target format
    #[arg(required = true)]
    output: PathBuf,
}

pub async fn run(args: ConvertArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    let data = fs::read(&args.input)?;
    let bytes = convert_bytes(&data, &extension_of(&args.input), &extension_of(&args.output))
        .map_err(explain)?;
    save_atomic(&bytes, &args.output, config.output.overwrite).map_err(explain)?;

    println!(
        "{} Converted {} to {}",
        style("✓").green(),
        args.input.display(),
        args.output.display()
    );
    Ok(())
}
