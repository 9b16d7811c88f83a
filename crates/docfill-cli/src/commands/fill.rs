//! Fill command - fill one template from one contract-request.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use docfill_core::pipeline::{DocumentFiller, FillReport};
use docfill_core::DocfillConfig;

use super::{explain, load_config, ocr_engine_for};

/// Arguments for the fill command.
#[derive(Args)]
pub struct FillArgs {
    /// Source contract-request (docx or PDF)
    #[arg(required = true)]
    source: PathBuf,

    /// Template with {{key}} placeholders (docx, xls or xlsx)
    #[arg(required = true)]
    template: PathBuf,

    /// Output file; its extension selects the format, the template's is used when missing
    #[arg(required = true)]
    output: PathBuf,

    /// Keep hidden sheets hidden
    #[arg(long)]
    keep_hidden: bool,

    /// Refuse to replace an existing output file
    #[arg(long)]
    no_overwrite: bool,
}

pub async fn run(args: FillArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if args.keep_hidden {
        config.output.reveal_hidden_sheets = false;
    }
    if args.no_overwrite {
        config.output.overwrite = false;
    }

    for path in [&args.source, &args.template] {
        if !path.exists() {
            anyhow::bail!("Input file not found: {}", path.display());
        }
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(format!("Filling {}...", args.template.display()));

    let FillArgs {
        source,
        template,
        output,
        ..
    } = args;
    let report = tokio::task::spawn_blocking(move || fill_one(&config, &source, &template, &output))
        .await?;

    pb.finish_and_clear();
    let report = report?;

    print_report(&report);
    Ok(())
}

/// Run the pipeline for one source. Blocking.
pub fn fill_one(
    config: &DocfillConfig,
    source: &std::path::Path,
    template: &std::path::Path,
    output: &std::path::Path,
) -> anyhow::Result<FillReport> {
    let engine = ocr_engine_for(source, config);
    let mut filler = DocumentFiller::new(config);
    if let Some(engine) = &engine {
        filler = filler.with_ocr(engine);
    }
    let report = filler.fill(source, template, output).map_err(explain)?;
    info!("Filled {} from {}", report.output.display(), source.display());
    Ok(report)
}

fn print_report(report: &FillReport) {
    println!(
        "{} Output written to {}",
        style("✓").green(),
        report.output.display()
    );
    println!(
        "   {} fields extracted, {} placeholders replaced",
        style(report.mapping.filled_count()).green(),
        report.replaced
    );
    if report.revealed > 0 {
        println!(
            "{} {} hidden sheets made visible",
            style("ℹ").blue(),
            report.revealed
        );
    }
}
