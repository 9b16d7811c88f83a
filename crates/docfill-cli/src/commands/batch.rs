//! Batch command - fill one template for many contract-requests.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Args;
use console::style;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, warn};

use docfill_core::pipeline::{extension_of, FillReport};
use docfill_core::{DocfillConfig, TemplateKind};

use super::fill::fill_one;
use super::load_config;

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Source files or glob pattern (docx or PDF)
    #[arg(required = true)]
    input: String,

    /// Template with {{key}} placeholders (docx, xls or xlsx)
    #[arg(short, long, required = true)]
    template: PathBuf,

    /// Output directory
    #[arg(short, long, required = true)]
    output_dir: PathBuf,

    /// Output extension (default: the template's)
    #[arg(short = 'e', long)]
    extension: Option<String>,

    /// Also write a summary CSV into the output directory
    #[arg(long)]
    summary: bool,
}

/// Outcome of filling for a single source.
struct BatchItem {
    path: PathBuf,
    report: Option<FillReport>,
    error: Option<String>,
    processing_time_ms: u64,
}

pub async fn run(args: BatchArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = load_config(config_path)?;

    if !args.template.exists() {
        anyhow::bail!("Template not found: {}", args.template.display());
    }
    let extension = match &args.extension {
        Some(ext) => ext.trim_start_matches('.').to_ascii_lowercase(),
        None => TemplateKind::from_extension(&extension_of(&args.template))?
            .extension()
            .to_string(),
    };

    let files: Vec<PathBuf> = glob(&args.input)?
        .filter_map(|r| r.ok())
        .filter(|p| matches!(extension_of(p).as_str(), "docx" | "pdf"))
        .collect();

    if files.is_empty() {
        anyhow::bail!("No matching files found for pattern: {}", args.input);
    }

    println!(
        "{} Found {} files to process",
        style("ℹ").blue(),
        files.len()
    );

    fs::create_dir_all(&args.output_dir)?;

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files")?
            .progress_chars("=>-"),
    );

    let template = args.template.clone();
    let output_dir = args.output_dir.clone();
    let items = tokio::task::spawn_blocking(move || {
        let mut items = Vec::with_capacity(files.len());
        for path in files {
            items.push(fill_item(&config, path, &template, &output_dir, &extension));
            pb.inc(1);
        }
        pb.finish_with_message("Complete");
        items
    })
    .await?;

    let successful: Vec<_> = items.iter().filter(|i| i.report.is_some()).collect();
    let failed: Vec<_> = items.iter().filter(|i| i.error.is_some()).collect();

    if args.summary {
        let summary_path = args.output_dir.join("summary.csv");
        write_summary(&summary_path, &items)?;
        println!(
            "{} Summary written to {}",
            style("✓").green(),
            summary_path.display()
        );
    }

    println!();
    println!(
        "{} Processed {} files in {:?}",
        style("✓").green(),
        items.len(),
        start.elapsed()
    );
    println!(
        "   {} successful, {} failed",
        style(successful.len()).green(),
        style(failed.len()).red()
    );

    if !failed.is_empty() {
        println!();
        println!("{}", style("Failed files:").red());
        for item in &failed {
            println!(
                "  - {}: {}",
                item.path.display(),
                item.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

fn fill_item(
    config: &DocfillConfig,
    path: PathBuf,
    template: &Path,
    output_dir: &Path,
    extension: &str,
) -> BatchItem {
    let file_start = Instant::now();
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let output = output_dir.join(format!("{}.{}", stem, extension));

    let result = fill_one(config, &path, template, &output);
    let processing_time_ms = file_start.elapsed().as_millis() as u64;

    match result {
        Ok(report) => {
            debug!("Wrote {}", report.output.display());
            BatchItem {
                path,
                report: Some(report),
                error: None,
                processing_time_ms,
            }
        }
        Err(e) => {
            warn!("Failed to process {}: {}", path.display(), e);
            BatchItem {
                path,
                report: None,
                error: Some(e.to_string()),
                processing_time_ms,
            }
        }
    }
}

fn write_summary(path: &Path, items: &[BatchItem]) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "filename",
        "status",
        "output",
        "fields_extracted",
        "placeholders_replaced",
        "processing_time_ms",
        "error",
    ])?;

    for item in items {
        let filename = item.path.file_name().and_then(|s| s.to_str()).unwrap_or("");

        if let Some(report) = &item.report {
            wtr.write_record([
                filename,
                "success",
                &report.output.display().to_string(),
                &report.mapping.filled_count().to_string(),
                &report.replaced.to_string(),
                &item.processing_time_ms.to_string(),
                "",
            ])?;
        } else {
            wtr.write_record([
                filename,
                "error",
                "",
                "",
                "",
                &item.processing_time_ms.to_string(),
                item.error.as_deref().unwrap_or(""),
            ])?;
        }
    }

    wtr.flush()?;
    Ok(())
}
