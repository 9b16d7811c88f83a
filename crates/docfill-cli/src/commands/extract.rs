//! Extract command - read the fields of a single contract-request.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use console::style;
use tracing::{debug, info};

use docfill_core::pipeline::{extension_of, DocumentFiller};
use docfill_core::{Field, FieldMapping};

use super::{explain, load_config, ocr_engine_for};

/// Arguments for the extract command.
#[derive(Args)]
pub struct ExtractArgs {
    /// Source contract-request (docx or PDF)
    #[arg(required = true)]
    input: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON object keyed by field name
    Json,
    /// CSV with a header row
    Csv,
    /// Human-readable summary
    Text,
}

pub async fn run(args: ExtractArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = load_config(config_path)?;

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    info!("Extracting fields from {}", args.input.display());

    let data = fs::read(&args.input)?;
    let engine = ocr_engine_for(&args.input, &config);
    let mut filler = DocumentFiller::new(&config);
    if let Some(engine) = &engine {
        filler = filler.with_ocr(engine);
    }
    let mapping = filler
        .extract(&data, &extension_of(&args.input))
        .map_err(explain)?;

    let output = format_mapping(&mapping, args.format)?;

    if let Some(output_path) = &args.output {
        fs::write(output_path, &output)?;
        println!(
            "{} Output written to {}",
            style("✓").green(),
            output_path.display()
        );
    } else {
        println!("{}", output);
    }

    debug!("Total extraction time: {:?}", start.elapsed());
    Ok(())
}

pub fn format_mapping(mapping: &FieldMapping, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(mapping)?),
        OutputFormat::Csv => format_csv(mapping),
        OutputFormat::Text => Ok(mapping.preview()),
    }
}

fn format_csv(mapping: &FieldMapping) -> anyhow::Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(Field::ALL.iter().map(|f| f.key()))?;
    wtr.write_record(mapping.iter().map(|(_, value)| value))?;
    Ok(String::from_utf8(wtr.into_inner()?)?)
}
