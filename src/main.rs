// src/main.rs
//! Ad Capture Engine trace tool
//!
//! Validates an interaction trace file, prints a summary, and re-exports
//! it sorted and normalised.
//!
//! ```text
//! adcapture-engine <trace> [--ndjson] [--out <path>]
//! ```
//!
//! The input format follows the file extension (`.ndjson` or JSON);
//! `--ndjson` selects the output format.

use adcapture_engine::interaction::{TraceExporter, TraceFormat};
use adcapture_engine::observability::{init_metrics, init_tracing};
use adcapture_engine::utils::config::EngineConfig;
use adcapture_engine::BuildInfo;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Ad Capture Engine trace tool
#[derive(Parser)]
#[command(name = "adcapture-engine")]
#[command(about = "Validate, summarise and re-export an interaction trace")]
#[command(version)]
struct Args {
    /// Trace file (`.ndjson`/`.jsonl` are read as NDJSON, anything else as JSON)
    input: PathBuf,

    /// Write the re-exported trace as NDJSON
    #[arg(long)]
    ndjson: bool,

    /// Output path (stdout when omitted)
    #[arg(long)]
    out: Option<PathBuf>,
}

impl Args {
    fn output_format(&self) -> TraceFormat {
        if self.ndjson {
            TraceFormat::Ndjson
        } else {
            TraceFormat::Json
        }
    }
}

fn input_format(path: &Path) -> TraceFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ndjson") | Some("jsonl") => TraceFormat::Ndjson,
        _ => TraceFormat::Json,
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = EngineConfig::load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    init_tracing(&config.logging)?;
    let metrics = if config.logging.metrics {
        Some(init_metrics()?)
    } else {
        None
    };

    info!("Ad Capture Engine {}", BuildInfo::current());
    debug!("Configuration loaded: {:?}", config);

    let raw = std::fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;

    let trace = TraceExporter::new(input_format(&args.input))
        .import(&raw)
        .with_context(|| format!("invalid trace {}", args.input.display()))?;

    println!("ad size:   {}", trace.ad_size);
    println!("recorded:  {}", trace.recorded_at.to_rfc3339());
    println!("duration:  {}ms", trace.duration);
    println!("events:    {}", trace.len());
    for (kind, count) in trace.counts_by_kind() {
        println!("  {:<11} {}", kind, count);
    }
    if trace.last_timestamp() > trace.duration {
        println!(
            "warning: last event at {}ms is past the recorded duration",
            trace.last_timestamp()
        );
    }

    let output_format = args.output_format();
    let exported = TraceExporter::new(output_format).export(&trace)?;
    match &args.out {
        Some(path) => {
            std::fs::write(path, exported)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("Wrote {} trace to {}", output_format, path.display());
        }
        None => println!("{}", exported),
    }

    if let Some(handle) = metrics {
        debug!("Metrics snapshot:\n{}", handle.render());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults_to_json() {
        let args = Args::try_parse_from(["adcapture-engine", "trace.json"]).unwrap();
        assert_eq!(args.input, PathBuf::from("trace.json"));
        assert_eq!(args.output_format(), TraceFormat::Json);
        assert!(args.out.is_none());
    }

    #[test]
    fn test_args_flags() {
        let args = Args::try_parse_from([
            "adcapture-engine",
            "--ndjson",
            "trace.jsonl",
            "--out",
            "sorted.ndjson",
        ])
        .unwrap();
        assert_eq!(args.output_format(), TraceFormat::Ndjson);
        assert_eq!(args.out, Some(PathBuf::from("sorted.ndjson")));
        assert_eq!(input_format(&args.input), TraceFormat::Ndjson);
    }

    #[test]
    fn test_args_rejected() {
        assert!(Args::try_parse_from(["adcapture-engine"]).is_err());
        assert!(Args::try_parse_from(["adcapture-engine", "a.json", "b.json"]).is_err());
        assert!(Args::try_parse_from(["adcapture-engine", "a.json", "--bogus"]).is_err());
    }
}
