//! agmip-reshape: decompress, compress or flatten experiment documents
//!
//! Usage:
//!   # Decompress a document (or a JSON array of documents) to stdout
//!   agmip-reshape experiment.json
//!
//!   # Read NDJSON from stdin, compress each document
//!   cat dense.jsonl | agmip-reshape --ndjson --compress
//!
//!   # Only the flattened scalars you care about
//!   agmip-reshape experiment.json --extract exname,wst_id,soil_id
//!
//!   # Write each bucket's records to ./records/<bucket>.jsonl
//!   agmip-reshape experiment.json --output-dir ./records

// Use MiMalloc allocator for better performance (recommended by simd-json)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use agmip_reshape::{
    BucketWriter, ClearPolicy, Document, DocumentReshaper, DocumentWriter, Outcome, ReshapeConfig,
    ReshapeError, Warning,
};
use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Read, Stdout};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "agmip-reshape")]
#[command(about = "Decompress, compress or flatten AgMIP experiment documents", long_about = None)]
struct Args {
    /// Input file (use stdin if omitted)
    #[arg(value_name = "FILE")]
    input: Option<String>,

    /// Process newline-delimited JSON (one document per line)
    #[arg(long)]
    ndjson: bool,

    /// Strip inherited values instead of filling them in
    #[arg(long, conflicts_with_all = ["flatten", "extract"])]
    compress: bool,

    /// Output globals and bucket scalars as one flat object
    #[arg(long)]
    flatten: bool,

    /// Comma-separated scalar keys to extract from the flattened document
    #[arg(long, conflicts_with = "flatten")]
    extract: Option<String>,

    /// Output directory for separate .jsonl record files per bucket
    /// If omitted, writes whole documents to stdout
    #[arg(long, short = 'o', conflicts_with_all = ["flatten", "extract"])]
    output_dir: Option<String>,

    /// Fail on the first document that loses a field
    #[arg(long)]
    strict: bool,

    /// An empty value clears a field for all following records, not just one
    #[arg(long)]
    persist_clears: bool,

    /// Pretty-print output documents
    #[arg(long)]
    pretty: bool,
}

/// What to produce for each input document
enum Output {
    Documents(DocumentWriter<Stdout>),
    Buckets(BucketWriter),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = ReshapeConfig::default();
    if args.persist_clears {
        config = config.with_clear_policy(ClearPolicy::Persist);
    }
    let reshaper = DocumentReshaper::new(config);

    let extract_keys: Option<BTreeSet<String>> = args.extract.as_ref().map(|keys| {
        keys.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    });

    let mut output = match &args.output_dir {
        Some(dir) => Output::Buckets(BucketWriter::new(dir)?),
        None => Output::Documents(DocumentWriter::new(std::io::stdout()).pretty(args.pretty)),
    };

    let reader = if let Some(file_path) = &args.input {
        Box::new(BufReader::new(
            File::open(file_path).with_context(|| format!("Failed to open {}", file_path))?,
        )) as Box<dyn Read>
    } else {
        Box::new(std::io::stdin()) as Box<dyn Read>
    };

    let values = read_values(reader, args.ndjson)?;
    let document_count = values.len();
    let mut total_warnings = 0;

    for (idx, value) in values.into_iter().enumerate() {
        let (doc, mut warnings) = Document::from_value(value)
            .with_context(|| format!("Invalid document #{}", idx + 1))?
            .into_parts();

        match (&mut output, &extract_keys) {
            (Output::Documents(writer), Some(keys)) => {
                let extracted = absorb(reshaper.extract(&doc, keys), &mut warnings);
                check(args.strict, idx, &warnings)?;
                writer.write_document(&extracted)?;
            }
            (Output::Documents(writer), None) if args.flatten => {
                let flat = absorb(reshaper.flatten_globals(&doc), &mut warnings);
                check(args.strict, idx, &warnings)?;
                writer.write_document(&flat)?;
            }
            (output, _) => {
                let reshaped = if args.compress {
                    reshaper.compress_all(&doc)
                } else {
                    reshaper.decompress_all(&doc)
                };
                let reshaped = absorb(reshaped, &mut warnings);

                match output {
                    Output::Documents(writer) => {
                        check(args.strict, idx, &warnings)?;
                        writer.write_document(&reshaped)?;
                    }
                    Output::Buckets(writer) => {
                        warnings.extend(writer.write_document(&reshaped)?);
                        check(args.strict, idx, &warnings)?;
                    }
                }
            }
        }

        total_warnings += warnings.len();
    }

    match &mut output {
        Output::Documents(writer) => writer.flush()?,
        Output::Buckets(writer) => writer.flush()?,
    }

    if total_warnings > 0 {
        warn!(dropped = total_warnings, "fields were dropped while reshaping");
    }
    info!(documents = document_count, "done");

    Ok(())
}

/// Move an outcome's warnings into `warnings` and return its value
fn absorb<T>(outcome: Outcome<T>, warnings: &mut Vec<Warning>) -> T {
    let (value, dropped) = outcome.into_parts();
    warnings.extend(dropped);
    value
}

fn check(strict: bool, idx: usize, warnings: &[Warning]) -> Result<()> {
    if strict && !warnings.is_empty() {
        return Err(ReshapeError::Strict(warnings.to_vec()))
            .with_context(|| format!("Document #{} lost fields", idx + 1));
    }
    Ok(())
}

/// Read every input document using SIMD-accelerated parsing when possible.
///
/// A top-level JSON array is treated as a list of documents. NDJSON, or
/// anything simd-json rejects, falls back to line-by-line serde_json parsing.
fn read_values(reader: Box<dyn Read>, ndjson: bool) -> Result<Vec<Value>> {
    let mut content = Vec::new();
    let mut buf_reader = BufReader::new(reader);
    buf_reader
        .read_to_end(&mut content)
        .context("Failed to read input")?;

    if !ndjson {
        match simd_json::serde::from_slice::<Value>(&mut content.clone()) {
            Ok(Value::Array(docs)) => return Ok(docs),
            Ok(doc) => return Ok(vec![doc]),
            Err(e) => {
                warn!(error = %e, "input is not a single JSON value, reading it as NDJSON");
            }
        }
    }

    let content_str = String::from_utf8_lossy(&content);
    let mut values = Vec::new();
    for (idx, line) in content_str.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)
            .with_context(|| format!("Failed to parse JSON on line {}", idx + 1))?;
        values.push(value);
    }

    Ok(values)
}
