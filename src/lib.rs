//! # agmip-reshape - experiment document reshaping
//!
//! Converts agricultural experiment documents (weather, soil, management,
//! observed data) between their compressed form, where each record of a data
//! list omits the values it shares with earlier records, and their
//! decompressed form, where every record is complete.
//!
//! ## Quick Start
//!
//! ```rust
//! use agmip_reshape::{Document, DocumentReshaper, ReshapeConfig};
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let doc = Document::from_value(json!({
//!     "exname": "UFGA8201",
//!     "soil": {
//!         "soil_id": "IBMZ910014",
//!         "soilLayer": [
//!             {"sllb": "5", "slll": "0.02"},
//!             {"sllb": "15"}
//!         ]
//!     }
//! }))?
//! .into_strict()?;
//!
//! let reshaper = DocumentReshaper::new(ReshapeConfig::default());
//! let soil = reshaper.bucket(&doc, "soil").value;
//!
//! // the second layer inherits slll from the first
//! assert_eq!(soil.data_list()[1]["slll"], "0.02");
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use std::io::{BufRead, Write};
use tracing::warn;

pub mod reshape;

// Re-export commonly used types for convenience
pub use reshape::{
    compress_records, decompress_records, get_or, BucketEntry, BucketWriter, ClearPolicy, Document,
    DocumentReshaper, DocumentWriter, Node, Outcome, Record, ReshapeConfig, ReshapeError, Warning,
};

/// Main entry point: decompress a stream of newline-delimited documents.
///
/// Blank lines are skipped. Dropped fields are logged and otherwise ignored;
/// returns the number of warnings seen across the stream.
pub fn decompress_json<R: BufRead, W: Write>(
    reader: R,
    writer: &mut DocumentWriter<W>,
    config: ReshapeConfig,
) -> Result<usize> {
    let reshaper = DocumentReshaper::new(config);
    let mut warnings = 0;

    for (idx, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read line")?;
        if line.trim().is_empty() {
            continue;
        }

        let value: serde_json::Value = serde_json::from_str(&line)
            .with_context(|| format!("Failed to parse JSON on line {}", idx + 1))?;
        let parsed = Document::from_value(value)
            .with_context(|| format!("Invalid document on line {}", idx + 1))?;

        let (doc, mut dropped) = parsed.into_parts();
        let decompressed = reshaper.decompress_all(&doc);
        dropped.extend(decompressed.warnings);

        if !dropped.is_empty() {
            warn!(line = idx + 1, dropped = dropped.len(), "fields dropped from document");
        }
        warnings += dropped.len();

        writer.write_document(&decompressed.value)?;
    }

    writer.flush()?;
    Ok(warnings)
}
