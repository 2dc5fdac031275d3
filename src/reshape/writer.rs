use crate::reshape::error::{report, Warning};
use crate::reshape::types::{Document, Node};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};

/// Writes each bucket's record list to `<bucket>.jsonl` in an output directory
pub struct BucketWriter {
    output_dir: PathBuf,
    writers: HashMap<String, BufWriter<File>>,
}

impl BucketWriter {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Result<Self> {
        std::fs::create_dir_all(&output_dir).context("Failed to create output directory")?;

        Ok(BucketWriter {
            output_dir: output_dir.as_ref().to_path_buf(),
            writers: HashMap::new(),
        })
    }

    /// Append the records of every bucket in `doc`, one JSON object per line.
    ///
    /// Bucket scalars are not repeated on each line; globals are skipped.
    /// A bucket whose name isn't a single plain path segment would land
    /// outside the output directory, so its records are skipped and reported.
    pub fn write_document(&mut self, doc: &Document) -> Result<Vec<Warning>> {
        let mut warnings = Vec::new();

        for (name, node) in doc.iter() {
            let Node::Bucket(fields) = node else {
                continue;
            };

            if !is_plain_file_name(name) {
                report(&mut warnings, Warning::UnwritableBucketName { name: name.clone() });
                continue;
            }

            for field in fields.values() {
                let Node::RecordList(records) = field else {
                    continue;
                };

                if !self.writers.contains_key(name) {
                    let path = self.output_dir.join(format!("{}.jsonl", name));
                    let file = std::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&path)
                        .with_context(|| format!("Failed to open file: {}", path.display()))?;
                    self.writers.insert(name.clone(), BufWriter::new(file));
                }

                let writer = self
                    .writers
                    .get_mut(name)
                    .context("Bucket writer missing after open")?;
                for record in records {
                    let json = serde_json::to_string(record).context("Failed to serialize record")?;
                    writeln!(writer, "{}", json).context("Failed to write record")?;
                }
            }
        }
        Ok(warnings)
    }

    /// Flush all writers
    pub fn flush(&mut self) -> Result<()> {
        for writer in self.writers.values_mut() {
            writer.flush().context("Failed to flush writer")?;
        }
        Ok(())
    }
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(part)), None) if part == name
    )
}

/// Writes whole documents to a single output, one per line
pub struct DocumentWriter<W: Write> {
    writer: W,
    pretty: bool,
}

impl<W: Write> DocumentWriter<W> {
    pub fn new(writer: W) -> Self {
        DocumentWriter {
            writer,
            pretty: false,
        }
    }

    /// Pretty-print documents; the output is then no longer line-delimited
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn write_document<T: serde::Serialize>(&mut self, doc: &T) -> Result<()> {
        let json = if self.pretty {
            serde_json::to_string_pretty(doc)
        } else {
            serde_json::to_string(doc)
        }
        .context("Failed to serialize document")?;

        writeln!(self.writer, "{}", json).context("Failed to write document")
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush writer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Document {
        Document::from_value(json!({
            "exname": "E1",
            "weather": {
                "wst_id": "W1",
                "dailyWeather": [{"w_date": "19820101"}, {"w_date": "19820102"}]
            },
            "soil": {"soil_id": "S1"}
        }))
        .unwrap()
        .value
    }

    #[test]
    fn test_document_writer() {
        let mut buffer = Vec::new();
        let mut writer = DocumentWriter::new(&mut buffer);

        writer.write_document(&sample()).unwrap();
        writer.flush().unwrap();

        let output = String::from_utf8(buffer).unwrap();
        assert_eq!(output.lines().count(), 1);
        let parsed: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(parsed["weather"]["wst_id"], "W1");
    }

    #[test]
    fn test_bucket_writer_splits_by_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = BucketWriter::new(dir.path()).unwrap();

        let warnings = writer.write_document(&sample()).unwrap();
        writer.flush().unwrap();
        assert!(warnings.is_empty());

        let weather = std::fs::read_to_string(dir.path().join("weather.jsonl")).unwrap();
        let lines: Vec<&str> = weather.lines().collect();
        assert_eq!(
            lines,
            vec![r#"{"w_date":"19820101"}"#, r#"{"w_date":"19820102"}"#]
        );
        assert!(!dir.path().join("soil.jsonl").exists());
    }

    #[test]
    fn test_bucket_writer_stays_inside_output_dir() {
        let root = tempfile::tempdir().unwrap();
        let out = root.path().join("out");
        let mut writer = BucketWriter::new(&out).unwrap();

        let doc = Document::from_value(json!({
            "../escaped": {"data": [{"a": "1"}]},
            "nested/name": {"data": [{"a": "2"}]},
            "..": {"data": [{"a": "3"}]},
            "trailing/": {"data": [{"a": "5"}]},
            "observed": {"data": [{"a": "4"}]}
        }))
        .unwrap()
        .value;

        let warnings = writer.write_document(&doc).unwrap();
        writer.flush().unwrap();

        let rejected: Vec<&str> = warnings.iter().map(|w| w.path()).collect();
        assert_eq!(rejected, vec!["..", "../escaped", "nested/name", "trailing/"]);
        assert!(warnings
            .iter()
            .all(|w| matches!(w, Warning::UnwritableBucketName { .. })));

        assert!(!root.path().join("escaped.jsonl").exists());
        assert!(!out.join("nested").exists());
        assert!(out.join("observed.jsonl").exists());
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 1);
    }
}
