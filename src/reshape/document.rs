use crate::reshape::compress::compress_records;
use crate::reshape::entry::BucketEntry;
use crate::reshape::error::{report, Warning};
use crate::reshape::types::{Document, Node, Outcome, ReshapeConfig};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

/// Walks experiment documents: classifies globals and buckets and rebuilds
/// them in decompressed, compressed or flattened form.
///
/// The reshaper never mutates its input and holds no per-document state, so a
/// single instance can serve any number of threads.
#[derive(Debug, Clone, Default)]
pub struct DocumentReshaper {
    config: ReshapeConfig,
}

impl DocumentReshaper {
    pub fn new(config: ReshapeConfig) -> Self {
        DocumentReshaper { config }
    }

    pub fn config(&self) -> &ReshapeConfig {
        &self.config
    }

    /// Names of every top-level bucket (any nested mapping), in key order
    pub fn list_bucket_names(&self, doc: &Document) -> Vec<String> {
        doc.iter()
            .filter(|(_, node)| matches!(node, Node::Bucket(_)))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Document-level scalar fields. A top-level record list belongs to no
    /// bucket and is dropped.
    pub fn global_values(&self, doc: &Document) -> Outcome<BTreeMap<String, String>> {
        let mut globals = BTreeMap::new();
        let mut warnings = Vec::new();

        for (key, node) in doc.iter() {
            match node {
                Node::Scalar(s) => {
                    globals.insert(key.clone(), s.clone());
                }
                Node::Bucket(_) => {}
                Node::RecordList(_) => {
                    report(&mut warnings, Warning::MisplacedRecordList { path: key.clone() })
                }
            }
        }

        Outcome::with_warnings(globals, warnings)
    }

    /// The bucket stored under `name`, decompressed.
    ///
    /// A missing bucket is an empty one. A name that holds something other
    /// than a bucket also yields an empty one, with a warning.
    pub fn bucket(&self, doc: &Document, name: &str) -> Outcome<BucketEntry> {
        match doc.get(name) {
            Some(Node::Bucket(fields)) => BucketEntry::from_fields(name, fields, &self.config),
            Some(other) => {
                let mut warnings = Vec::new();
                report(
                    &mut warnings,
                    Warning::NotABucket {
                        name: name.to_string(),
                        found: other.kind(),
                    },
                );
                Outcome::with_warnings(BucketEntry::empty(), warnings)
            }
            None => {
                trace!(bucket = name, "bucket missing, using empty bucket");
                Outcome::new(BucketEntry::empty())
            }
        }
    }

    /// Rebuild the document with every record list forward-filled and moved
    /// under its bucket's canonical key.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn decompress_all(&self, doc: &Document) -> Outcome<Document> {
        let (globals, mut warnings) = self.global_values(doc).into_parts();
        let mut all: Document = globals
            .into_iter()
            .map(|(k, v)| (k, Node::Scalar(v)))
            .collect();

        for name in self.list_bucket_names(doc) {
            let (entry, bucket_warnings) = self.bucket(doc, &name).into_parts();
            warnings.extend(bucket_warnings);

            let nested_key = self.config.canonical_key_for(&name).to_string();
            let (values, data_list) = entry.into_parts();

            let mut sub: BTreeMap<String, Node> = values
                .into_iter()
                .map(|(k, v)| (k, Node::Scalar(v)))
                .collect();
            sub.insert(nested_key, Node::RecordList(data_list));
            all.insert(name, Node::Bucket(sub));
        }

        debug!(fields = all.len(), warnings = warnings.len(), "decompressed document");
        Outcome::with_warnings(all, warnings)
    }

    /// Inverse of [`decompress_all`](Self::decompress_all): strip every value a
    /// record would inherit from its predecessors.
    ///
    /// Record lists stay under the key they were found under; verbatim lists
    /// (events) are left alone.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn compress_all(&self, doc: &Document) -> Outcome<Document> {
        let (globals, mut warnings) = self.global_values(doc).into_parts();
        let mut all: Document = globals
            .into_iter()
            .map(|(k, v)| (k, Node::Scalar(v)))
            .collect();

        for name in self.list_bucket_names(doc) {
            let Some(Node::Bucket(fields)) = doc.get(&name) else {
                continue;
            };

            let mut sub = BTreeMap::new();
            let mut list_seen = false;

            for (key, node) in fields {
                let path = format!("{}.{}", name, key);

                if !self.config.is_record_list_key(key) {
                    match node {
                        Node::Scalar(s) => {
                            sub.insert(key.clone(), Node::Scalar(s.clone()));
                        }
                        Node::Bucket(_) => report(&mut warnings, Warning::NestedBucket { path }),
                        Node::RecordList(_) => {
                            report(&mut warnings, Warning::MisplacedRecordList { path })
                        }
                    }
                    continue;
                }

                let records = match node {
                    Node::RecordList(records) => records,
                    other => {
                        report(
                            &mut warnings,
                            Warning::RecordListExpected {
                                path,
                                found: other.kind(),
                            },
                        );
                        continue;
                    }
                };

                if list_seen {
                    report(
                        &mut warnings,
                        Warning::DuplicateRecordList {
                            bucket: name.clone(),
                            key: key.clone(),
                        },
                    );
                    continue;
                }
                list_seen = true;

                let records = if self.config.is_verbatim_key(key) {
                    records.clone()
                } else {
                    compress_records(records, self.config.clear_policy)
                };
                sub.insert(key.clone(), Node::RecordList(records));
            }

            all.insert(name, Node::Bucket(sub));
        }

        Outcome::with_warnings(all, warnings)
    }

    /// Globals and every bucket's scalars in one map.
    ///
    /// Buckets are merged in name order after the globals; on a key
    /// collision the last one merged wins.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn flatten_globals(&self, doc: &Document) -> Outcome<BTreeMap<String, String>> {
        let (mut flat, mut warnings) = self.global_values(doc).into_parts();

        for name in self.list_bucket_names(doc) {
            let (entry, bucket_warnings) = self.bucket(doc, &name).into_parts();
            warnings.extend(bucket_warnings);

            let (values, _) = entry.into_parts();
            for (key, value) in values {
                if let Some(previous) = flat.insert(key.clone(), value) {
                    trace!(bucket = %name, key = %key, previous = %previous, "flattened value overwritten");
                }
            }
        }

        Outcome::with_warnings(flat, warnings)
    }

    /// The flattened scalars whose keys are in `keys`; missing keys are left out.
    pub fn extract(&self, doc: &Document, keys: &BTreeSet<String>) -> Outcome<BTreeMap<String, String>> {
        self.flatten_globals(doc).map(|flat| {
            flat.into_iter()
                .filter(|(key, _)| keys.contains(key))
                .collect()
        })
    }
}
