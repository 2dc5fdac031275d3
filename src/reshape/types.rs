use crate::reshape::error::{report, ReshapeError, Warning};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::trace;

/// One row of a data list: a daily weather entry, a soil layer, an event.
pub type Record = BTreeMap<String, String>;

/// A node of an experiment document.
///
/// Top-level keys hold either a `Scalar` (a global) or a `Bucket`. Inside a
/// bucket, scalars sit next to at most one `RecordList`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Node {
    Scalar(String),
    Bucket(BTreeMap<String, Node>),
    RecordList(Vec<Record>),
}

impl Node {
    pub fn scalar(value: impl Into<String>) -> Self {
        Node::Scalar(value.into())
    }

    /// Short name of the variant, used in warnings
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Scalar(_) => "string",
            Node::Bucket(_) => "bucket",
            Node::RecordList(_) => "record list",
        }
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Node::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bucket(&self) -> Option<&BTreeMap<String, Node>> {
        match self {
            Node::Bucket(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Node::Scalar(s) => Value::String(s),
            Node::Bucket(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, v.into_value()))
                    .collect(),
            ),
            Node::RecordList(records) => Value::Array(
                records
                    .into_iter()
                    .map(|record| {
                        Value::Object(
                            record
                                .into_iter()
                                .map(|(k, v)| (k, Value::String(v)))
                                .collect(),
                        )
                    })
                    .collect(),
            ),
        }
    }
}

/// A whole experiment document: globals and buckets keyed by name.
///
/// Keys are kept sorted so every traversal, and therefore every
/// last-write-wins merge, happens in the same order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Document {
    fields: BTreeMap<String, Node>,
}

impl Document {
    pub fn new() -> Self {
        Document::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, node: Node) -> Option<Node> {
        self.fields.insert(key.into(), node)
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.fields.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Node)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build a document from loosely-typed JSON.
    ///
    /// Strings become scalars, objects become buckets and arrays become record
    /// lists. Anything JSON can hold but a document can't (numbers, booleans,
    /// non-object list elements, non-string record fields) is dropped and
    /// reported. `null` means "no value" and is skipped without a warning.
    ///
    /// Only a non-object root is an error.
    pub fn from_value(value: Value) -> Result<Outcome<Document>, ReshapeError> {
        let obj = match value {
            Value::Object(obj) => obj,
            other => return Err(ReshapeError::NotAnObject(json_kind(&other))),
        };

        let mut warnings = Vec::new();
        let fields = convert_object(obj, None, &mut warnings);
        Ok(Outcome::with_warnings(Document { fields }, warnings))
    }

    pub fn into_value(self) -> Value {
        Node::Bucket(self.fields).into_value()
    }
}

impl FromIterator<(String, Node)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Node)>>(iter: I) -> Self {
        Document {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Document {
    type Item = (String, Node);
    type IntoIter = std::collections::btree_map::IntoIter<String, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

fn join_path(parent: Option<&str>, key: &str) -> String {
    match parent {
        Some(p) => format!("{}.{}", p, key),
        None => key.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn convert_object(
    obj: Map<String, Value>,
    parent: Option<&str>,
    warnings: &mut Vec<Warning>,
) -> BTreeMap<String, Node> {
    let mut fields = BTreeMap::new();

    for (key, value) in obj.into_iter() {
        let path = join_path(parent, &key);
        match value {
            Value::Null => {
                trace!(path = %path, "skipping null field");
            }
            Value::String(s) => {
                fields.insert(key, Node::Scalar(s));
            }
            Value::Object(nested) => {
                let nested = convert_object(nested, Some(&path), warnings);
                fields.insert(key, Node::Bucket(nested));
            }
            Value::Array(items) => {
                let records = convert_records(items, &path, warnings);
                fields.insert(key, Node::RecordList(records));
            }
            other @ (Value::Bool(_) | Value::Number(_)) => {
                report(
                    warnings,
                    Warning::NonStringValue {
                        path,
                        kind: json_kind(&other),
                    },
                );
            }
        }
    }

    fields
}

fn convert_records(items: Vec<Value>, path: &str, warnings: &mut Vec<Warning>) -> Vec<Record> {
    let mut records = Vec::with_capacity(items.len());

    for (idx, item) in items.into_iter().enumerate() {
        let item_path = format!("{}[{}]", path, idx);
        let obj = match item {
            Value::Object(obj) => obj,
            other => {
                report(
                    warnings,
                    Warning::NonRecordElement {
                        path: item_path,
                        kind: json_kind(&other),
                    },
                );
                continue;
            }
        };

        let mut record = Record::new();
        for (key, value) in obj.into_iter() {
            match value {
                Value::String(s) => {
                    record.insert(key, s);
                }
                Value::Null => {}
                other => report(
                    warnings,
                    Warning::NonStringValue {
                        path: join_path(Some(&item_path), &key),
                        kind: json_kind(&other),
                    },
                ),
            }
        }
        records.push(record);
    }

    records
}

/// A reshaping result together with everything that was dropped on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub warnings: Vec<Warning>,
}

impl<T> Outcome<T> {
    pub fn new(value: T) -> Self {
        Outcome {
            value,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(value: T, warnings: Vec<Warning>) -> Self {
        Outcome { value, warnings }
    }

    /// True when nothing was dropped
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            warnings: self.warnings,
        }
    }

    pub fn into_parts(self) -> (T, Vec<Warning>) {
        (self.value, self.warnings)
    }

    /// Fail if anything was dropped.
    pub fn into_strict(self) -> Result<T, ReshapeError> {
        if self.warnings.is_empty() {
            Ok(self.value)
        } else {
            Err(ReshapeError::Strict(self.warnings))
        }
    }
}

/// What an explicit empty string in a compressed record does to later records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClearPolicy {
    /// The field is omitted from that record only; later records that don't
    /// mention it inherit the value it had before the clear.
    #[default]
    RecordOnly,
    /// The clear carries forward until a later record sets a non-empty value.
    Persist,
}

const RECORD_LIST_KEYS: [&str; 5] = ["data", "soilLayer", "dailyWeather", "events", "timeSeries"];

const CANONICAL_LIST_KEYS: [(&str, &str); 5] = [
    ("initial_conditions", "soilLayer"),
    ("soil", "soilLayer"),
    ("weather", "dailyWeather"),
    ("management", "events"),
    ("observed", "timeSeries"),
];

/// Configuration for classifying and decompressing documents
#[derive(Debug, Clone)]
pub struct ReshapeConfig {
    /// Bucket keys that hold a record list rather than a scalar
    pub record_list_keys: Vec<String>,

    /// Record list keys stored as-is, never forward-filled (events)
    pub verbatim_keys: Vec<String>,

    /// Output record list key per bucket name, used by `decompress_all`
    pub canonical_keys: BTreeMap<String, String>,

    /// Output record list key for buckets missing from `canonical_keys`
    pub default_list_key: String,

    /// How explicit empty strings behave during decompression
    pub clear_policy: ClearPolicy,
}

impl Default for ReshapeConfig {
    fn default() -> Self {
        ReshapeConfig {
            record_list_keys: RECORD_LIST_KEYS.iter().map(|k| k.to_string()).collect(),
            verbatim_keys: vec![String::from("events")],
            canonical_keys: CANONICAL_LIST_KEYS
                .iter()
                .map(|(bucket, key)| (bucket.to_string(), key.to_string()))
                .collect(),
            default_list_key: String::from("data"),
            clear_policy: ClearPolicy::default(),
        }
    }
}

impl ReshapeConfig {
    pub fn with_clear_policy(mut self, policy: ClearPolicy) -> Self {
        self.clear_policy = policy;
        self
    }

    pub fn with_canonical_key(mut self, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        self.canonical_keys.insert(bucket.into(), key.into());
        self
    }

    pub fn is_record_list_key(&self, key: &str) -> bool {
        self.record_list_keys.iter().any(|k| k == key)
    }

    pub fn is_verbatim_key(&self, key: &str) -> bool {
        self.verbatim_keys.iter().any(|k| k == key)
    }

    /// Key a bucket's record list is written under after decompression
    pub fn canonical_key_for(&self, bucket: &str) -> &str {
        get_or::<String>(&self.canonical_keys, bucket, &self.default_list_key)
    }
}

/// `map[key]`, or `default` when the key is absent.
pub fn get_or<'a, V>(map: &'a BTreeMap<String, V>, key: &str, default: &'a V) -> &'a V {
    map.get(key).unwrap_or(default)
}
