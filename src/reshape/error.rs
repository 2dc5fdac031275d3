use thiserror::Error;
use tracing::error;

/// Hard failures. Content problems never end up here unless the caller asks
/// for strict handling via [`Outcome::into_strict`](crate::reshape::Outcome::into_strict).
#[derive(Debug, Error)]
pub enum ReshapeError {
    #[error("document root must be a JSON object, found {0}")]
    NotAnObject(&'static str),

    #[error("failed to parse document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{} field(s) dropped while reshaping, first: {}", .0.len(), first_warning(.0))]
    Strict(Vec<Warning>),
}

fn first_warning(warnings: &[Warning]) -> String {
    warnings
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}

/// A non-fatal problem found while classifying or decompressing a document.
///
/// Each variant carries the dotted path of the offending field, e.g.
/// `weather.dailyWeather[3].tmax`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Warning {
    #[error("dropped {kind} value at {path}, expected a string")]
    NonStringValue { path: String, kind: &'static str },

    #[error("dropped {kind} element at {path}, expected an object")]
    NonRecordElement { path: String, kind: &'static str },

    #[error("dropped record list at {path}, lists only belong under a bucket's list key")]
    MisplacedRecordList { path: String },

    #[error("dropped nested bucket at {path}, buckets cannot contain buckets")]
    NestedBucket { path: String },

    #[error("expected a record list at {path}, found {found}")]
    RecordListExpected { path: String, found: &'static str },

    #[error("bucket {bucket} has a second record list under {key}, ignored")]
    DuplicateRecordList { bucket: String, key: String },

    #[error("{name} is a {found}, not a bucket")]
    NotABucket { name: String, found: &'static str },

    #[error("bucket {name:?} is not a plain file name, records not written")]
    UnwritableBucketName { name: String },
}

impl Warning {
    /// Path of the field this warning refers to.
    pub fn path(&self) -> &str {
        match self {
            Warning::NonStringValue { path, .. }
            | Warning::NonRecordElement { path, .. }
            | Warning::MisplacedRecordList { path }
            | Warning::NestedBucket { path }
            | Warning::RecordListExpected { path, .. } => path,
            Warning::DuplicateRecordList { bucket, .. } => bucket,
            Warning::NotABucket { name, .. } | Warning::UnwritableBucketName { name } => name,
        }
    }
}

/// Log a dropped field and keep it for the caller.
pub(crate) fn report(warnings: &mut Vec<Warning>, warning: Warning) {
    error!(path = warning.path(), "{}", warning);
    warnings.push(warning);
}
