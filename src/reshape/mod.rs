//! Bucket classification and record list (de)compression
//!
//! An experiment document holds global scalars and buckets. Each bucket holds
//! scalars of its own plus at most one record list, stored compressed: a
//! record omits every value it shares with the records before it.
//!
//! [`DocumentReshaper`] walks whole documents; [`BucketEntry`] is one
//! classified bucket; [`decompress_records`] and [`compress_records`] convert
//! a single record list between the two forms.

pub mod types;
pub mod error;
pub mod entry;
pub mod compress;
pub mod document;
pub mod writer;

pub use types::{get_or, ClearPolicy, Document, Node, Outcome, Record, ReshapeConfig};
pub use error::{ReshapeError, Warning};
pub use entry::{decompress_records, BucketEntry};
pub use compress::compress_records;
pub use document::DocumentReshaper;
pub use writer::{BucketWriter, DocumentWriter};
