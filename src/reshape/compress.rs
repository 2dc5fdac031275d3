use crate::reshape::types::{ClearPolicy, Record};
use std::collections::BTreeMap;

/// Strip inherited values from a dense record list.
///
/// Record 0 is kept whole. Each later record keeps only the fields that
/// differ from what decompression would carry forward, and marks schema
/// fields it lacks with `""`. Fields outside record 0's schema are passed
/// through untouched; decompression ignores them.
pub fn compress_records(records: &[Record], policy: ClearPolicy) -> Vec<Record> {
    let Some((first, rest)) = records.split_first() else {
        return Vec::new();
    };

    let mut sticky: BTreeMap<&str, Option<&str>> = first
        .iter()
        .map(|(k, v)| (k.as_str(), Some(v.as_str())))
        .collect();

    let mut sparse = Vec::with_capacity(records.len());
    sparse.push(first.clone());

    for dense in rest {
        let mut record = Record::new();

        for (key, slot) in sticky.iter_mut() {
            match (dense.get(*key).map(String::as_str), *slot) {
                (Some(value), Some(current)) if value == current => {}
                // An empty value can't be expressed without reading as a clear.
                (Some(""), _) => {}
                (Some(value), _) => {
                    record.insert(key.to_string(), value.to_string());
                    *slot = Some(value);
                }
                (None, None) => {}
                (None, Some(_)) => {
                    record.insert(key.to_string(), String::new());
                    if policy == ClearPolicy::Persist {
                        *slot = None;
                    }
                }
            }
        }

        for (key, value) in dense {
            if !sticky.contains_key(key.as_str()) {
                record.insert(key.clone(), value.clone());
            }
        }

        sparse.push(record);
    }

    sparse
}
