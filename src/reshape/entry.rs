use crate::reshape::error::{report, Warning};
use crate::reshape::types::{ClearPolicy, Node, Outcome, Record, ReshapeConfig};
use std::collections::BTreeMap;
use tracing::debug;

/// One classified bucket of a document (weather, soil, management, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketEntry {
    values: BTreeMap<String, String>,
    data_list: Vec<Record>,
    list_key: Option<String>,
}

impl BucketEntry {
    /// A bucket with no scalars and no records
    pub fn empty() -> Self {
        BucketEntry::default()
    }

    /// Partition a bucket's fields into scalars and its record list.
    ///
    /// The record list is decompressed unless its key is one of the
    /// configured verbatim keys. Fields that fit neither role are dropped and
    /// reported in the outcome.
    pub fn from_fields(
        name: &str,
        fields: &BTreeMap<String, Node>,
        config: &ReshapeConfig,
    ) -> Outcome<BucketEntry> {
        let mut entry = BucketEntry::empty();
        let mut warnings = Vec::new();

        for (key, node) in fields {
            let path = format!("{}.{}", name, key);

            if config.is_record_list_key(key) {
                match node {
                    Node::RecordList(records) => {
                        if entry.list_key.is_some() {
                            report(
                                &mut warnings,
                                Warning::DuplicateRecordList {
                                    bucket: name.to_string(),
                                    key: key.clone(),
                                },
                            );
                            continue;
                        }

                        entry.data_list = if config.is_verbatim_key(key) {
                            records.clone()
                        } else {
                            decompress_records(records, config.clear_policy)
                        };
                        entry.list_key = Some(key.clone());
                    }
                    other => report(
                        &mut warnings,
                        Warning::RecordListExpected {
                            path,
                            found: other.kind(),
                        },
                    ),
                }
                continue;
            }

            match node {
                Node::Scalar(s) => {
                    entry.values.insert(key.clone(), s.clone());
                }
                Node::Bucket(_) => report(&mut warnings, Warning::NestedBucket { path }),
                Node::RecordList(_) => report(&mut warnings, Warning::MisplacedRecordList { path }),
            }
        }

        debug!(
            bucket = name,
            values = entry.values.len(),
            records = entry.data_list.len(),
            list_key = entry.list_key.as_deref().unwrap_or("-"),
            "classified bucket"
        );

        Outcome::with_warnings(entry, warnings)
    }

    /// Scalar fields of the bucket, without the record list
    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// The decompressed (or verbatim) record list
    pub fn data_list(&self) -> &[Record] {
        &self.data_list
    }

    /// Key the record list was read from, if the bucket had one
    pub fn list_key(&self) -> Option<&str> {
        self.list_key.as_deref()
    }

    pub fn into_parts(self) -> (BTreeMap<String, String>, Vec<Record>) {
        (self.values, self.data_list)
    }
}

/// Running field state during decompression. `None` marks a field that was
/// cleared under [`ClearPolicy::Persist`].
type Sticky<'a> = BTreeMap<&'a str, Option<&'a str>>;

/// Expand a compressed record list so every record carries its full field set.
///
/// Record 0 is copied verbatim and fixes the schema: fields it lacks never
/// show up in later records. A later record inherits every schema field it
/// doesn't mention, overrides the ones it sets to a non-empty value, and drops
/// the ones it sets to `""`.
pub fn decompress_records(records: &[Record], policy: ClearPolicy) -> Vec<Record> {
    let Some((first, rest)) = records.split_first() else {
        return Vec::new();
    };

    let sticky: Sticky = first
        .iter()
        .map(|(k, v)| (k.as_str(), Some(v.as_str())))
        .collect();

    let mut dense = Vec::with_capacity(records.len());
    dense.push(first.clone());

    rest.iter()
        .fold((sticky, dense), |(sticky, mut dense), source| {
            let (sticky, record) = fill(sticky, source, policy);
            dense.push(record);
            (sticky, dense)
        })
        .1
}

/// Merge one compressed record into the sticky state, returning the next
/// state and the dense record.
fn fill<'a>(mut sticky: Sticky<'a>, source: &'a Record, policy: ClearPolicy) -> (Sticky<'a>, Record) {
    let mut record = Record::new();

    for (key, slot) in sticky.iter_mut() {
        match source.get(*key).map(String::as_str) {
            Some("") => {
                if policy == ClearPolicy::Persist {
                    *slot = None;
                }
            }
            Some(value) => {
                *slot = Some(value);
                record.insert(key.to_string(), value.to_string());
            }
            None => {
                if let Some(value) = *slot {
                    record.insert(key.to_string(), value.to_string());
                }
            }
        }
    }

    (sticky, record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reshape::types::Document;
    use serde_json::json;

    fn rec(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn bucket_of(value: serde_json::Value) -> BTreeMap<String, Node> {
        let doc = Document::from_value(json!({ "b": value })).unwrap().value;
        doc.get("b").unwrap().as_bucket().unwrap().clone()
    }

    #[test]
    fn test_soil_layers_forward_fill() {
        let fields = bucket_of(json!({
            "site": "A",
            "soilLayer": [
                {"depth": "10", "texture": "clay"},
                {"depth": "20"},
                {"depth": "30", "texture": ""}
            ]
        }));

        let outcome = BucketEntry::from_fields("soil", &fields, &ReshapeConfig::default());
        assert!(outcome.is_clean());

        let entry = outcome.value;
        assert_eq!(entry.values().get("site").unwrap(), "A");
        assert_eq!(entry.list_key(), Some("soilLayer"));
        assert_eq!(
            entry.data_list(),
            &[
                rec(&[("depth", "10"), ("texture", "clay")]),
                rec(&[("depth", "20"), ("texture", "clay")]),
                rec(&[("depth", "30")]),
            ]
        );
    }

    #[test]
    fn test_events_kept_verbatim() {
        let fields = bucket_of(json!({
            "events": [
                {"event": "planting", "date": "19820226", "crid": "MZE"},
                {"event": "irrigation", "date": "19820301"}
            ]
        }));

        let entry = BucketEntry::from_fields("management", &fields, &ReshapeConfig::default()).value;
        assert_eq!(entry.data_list()[1], rec(&[("event", "irrigation"), ("date", "19820301")]));
    }

    #[test]
    fn test_inherits_latest_value_not_first() {
        let records = vec![
            rec(&[("tmax", "20"), ("tmin", "5")]),
            rec(&[("tmax", "22")]),
            rec(&[("tmin", "6")]),
        ];

        let dense = decompress_records(&records, ClearPolicy::RecordOnly);
        assert_eq!(dense[2], rec(&[("tmax", "22"), ("tmin", "6")]));
    }

    #[test]
    fn test_no_schema_growth() {
        let records = vec![rec(&[("depth", "10")]), rec(&[("depth", "20"), ("ph", "6.5")])];

        let dense = decompress_records(&records, ClearPolicy::RecordOnly);
        assert_eq!(dense[1], rec(&[("depth", "20")]));
    }

    #[test]
    fn test_clear_policies() {
        let records = vec![
            rec(&[("depth", "10"), ("texture", "clay")]),
            rec(&[("depth", "20"), ("texture", "")]),
            rec(&[("depth", "30")]),
            rec(&[("depth", "40"), ("texture", "loam")]),
        ];

        let record_only = decompress_records(&records, ClearPolicy::RecordOnly);
        assert_eq!(record_only[1], rec(&[("depth", "20")]));
        assert_eq!(record_only[2], rec(&[("depth", "30"), ("texture", "clay")]));

        let persist = decompress_records(&records, ClearPolicy::Persist);
        assert_eq!(persist[1], rec(&[("depth", "20")]));
        assert_eq!(persist[2], rec(&[("depth", "30")]));
        assert_eq!(persist[3], rec(&[("depth", "40"), ("texture", "loam")]));
    }

    #[test]
    fn test_short_inputs() {
        assert!(decompress_records(&[], ClearPolicy::RecordOnly).is_empty());

        let single = vec![rec(&[("a", ""), ("b", "1")])];
        assert_eq!(decompress_records(&single, ClearPolicy::RecordOnly), single);
    }

    #[test]
    fn test_misfit_fields_reported() {
        let fields = bucket_of(json!({
            "wst_id": "UFGA",
            "dailyWeather": "not a list",
            "extra": {"nested": "x"},
            "rows": [{"a": "1"}]
        }));

        let outcome = BucketEntry::from_fields("weather", &fields, &ReshapeConfig::default());
        let entry = &outcome.value;
        assert_eq!(entry.values().len(), 1);
        assert!(entry.data_list().is_empty());
        assert_eq!(entry.list_key(), None);

        assert_eq!(
            outcome.warnings,
            vec![
                Warning::RecordListExpected {
                    path: "weather.dailyWeather".to_string(),
                    found: "string",
                },
                Warning::NestedBucket {
                    path: "weather.extra".to_string(),
                },
                Warning::MisplacedRecordList {
                    path: "weather.rows".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_second_record_list_ignored() {
        let fields = bucket_of(json!({
            "data": [{"a": "1"}],
            "timeSeries": [{"b": "2"}]
        }));

        let outcome = BucketEntry::from_fields("observed", &fields, &ReshapeConfig::default());
        assert_eq!(outcome.value.list_key(), Some("data"));
        assert!(matches!(
            &outcome.warnings[..],
            [Warning::DuplicateRecordList { key, .. }] if key == "timeSeries"
        ));
    }

    #[test]
    fn test_partition_completeness() {
        let fields = bucket_of(json!({
            "site": "A",
            "elev": "12",
            "soilLayer": [{"depth": "10"}]
        }));

        let entry = BucketEntry::from_fields("soil", &fields, &ReshapeConfig::default()).value;
        let mut keys: Vec<&str> = entry.values().keys().map(String::as_str).collect();
        keys.extend(entry.list_key());
        keys.sort_unstable();

        let expected: Vec<&str> = fields.keys().map(String::as_str).collect();
        assert_eq!(keys, expected);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn records(value: &'static str) -> impl Strategy<Value = Vec<Record>> {
            let key = prop::sample::select(vec!["a", "b", "c", "d"]);
            let record = prop::collection::btree_map(key.prop_map(String::from), value, 0..4);
            prop::collection::vec(record, 0..8)
        }

        /// Value of `key` at `i` computed by looking backwards
        fn expected(records: &[Record], i: usize, key: &str) -> Option<String> {
            match records[i].get(key).map(String::as_str) {
                Some("") if i > 0 => return None,
                Some(v) if i > 0 => return Some(v.to_string()),
                _ => {}
            }
            for j in (1..i).rev() {
                match records[j].get(key).map(String::as_str) {
                    Some("") | None => continue,
                    Some(v) => return Some(v.to_string()),
                }
            }
            records[0].get(key).cloned()
        }

        proptest! {
            #[test]
            fn should_keep_length_and_first_record(input in records("[xyz]{0,2}")) {
                let dense = decompress_records(&input, ClearPolicy::RecordOnly);
                prop_assert_eq!(dense.len(), input.len());
                if let Some(first) = input.first() {
                    prop_assert_eq!(&dense[0], first);
                }
            }

            #[test]
            fn should_forward_fill_from_latest_value(input in records("[xyz]{0,2}")) {
                let dense = decompress_records(&input, ClearPolicy::RecordOnly);
                for i in 1..input.len() {
                    for key in input[0].keys() {
                        prop_assert_eq!(dense[i].get(key).cloned(), expected(&input, i, key));
                    }
                    for key in dense[i].keys() {
                        prop_assert!(input[0].contains_key(key));
                    }
                }
            }

            #[test]
            fn should_be_idempotent_without_clears(input in records("[xyz]{1,2}")) {
                let once = decompress_records(&input, ClearPolicy::RecordOnly);
                let twice = decompress_records(&once, ClearPolicy::RecordOnly);
                prop_assert_eq!(once, twice);
            }
        }
    }
}
