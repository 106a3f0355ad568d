//! Core domain model for the mission/resource linker.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "mrl-core";

/// Label used in statistics when a row carries no `type`.
pub const UNKNOWN_TYPE: &str = "Unknown";

/// One tabular row: field name -> raw string value.
pub type Record = BTreeMap<String, String>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("{dataset} row {row}: missing required field `{field}`")]
    MissingField {
        dataset: String,
        row: usize,
        field: &'static str,
    },
}

fn field_or_empty(record: &Record, name: &str) -> String {
    record.get(name).cloned().unwrap_or_default()
}

fn non_empty(record: &Record, name: &str) -> Option<String> {
    record
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn required_id(record: &Record, dataset: &str, row: usize) -> Result<String, RecordError> {
    non_empty(record, "id").ok_or_else(|| RecordError::MissingField {
        dataset: dataset.to_string(),
        row,
        field: "id",
    })
}

/// Task record that should point at supporting material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mission {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub resource_id: Option<String>,
}

impl Mission {
    /// `row` is 1-based and only used for error messages.
    pub fn from_record(record: &Record, row: usize) -> Result<Self, RecordError> {
        Ok(Self {
            id: required_id(record, "missions", row)?,
            title: field_or_empty(record, "title"),
            description: field_or_empty(record, "description"),
            kind: non_empty(record, "type"),
            resource_id: non_empty(record, "resource_id"),
        })
    }

    pub fn type_label(&self) -> &str {
        self.kind.as_deref().unwrap_or(UNKNOWN_TYPE)
    }
}

/// Supporting document or material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl Resource {
    pub fn from_record(record: &Record, row: usize) -> Result<Self, RecordError> {
        Ok(Self {
            id: required_id(record, "resources", row)?,
            title: field_or_empty(record, "title"),
            description: field_or_empty(record, "description"),
            kind: non_empty(record, "type"),
        })
    }

    pub fn type_label(&self) -> &str {
        self.kind.as_deref().unwrap_or(UNKNOWN_TYPE)
    }
}

pub fn missions_from_records(records: &[Record]) -> Result<Vec<Mission>, RecordError> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| Mission::from_record(r, i + 1))
        .collect()
}

pub fn resources_from_records(records: &[Record]) -> Result<Vec<Resource>, RecordError> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| Resource::from_record(r, i + 1))
        .collect()
}

/// Accepted link between a mission and its best-scoring resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub mission_id: String,
    pub mission_title: String,
    pub resource_id: String,
    pub resource_title: String,
    pub score: f64,
}

/// Per-mission decision; `matched` is `None` when nothing cleared the threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub mission_id: String,
    pub mission_title: String,
    pub matched: Option<MatchResult>,
}

/// Result of one matching pass, both lists in mission input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub matches: Vec<MatchResult>,
    pub unmatched: Vec<String>,
}

impl MatchOutcome {
    pub fn from_verdicts(verdicts: &[Verdict]) -> Self {
        let mut outcome = Self::default();
        for verdict in verdicts {
            match &verdict.matched {
                Some(m) => outcome.matches.push(m.clone()),
                None => outcome.unmatched.push(verdict.mission_id.clone()),
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn mission_blank_resource_id_is_null() {
        let m = Mission::from_record(
            &record(&[("id", "m1"), ("title", "T"), ("resource_id", "  ")]),
            1,
        )
        .expect("mission");
        assert_eq!(m.resource_id, None);
        assert_eq!(m.description, "");
        assert_eq!(m.type_label(), UNKNOWN_TYPE);
    }

    #[test]
    fn missing_id_names_dataset_and_row() {
        let err = resources_from_records(&[
            record(&[("id", "r1")]),
            record(&[("title", "orphan")]),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            RecordError::MissingField {
                dataset: "resources".into(),
                row: 2,
                field: "id",
            }
        );
        assert_eq!(err.to_string(), "resources row 2: missing required field `id`");
    }

    #[test]
    fn outcome_splits_verdicts_in_order() {
        let verdicts = vec![
            Verdict {
                mission_id: "m1".into(),
                mission_title: "A".into(),
                matched: None,
            },
            Verdict {
                mission_id: "m2".into(),
                mission_title: "B".into(),
                matched: Some(MatchResult {
                    mission_id: "m2".into(),
                    mission_title: "B".into(),
                    resource_id: "r9".into(),
                    resource_title: "Z".into(),
                    score: 0.5,
                }),
            },
            Verdict {
                mission_id: "m3".into(),
                mission_title: "C".into(),
                matched: None,
            },
        ];
        let outcome = MatchOutcome::from_verdicts(&verdicts);
        assert_eq!(outcome.unmatched, vec!["m1".to_string(), "m3".to_string()]);
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].resource_id, "r9");
    }

    #[test]
    fn type_column_is_kept() {
        let r = Resource::from_record(&record(&[("id", "r1"), ("type", "video")]), 1).expect("resource");
        assert_eq!(r.type_label(), "video");
    }
}
