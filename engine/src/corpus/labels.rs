//! Ground-truth label store
//!
//! Maps dump file names to the expected acceptance of that dump plus a hint
//! explaining why. Loaded once per run and never mutated.
//!
//! Accepted JSON shapes per entry:
//!
//! ```json
//! {
//!   "good_1.dat": {"accepted": "true", "hint": "well-formed header"},
//!   "neg_short.dat": [false, "Error", "header truncated", 100],
//!   "edge_1.dat": ["true", "zero-length payload is legal"]
//! }
//! ```
//!
//! The tuple form is what a labelling run writes out of raw validation
//! results: the first element is the acceptance, the rest become the hint.

use crate::error::{EngineError, EngineResult};
use crate::verdict::FrameVerdict;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Expected outcome for one dump
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundTruthLabel {
    pub expected_accepted: bool,
    pub hint: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLabel {
    Record {
        accepted: BoolLike,
        #[serde(default)]
        hint: String,
    },
    Tuple(Vec<Value>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BoolLike {
    Bool(bool),
    Text(String),
}

#[derive(Serialize)]
struct StoredLabel<'a> {
    accepted: String,
    hint: &'a str,
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn render_hint_part(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl RawLabel {
    fn into_label(self, id: &str) -> EngineResult<GroundTruthLabel> {
        match self {
            RawLabel::Record { accepted, hint } => {
                let expected_accepted = match accepted {
                    BoolLike::Bool(b) => b,
                    BoolLike::Text(s) => parse_bool(&s).ok_or_else(|| {
                        EngineError::invalid_labels(format!(
                            "label for {id}: accepted must be true or false, got {s:?}"
                        ))
                    })?,
                };
                Ok(GroundTruthLabel {
                    expected_accepted,
                    hint,
                })
            }
            RawLabel::Tuple(values) => {
                let (first, rest) = values.split_first().ok_or_else(|| {
                    EngineError::invalid_labels(format!("label for {id} is an empty list"))
                })?;
                let expected_accepted = match first {
                    Value::Bool(b) => *b,
                    Value::String(s) => parse_bool(s).ok_or_else(|| {
                        EngineError::invalid_labels(format!(
                            "label for {id}: first element must be true or false, got {s:?}"
                        ))
                    })?,
                    other => {
                        return Err(EngineError::invalid_labels(format!(
                            "label for {id}: first element must be a boolean, got {other}"
                        )))
                    }
                };
                let hint = rest
                    .iter()
                    .map(render_hint_part)
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok(GroundTruthLabel {
                    expected_accepted,
                    hint,
                })
            }
        }
    }
}

/// Read-only map from dump id to expected outcome
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroundTruth {
    labels: BTreeMap<String, GroundTruthLabel>,
}

impl GroundTruth {
    /// Load a JSON label store from disk
    pub fn load(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::invalid_labels(format!("cannot read {}: {e}", path.display()))
        })?;
        let truth = Self::from_json_str(&content)?;
        tracing::info!(path = %path.display(), labels = truth.len(), "Loaded ground truth");
        Ok(truth)
    }

    /// Parse a JSON label document
    pub fn from_json_str(content: &str) -> EngineResult<Self> {
        let raw: BTreeMap<String, RawLabel> = serde_json::from_str(content)
            .map_err(|e| EngineError::invalid_labels(e.to_string()))?;
        let mut labels = BTreeMap::new();
        for (id, entry) in raw {
            let label = entry.into_label(&id)?;
            labels.insert(id, label);
        }
        Ok(Self { labels })
    }

    /// Build from explicit labels
    pub fn from_labels<I>(labels: I) -> Self
    where
        I: IntoIterator<Item = (String, GroundTruthLabel)>,
    {
        Self {
            labels: labels.into_iter().collect(),
        }
    }

    /// Turn observed verdicts into labels: the verdict becomes the expectation
    /// and its severity and diagnostic become the hint
    pub fn from_verdicts(verdicts: &[FrameVerdict]) -> Self {
        let labels = verdicts
            .iter()
            .map(|v| {
                let hint = if v.message().is_empty() {
                    v.severity().label().to_string()
                } else {
                    format!("{}: {}", v.severity().label(), v.message())
                };
                (
                    v.frame.clone(),
                    GroundTruthLabel {
                        expected_accepted: v.accepted(),
                        hint,
                    },
                )
            })
            .collect();
        Self { labels }
    }

    /// Persist in record form (`{"id": {"accepted": "true", "hint": ...}}`)
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let stored: BTreeMap<&str, StoredLabel<'_>> = self
            .labels
            .iter()
            .map(|(id, label)| {
                (
                    id.as_str(),
                    StoredLabel {
                        accepted: label.expected_accepted.to_string(),
                        hint: &label.hint,
                    },
                )
            })
            .collect();
        let json = serde_json::to_string_pretty(&stored)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), labels = self.len(), "Wrote ground truth");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&GroundTruthLabel> {
        self.labels.get(id)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &GroundTruthLabel)> {
        self.labels.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::{Severity, Verdict};

    #[test]
    fn test_parses_all_entry_shapes() {
        let truth = GroundTruth::from_json_str(
            r#"{
                "good_1.dat": {"accepted": "true", "hint": "well-formed"},
                "neg_short.dat": [false, "Error", "truncated", 100],
                "edge_1.dat": ["TRUE", "zero payload is legal"],
                "bare.dat": {"accepted": false}
            }"#,
        )
        .unwrap();

        assert_eq!(truth.len(), 4);
        let good = truth.get("good_1.dat").unwrap();
        assert!(good.expected_accepted);
        assert_eq!(good.hint, "well-formed");

        let neg = truth.get("neg_short.dat").unwrap();
        assert!(!neg.expected_accepted);
        assert_eq!(neg.hint, "Error, truncated, 100");

        assert!(truth.get("edge_1.dat").unwrap().expected_accepted);
        assert_eq!(truth.get("bare.dat").unwrap().hint, "");
        assert!(truth.get("missing.dat").is_none());
    }

    #[test]
    fn test_rejects_non_boolean_acceptance() {
        let err = GroundTruth::from_json_str(r#"{"x.dat": {"accepted": "maybe"}}"#).unwrap_err();
        assert_eq!(err.code(), "INVALID_LABELS");
        let err = GroundTruth::from_json_str(r#"{"x.dat": []}"#).unwrap_err();
        assert_eq!(err.code(), "INVALID_LABELS");
        let err = GroundTruth::from_json_str(r#"{"x.dat": [3, "h"]}"#).unwrap_err();
        assert_eq!(err.code(), "INVALID_LABELS");
    }

    #[test]
    fn test_rejects_non_object_document() {
        assert!(GroundTruth::from_json_str("[1, 2]").is_err());
    }

    #[test]
    fn test_save_then_load_preserves_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.json");
        let truth = GroundTruth::from_labels([
            (
                "a.dat".to_string(),
                GroundTruthLabel {
                    expected_accepted: true,
                    hint: "ok".to_string(),
                },
            ),
            (
                "b_NEG.dat".to_string(),
                GroundTruthLabel {
                    expected_accepted: false,
                    hint: "bad length".to_string(),
                },
            ),
        ]);
        truth.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"accepted\": \"false\""));
        assert_eq!(GroundTruth::load(&path).unwrap(), truth);
    }

    #[test]
    fn test_from_verdicts() {
        let verdicts = vec![
            FrameVerdict::new("a.dat", Verdict::accepted(Severity::None, "")),
            FrameVerdict::new("b.dat", Verdict::rejected(Severity::Error, "bad checksum")),
        ];
        let truth = GroundTruth::from_verdicts(&verdicts);
        assert!(truth.get("a.dat").unwrap().expected_accepted);
        assert_eq!(truth.get("a.dat").unwrap().hint, "None");
        let b = truth.get("b.dat").unwrap();
        assert!(!b.expected_accepted);
        assert_eq!(b.hint, "Error: bad checksum");
    }
}
