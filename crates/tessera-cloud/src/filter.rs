//! List filters sent in the `X-Filter` header

use serde_json::{Map, Value};

/// Filter for list calls
///
/// An identifier, when known, is the most specific key and replaces the
/// label. Tags are only sent when non-empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Filter {
    /// Remote identifier
    pub id: Option<i64>,
    /// Resource label
    pub label: Option<String>,
    /// Tags that must all be present
    pub tags: Vec<String>,
}

impl Filter {
    /// Filter on identifier and label
    pub fn new(id: Option<i64>, label: impl Into<String>) -> Self {
        Self {
            id,
            label: Some(label.into()),
            tags: Vec::new(),
        }
    }

    /// Render the filter as the JSON string the API expects
    ///
    /// Returns `None` for an empty filter so callers can skip the header.
    pub fn to_header(&self) -> Option<String> {
        let mut map = Map::new();
        if let Some(id) = self.id {
            map.insert("id".to_string(), Value::from(id));
        } else if let Some(label) = &self.label {
            map.insert("label".to_string(), Value::from(label.clone()));
        }
        if !self.tags.is_empty() {
            map.insert(
                "tags".to_string(),
                Value::from(self.tags.iter().cloned().collect::<Vec<_>>()),
            );
        }
        if map.is_empty() {
            None
        } else {
            Some(Value::Object(map).to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_only() {
        let f = Filter::new(None, "workers");
        assert_eq!(f.to_header().as_deref(), Some(r#"{"label":"workers"}"#));
    }

    #[test]
    fn id_wins_over_label() {
        let f = Filter::new(Some(42), "workers");
        assert_eq!(f.to_header().as_deref(), Some(r#"{"id":42}"#));
    }

    #[test]
    fn empty_filter_has_no_header() {
        assert!(Filter::default().to_header().is_none());
    }

    #[test]
    fn tags_are_included_when_present() {
        let f = Filter {
            tags: vec!["a".to_string()],
            ..Filter::new(None, "x")
        };
        assert_eq!(f.to_header().as_deref(), Some(r#"{"label":"x","tags":["a"]}"#));
    }
}
