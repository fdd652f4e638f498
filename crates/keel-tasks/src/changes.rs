//! Field-wise differences between the live and desired object

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use keel_common::{Error, Result};

/// Fields never considered when diffing
const IGNORED_FIELDS: &[&str] = &["lifecycle"];

/// One field that differs
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldChange {
    /// Serialized field name
    pub field: String,
    /// Live value (null when creating)
    pub actual: Value,
    /// Desired value
    pub expected: Value,
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.field, self.actual, self.expected)
    }
}

/// The set of fields a render must apply
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Changes {
    fields: Vec<FieldChange>,
}

impl Changes {
    /// Diff `expected` against `actual`
    ///
    /// Fields the expected object leaves unset (null or absent) are not
    /// compared. With no actual object every set field is a change.
    pub fn build<T: Serialize>(actual: Option<&T>, expected: &T) -> Result<Self> {
        let expected = as_object(expected)?;
        let actual = match actual {
            Some(a) => as_object(a)?,
            None => Map::new(),
        };

        let mut fields = Vec::new();
        for (field, want) in expected {
            if want.is_null() || IGNORED_FIELDS.contains(&field.as_str()) {
                continue;
            }
            let have = actual.get(&field).cloned().unwrap_or(Value::Null);
            if have != want {
                fields.push(FieldChange {
                    field,
                    actual: have,
                    expected: want,
                });
            }
        }
        fields.sort_by(|a, b| a.field.cmp(&b.field));
        Ok(Self { fields })
    }

    /// No differences
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of differing fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if `field` differs
    pub fn has(&self, field: &str) -> bool {
        self.fields.iter().any(|c| c.field == field)
    }

    /// The change to `field`, if any
    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.fields.iter().find(|c| c.field == field)
    }

    /// All changes, sorted by field name
    pub fn fields(&self) -> &[FieldChange] {
        &self.fields
    }

    /// Names of the differing fields
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|c| c.field.as_str()).collect()
    }

    /// Fail if any of `immutable` differs on an existing object
    pub fn reject_immutable(&self, kind: &str, immutable: &[&str]) -> Result<()> {
        match self.fields.iter().find(|c| immutable.contains(&c.field.as_str())) {
            Some(change) => Err(Error::cannot_change_field(format!(
                "{kind}.{} ({} -> {})",
                change.field, change.actual, change.expected
            ))),
            None => Ok(()),
        }
    }
}

fn as_object<T: Serialize>(value: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::serialization(format!(
            "task must serialize to an object, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Server {
        name: String,
        commercial_type: Option<String>,
        tags: Vec<String>,
        lifecycle: String,
    }

    fn server(commercial_type: Option<&str>, tags: &[&str], lifecycle: &str) -> Server {
        Server {
            name: "nodes".into(),
            commercial_type: commercial_type.map(str::to_string),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            lifecycle: lifecycle.into(),
        }
    }

    #[test]
    fn creation_lists_every_set_field() {
        let changes = Changes::build(None, &server(Some("DEV1-M"), &["a"], "Sync")).unwrap();
        assert_eq!(changes.field_names(), vec!["commercialType", "name", "tags"]);
    }

    #[test]
    fn unset_expected_fields_are_ignored() {
        let actual = server(Some("DEV1-M"), &["a"], "Sync");
        let changes = Changes::build(Some(&actual), &server(None, &["a"], "Ignore")).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn differing_fields_are_reported() {
        let actual = server(Some("DEV1-M"), &["a"], "Sync");
        let changes = Changes::build(Some(&actual), &server(Some("DEV1-L"), &["a", "b"], "Sync")).unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.has("tags"));
        let change = changes.get("commercialType").unwrap();
        assert_eq!(change.actual, Value::from("DEV1-M"));
        assert_eq!(change.expected, Value::from("DEV1-L"));
    }

    #[test]
    fn immutable_field_changes_are_rejected() {
        let actual = server(Some("DEV1-M"), &[], "Sync");
        let changes = Changes::build(Some(&actual), &server(Some("DEV1-L"), &[], "Sync")).unwrap();
        let err = changes
            .reject_immutable("Instance", &["commercialType"])
            .unwrap_err();
        assert!(err.to_string().contains("Instance.commercialType"));
        assert!(changes.reject_immutable("Instance", &["name"]).is_ok());
    }
}
