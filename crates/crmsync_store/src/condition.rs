//! Filter conditions on remote records.

use crate::types::{display_value, value_at_path, Attributes};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A predicate over a record's fields.
///
/// Missing fields compare as `null`. Field names may be dotted paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// `field = value`
    Eq {
        /// Field path.
        field: String,
        /// Expected value.
        value: Value,
    },
    /// `field != value`
    NotEq {
        /// Field path.
        field: String,
        /// Rejected value.
        value: Value,
    },
    /// `field = null`
    IsNull {
        /// Field path.
        field: String,
    },
    /// `field != null`
    NotNull {
        /// Field path.
        field: String,
    },
    /// `field IN (values)`
    In {
        /// Field path.
        field: String,
        /// Accepted values.
        values: Vec<Value>,
    },
}

impl Condition {
    /// Creates an equality condition.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Creates an inequality condition.
    pub fn not_eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::NotEq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Creates a null check.
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::IsNull {
            field: field.into(),
        }
    }

    /// Creates a not-null check.
    pub fn not_null(field: impl Into<String>) -> Self {
        Self::NotNull {
            field: field.into(),
        }
    }

    /// Creates a membership condition.
    pub fn one_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::In {
            field: field.into(),
            values,
        }
    }

    /// Returns the field path this condition tests.
    pub fn field(&self) -> &str {
        match self {
            Self::Eq { field, .. }
            | Self::NotEq { field, .. }
            | Self::IsNull { field }
            | Self::NotNull { field }
            | Self::In { field, .. } => field,
        }
    }

    /// Evaluates the condition against a set of fields.
    pub fn matches(&self, fields: &Attributes) -> bool {
        let actual = value_at_path(fields, self.field()).unwrap_or(&Value::Null);
        match self {
            Self::Eq { value, .. } => actual == value,
            Self::NotEq { value, .. } => actual != value,
            Self::IsNull { .. } => actual.is_null(),
            Self::NotNull { .. } => !actual.is_null(),
            Self::In { values, .. } => values.contains(actual),
        }
    }

    /// Returns true if every condition matches.
    pub fn all_match(conditions: &[Condition], fields: &Attributes) -> bool {
        conditions.iter().all(|condition| condition.matches(fields))
    }

    /// Renders a list of conditions as one `AND`-joined clause.
    pub fn render(conditions: &[Condition]) -> String {
        conditions
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::String(_) => format!("'{}'", display_value(value)),
        other => other.to_string(),
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq { field, value } => write!(f, "{field} = {}", literal(value)),
            Self::NotEq { field, value } => write!(f, "{field} != {}", literal(value)),
            Self::IsNull { field } => write!(f, "{field} = null"),
            Self::NotNull { field } => write!(f, "{field} != null"),
            Self::In { field, values } => {
                let rendered: Vec<String> = values.iter().map(literal).collect();
                write!(f, "{field} IN ({})", rendered.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields() -> Attributes {
        serde_json::from_value(json!({
            "Status": "Active",
            "Score": 3,
            "Owner": { "Id": "005X" },
        }))
        .unwrap()
    }

    #[test]
    fn evaluates_each_operator() {
        let fields = fields();
        assert!(Condition::eq("Status", "Active").matches(&fields));
        assert!(!Condition::not_eq("Status", "Active").matches(&fields));
        assert!(Condition::is_null("Missing").matches(&fields));
        assert!(Condition::not_null("Owner.Id").matches(&fields));
        assert!(Condition::one_of("Score", vec![json!(1), json!(3)]).matches(&fields));
        assert!(!Condition::one_of("Score", vec![json!(2)]).matches(&fields));
    }

    #[test]
    fn renders_soql_like_clause() {
        let conditions = vec![
            Condition::eq("Status", "Active"),
            Condition::not_null("Email"),
            Condition::one_of("Score", vec![json!(1), json!("two")]),
        ];
        assert_eq!(
            Condition::render(&conditions),
            "Status = 'Active' AND Email != null AND Score IN (1, 'two')"
        );
        assert_eq!(Condition::render(&[]), "");
    }

    #[test]
    fn deserializes_tagged_form() {
        let condition: Condition =
            serde_json::from_value(json!({ "op": "not_eq", "field": "Type", "value": "Partner" }))
                .unwrap();
        assert_eq!(condition, Condition::not_eq("Type", "Partner"));
    }
}
