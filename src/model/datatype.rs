//! Datatype validation for literal field values.
//!
//! A [`Datatype`] is loaded once from the vocabulary and never mutated.
//! Validation is a pure function of the definition and the value; no
//! side effects, no coercion of the stored value.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A named validation rule for primitive values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datatype {
    pub name: String,
    #[serde(flatten)]
    pub kind: DatatypeKind,
}

/// The primitive kinds the vocabulary can declare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatatypeKind {
    /// Character-constrained string. An empty allow-list means
    /// "any character not explicitly forbidden".
    String {
        #[serde(default)]
        allowed: String,
        #[serde(default)]
        forbidden: String,
    },
    /// Integer or decimal number with optional inclusive bounds.
    Number {
        #[serde(default)]
        decimals: bool,
        #[serde(default, deserialize_with = "unbounded_sentinel")]
        min: Option<f64>,
        #[serde(default, deserialize_with = "unbounded_sentinel")]
        max: Option<f64>,
    },
    /// Closed value set.
    Enum { values: Vec<String> },
    /// Parseable calendar date/time.
    Date,
}

/// Vocabulary sources write `"/"` for an unbounded side; accept that
/// sentinel as well as a plain number or null.
fn unbounded_sentinel<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Bound {
        Number(f64),
        Text(String),
        None,
    }
    match Bound::deserialize(deserializer)? {
        Bound::Number(n) => Ok(Some(n)),
        Bound::Text(s) if s == "/" || s.is_empty() => Ok(None),
        Bound::Text(s) => s
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid bound '{s}'"))),
        Bound::None => Ok(None),
    }
}

/// Date/time formats accepted by the `date` kind, tried in order after
/// RFC 3339.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d",
    "%d.%m.%Y",
    "%m/%d/%Y",
];

impl Datatype {
    /// Validate a literal value against this definition.
    pub fn is_valid(&self, value: &Value) -> bool {
        match &self.kind {
            DatatypeKind::String { allowed, forbidden } => {
                let Some(text) = value.as_str() else {
                    return false;
                };
                text.chars().all(|c| {
                    (allowed.is_empty() || allowed.contains(c)) && !forbidden.contains(c)
                })
            }
            DatatypeKind::Number { decimals, min, max } => {
                let Some(n) = parse_number(value, *decimals) else {
                    return false;
                };
                min.map_or(true, |lo| n >= lo) && max.map_or(true, |hi| n <= hi)
            }
            DatatypeKind::Enum { values } => value
                .as_str()
                .map_or(false, |text| values.iter().any(|v| v == text)),
            DatatypeKind::Date => value.as_str().map_or(false, parse_date),
        }
    }
}

/// Parse a JSON number or numeric string. Integer datatypes reject
/// fractional input.
fn parse_number(value: &Value, decimals: bool) -> Option<f64> {
    match value {
        Value::Number(n) => {
            if !decimals && n.as_i64().is_none() && n.as_u64().is_none() {
                return None;
            }
            n.as_f64()
        }
        Value::String(s) => {
            if decimals {
                s.trim().parse::<f64>().ok()
            } else {
                s.trim().parse::<i64>().ok().map(|i| i as f64)
            }
        }
        _ => None,
    }
}

fn parse_date(text: &str) -> bool {
    if chrono::DateTime::parse_from_rfc3339(text).is_ok() {
        return true;
    }
    DATE_FORMATS.iter().any(|fmt| {
        chrono::NaiveDateTime::parse_from_str(text, fmt).is_ok()
            || NaiveDate::parse_from_str(text, fmt).is_ok()
    })
}
