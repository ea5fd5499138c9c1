//! Identity values: where an instance lives and what it is called.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Remote-store location plus tenancy scope. Immutable once built;
/// instances carry it by value inside their identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceHeader {
    /// Context-broker base URL
    pub cb_url: String,
    /// IoT-agent base URL
    pub iota_url: String,
    /// Protocol version tag (e.g. `"v2"`)
    #[serde(default = "default_ngsi_version")]
    pub ngsi_version: String,
    /// Tenant (multi-tenancy service)
    #[serde(default)]
    pub service: String,
    /// Tenant scope path (e.g. `"/"`)
    #[serde(default = "default_service_path")]
    pub service_path: String,
}

fn default_ngsi_version() -> String {
    "v2".to_string()
}

fn default_service_path() -> String {
    "/".to_string()
}

impl Default for InstanceHeader {
    fn default() -> Self {
        Self {
            cb_url: "http://localhost:1026".to_string(),
            iota_url: "http://localhost:4041".to_string(),
            ngsi_version: default_ngsi_version(),
            service: String::new(),
            service_path: default_service_path(),
        }
    }
}

/// Globally unique key of one instance: `(id, class, header)`.
///
/// Two instances with an equal identifier always refer to the same
/// registry entry; the registry enforces at-most-one live instance per
/// identifier within a process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceIdentifier {
    /// Entity id
    pub id: String,
    /// Class name (remote entity type)
    #[serde(rename = "type")]
    pub class: String,
    /// Where the instance lives
    pub header: InstanceHeader,
}

impl InstanceIdentifier {
    pub fn new(
        id: impl Into<String>,
        class: impl Into<String>,
        header: InstanceHeader,
    ) -> Self {
        Self {
            id: id.into(),
            class: class.into(),
            header,
        }
    }

    /// Canonical JSON text of this identifier. Used as the key inside the
    /// reserved `referencedBy` attribute, where JSON object keys must be
    /// strings.
    pub fn canonical_json(&self) -> String {
        // Struct serialization order is declaration order, so the text is
        // deterministic for equal identifiers.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse an identifier back from its canonical JSON text.
    pub fn from_canonical_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl fmt::Display for InstanceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@{}{}",
            self.id, self.class, self.header.service, self.header.service_path
        )
    }
}

/// Human-facing metadata attached to an instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub comment: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_json_round_trip() {
        let ident = InstanceIdentifier::new("room-1", "Room", InstanceHeader::default());
        let text = ident.canonical_json();
        let back = InstanceIdentifier::from_canonical_json(&text).unwrap();
        assert_eq!(ident, back);
    }

    #[test]
    fn test_identifier_equality_includes_header() {
        let a = InstanceIdentifier::new("x", "Room", InstanceHeader::default());
        let mut other = InstanceHeader::default();
        other.service = "factory".to_string();
        let b = InstanceIdentifier::new("x", "Room", other);
        assert_ne!(a, b);
    }

    #[test]
    fn test_display_is_compact() {
        let ident = InstanceIdentifier::new("room-1", "Room", InstanceHeader::default());
        assert_eq!(ident.to_string(), "room-1:Room@/");
    }
}
