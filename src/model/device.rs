//! Device-specific model pieces: transport settings and the property
//! objects held by command / device-attribute fields.
//!
//! Every device property maps onto extra entries of the remote device
//! representation; the synthesized names must never collide with modeled
//! field names or the reserved attributes, which is enforced at add time
//! by [`Instance`](crate::model::Instance).

use serde::{Deserialize, Serialize};

/// Device transport protocol, as understood by the IoT layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Transport {
    Http,
    Mqtt,
    Amqp,
}

/// Message payload protocol of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadProtocol {
    #[serde(rename = "IoTA-JSON")]
    IotaJson,
    #[serde(rename = "IoTA-UL")]
    IotaUl,
}

/// Expression language used for attribute expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpressionLanguage {
    Legacy,
    Jexl,
}

/// Per-device transport configuration. A device instance cannot be
/// persisted until `transport` is set; this is a structural requirement
/// of the remote IoT layer, not a modeling choice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(default)]
    pub transport: Option<Transport>,
    #[serde(default)]
    pub protocol: Option<PayloadProtocol>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub apikey: Option<String>,
    #[serde(default)]
    pub timestamp: Option<bool>,
    #[serde(default)]
    pub expression_language: Option<ExpressionLanguage>,
    #[serde(default)]
    pub explicit_attrs: bool,
}

/// How a device attribute value reaches the remote representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// Pushed by the device on change
    Active,
    /// Fetched from the device on read
    Lazy,
}

/// A read-attribute owned by a device-attribute field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAttribute {
    pub name: String,
    pub mode: RetrievalMode,
}

impl DeviceAttribute {
    /// Name of the remote device entry this attribute creates when owned
    /// by the field `field_name`.
    pub fn remote_name(&self, field_name: &str) -> String {
        format!("{}_{}", field_name, self.name)
    }
}

/// A command owned by a command field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
}

impl Command {
    /// Names of the three remote entries a command creates: the command
    /// itself plus its status and info attributes.
    pub fn remote_names(&self) -> [String; 3] {
        [
            self.name.clone(),
            format!("{}_status", self.name),
            format!("{}_info", self.name),
        ]
    }
}

/// Character set allowed in synthesized remote names.
pub fn is_well_formed_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_remote_names() {
        let cmd = Command { name: "heat".to_string() };
        assert_eq!(
            cmd.remote_names(),
            ["heat".to_string(), "heat_status".to_string(), "heat_info".to_string()]
        );
    }

    #[test]
    fn test_attribute_remote_name_prefixes_field() {
        let attr = DeviceAttribute {
            name: "temperature".to_string(),
            mode: RetrievalMode::Active,
        };
        assert_eq!(attr.remote_name("measures"), "measures_temperature");
    }

    #[test]
    fn test_name_charset() {
        assert!(is_well_formed_name("valve_1"));
        assert!(!is_well_formed_name("valve-1"));
        assert!(!is_well_formed_name(""));
        assert!(!is_well_formed_name("a b"));
    }
}
