//! Runtime configuration: broker endpoints and tenancy, loadable from a
//! TOML file and convertible into the default [`InstanceHeader`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ContextureError, Result};
use crate::model::header::InstanceHeader;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub tenancy: TenancyConfig,
}

/// Remote broker endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Context broker base URL
    #[serde(default = "default_cb_url")]
    pub cb_url: String,

    /// IoT agent base URL
    #[serde(default = "default_iota_url")]
    pub iota_url: String,

    /// Interface version segment of entity URLs
    #[serde(default = "default_ngsi_version")]
    pub ngsi_version: String,
}

/// Multi-tenancy scope carried on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenancyConfig {
    #[serde(default)]
    pub service: String,

    #[serde(default = "default_service_path")]
    pub service_path: String,
}

fn default_cb_url() -> String {
    "http://localhost:1026".to_string()
}
fn default_iota_url() -> String {
    "http://localhost:4041".to_string()
}
fn default_ngsi_version() -> String {
    "v2".to_string()
}
fn default_service_path() -> String {
    "/".to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            cb_url: default_cb_url(),
            iota_url: default_iota_url(),
            ngsi_version: default_ngsi_version(),
        }
    }
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            service: String::new(),
            service_path: default_service_path(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            tenancy: TenancyConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ContextureError::InvalidConfig(e.to_string()))
    }

    /// The default header every instance of a manager built from this
    /// configuration lives under.
    pub fn header(&self) -> InstanceHeader {
        InstanceHeader {
            cb_url: self.broker.cb_url.clone(),
            iota_url: self.broker.iota_url.clone(),
            ngsi_version: self.broker.ngsi_version.clone(),
            service: self.tenancy.service.clone(),
            service_path: self.tenancy.service_path.clone(),
        }
    }
}
