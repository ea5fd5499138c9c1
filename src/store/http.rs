//! Blocking HTTP adapter for an NGSI-v2-style context broker and
//! IoT-agent. All wire detail stays in this file; the core only sees
//! the [`EntityStore`] trait.
//!
//! Tenancy is carried per request via the `fiware-service` and
//! `fiware-servicepath` headers; the base URLs come from the
//! [`InstanceHeader`] of each call, so one adapter serves any number of
//! remote locations.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde_json::json;
use tracing::debug;

use crate::error::StoreError;
use crate::model::header::InstanceHeader;
use crate::store::{EntityFilter, EntityStore, RemoteDevice, RemoteEntity};

const SERVICE_HEADER: &str = "fiware-service";
const SERVICE_PATH_HEADER: &str = "fiware-servicepath";

pub struct HttpStore {
    client: Client,
}

impl HttpStore {
    pub fn new() -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| StoreError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn entity_url(header: &InstanceHeader, suffix: &str) -> String {
        format!(
            "{}/{}/entities{}",
            header.cb_url.trim_end_matches('/'),
            header.ngsi_version,
            suffix
        )
    }

    fn device_url(header: &InstanceHeader, suffix: &str) -> String {
        format!("{}/iot/devices{}", header.iota_url.trim_end_matches('/'), suffix)
    }

    fn tenant(request: RequestBuilder, header: &InstanceHeader) -> RequestBuilder {
        request
            .header(SERVICE_HEADER, &header.service)
            .header(SERVICE_PATH_HEADER, &header.service_path)
    }

    fn send(request: RequestBuilder) -> Result<Response, StoreError> {
        let response = request
            .send()
            .map_err(|e| StoreError::Network(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(body)),
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(StoreError::Conflict(body))
            }
            _ => Err(StoreError::Http {
                status: status.as_u16(),
                body,
            }),
        }
    }
}

impl EntityStore for HttpStore {
    fn entity_exists(
        &self,
        header: &InstanceHeader,
        id: &str,
        entity_type: &str,
    ) -> Result<bool, StoreError> {
        match self.fetch_entity(header, id, entity_type) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn fetch_entity(
        &self,
        header: &InstanceHeader,
        id: &str,
        entity_type: &str,
    ) -> Result<RemoteEntity, StoreError> {
        let url = Self::entity_url(header, &format!("/{id}"));
        let request = Self::tenant(self.client.get(url), header).query(&[("type", entity_type)]);
        let response = Self::send(request)?;
        response
            .json::<RemoteEntity>()
            .map_err(|e| StoreError::Network(e.to_string()))
    }

    fn write_entity(
        &self,
        header: &InstanceHeader,
        entity: &RemoteEntity,
        previous: Option<&RemoteEntity>,
    ) -> Result<(), StoreError> {
        match previous {
            None => {
                let url = Self::entity_url(header, "");
                let request = Self::tenant(self.client.post(url), header).json(entity);
                Self::send(request)?;
            }
            Some(previous) => {
                // Patch only what changed against the last snapshot, and
                // drop attributes that disappeared.
                let mut changed = serde_json::Map::new();
                for (name, attribute) in &entity.attributes {
                    if previous.attribute(name) != Some(attribute) {
                        changed.insert(
                            name.clone(),
                            serde_json::to_value(attribute)?,
                        );
                    }
                }
                if !changed.is_empty() {
                    let url = Self::entity_url(header, &format!("/{}/attrs", entity.id));
                    let request = Self::tenant(self.client.post(url), header)
                        .query(&[("type", entity.entity_type.as_str())])
                        .json(&serde_json::Value::Object(changed));
                    Self::send(request)?;
                }
                for name in previous.attributes.keys() {
                    if !entity.attributes.contains_key(name) {
                        let url = Self::entity_url(
                            header,
                            &format!("/{}/attrs/{}", entity.id, name),
                        );
                        let request = Self::tenant(self.client.delete(url), header)
                            .query(&[("type", entity.entity_type.as_str())]);
                        Self::send(request)?;
                    }
                }
            }
        }
        debug!(id = %entity.id, entity_type = %entity.entity_type, "wrote entity");
        Ok(())
    }

    fn delete_entity(
        &self,
        header: &InstanceHeader,
        id: &str,
        entity_type: &str,
        cascade_devices: bool,
    ) -> Result<(), StoreError> {
        if cascade_devices {
            match self.delete_device(header, id) {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        let url = Self::entity_url(header, &format!("/{id}"));
        let request =
            Self::tenant(self.client.delete(url), header).query(&[("type", entity_type)]);
        Self::send(request)?;
        Ok(())
    }

    fn list_entities(
        &self,
        header: &InstanceHeader,
        filter: &EntityFilter,
    ) -> Result<Vec<RemoteEntity>, StoreError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if !filter.ids.is_empty() {
            query.push(("id", filter.ids.join(",")));
        }
        if !filter.types.is_empty() {
            query.push(("type", filter.types.join(",")));
        }
        if let Some(pattern) = &filter.id_pattern {
            query.push(("idPattern", pattern.clone()));
        }
        if let Some(pattern) = &filter.type_pattern {
            query.push(("typePattern", pattern.clone()));
        }
        if let Some(q) = &filter.query {
            query.push(("q", q.clone()));
        }
        if let Some(limit) = filter.limit {
            query.push(("limit", limit.to_string()));
        }
        let url = Self::entity_url(header, "");
        let request = Self::tenant(self.client.get(url), header).query(&query);
        let response = Self::send(request)?;
        response
            .json::<Vec<RemoteEntity>>()
            .map_err(|e| StoreError::Network(e.to_string()))
    }

    fn fetch_device(&self, header: &InstanceHeader, id: &str) -> Result<RemoteDevice, StoreError> {
        let url = Self::device_url(header, &format!("/{id}"));
        let request = Self::tenant(self.client.get(url), header);
        let response = Self::send(request)?;
        response
            .json::<RemoteDevice>()
            .map_err(|e| StoreError::Network(e.to_string()))
    }

    fn write_device(
        &self,
        header: &InstanceHeader,
        device: &RemoteDevice,
        patch_entity: bool,
    ) -> Result<(), StoreError> {
        let exists = match self.fetch_device(header, &device.device_id) {
            Ok(_) => true,
            Err(StoreError::NotFound(_)) => false,
            Err(e) => return Err(e),
        };
        if exists {
            let url = Self::device_url(header, &format!("/{}", device.device_id));
            let request = Self::tenant(self.client.put(url), header)
                .query(&[("patch_entity", patch_entity.to_string())])
                .json(device);
            Self::send(request)?;
        } else {
            let url = Self::device_url(header, "");
            let request =
                Self::tenant(self.client.post(url), header).json(&json!({ "devices": [device] }));
            Self::send(request)?;
        }
        debug!(device_id = %device.device_id, "wrote device");
        Ok(())
    }

    fn delete_device(&self, header: &InstanceHeader, id: &str) -> Result<(), StoreError> {
        let url = Self::device_url(header, &format!("/{id}"));
        let request = Self::tenant(self.client.delete(url), header);
        Self::send(request)?;
        Ok(())
    }
}
