//! FHIR REST implementation of [`RecordStore`] over reqwest.

use super::RecordStore;
use crate::config::FhirConfig;
use crate::models::resource::Bundle;
use crate::models::ResourceType;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

const FHIR_JSON: &str = "application/fhir+json";

/// HTTP client for a FHIR REST endpoint.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct HttpRecordClient {
    http: reqwest::Client,
    base_url: String,
    max_search_pages: usize,
}

/// Summary of the server's CapabilityStatement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub base_url: String,
    pub fhir_version: Option<String>,
    pub software_name: Option<String>,
    pub software_version: Option<String>,
}

impl HttpRecordClient {
    pub fn new(config: &FhirConfig) -> Result<Self> {
        Self::with_options(&config.base_url, config.timeout(), config.max_search_pages)
    }

    pub fn with_options(
        base_url: &str,
        timeout: Duration,
        max_search_pages: usize,
    ) -> Result<Self> {
        let parsed = url::Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid FHIR base URL {base_url}: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cardiorisk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::transport("building HTTP client", e))?;

        Ok(Self {
            http,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            max_search_pages: max_search_pages.max(1),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn type_url(&self, resource_type: ResourceType) -> String {
        format!("{}/{}", self.base_url, resource_type)
    }

    fn instance_url(&self, resource_type: ResourceType, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, resource_type, id)
    }

    /// Fetch the server's CapabilityStatement (`GET [base]/metadata`).
    pub async fn server_status(&self) -> Result<ServerStatus> {
        let url = format!("{}/metadata", self.base_url);
        let response = self
            .http
            .get(&url)
            .header(ACCEPT, FHIR_JSON)
            .send()
            .await
            .map_err(|e| Error::transport("GET metadata", e))?;

        if !response.status().is_success() {
            return Err(rejected("read", "CapabilityStatement", response).await);
        }

        let capability: JsonValue = response
            .json()
            .await
            .map_err(|e| Error::transport("decoding CapabilityStatement", e))?;

        let text = |v: Option<&JsonValue>| v.and_then(JsonValue::as_str).map(str::to_string);
        Ok(ServerStatus {
            base_url: self.base_url.clone(),
            fhir_version: text(capability.get("fhirVersion")),
            software_name: text(capability.pointer("/software/name")),
            software_version: text(capability.pointer("/software/version")),
        })
    }

    async fn fetch_bundle(
        &self,
        resource_type: ResourceType,
        request: reqwest::RequestBuilder,
    ) -> Result<Bundle> {
        let response = request
            .header(ACCEPT, FHIR_JSON)
            .send()
            .await
            .map_err(|e| Error::transport(format!("search {resource_type}"), e))?;

        if !response.status().is_success() {
            return Err(rejected("search", resource_type.as_str(), response).await);
        }

        response
            .json::<Bundle>()
            .await
            .map_err(|e| Error::transport(format!("decoding {resource_type} search bundle"), e))
    }
}

#[async_trait]
impl RecordStore for HttpRecordClient {
    async fn create(&self, resource_type: ResourceType, body: &JsonValue) -> Result<String> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| Error::InvalidResource(format!("unserializable {resource_type}: {e}")))?;

        let response = self
            .http
            .post(self.type_url(resource_type))
            .header(CONTENT_TYPE, FHIR_JSON)
            .header(ACCEPT, FHIR_JSON)
            .body(payload)
            .send()
            .await
            .map_err(|e| Error::transport(format!("create {resource_type}"), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(rejected("create", resource_type.as_str(), response).await);
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let text = response
            .text()
            .await
            .map_err(|e| Error::transport(format!("reading created {resource_type}"), e))?;
        let created_id = serde_json::from_str::<JsonValue>(&text)
            .ok()
            .and_then(|v| v.get("id").and_then(JsonValue::as_str).map(str::to_string));

        let id = created_id
            .or_else(|| location.as_deref().and_then(|l| id_from_location(l, resource_type)))
            .ok_or_else(|| {
                Error::InvalidResource(format!(
                    "server created {resource_type} (HTTP {status}) without returning an id"
                ))
            })?;

        tracing::debug!(resource_type = %resource_type, id = %id, "Created resource");
        Ok(id)
    }

    async fn read(&self, resource_type: ResourceType, id: &str) -> Result<JsonValue> {
        let response = self
            .http
            .get(self.instance_url(resource_type, id))
            .header(ACCEPT, FHIR_JSON)
            .send()
            .await
            .map_err(|e| Error::transport(format!("read {resource_type}/{id}"), e))?;

        match response.status() {
            s if s.is_success() => response
                .json()
                .await
                .map_err(|e| Error::transport(format!("decoding {resource_type}/{id}"), e)),
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(Error::NotFound {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
            }),
            _ => Err(rejected("read", resource_type.as_str(), response).await),
        }
    }

    async fn update(&self, resource_type: ResourceType, id: &str, body: &JsonValue) -> Result<()> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| Error::InvalidResource(format!("unserializable {resource_type}: {e}")))?;

        let response = self
            .http
            .put(self.instance_url(resource_type, id))
            .header(CONTENT_TYPE, FHIR_JSON)
            .header(ACCEPT, FHIR_JSON)
            .body(payload)
            .send()
            .await
            .map_err(|e| Error::transport(format!("update {resource_type}/{id}"), e))?;

        match response.status() {
            s if s.is_success() => {
                tracing::debug!(resource_type = %resource_type, id = %id, "Updated resource");
                Ok(())
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(Error::NotFound {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
            }),
            _ => Err(rejected("update", resource_type.as_str(), response).await),
        }
    }

    async fn search(
        &self,
        resource_type: ResourceType,
        params: &[(&str, String)],
    ) -> Result<Vec<JsonValue>> {
        let first = self.http.get(self.type_url(resource_type)).query(params);
        let mut bundle = self.fetch_bundle(resource_type, first).await?;
        let mut pages = 1;
        let mut resources = Vec::new();

        loop {
            let next = bundle.next_url().map(str::to_string);
            resources.extend(bundle.into_resources());

            let Some(next) = next else { break };
            if pages >= self.max_search_pages {
                tracing::warn!(
                    resource_type = %resource_type,
                    pages,
                    collected = resources.len(),
                    "Search page limit reached with more pages pending"
                );
                return Err(Error::SearchLimitExceeded {
                    resource_type: resource_type.to_string(),
                    pages,
                });
            }
            bundle = self.fetch_bundle(resource_type, self.http.get(&next)).await?;
            pages += 1;
        }

        tracing::debug!(
            resource_type = %resource_type,
            pages,
            matches = resources.len(),
            "Search completed"
        );
        Ok(resources)
    }

    async fn delete(&self, resource_type: ResourceType, id: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.instance_url(resource_type, id))
            .header(ACCEPT, FHIR_JSON)
            .send()
            .await
            .map_err(|e| Error::transport(format!("delete {resource_type}/{id}"), e))?;

        match response.status() {
            s if s.is_success() => {
                tracing::debug!(resource_type = %resource_type, id = %id, "Deleted resource");
                Ok(())
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(Error::NotFound {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
            }),
            _ => Err(rejected("delete", resource_type.as_str(), response).await),
        }
    }
}

async fn rejected(operation: &'static str, resource_type: &str, response: Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Error::RemoteRejected {
        operation,
        resource_type: resource_type.to_string(),
        status,
        body,
    }
}

/// Extract the logical id from a `Location` header such as
/// `http://host/fhir/Patient/123/_history/1`.
fn id_from_location(location: &str, resource_type: ResourceType) -> Option<String> {
    let path = location.split(['?', '#']).next().unwrap_or(location);
    let mut segments = path.split('/');
    segments.find(|s| *s == resource_type.as_str())?;
    segments
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
