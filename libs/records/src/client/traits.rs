//! Record store trait definition

use crate::{models::ResourceType, Result};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Typed create/read/update/search/delete against a FHIR resource store.
///
/// Implementations surface the remote status as-is: non-success answers become
/// [`crate::Error::RemoteRejected`], absent targets [`crate::Error::NotFound`].
/// `create` is not idempotent; repeating it creates a duplicate resource.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a resource and return its server-assigned id.
    async fn create(&self, resource_type: ResourceType, body: &JsonValue) -> Result<String>;

    /// Read the current version of a resource.
    async fn read(&self, resource_type: ResourceType, id: &str) -> Result<JsonValue>;

    /// Replace the current version of an existing resource.
    async fn update(&self, resource_type: ResourceType, id: &str, body: &JsonValue) -> Result<()>;

    /// Search a resource type and return every matching resource body.
    async fn search(
        &self,
        resource_type: ResourceType,
        params: &[(&str, String)],
    ) -> Result<Vec<JsonValue>>;

    /// Delete a resource. Absent resources yield `NotFound`.
    async fn delete(&self, resource_type: ResourceType, id: &str) -> Result<()>;
}

#[async_trait]
impl<S: RecordStore + ?Sized> RecordStore for Arc<S> {
    async fn create(&self, resource_type: ResourceType, body: &JsonValue) -> Result<String> {
        (**self).create(resource_type, body).await
    }

    async fn read(&self, resource_type: ResourceType, id: &str) -> Result<JsonValue> {
        (**self).read(resource_type, id).await
    }

    async fn update(&self, resource_type: ResourceType, id: &str, body: &JsonValue) -> Result<()> {
        (**self).update(resource_type, id, body).await
    }

    async fn search(
        &self,
        resource_type: ResourceType,
        params: &[(&str, String)],
    ) -> Result<Vec<JsonValue>> {
        (**self).search(resource_type, params).await
    }

    async fn delete(&self, resource_type: ResourceType, id: &str) -> Result<()> {
        (**self).delete(resource_type, id).await
    }
}
