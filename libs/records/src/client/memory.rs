//! In-process record store.
//!
//! Mirrors the semantics the orchestration layer relies on from a FHIR server:
//! server-assigned ids, `subject` search in creation order, `NotFound` for
//! absent targets, and (by default) refusal to delete a Patient that is still
//! referenced. Calls are logged and faults can be injected per operation, which
//! makes it the backing store for deterministic tests and offline dry runs.

use super::RecordStore;
use crate::models::ResourceType;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Update,
    Search,
    Delete,
}

/// One call observed by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub operation: Operation,
    pub resource_type: ResourceType,
    pub id: Option<String>,
}

/// Injected failure. `on_call` is 1-based and counts calls of this operation
/// on this resource type; `None` fails every such call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub operation: Operation,
    pub resource_type: ResourceType,
    pub on_call: Option<usize>,
    pub status: u16,
}

impl Fault {
    pub fn always(operation: Operation, resource_type: ResourceType) -> Self {
        Self {
            operation,
            resource_type,
            on_call: None,
            status: 500,
        }
    }

    pub fn nth(operation: Operation, resource_type: ResourceType, n: usize) -> Self {
        Self {
            operation,
            resource_type,
            on_call: Some(n),
            status: 500,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    /// Stored resources in creation order.
    resources: Vec<(ResourceType, String, JsonValue)>,
    calls: Vec<RecordedCall>,
    counters: HashMap<(Operation, ResourceType), usize>,
    faults: Vec<Fault>,
}

impl State {
    fn position(&self, resource_type: ResourceType, id: &str) -> Option<usize> {
        self.resources
            .iter()
            .position(|(rt, rid, _)| *rt == resource_type && rid == id)
    }

    fn record(
        &mut self,
        operation: Operation,
        resource_type: ResourceType,
        id: Option<&str>,
    ) -> Result<()> {
        self.calls.push(RecordedCall {
            operation,
            resource_type,
            id: id.map(str::to_string),
        });
        let counter = self.counters.entry((operation, resource_type)).or_insert(0);
        *counter += 1;
        let n = *counter;

        let fault = self.faults.iter().find(|f| {
            f.operation == operation
                && f.resource_type == resource_type
                && f.on_call.map_or(true, |on| on == n)
        });
        match fault {
            Some(fault) => Err(Error::RemoteRejected {
                operation: operation_name(operation),
                resource_type: resource_type.to_string(),
                status: fault.status,
                body: "injected fault".to_string(),
            }),
            None => Ok(()),
        }
    }

    fn is_referenced(&self, resource_type: ResourceType, id: &str) -> bool {
        let target = format!("{resource_type}/{id}");
        self.resources.iter().any(|(_, _, body)| {
            body.pointer("/subject/reference").and_then(JsonValue::as_str) == Some(target.as_str())
        })
    }
}

fn operation_name(operation: Operation) -> &'static str {
    match operation {
        Operation::Create => "create",
        Operation::Read => "read",
        Operation::Update => "update",
        Operation::Search => "search",
        Operation::Delete => "delete",
    }
}

#[derive(Debug)]
pub struct InMemoryRecordStore {
    state: Mutex<State>,
    enforce_referential_integrity: bool,
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            enforce_referential_integrity: true,
        }
    }

    /// Allow deleting resources that are still referenced by a `subject`.
    pub fn lenient() -> Self {
        Self {
            state: Mutex::new(State::default()),
            enforce_referential_integrity: false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn inject(&self, fault: Fault) {
        self.lock().faults.push(fault);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Insert a resource directly, bypassing call logging and faults.
    pub fn seed(&self, resource_type: ResourceType, mut body: JsonValue) -> String {
        let id = Uuid::new_v4().to_string();
        if let Some(obj) = body.as_object_mut() {
            obj.insert("id".to_string(), JsonValue::String(id.clone()));
        }
        self.lock().resources.push((resource_type, id.clone(), body));
        id
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, operation: Operation, resource_type: ResourceType) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation && c.resource_type == resource_type)
            .count()
    }

    pub fn count(&self, resource_type: ResourceType) -> usize {
        self.lock()
            .resources
            .iter()
            .filter(|(rt, _, _)| *rt == resource_type)
            .count()
    }

    /// Number of stored resources whose subject is the given patient.
    pub fn count_referencing(&self, patient_id: &str) -> usize {
        let target = format!("Patient/{patient_id}");
        self.lock()
            .resources
            .iter()
            .filter(|(_, _, body)| {
                body.pointer("/subject/reference").and_then(JsonValue::as_str)
                    == Some(target.as_str())
            })
            .count()
    }

    pub fn resources(&self, resource_type: ResourceType) -> Vec<JsonValue> {
        self.lock()
            .resources
            .iter()
            .filter(|(rt, _, _)| *rt == resource_type)
            .map(|(_, _, body)| body.clone())
            .collect()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create(&self, resource_type: ResourceType, body: &JsonValue) -> Result<String> {
        let mut state = self.lock();
        state.record(Operation::Create, resource_type, None)?;

        let declared = body.get("resourceType").and_then(JsonValue::as_str);
        if declared != Some(resource_type.as_str()) {
            return Err(Error::RemoteRejected {
                operation: "create",
                resource_type: resource_type.to_string(),
                status: 400,
                body: format!("resourceType {declared:?} does not match endpoint"),
            });
        }

        let id = Uuid::new_v4().to_string();
        let mut stored = body.clone();
        if let Some(obj) = stored.as_object_mut() {
            obj.insert("id".to_string(), JsonValue::String(id.clone()));
        }
        state.resources.push((resource_type, id.clone(), stored));
        Ok(id)
    }

    async fn read(&self, resource_type: ResourceType, id: &str) -> Result<JsonValue> {
        let mut state = self.lock();
        state.record(Operation::Read, resource_type, Some(id))?;
        state
            .position(resource_type, id)
            .map(|i| state.resources[i].2.clone())
            .ok_or_else(|| Error::NotFound {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
            })
    }

    async fn update(&self, resource_type: ResourceType, id: &str, body: &JsonValue) -> Result<()> {
        let mut state = self.lock();
        state.record(Operation::Update, resource_type, Some(id))?;

        let position = state.position(resource_type, id).ok_or_else(|| Error::NotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        })?;
        let mut stored = body.clone();
        if let Some(obj) = stored.as_object_mut() {
            obj.insert("id".to_string(), JsonValue::String(id.to_string()));
        }
        state.resources[position].2 = stored;
        Ok(())
    }

    async fn search(
        &self,
        resource_type: ResourceType,
        params: &[(&str, String)],
    ) -> Result<Vec<JsonValue>> {
        let mut state = self.lock();
        state.record(Operation::Search, resource_type, None)?;

        for (name, _) in params {
            if !matches!(*name, "subject" | "_id") {
                return Err(Error::RemoteRejected {
                    operation: "search",
                    resource_type: resource_type.to_string(),
                    status: 400,
                    body: format!("unknown search parameter '{name}'"),
                });
            }
        }

        Ok(state
            .resources
            .iter()
            .filter(|(rt, _, _)| *rt == resource_type)
            .filter(|(_, id, body)| {
                params.iter().all(|(name, value)| match *name {
                    "subject" => {
                        body.pointer("/subject/reference").and_then(JsonValue::as_str)
                            == Some(value.as_str())
                    }
                    _ => id == value,
                })
            })
            .map(|(_, _, body)| body.clone())
            .collect())
    }

    async fn delete(&self, resource_type: ResourceType, id: &str) -> Result<()> {
        let mut state = self.lock();
        state.record(Operation::Delete, resource_type, Some(id))?;

        let position = state.position(resource_type, id).ok_or_else(|| Error::NotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        })?;

        if self.enforce_referential_integrity && state.is_referenced(resource_type, id) {
            return Err(Error::RemoteRejected {
                operation: "delete",
                resource_type: resource_type.to_string(),
                status: 409,
                body: format!("{resource_type}/{id} is still referenced"),
            });
        }

        state.resources.remove(position);
        Ok(())
    }
}
