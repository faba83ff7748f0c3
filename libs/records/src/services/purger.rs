//! Record purger - deletes a patient's whole record graph
//!
//! Dependents go first, in the fixed order Observation, Condition,
//! MedicationStatement, RiskAssessment; the Patient is deleted last. Any
//! failure before the final step aborts the purge so a Patient is never removed
//! while something still references it.

use crate::client::RecordStore;
use crate::models::{subject_param, ResourceType};
use crate::{Error, Result};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Outcome of a completed purge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub patient_id: String,
    /// Dependents deleted per resource type. Types with no matches are present
    /// with a count of zero.
    pub deleted: BTreeMap<ResourceType, usize>,
}

impl PurgeReport {
    pub fn dependents_deleted(&self) -> usize {
        self.deleted.values().sum()
    }
}

pub struct RecordPurger<S> {
    store: S,
}

impl<S: RecordStore> RecordPurger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Delete the patient and every resource whose subject is the patient.
    ///
    /// Returns `NotFound` when the patient does not exist (including a second
    /// purge of the same id), before any delete is attempted.
    pub async fn purge(&self, patient_id: &str) -> Result<PurgeReport> {
        purge_record_graph(&self.store, patient_id).await
    }
}

pub(crate) async fn purge_record_graph<S>(store: &S, patient_id: &str) -> Result<PurgeReport>
where
    S: RecordStore + ?Sized,
{
    // Precondition: the Patient exists. Some servers answer DELETE on an
    // already-deleted id with success, so existence is checked with a read.
    store.read(ResourceType::Patient, patient_id).await?;

    let mut deleted = BTreeMap::new();
    for resource_type in ResourceType::DEPENDENTS {
        let count = purge_dependents(store, resource_type, patient_id).await?;
        deleted.insert(resource_type, count);
    }

    store.delete(ResourceType::Patient, patient_id).await?;

    let report = PurgeReport {
        patient_id: patient_id.to_string(),
        deleted,
    };
    tracing::info!(
        patient_id = %patient_id,
        dependents = report.dependents_deleted(),
        "Patient and related resources deleted"
    );
    Ok(report)
}

async fn purge_dependents<S>(
    store: &S,
    resource_type: ResourceType,
    patient_id: &str,
) -> Result<usize>
where
    S: RecordStore + ?Sized,
{
    let matches = store
        .search(resource_type, &[subject_param(patient_id)])
        .await?;

    let mut deleted = 0;
    for resource in &matches {
        let id = resource_id(resource, resource_type)?;
        match store.delete(resource_type, id).await {
            Ok(()) => deleted += 1,
            Err(Error::NotFound { .. }) => {
                tracing::debug!(
                    resource_type = %resource_type,
                    id = %id,
                    "Dependent already gone"
                );
            }
            Err(e) => {
                tracing::warn!(
                    patient_id = %patient_id,
                    resource_type = %resource_type,
                    id = %id,
                    error = %e,
                    "Purge aborted before deleting patient"
                );
                return Err(e);
            }
        }
    }
    Ok(deleted)
}

fn resource_id(resource: &JsonValue, resource_type: ResourceType) -> Result<&str> {
    resource
        .get("id")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| Error::InvalidResource(format!("{resource_type} search entry has no id")))
}
