//! Record assembler - builds a patient's record graph from one intake
//!
//! The pipeline is strictly sequential: the Patient is created first, then each
//! dependent step in [`AssemblyPlan`] order. A failure at the Patient step aborts
//! with nothing created. A failure after it is compensated according to the
//! configured [`CompensationPolicy`] and reported as
//! [`Error::PartialAssembly`] naming the failing step. A retained partial graph
//! has its Patient tagged incomplete so listings can tell it apart.

use super::purger::purge_record_graph;
use crate::client::RecordStore;
use crate::config::CompensationPolicy;
use crate::error::Compensation;
use crate::models::catalog::{ASSEMBLY_TAG_SYSTEM, INCOMPLETE_TAG_CODE, INCOMPLETE_TAG_DISPLAY};
use crate::models::resource::Coding;
use crate::models::{AssemblyPlan, AssemblyStep, PatientIntake, ResourceType, RiskFactorForm};
use crate::{Error, Result};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

/// A resource created by one assembly step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedResource {
    pub step: AssemblyStep,
    pub id: String,
}

/// Ids of everything created for one intake, in step order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssemblyReceipt {
    pub patient_id: String,
    pub dependents: Vec<CreatedResource>,
}

impl AssemblyReceipt {
    pub fn observations(&self) -> usize {
        self.count(|s| matches!(s, AssemblyStep::Observation(_)))
    }

    pub fn conditions(&self) -> usize {
        self.count(|s| matches!(s, AssemblyStep::Condition(_)))
    }

    pub fn medication_statements(&self) -> usize {
        self.count(|s| matches!(s, AssemblyStep::MedicationStatement))
    }

    fn count(&self, f: impl Fn(&AssemblyStep) -> bool) -> usize {
        self.dependents.iter().filter(|c| f(&c.step)).count()
    }
}

pub struct RecordAssembler<S> {
    store: S,
    compensation: CompensationPolicy,
}

impl<S: RecordStore> RecordAssembler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            compensation: CompensationPolicy::default(),
        }
    }

    pub fn with_compensation(mut self, compensation: CompensationPolicy) -> Self {
        self.compensation = compensation;
        self
    }

    /// Convert a raw form at the ingestion boundary, then assemble it.
    pub async fn assemble_form(&self, form: RiskFactorForm) -> Result<AssemblyReceipt> {
        let intake = PatientIntake::try_from(form)?;
        self.assemble(&intake).await
    }

    /// Create the Patient and all applicable dependents.
    pub async fn assemble(&self, intake: &PatientIntake) -> Result<AssemblyReceipt> {
        let plan = AssemblyPlan::new(intake);

        let patient_body = plan.patient()?;
        let patient_id = self
            .store
            .create(AssemblyStep::Patient.resource_type(), &patient_body)
            .await?;
        tracing::debug!(patient_id = %patient_id, "Patient created");

        let steps = plan.dependent_steps();
        let mut created = Vec::with_capacity(steps.len());
        for step in steps {
            let outcome = match plan.dependent(step, &patient_id) {
                Ok(body) => self.store.create(step.resource_type(), &body).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(id) => created.push(CreatedResource { step, id }),
                Err(e) => return Err(self.compensate(&patient_id, step, e).await),
            }
        }

        let receipt = AssemblyReceipt {
            patient_id,
            dependents: created,
        };
        tracing::info!(
            patient_id = %receipt.patient_id,
            observations = receipt.observations(),
            conditions = receipt.conditions(),
            medication_statements = receipt.medication_statements(),
            "Patient record graph assembled"
        );
        Ok(receipt)
    }

    async fn compensate(&self, patient_id: &str, step: AssemblyStep, source: Error) -> Error {
        let compensation = match self.compensation {
            CompensationPolicy::Retain => match self.tag_incomplete(patient_id).await {
                Ok(()) => {
                    tracing::warn!(
                        patient_id = %patient_id,
                        step = %step,
                        error = %source,
                        "Assembly failed; partial record graph retained as incomplete"
                    );
                    Compensation::Retained
                }
                Err(tag_error) => {
                    tracing::error!(
                        patient_id = %patient_id,
                        step = %step,
                        error = %source,
                        tag_error = %tag_error,
                        "Assembly failed; partial record graph retained without incomplete tag"
                    );
                    Compensation::RetainedUntagged(tag_error.to_string())
                }
            },
            CompensationPolicy::Rollback => match purge_record_graph(&self.store, patient_id).await
            {
                Ok(report) => {
                    tracing::warn!(
                        patient_id = %patient_id,
                        step = %step,
                        error = %source,
                        removed_dependents = report.dependents_deleted(),
                        "Assembly failed; partial record graph rolled back"
                    );
                    Compensation::RolledBack
                }
                Err(rollback_error) => {
                    tracing::error!(
                        patient_id = %patient_id,
                        step = %step,
                        error = %source,
                        rollback_error = %rollback_error,
                        "Assembly failed and rollback failed; partial record graph may remain"
                    );
                    Compensation::RollbackFailed(rollback_error.to_string())
                }
            },
        };

        Error::PartialAssembly {
            patient_id: patient_id.to_string(),
            step,
            compensation,
            source: Box::new(source),
        }
    }

    /// Add the incomplete `meta.tag` to the stored Patient.
    async fn tag_incomplete(&self, patient_id: &str) -> Result<()> {
        let mut patient = self.store.read(ResourceType::Patient, patient_id).await?;
        let tag = serde_json::to_value(Coding::new(
            ASSEMBLY_TAG_SYSTEM,
            INCOMPLETE_TAG_CODE,
            INCOMPLETE_TAG_DISPLAY,
        ))
        .map_err(|e| Error::InvalidResource(format!("unserializable meta.tag: {e}")))?;

        let Some(obj) = patient.as_object_mut() else {
            return Err(Error::InvalidResource(format!(
                "Patient/{patient_id} is not a JSON object"
            )));
        };
        let meta = obj.entry("meta").or_insert_with(|| json!({}));
        if !meta.is_object() {
            *meta = json!({});
        }
        match meta.get_mut("tag").and_then(JsonValue::as_array_mut) {
            Some(tags) => tags.push(tag),
            None => meta["tag"] = json!([tag]),
        }
        self.store
            .update(ResourceType::Patient, patient_id, &patient)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Fault, InMemoryRecordStore, Operation};
    use crate::models::{ConditionCode, Measurements, ObservationCode};
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn intake() -> PatientIntake {
        PatientIntake {
            name: "Jane Doe".into(),
            gender: None,
            birth_date: NaiveDate::from_ymd_opt(1965, 3, 2).unwrap(),
            education: 2,
            measurements: Measurements {
                bmi: 24.5,
                total_cholesterol: 210.0,
                systolic_bp: 120.0,
                diastolic_bp: 80.0,
                glucose: 90.0,
                heart_rate: 70.0,
                cigarettes_per_day: 0.0,
            },
            is_smoking: false,
            on_bp_medication: false,
            prevalent_stroke: false,
            prevalent_hypertension: true,
            diabetes: false,
        }
    }

    #[tokio::test]
    async fn assembles_full_graph() {
        let store = Arc::new(InMemoryRecordStore::new());
        let receipt = RecordAssembler::new(store.clone())
            .assemble(&intake())
            .await
            .unwrap();

        assert_eq!(receipt.observations(), ObservationCode::ALL.len());
        assert_eq!(receipt.conditions(), 1);
        assert_eq!(receipt.medication_statements(), 1);
        assert_eq!(store.count(ResourceType::Patient), 1);
        assert_eq!(
            store.count_referencing(&receipt.patient_id),
            ObservationCode::ALL.len() + 2
        );

        let calls = store.calls();
        assert_eq!(calls[0].resource_type, ResourceType::Patient);
        assert!(calls.iter().all(|c| c.operation == Operation::Create));

        let medications = store.resources(ResourceType::MedicationStatement);
        assert_eq!(medications[0]["status"], "stopped");
        assert!(store.resources(ResourceType::Patient)[0].get("meta").is_none());
    }

    #[tokio::test]
    async fn condition_count_equals_true_flags() {
        for (stroke, hyp, diabetes) in [
            (false, false, false),
            (true, false, false),
            (true, true, false),
            (true, true, true),
        ] {
            let store = Arc::new(InMemoryRecordStore::new());
            let mut intake = intake();
            intake.prevalent_stroke = stroke;
            intake.prevalent_hypertension = hyp;
            intake.diabetes = diabetes;

            let receipt = RecordAssembler::new(store.clone())
                .assemble(&intake)
                .await
                .unwrap();
            let expected = [stroke, hyp, diabetes].iter().filter(|f| **f).count();
            assert_eq!(receipt.conditions(), expected);
            assert_eq!(store.count(ResourceType::Condition), expected);
            assert_eq!(store.count(ResourceType::Observation), ObservationCode::ALL.len());
        }
    }

    #[tokio::test]
    async fn patient_failure_creates_nothing() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.inject(Fault::always(Operation::Create, ResourceType::Patient));

        let err = RecordAssembler::new(store.clone())
            .assemble(&intake())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteRejected { .. }));
        assert_eq!(store.calls().len(), 1);
    }

    #[tokio::test]
    async fn dependent_failure_rolls_back_by_default() {
        let store = Arc::new(InMemoryRecordStore::new());
        // Third observation is systolic blood pressure.
        store.inject(Fault::nth(Operation::Create, ResourceType::Observation, 3));

        let err = RecordAssembler::new(store.clone())
            .assemble(&intake())
            .await
            .unwrap_err();
        match &err {
            Error::PartialAssembly {
                step, compensation, ..
            } => {
                assert_eq!(
                    *step,
                    AssemblyStep::Observation(ObservationCode::SystolicBloodPressure)
                );
                assert_eq!(*compensation, Compensation::RolledBack);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.count(ResourceType::Patient), 0);
        assert_eq!(store.count(ResourceType::Observation), 0);
    }

    #[tokio::test]
    async fn dependent_failure_can_retain_partial_graph() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.inject(Fault::always(Operation::Create, ResourceType::MedicationStatement));

        let err = RecordAssembler::new(store.clone())
            .with_compensation(CompensationPolicy::Retain)
            .assemble(&intake())
            .await
            .unwrap_err();
        assert_eq!(err.failed_step(), Some(&AssemblyStep::MedicationStatement));
        let Error::PartialAssembly {
            patient_id,
            compensation,
            ..
        } = err
        else {
            panic!("expected partial assembly");
        };
        assert_eq!(compensation, Compensation::Retained);
        assert_eq!(store.count(ResourceType::Patient), 1);
        assert_eq!(
            store.count_referencing(&patient_id),
            ObservationCode::ALL.len() + 1
        );

        let patient = &store.resources(ResourceType::Patient)[0];
        assert_eq!(patient["id"], patient_id.as_str());
        assert_eq!(patient["name"][0]["text"], "Jane Doe");
        assert_eq!(
            patient["meta"]["tag"],
            json!([{
                "system": ASSEMBLY_TAG_SYSTEM,
                "code": INCOMPLETE_TAG_CODE,
                "display": INCOMPLETE_TAG_DISPLAY
            }])
        );
    }

    #[tokio::test]
    async fn retained_graph_reports_failed_tagging() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.inject(Fault::always(Operation::Create, ResourceType::Condition));
        store.inject(Fault::always(Operation::Update, ResourceType::Patient));

        let err = RecordAssembler::new(store.clone())
            .with_compensation(CompensationPolicy::Retain)
            .assemble(&intake())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::PartialAssembly {
                compensation: Compensation::RetainedUntagged(_),
                ..
            }
        ));
        let patient = &store.resources(ResourceType::Patient)[0];
        assert!(patient.get("meta").is_none());
        assert_eq!(store.count(ResourceType::Observation), ObservationCode::ALL.len());
    }

    #[tokio::test]
    async fn failed_rollback_is_reported() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.inject(Fault::always(Operation::Create, ResourceType::Condition));
        store.inject(Fault::always(Operation::Delete, ResourceType::Observation));

        let err = RecordAssembler::new(store.clone())
            .assemble(&intake())
            .await
            .unwrap_err();
        match err {
            Error::PartialAssembly {
                step, compensation, ..
            } => {
                assert_eq!(step, AssemblyStep::Condition(ConditionCode::Hypertension));
                assert!(matches!(compensation, Compensation::RollbackFailed(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.count(ResourceType::Patient), 1);
    }

    #[tokio::test]
    async fn assemble_form_rejects_invalid_payload_before_any_call() {
        let store = Arc::new(InMemoryRecordStore::new());
        let err = RecordAssembler::new(store.clone())
            .assemble_form(RiskFactorForm::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPayload { .. }));
        assert!(store.calls().is_empty());
    }
}
