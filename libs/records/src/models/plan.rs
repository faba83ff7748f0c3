//! Ordered assembly pipeline for one patient's record graph.

use super::catalog::{
    ConditionCode, ObservationCode, BP_MEDICATION_CODE, BP_MEDICATION_DISPLAY,
    CURRENT_SMOKER_CODE, CURRENT_SMOKER_DISPLAY, LOINC_SYSTEM, NDC_SYSTEM, NON_SMOKER_CODE,
    NON_SMOKER_DISPLAY, SNOMED_SYSTEM,
};
use super::intake::PatientIntake;
use super::resource::{
    CodeableConcept, Coding, Condition, HumanName, MedicationStatement, MedicationStatus,
    Observation, Patient, Quantity, Reference,
};
use super::ResourceType;
use crate::{Error, Result};
use serde_json::Value as JsonValue;
use std::fmt;

/// One step of the assembly pipeline. Names the resource being created so a
/// failure can be attributed precisely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssemblyStep {
    Patient,
    Observation(ObservationCode),
    Condition(ConditionCode),
    MedicationStatement,
}

impl AssemblyStep {
    pub fn resource_type(self) -> ResourceType {
        match self {
            AssemblyStep::Patient => ResourceType::Patient,
            AssemblyStep::Observation(_) => ResourceType::Observation,
            AssemblyStep::Condition(_) => ResourceType::Condition,
            AssemblyStep::MedicationStatement => ResourceType::MedicationStatement,
        }
    }
}

impl fmt::Display for AssemblyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssemblyStep::Patient => write!(f, "Patient"),
            AssemblyStep::Observation(code) => write!(f, "Observation({code})"),
            AssemblyStep::Condition(code) => write!(f, "Condition({code})"),
            AssemblyStep::MedicationStatement => write!(f, "MedicationStatement"),
        }
    }
}

impl serde::Serialize for AssemblyStep {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// A dependent resource ready to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedResource {
    pub step: AssemblyStep,
    pub body: JsonValue,
}

/// Builds resource bodies for one intake.
///
/// The Patient comes first; dependents need its server-assigned id and are
/// produced in the fixed order observations, conditions, medication statement.
#[derive(Debug, Clone)]
pub struct AssemblyPlan<'a> {
    intake: &'a PatientIntake,
}

impl<'a> AssemblyPlan<'a> {
    pub fn new(intake: &'a PatientIntake) -> Self {
        Self { intake }
    }

    pub fn patient(&self) -> Result<JsonValue> {
        let patient = Patient {
            resource_type: ResourceType::Patient.to_string(),
            id: None,
            name: vec![HumanName {
                use_: Some("official".to_string()),
                text: Some(self.intake.name.clone()),
                ..Default::default()
            }],
            gender: self.intake.gender.map(|g| g.as_str().to_string()),
            birth_date: Some(self.intake.birth_date.format("%Y-%m-%d").to_string()),
            meta: None,
        };
        to_body(&patient)
    }

    /// Steps that will run after the Patient, without building bodies.
    pub fn dependent_steps(&self) -> Vec<AssemblyStep> {
        ObservationCode::ALL
            .into_iter()
            .map(AssemblyStep::Observation)
            .chain(
                ConditionCode::ALL
                    .into_iter()
                    .filter(|c| self.condition_present(*c))
                    .map(AssemblyStep::Condition),
            )
            .chain(std::iter::once(AssemblyStep::MedicationStatement))
            .collect()
    }

    /// Body for one dependent step, referencing `patient_id`.
    pub fn dependent(&self, step: AssemblyStep, patient_id: &str) -> Result<JsonValue> {
        match step {
            AssemblyStep::Observation(code) => to_body(&self.observation(code, patient_id)),
            AssemblyStep::Condition(code) => to_body(&condition(code, patient_id)),
            AssemblyStep::MedicationStatement => to_body(&self.medication_statement(patient_id)),
            AssemblyStep::Patient => self.patient(),
        }
    }

    pub fn dependents(&self, patient_id: &str) -> Result<Vec<PlannedResource>> {
        self.dependent_steps()
            .into_iter()
            .map(|step| {
                let body = self.dependent(step, patient_id)?;
                Ok(PlannedResource { step, body })
            })
            .collect()
    }

    fn condition_present(&self, code: ConditionCode) -> bool {
        match code {
            ConditionCode::Stroke => self.intake.prevalent_stroke,
            ConditionCode::Hypertension => self.intake.prevalent_hypertension,
            ConditionCode::Diabetes => self.intake.diabetes,
        }
    }

    /// Numeric value for quantity observations; `None` for coded ones.
    fn quantity_value(&self, code: ObservationCode) -> Option<f64> {
        let m = &self.intake.measurements;
        match code {
            ObservationCode::Bmi => Some(m.bmi),
            ObservationCode::TotalCholesterol => Some(m.total_cholesterol),
            ObservationCode::SystolicBloodPressure => Some(m.systolic_bp),
            ObservationCode::DiastolicBloodPressure => Some(m.diastolic_bp),
            ObservationCode::Glucose => Some(m.glucose),
            ObservationCode::HeartRate => Some(m.heart_rate),
            ObservationCode::Education => Some(f64::from(self.intake.education)),
            ObservationCode::CigarettesPerDay => Some(m.cigarettes_per_day),
            ObservationCode::SmokingStatus => None,
        }
    }

    fn observation(&self, code: ObservationCode, patient_id: &str) -> Observation {
        let mut observation = Observation {
            resource_type: ResourceType::Observation.to_string(),
            status: "final".to_string(),
            code: CodeableConcept::single(Coding::new(LOINC_SYSTEM, code.code(), code.display())),
            subject: Reference::patient(patient_id),
            value_quantity: None,
            value_codeable_concept: None,
        };

        match self.quantity_value(code) {
            Some(value) => {
                observation.value_quantity = Some(Quantity {
                    value,
                    unit: code.unit().map(str::to_string),
                });
            }
            None => {
                let (answer, display) = if self.intake.is_smoking {
                    (CURRENT_SMOKER_CODE, CURRENT_SMOKER_DISPLAY)
                } else {
                    (NON_SMOKER_CODE, NON_SMOKER_DISPLAY)
                };
                observation.value_codeable_concept =
                    Some(CodeableConcept::single(Coding::new(LOINC_SYSTEM, answer, display)));
            }
        }
        observation
    }

    fn medication_statement(&self, patient_id: &str) -> MedicationStatement {
        MedicationStatement {
            resource_type: ResourceType::MedicationStatement.to_string(),
            medication_codeable_concept: CodeableConcept::single(Coding::new(
                NDC_SYSTEM,
                BP_MEDICATION_CODE,
                BP_MEDICATION_DISPLAY,
            )),
            status: if self.intake.on_bp_medication {
                MedicationStatus::Active
            } else {
                MedicationStatus::Stopped
            },
            subject: Reference::patient(patient_id),
        }
    }
}

fn condition(code: ConditionCode, patient_id: &str) -> Condition {
    Condition {
        resource_type: ResourceType::Condition.to_string(),
        id: None,
        code: CodeableConcept::single(Coding::new(SNOMED_SYSTEM, code.code(), code.display())),
        subject: Reference::patient(patient_id),
    }
}

fn to_body<T: serde::Serialize>(resource: &T) -> Result<JsonValue> {
    serde_json::to_value(resource)
        .map_err(|e| Error::InvalidResource(format!("failed to serialize resource: {e}")))
}
