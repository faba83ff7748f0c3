//! Domain models: resource shapes, fixed vocabularies, intake payloads, and
//! the assembly plan.

pub mod catalog;
pub mod intake;
pub mod plan;
pub mod resource;

pub use catalog::{ConditionCode, ObservationCode};
pub use intake::{FormValue, Gender, Measurements, PatientIntake, RiskFactorForm};
pub use plan::{AssemblyPlan, AssemblyStep, PlannedResource};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Resource types that make up a patient's record graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    Patient,
    Observation,
    Condition,
    MedicationStatement,
    RiskAssessment,
}

impl ResourceType {
    /// Dependents in the order they must be removed before their Patient.
    pub const DEPENDENTS: [ResourceType; 4] = [
        ResourceType::Observation,
        ResourceType::Condition,
        ResourceType::MedicationStatement,
        ResourceType::RiskAssessment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Patient => "Patient",
            ResourceType::Observation => "Observation",
            ResourceType::Condition => "Condition",
            ResourceType::MedicationStatement => "MedicationStatement",
            ResourceType::RiskAssessment => "RiskAssessment",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Patient" => Ok(ResourceType::Patient),
            "Observation" => Ok(ResourceType::Observation),
            "Condition" => Ok(ResourceType::Condition),
            "MedicationStatement" => Ok(ResourceType::MedicationStatement),
            "RiskAssessment" => Ok(ResourceType::RiskAssessment),
            other => Err(crate::Error::InvalidResource(format!(
                "unsupported resource type '{other}'"
            ))),
        }
    }
}

/// Search parameter selecting every resource whose subject is the patient.
pub fn subject_param(patient_id: &str) -> (&'static str, String) {
    ("subject", format!("Patient/{patient_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_type_round_trips_through_str() {
        for rt in ResourceType::DEPENDENTS
            .into_iter()
            .chain([ResourceType::Patient])
        {
            assert_eq!(rt.as_str().parse::<ResourceType>().unwrap(), rt);
        }
        assert!("Encounter".parse::<ResourceType>().is_err());
    }

    #[test]
    fn subject_param_uses_relative_reference() {
        assert_eq!(subject_param("abc"), ("subject", "Patient/abc".to_string()));
    }
}
