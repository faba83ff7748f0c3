//! Fixed coding vocabularies for the cardiovascular risk record graph.
//!
//! These are compile-time constants and are never configurable.

use std::fmt;

pub const LOINC_SYSTEM: &str = "http://loinc.org";
pub const SNOMED_SYSTEM: &str = "http://snomed.info/sct";
pub const NDC_SYSTEM: &str = "http://hl7.org/fhir/sid/ndc";

pub const CURRENT_SMOKER_CODE: &str = "LA18976-3";
pub const CURRENT_SMOKER_DISPLAY: &str = "Current smoker";
pub const NON_SMOKER_CODE: &str = "LA15920-4";
pub const NON_SMOKER_DISPLAY: &str = "Non-smoker";

pub const BP_MEDICATION_CODE: &str = "BP_MEDS";
pub const BP_MEDICATION_DISPLAY: &str = "Blood Pressure Medication";

/// `meta.tag` placed on a Patient whose record graph was only partly created.
pub const ASSEMBLY_TAG_SYSTEM: &str = "urn:cardiorisk:assembly";
pub const INCOMPLETE_TAG_CODE: &str = "incomplete";
pub const INCOMPLETE_TAG_DISPLAY: &str = "Incomplete record graph";

/// Outcome text the prediction service writes on its RiskAssessments.
pub const TEN_YEAR_CHD_OUTCOME: &str = "TenYearCHD";

/// Observation codes, in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservationCode {
    Bmi,
    TotalCholesterol,
    SystolicBloodPressure,
    DiastolicBloodPressure,
    Glucose,
    HeartRate,
    SmokingStatus,
    Education,
    CigarettesPerDay,
}

impl ObservationCode {
    pub const ALL: [ObservationCode; 9] = [
        ObservationCode::Bmi,
        ObservationCode::TotalCholesterol,
        ObservationCode::SystolicBloodPressure,
        ObservationCode::DiastolicBloodPressure,
        ObservationCode::Glucose,
        ObservationCode::HeartRate,
        ObservationCode::SmokingStatus,
        ObservationCode::Education,
        ObservationCode::CigarettesPerDay,
    ];

    pub fn code(self) -> &'static str {
        match self {
            ObservationCode::Bmi => "39156-5",
            ObservationCode::TotalCholesterol => "2093-3",
            ObservationCode::SystolicBloodPressure => "8480-6",
            ObservationCode::DiastolicBloodPressure => "8462-4",
            ObservationCode::Glucose => "15074-8",
            ObservationCode::HeartRate => "8867-4",
            ObservationCode::SmokingStatus => "72166-2",
            ObservationCode::Education => "edu",
            ObservationCode::CigarettesPerDay => "cig",
        }
    }

    pub fn display(self) -> &'static str {
        match self {
            ObservationCode::Bmi => "BMI",
            ObservationCode::TotalCholesterol => "Total Cholesterol",
            ObservationCode::SystolicBloodPressure => "Systolic Blood Pressure",
            ObservationCode::DiastolicBloodPressure => "Diastolic Blood Pressure",
            ObservationCode::Glucose => "Glucose",
            ObservationCode::HeartRate => "Heart Rate",
            ObservationCode::SmokingStatus => "Smoking Status",
            ObservationCode::Education => "Education",
            ObservationCode::CigarettesPerDay => "Cigarettes Per Day",
        }
    }

    /// Unit for quantity-valued observations. `None` for the coded smoking
    /// status and for the unitless education level.
    pub fn unit(self) -> Option<&'static str> {
        match self {
            ObservationCode::Bmi => Some("kg/m2"),
            ObservationCode::TotalCholesterol | ObservationCode::Glucose => Some("mg/dL"),
            ObservationCode::SystolicBloodPressure | ObservationCode::DiastolicBloodPressure => {
                Some("mmHg")
            }
            ObservationCode::HeartRate => Some("bpm"),
            ObservationCode::CigarettesPerDay => Some("cig/day"),
            ObservationCode::SmokingStatus | ObservationCode::Education => None,
        }
    }

    pub fn is_coded(self) -> bool {
        matches!(self, ObservationCode::SmokingStatus)
    }
}

impl fmt::Display for ObservationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Condition codes, in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionCode {
    Stroke,
    Hypertension,
    Diabetes,
}

impl ConditionCode {
    pub const ALL: [ConditionCode; 3] = [
        ConditionCode::Stroke,
        ConditionCode::Hypertension,
        ConditionCode::Diabetes,
    ];

    pub fn code(self) -> &'static str {
        match self {
            ConditionCode::Stroke => "160245001",
            ConditionCode::Hypertension => "59621000",
            ConditionCode::Diabetes => "44054006",
        }
    }

    pub fn display(self) -> &'static str {
        match self {
            ConditionCode::Stroke => "Stroke",
            ConditionCode::Hypertension => "Hypertension",
            ConditionCode::Diabetes => "Diabetes",
        }
    }
}

impl fmt::Display for ConditionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn observation_codes_are_unique() {
        let codes: HashSet<_> = ObservationCode::ALL.iter().map(|c| c.code()).collect();
        assert_eq!(codes.len(), ObservationCode::ALL.len());
    }

    #[test]
    fn only_smoking_status_is_coded() {
        let coded: Vec<_> = ObservationCode::ALL
            .into_iter()
            .filter(|c| c.is_coded())
            .collect();
        assert_eq!(coded, vec![ObservationCode::SmokingStatus]);
    }

    #[test]
    fn condition_codes_match_snomed() {
        assert_eq!(ConditionCode::Hypertension.code(), "59621000");
        assert_eq!(ConditionCode::Diabetes.to_string(), "44054006");
    }
}
