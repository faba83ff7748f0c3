//! Ingestion boundary: flat risk-factor form to typed intake.
//!
//! Form submissions carry every value as a string (`"true"`, `"120"`). They are
//! converted once, here, so the orchestration core only ever sees typed fields.

use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A form value as submitted: usually a string, but JSON clients may send
/// numbers or booleans directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormValue {
    Text(String),
    Number(f64),
    Flag(bool),
}

impl FormValue {
    fn as_number(&self, field: &'static str) -> Result<f64> {
        let value = match self {
            FormValue::Number(n) => *n,
            FormValue::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|e| Error::invalid_payload(field, format!("'{s}' is not a number: {e}")))?,
            FormValue::Flag(_) => {
                return Err(Error::invalid_payload(field, "expected a number, got a boolean"))
            }
        };
        if !value.is_finite() {
            return Err(Error::invalid_payload(field, "must be a finite number"));
        }
        Ok(value)
    }

    fn as_flag(&self) -> bool {
        match self {
            FormValue::Flag(b) => *b,
            FormValue::Text(s) => s.trim().eq_ignore_ascii_case("true"),
            FormValue::Number(_) => false,
        }
    }
}

impl From<&str> for FormValue {
    fn from(value: &str) -> Self {
        FormValue::Text(value.to_string())
    }
}

/// Flat payload exactly as the intake form submits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RiskFactorForm {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(rename = "birthDate", default)]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub education: Option<FormValue>,
    #[serde(rename = "cigsPerDay", default)]
    pub cigs_per_day: Option<FormValue>,
    #[serde(rename = "totChol", default)]
    pub tot_chol: Option<FormValue>,
    #[serde(rename = "sysBP", default)]
    pub sys_bp: Option<FormValue>,
    #[serde(rename = "diaBP", default)]
    pub dia_bp: Option<FormValue>,
    #[serde(rename = "BMI", default)]
    pub bmi: Option<FormValue>,
    #[serde(rename = "heartRate", default)]
    pub heart_rate: Option<FormValue>,
    #[serde(default)]
    pub glucose: Option<FormValue>,
    #[serde(default)]
    pub is_smoking: Option<FormValue>,
    #[serde(rename = "BPMeds", default)]
    pub bp_meds: Option<FormValue>,
    #[serde(rename = "prevalentStroke", default)]
    pub prevalent_stroke: Option<FormValue>,
    #[serde(rename = "prevalentHyp", default)]
    pub prevalent_hyp: Option<FormValue>,
    #[serde(default)]
    pub diabetes: Option<FormValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
    Unknown,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
            Gender::Unknown => "unknown",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "other" => Ok(Gender::Other),
            "unknown" => Ok(Gender::Unknown),
            other => Err(Error::invalid_payload(
                "gender",
                format!("'{other}' is not one of male, female, other, unknown"),
            )),
        }
    }
}

/// Measured risk factors, all in the units of the observation catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    pub bmi: f64,
    pub total_cholesterol: f64,
    pub systolic_bp: f64,
    pub diastolic_bp: f64,
    pub glucose: f64,
    pub heart_rate: f64,
    pub cigarettes_per_day: f64,
}

/// Typed intake. Absent boolean flags are `false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientIntake {
    pub name: String,
    pub gender: Option<Gender>,
    pub birth_date: NaiveDate,
    /// Education level, 1 through 4.
    pub education: u8,
    pub measurements: Measurements,
    pub is_smoking: bool,
    pub on_bp_medication: bool,
    pub prevalent_stroke: bool,
    pub prevalent_hypertension: bool,
    pub diabetes: bool,
}

fn required<'a>(value: &'a Option<FormValue>, field: &'static str) -> Result<&'a FormValue> {
    value
        .as_ref()
        .ok_or_else(|| Error::invalid_payload(field, "is required"))
}

fn positive(value: &Option<FormValue>, field: &'static str) -> Result<f64> {
    let n = required(value, field)?.as_number(field)?;
    if n <= 0.0 {
        return Err(Error::invalid_payload(field, "must be a positive number"));
    }
    Ok(n)
}

fn non_negative(value: &Option<FormValue>, field: &'static str) -> Result<f64> {
    let n = required(value, field)?.as_number(field)?;
    if n < 0.0 {
        return Err(Error::invalid_payload(field, "must not be negative"));
    }
    Ok(n)
}

fn flag(value: &Option<FormValue>) -> bool {
    value.as_ref().is_some_and(FormValue::as_flag)
}

impl TryFrom<RiskFactorForm> for PatientIntake {
    type Error = Error;

    fn try_from(form: RiskFactorForm) -> Result<Self> {
        let name = form
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::invalid_payload("name", "is required"))?
            .to_string();

        let birth_date_raw = form
            .birth_date
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| Error::invalid_payload("birthDate", "is required"))?;
        let birth_date = NaiveDate::parse_from_str(birth_date_raw, "%Y-%m-%d").map_err(|e| {
            Error::invalid_payload("birthDate", format!("'{birth_date_raw}' is not YYYY-MM-DD: {e}"))
        })?;

        let gender = form
            .gender
            .as_deref()
            .filter(|g| !g.trim().is_empty())
            .map(Gender::parse)
            .transpose()?;

        let education = required(&form.education, "education")?.as_number("education")?;
        if education.fract() != 0.0 || !(1.0..=4.0).contains(&education) {
            return Err(Error::invalid_payload(
                "education",
                "must be a whole number between 1 and 4",
            ));
        }

        let measurements = Measurements {
            bmi: positive(&form.bmi, "BMI")?,
            total_cholesterol: positive(&form.tot_chol, "totChol")?,
            systolic_bp: positive(&form.sys_bp, "sysBP")?,
            diastolic_bp: positive(&form.dia_bp, "diaBP")?,
            glucose: positive(&form.glucose, "glucose")?,
            heart_rate: positive(&form.heart_rate, "heartRate")?,
            cigarettes_per_day: non_negative(&form.cigs_per_day, "cigsPerDay")?,
        };

        Ok(PatientIntake {
            name,
            gender,
            birth_date,
            education: education as u8,
            measurements,
            is_smoking: flag(&form.is_smoking),
            on_bp_medication: flag(&form.bp_meds),
            prevalent_stroke: flag(&form.prevalent_stroke),
            prevalent_hypertension: flag(&form.prevalent_hyp),
            diabetes: flag(&form.diabetes),
        })
    }
}
