//! Record aggregator - lists patients enriched with condition flags
//!
//! One bulk Patient search, then one Condition search (and optionally one
//! RiskAssessment search) per patient. Per-patient lookups run concurrently up
//! to a configured limit and are reassembled in Patient search order. A failed
//! lookup marks only that patient's entry as failed.

use crate::client::RecordStore;
use crate::config::ListingConfig;
use crate::models::catalog::TEN_YEAR_CHD_OUTCOME;
use crate::models::resource::{Condition, Patient, RiskAssessment};
use crate::models::{subject_param, ConditionCode, ResourceType};
use crate::{Error, Result};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value as JsonValue;

const UNKNOWN_NAME: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummary {
    pub id: String,
    pub name: String,
    /// Whole years between birth year and the listing year; `None` when the
    /// birth date is missing or unreadable.
    pub age: Option<i32>,
    pub diabetes: bool,
    pub prevalent_stroke: bool,
    pub prevalent_hyp: bool,
    /// Probability from the latest TenYearCHD RiskAssessment, if any.
    #[serde(rename = "tenYearCHD")]
    pub ten_year_chd: Option<f64>,
    /// The Patient carries the incomplete tag from a retained partial assembly.
    pub incomplete: bool,
}

/// One entry of a listing. Failed entries keep whatever identity was readable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PatientListing {
    Enriched(PatientSummary),
    Failed {
        id: Option<String>,
        name: String,
        error: String,
    },
}

impl PatientListing {
    pub fn id(&self) -> Option<&str> {
        match self {
            PatientListing::Enriched(summary) => Some(&summary.id),
            PatientListing::Failed { id, .. } => id.as_deref(),
        }
    }

    pub fn summary(&self) -> Option<&PatientSummary> {
        match self {
            PatientListing::Enriched(summary) => Some(summary),
            PatientListing::Failed { .. } => None,
        }
    }
}

pub struct RecordAggregator<S> {
    store: S,
    max_concurrent_lookups: usize,
    include_risk: bool,
}

impl<S: RecordStore> RecordAggregator<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, &ListingConfig::default())
    }

    pub fn with_config(store: S, config: &ListingConfig) -> Self {
        Self {
            store,
            max_concurrent_lookups: config.max_concurrent_lookups.max(1),
            include_risk: config.include_risk,
        }
    }

    /// List every patient, computing ages against today's UTC date.
    pub async fn list(&self) -> Result<Vec<PatientListing>> {
        self.list_at(Utc::now().date_naive()).await
    }

    /// List every patient, computing ages against `today`.
    ///
    /// Fails only when the bulk Patient search fails.
    pub async fn list_at(&self, today: NaiveDate) -> Result<Vec<PatientListing>> {
        let patients = self.store.search(ResourceType::Patient, &[]).await?;
        let total = patients.len();

        let listings: Vec<PatientListing> = stream::iter(patients)
            .map(|raw| self.enrich(raw, today))
            .buffered(self.max_concurrent_lookups)
            .collect()
            .await;

        let failed = listings
            .iter()
            .filter(|l| matches!(l, PatientListing::Failed { .. }))
            .count();
        if failed > 0 {
            tracing::warn!(total, failed, "Some patients could not be enriched");
        } else {
            tracing::debug!(total, "Patient listing enriched");
        }
        Ok(listings)
    }

    async fn enrich(&self, raw: JsonValue, today: NaiveDate) -> PatientListing {
        let raw_id = raw.get("id").and_then(JsonValue::as_str).map(str::to_string);

        let patient: Patient = match serde_json::from_value(raw) {
            Ok(patient) => patient,
            Err(e) => {
                return PatientListing::Failed {
                    id: raw_id,
                    name: UNKNOWN_NAME.to_string(),
                    error: format!("unreadable Patient resource: {e}"),
                }
            }
        };
        let name = display_name(&patient);

        let Some(id) = patient.id.clone() else {
            return PatientListing::Failed {
                id: None,
                name,
                error: "Patient resource has no id".to_string(),
            };
        };

        match self.lookup(&id).await {
            Ok((conditions, ten_year_chd)) => PatientListing::Enriched(PatientSummary {
                age: age_at(patient.birth_date.as_deref(), today),
                diabetes: has_condition(&conditions, ConditionCode::Diabetes),
                prevalent_stroke: has_condition(&conditions, ConditionCode::Stroke),
                prevalent_hyp: has_condition(&conditions, ConditionCode::Hypertension),
                ten_year_chd,
                incomplete: patient.is_incomplete(),
                id,
                name,
            }),
            Err(e) => {
                tracing::warn!(patient_id = %id, error = %e, "Patient enrichment failed");
                PatientListing::Failed {
                    id: Some(id),
                    name,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn lookup(&self, patient_id: &str) -> Result<(Vec<Condition>, Option<f64>)> {
        let subject = [subject_param(patient_id)];

        let conditions = self
            .store
            .search(ResourceType::Condition, &subject)
            .await?
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<Condition>, _>>()
            .map_err(|e| Error::InvalidResource(format!("unreadable Condition: {e}")))?;

        let ten_year_chd = if self.include_risk {
            let assessments = self
                .store
                .search(ResourceType::RiskAssessment, &subject)
                .await?
                .into_iter()
                .map(serde_json::from_value)
                .collect::<std::result::Result<Vec<RiskAssessment>, _>>()
                .map_err(|e| Error::InvalidResource(format!("unreadable RiskAssessment: {e}")))?;
            latest_ten_year_chd(&assessments)
        } else {
            None
        };

        Ok((conditions, ten_year_chd))
    }
}

fn display_name(patient: &Patient) -> String {
    patient
        .name
        .first()
        .and_then(|n| n.display())
        .unwrap_or_else(|| UNKNOWN_NAME.to_string())
}

/// Year-only arithmetic: month and day are ignored.
fn age_at(birth_date: Option<&str>, today: NaiveDate) -> Option<i32> {
    let year = birth_date?.get(..4)?;
    if !year.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = year.parse().ok()?;
    Some(today.year() - year)
}

fn has_condition(conditions: &[Condition], code: ConditionCode) -> bool {
    conditions.iter().any(|c| c.code.has_code(code.code()))
}

/// Probability of the most recent TenYearCHD assessment. Assessments without a
/// readable timestamp rank below timestamped ones; ties go to the later entry.
fn latest_ten_year_chd(assessments: &[RiskAssessment]) -> Option<f64> {
    assessments
        .iter()
        .enumerate()
        .filter_map(|(index, assessment)| {
            let probability = assessment.prediction.iter().find_map(|p| {
                let outcome = p.outcome.as_ref()?;
                let matches = outcome.has_code(TEN_YEAR_CHD_OUTCOME)
                    || outcome.text.as_deref() == Some(TEN_YEAR_CHD_OUTCOME);
                if matches {
                    p.probability_decimal
                } else {
                    None
                }
            })?;
            Some((recorded_at(assessment), index, probability))
        })
        .max_by_key(|(at, index, _)| (*at, *index))
        .map(|(_, _, probability)| probability)
}

fn recorded_at(assessment: &RiskAssessment) -> Option<DateTime<FixedOffset>> {
    let value = assessment.recorded_at()?;
    DateTime::parse_from_rfc3339(value).ok().or_else(|| {
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().fixed_offset())
    })
}
