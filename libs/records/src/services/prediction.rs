//! Client for the external risk-scoring service.
//!
//! The service reads the patient's stored resources itself, persists a
//! RiskAssessment, and answers with the score and the assessment id.

use crate::config::PredictionConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskPrediction {
    #[serde(default)]
    pub patient_id: Option<String>,
    pub risk_score: f64,
    pub risk_class: String,
    pub risk_assessment_id: String,
}

#[derive(Debug, Serialize)]
struct PredictionRequest<'a> {
    patient_id: &'a str,
}

/// Produces a ten-year risk prediction for a stored patient.
#[async_trait]
pub trait RiskPredictor: Send + Sync {
    async fn predict(&self, patient_id: &str) -> Result<RiskPrediction>;
}

#[async_trait]
impl<P: RiskPredictor + ?Sized> RiskPredictor for Arc<P> {
    async fn predict(&self, patient_id: &str) -> Result<RiskPrediction> {
        (**self).predict(patient_id).await
    }
}

#[derive(Debug, Clone)]
pub struct PredictionClient {
    http: reqwest::Client,
    endpoint: String,
}

impl PredictionClient {
    pub fn new(config: &PredictionConfig) -> Result<Self> {
        Self::with_options(&config.base_url, config.timeout())
    }

    pub fn with_options(base_url: &str, timeout: Duration) -> Result<Self> {
        let parsed = url::Url::parse(base_url).map_err(|e| {
            Error::Config(format!("invalid prediction service URL {base_url}: {e}"))
        })?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cardiorisk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::transport("building HTTP client", e))?;

        Ok(Self {
            http,
            endpoint: format!("{}/predict-risk", parsed.as_str().trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RiskPredictor for PredictionClient {
    async fn predict(&self, patient_id: &str) -> Result<RiskPrediction> {
        let response = self
            .http
            .post(&self.endpoint)
            .header(ACCEPT, "application/json")
            .json(&PredictionRequest { patient_id })
            .send()
            .await
            .map_err(|e| Error::transport(format!("predict risk for Patient/{patient_id}"), e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RemoteRejected {
                operation: "predict",
                resource_type: "predict-risk".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let prediction: RiskPrediction = response
            .json()
            .await
            .map_err(|e| Error::transport("decoding risk prediction", e))?;

        tracing::info!(
            patient_id = %patient_id,
            risk_score = prediction.risk_score,
            risk_class = %prediction.risk_class,
            risk_assessment_id = %prediction.risk_assessment_id,
            "Risk prediction received"
        );
        Ok(prediction)
    }
}
