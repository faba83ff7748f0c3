//! Clinical record orchestration for cardiovascular risk intake.
//!
//! This crate turns one flat risk-factor payload into a FHIR record graph on a
//! remote server, lists existing patients enriched with their conditions, and
//! tears a patient's record graph down again without orphaning dependents.
//!
//! ```text
//! RiskFactorForm ──try_from──▶ PatientIntake ──RecordAssembler──▶ Patient + dependents
//!                                                 │
//!                      RecordAggregator ◀─────────┤ (search Patient, join Condition)
//!                      RecordPurger     ◀─────────┘ (dependents first, Patient last)
//! ```
//!
//! All remote access goes through the [`RecordStore`] trait; [`HttpRecordClient`]
//! talks to a FHIR REST endpoint and [`InMemoryRecordStore`] keeps everything
//! in-process.

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;

pub use client::{HttpRecordClient, InMemoryRecordStore, RecordStore, ServerStatus};
pub use config::Config;
pub use error::{Compensation, Error, Result};
pub use models::{
    AssemblyStep, ConditionCode, ObservationCode, PatientIntake, ResourceType, RiskFactorForm,
};
pub use services::{
    AssemblyReceipt, PatientListing, PatientSummary, PredictionClient, PurgeReport,
    RecordAggregator, RecordAssembler, RecordPurger, RiskPrediction, RiskPredictor,
};
