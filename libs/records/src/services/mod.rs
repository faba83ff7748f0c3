//! Orchestration layer
//!
//! Services sequence calls against a [`crate::RecordStore`]: the assembler builds
//! a record graph, the aggregator lists and enriches patients, the purger tears a
//! graph down. The prediction client talks to the external scoring service.

pub mod aggregator;
pub mod assembler;
pub mod prediction;
pub mod purger;

pub use aggregator::{PatientListing, PatientSummary, RecordAggregator};
pub use assembler::{AssemblyReceipt, CreatedResource, RecordAssembler};
pub use prediction::{PredictionClient, RiskPrediction, RiskPredictor};
pub use purger::{PurgeReport, RecordPurger};
