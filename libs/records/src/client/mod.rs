//! Record store access
//!
//! Every component reaches the remote FHIR server through [`RecordStore`]; one
//! call is one round trip, with no retries and no caching.

mod http;
mod memory;
mod traits;

pub use http::{HttpRecordClient, ServerStatus};
pub use memory::{Fault, InMemoryRecordStore, Operation, RecordedCall};
pub use traits::RecordStore;
