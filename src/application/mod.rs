// Application layer - sync coordination, verification, reset and the
// services wiring them together.

mod config;
pub mod entity_service;
mod error;
pub mod events;
pub mod reset;
mod service;
pub mod sync;
pub mod verification;

pub use config::*;
pub use entity_service::{DomainService, EntityService};
pub use error::*;
pub use events::{BusEvent, EventBus, ListenerId, SyncOperation};
pub use reset::{PruneReport, ResetReport, ResetService};
pub use service::*;
pub use sync::{BatchResult, EntitySync, SyncCoordinator, SyncIntent, SyncOutcome};
pub use verification::{
    BatchVerification, VerificationCheck, VerificationService, Verdict, VerdictCause,
};
