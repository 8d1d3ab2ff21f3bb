//! Reconciliation pipeline
//!
//! Providers declare what context they require and supply; the graph
//! module checks those declarations form a DAG at startup, the scheduler
//! executes ready providers in concurrent waves, the merge policy picks
//! one observation per field, and the orchestrator ties a whole run
//! together.

pub mod aggregator;
pub mod graph;
pub mod merge;
pub mod orchestrator;
pub mod scheduler;

pub use aggregator::{PropertyRecord, ResolvedField};
pub use merge::MergePolicy;
pub use orchestrator::{Orchestrator, OverallStatus, RunError, RunOutcome};
pub use scheduler::{Scheduler, SequencedResult};
