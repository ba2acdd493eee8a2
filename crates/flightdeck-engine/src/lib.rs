//! # flightdeck Engine
//!
//! Durable step-based flight (saga) engine.
//!
//! ## Features
//!
//! - Ordered steps with per-step retry policies
//! - Automatic compensating rollback on fatal failure
//! - Working state persisted after every step, resumable after a crash
//! - Cooperative suspension for retry backoff and sub-flight polling
//! - Idempotent sub-flight launching and patient waiting
//! - In-memory and file system run stores

pub mod definition;
pub mod engine;
pub mod error;
pub mod executor;
pub mod launcher;
pub mod parameters;
pub mod recovery;
pub mod registry;
pub mod retry;
pub mod run;
pub mod step;
pub mod store;

pub use definition::{FlightDefinition, FlightFactory, StaticFlight, StepEntry};
pub use engine::Engine;
pub use error::{EngineError, ParameterError, RegistryError, StoreError};
pub use executor::{FlightExecutor, SliceOutcome};
pub use launcher::{SubflightLauncher, WaitOptions, WaitOutcome, child_failure};
pub use parameters::Parameters;
pub use recovery::RecoveryManager;
pub use registry::{Registerable, Registry, RegistryBuilder};
pub use retry::{RetryPolicy, RetryState};
pub use run::{Direction, Run, RunId, RunStatus, RunSummary};
pub use step::{FlightContext, Step, StepFailure, StepResult};
pub use store::{CreateOutcome, FileRunStore, MemoryRunStore, RunStore};
