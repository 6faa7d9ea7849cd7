//! # Orchestration
//!
//! The paths that move an NDR event through its lifecycle.
//!
//! ## Components
//!
//! - **SignalIngestor**: create-or-update from carrier signals. Acknowledges
//!   fast and never calls an external system on the request path.
//! - **ResolutionOrchestrator**: channel-fed worker running the side effects
//!   owed after a state change (tokens, notifications, carrier commands).
//! - **AdminOverrides**: operator escalation, manual resolution and
//!   return-to-origin.
//!
//! ## Flow
//!
//! ```text
//! carrier signal ──► SignalIngestor ──► EventStore (compare-and-set)
//!                          │
//!                          └──► ResolutionQueue ──► ResolutionOrchestrator ──► notifier / carrier
//! ```
//!
//! State is always persisted before a task is queued. A lost or replayed task
//! never leaves the event inconsistent, only its side effects late.

pub mod admin;
pub mod attempts;
pub mod queue;
pub mod resolution_orchestrator;
pub mod signal_ingestor;

pub use admin::AdminOverrides;
pub use attempts::{record_new_attempt, RecordedAttempt};
pub use queue::{ResolutionQueue, ResolutionTask, TaskKind};
pub use resolution_orchestrator::{OrchestratorCollaborators, ResolutionOrchestrator, TaskReport};
pub use signal_ingestor::{IngestDisposition, IngestResponse, SignalIngestor};
