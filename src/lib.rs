#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # NDR Core
//!
//! Detection, classification and resolution of failed last-mile deliveries
//! (non-delivery reports).
//!
//! ## Overview
//!
//! Carrier status callbacks arrive in every carrier's own vocabulary. The
//! engine normalizes them into a single NDR event per shipment, tracks each
//! failed attempt, and drives the event to an outcome: a reattempt, a
//! customer-driven fix through a signed resolution link, an escalation to the
//! seller, or a return to origin.
//!
//! ## Module Organization
//!
//! - [`normalizer`] - Carrier status codes and remarks to NDR categories
//! - [`models`] - NDR events, audit actions, carrier signals, customer views
//! - [`state_machine`] - Event lifecycle and transition rules
//! - [`store`] - Versioned event persistence with compare-and-set writes
//! - [`orchestration`] - Signal ingestion, resolution side effects, admin overrides
//! - [`tokens`] - Signed capability tokens for customer resolution links
//! - [`resolution`] - Customer actions taken through a resolution link
//! - [`governor`] - Periodic escalation and return-to-origin sweeps
//! - [`resilience`] - Timeouts, retries and circuit breakers for carrier commands
//! - [`services`] - Interfaces to carriers, notifications and the order system
//! - [`web`] - HTTP surface
//! - [`bootstrap`] - Wiring and lifecycle of a running engine
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ndr_core::bootstrap::{BootstrapConfig, ExternalServices, NdrBootstrap};
//!
//! # async fn example(services: ExternalServices) -> ndr_core::Result<()> {
//! let handle = NdrBootstrap::bootstrap(BootstrapConfig::default(), services).await?;
//! handle.run_until_ctrl_c().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! [`test_helpers::TestEngine`] wires the whole engine over an in-memory store,
//! a manual clock and recording doubles of every external system.

pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod error;
pub mod governor;
pub mod logging;
pub mod models;
pub mod normalizer;
pub mod orchestration;
pub mod resilience;
pub mod resolution;
pub mod services;
pub mod state_machine;
pub mod store;
pub mod test_helpers;
pub mod tokens;
pub mod web;

pub use bootstrap::{BootstrapConfig, ExternalServices, NdrBootstrap, NdrCore, NdrSystemHandle};
pub use config::{ConfigManager, NdrConfig};
pub use error::{NdrError, Result};
pub use governor::{EscalationGovernor, EscalationPolicy, SweepReport};
pub use models::{CarrierSignal, EventSummary, NdrCategory, NdrEvent};
pub use normalizer::{RuleRegistry, SignalNormalizer};
pub use orchestration::{AdminOverrides, IngestDisposition, IngestResponse, ResolutionOrchestrator, SignalIngestor};
pub use resolution::{ActionResponse, CustomerAction, CustomerActionHandler};
pub use state_machine::{NdrStateMachine, NdrStatus, NdrTransition};
pub use store::{EventMutator, EventStore, InMemoryEventStore};
pub use tokens::CapabilityTokenService;
