//! # Data Model
//!
//! NDR events, their audit trail, carrier signals and customer-facing views.

pub mod category;
pub mod customer;
pub mod ndr_event;
pub mod signal;

pub use category::NdrCategory;
pub use customer::{
    CustomerActionKind, DeliveryAddress, EventSummary, RescheduleWindow, TimeSlot,
};
pub use ndr_event::{
    signal_metadata, ActionOutcome, ActionType, Actor, EscalationRecord, NdrEvent,
    ResolutionAction,
};
pub use signal::{CarrierSignal, ClassificationSource, NormalizedSignal, SignalKind};
