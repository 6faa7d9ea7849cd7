//! # Test Helpers
//!
//! Deterministic doubles for the external collaborators, signal and shipment
//! builders, and [`TestEngine`], the whole engine wired over an in-memory
//! store and a manual clock. Used by unit tests and by the `tests/` suites.

pub mod doubles;
pub mod fixtures;
pub mod harness;

pub use doubles::{
    CarrierCall, OrderCall, RecordingCarrier, RecordingNotifier, RecordingOrderCommands, SentNotification,
    StaticOrderBook,
};
pub use fixtures::{
    delivered_signal, detected_event, ndr_signal, ndr_signal_at, sample_address, shipment_info, with_event_key,
};
pub use harness::{test_config, test_epoch, TestEngine, TEST_TOKEN_SECRET};
