// State machine module for the NDR event lifecycle
//
// The event record carries its own status; transitions are computed here and
// persisted by the store through compare-and-set on the record version.

pub mod errors;
pub mod events;
pub mod guards;
pub mod ndr_state_machine;
pub mod states;

// Re-export main types for convenient access
pub use errors::{GuardError, StateMachineError, StateMachineResult};
pub use events::NdrTransition;
pub use guards::{CustomerDecisionGuard, NotTerminalGuard, StateGuard};
pub use ndr_state_machine::{AppliedTransition, NdrStateMachine};
pub use states::NdrStatus;
