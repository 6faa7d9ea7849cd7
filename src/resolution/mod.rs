//! Customer-facing resolution: the token-gated view and actions behind the
//! resolution link sent to the customer.

pub mod customer_actions;

pub use customer_actions::{ActionResponse, CustomerAction, CustomerActionHandler};
