//! The account-link lifecycle engine.

mod machine;
mod service;
mod teardown;

pub use machine::{derive_status, next, LinkEvent, LinkMode, LinkState, MAX_MFA_POLLS};
pub use service::{LinkOutcome, LinkRequest, LinkService};
