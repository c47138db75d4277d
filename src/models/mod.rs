mod account;
mod id;
mod link;
mod transaction;

pub use account::{Account, Balance};
pub use id::Id;
pub use link::{
    AccountLink, FailureReason, InProgressPhase, LinkStatus, MfaPhase, SourceOfTruth,
};
pub use transaction::Transaction;
