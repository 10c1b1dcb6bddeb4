//! Update checks: when a cached item must be fetched again.
//!
//! # Structure
//!
//! - `policy` - Update policy parsing and the staleness decision
//! - `check` - The check request/result record
//! - `status` - The persisted per-directory status record
//! - `manager` - `check` and `touch` against the status record

mod check;
mod manager;
mod policy;
mod status;

pub use check::UpdateCheck;
pub use manager::UpdateCheckManager;
pub use policy::{UpdatePolicy, effective_update_policy, is_update_required, local_midnight};
pub use status::{
    CachedError, CachedErrorKind, STATUS_FILE_NAME, StatusEntry, StatusRecord,
};

pub const UPDATE_POLICY_ALWAYS: &str = "always";
pub const UPDATE_POLICY_DAILY: &str = "daily";
pub const UPDATE_POLICY_NEVER: &str = "never";
/// Prefix of `interval:<minutes>` policies.
pub const UPDATE_POLICY_INTERVAL: &str = "interval";
