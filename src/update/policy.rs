//! Update policies and the staleness decision.

use std::fmt;

use chrono::{Local, TimeZone};
use log::warn;

use super::{
    UPDATE_POLICY_ALWAYS, UPDATE_POLICY_DAILY, UPDATE_POLICY_INTERVAL, UPDATE_POLICY_NEVER,
};

const MILLIS_PER_MINUTE: i64 = 60 * 1000;
const MINUTES_PER_DAY: u32 = 24 * 60;

/// How often a cached item is checked against its repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    Always,
    /// Once per local calendar day.
    Daily,
    /// Every N minutes.
    Interval(u32),
    Never,
}

impl UpdatePolicy {
    /// Parse a policy string such as `daily` or `interval:60`.
    ///
    /// Unrecognized policies behave as [`UpdatePolicy::Never`].
    pub fn parse(policy: &str) -> Self {
        let normalized = policy.trim().to_lowercase();
        match normalized.as_str() {
            "" | UPDATE_POLICY_NEVER => UpdatePolicy::Never,
            UPDATE_POLICY_ALWAYS => UpdatePolicy::Always,
            UPDATE_POLICY_DAILY => UpdatePolicy::Daily,
            other => match other
                .strip_prefix(UPDATE_POLICY_INTERVAL)
                .and_then(|rest| rest.strip_prefix(':'))
            {
                Some(minutes) => match minutes.trim().parse::<u32>() {
                    Ok(minutes) => UpdatePolicy::Interval(minutes),
                    Err(_) => {
                        warn!(
                            "Non-parseable repository update policy '{}', assuming '{}'",
                            policy, UPDATE_POLICY_NEVER
                        );
                        UpdatePolicy::Never
                    }
                },
                None => {
                    warn!(
                        "Unknown repository update policy '{}', assuming '{}'",
                        policy, UPDATE_POLICY_NEVER
                    );
                    UpdatePolicy::Never
                }
            },
        }
    }

    /// Whether an item last checked at `last_updated` is stale at `now`.
    /// Both are milliseconds since the Unix epoch.
    pub fn is_update_required(&self, now: i64, last_updated: i64) -> bool {
        match self {
            UpdatePolicy::Always => true,
            UpdatePolicy::Never => false,
            UpdatePolicy::Daily => match local_midnight(now) {
                Some(midnight) => last_updated < midnight,
                None => now - last_updated >= i64::from(MINUTES_PER_DAY) * MILLIS_PER_MINUTE,
            },
            UpdatePolicy::Interval(minutes) => {
                now - last_updated >= i64::from(*minutes) * MILLIS_PER_MINUTE
            }
        }
    }

    /// Check period in minutes, used to rank policies. Smaller is stricter.
    fn ordinal(&self) -> u32 {
        match self {
            UpdatePolicy::Always => 0,
            UpdatePolicy::Daily => MINUTES_PER_DAY,
            UpdatePolicy::Interval(minutes) => *minutes,
            UpdatePolicy::Never => u32::MAX,
        }
    }
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdatePolicy::Always => f.write_str(UPDATE_POLICY_ALWAYS),
            UpdatePolicy::Daily => f.write_str(UPDATE_POLICY_DAILY),
            UpdatePolicy::Interval(minutes) => write!(f, "{}:{}", UPDATE_POLICY_INTERVAL, minutes),
            UpdatePolicy::Never => f.write_str(UPDATE_POLICY_NEVER),
        }
    }
}

/// Start of the local calendar day containing `now`, in epoch milliseconds.
pub fn local_midnight(now: i64) -> Option<i64> {
    let today = Local.timestamp_millis_opt(now).single()?.date_naive();
    let midnight = today.and_hms_opt(0, 0, 0)?;
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.timestamp_millis())
}

/// Apply `policy` to an item last checked at `last_updated`.
pub fn is_update_required(now: i64, last_updated: i64, policy: &str) -> bool {
    UpdatePolicy::parse(policy).is_update_required(now, last_updated)
}

/// The stricter of two policies, i.e. the one that checks more often.
pub fn effective_update_policy(policy1: &str, policy2: &str) -> String {
    let first = UpdatePolicy::parse(policy1);
    let second = UpdatePolicy::parse(policy2);
    if second.ordinal() < first.ordinal() {
        second.to_string()
    } else {
        first.to_string()
    }
}
