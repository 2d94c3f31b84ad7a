//! Centralized timing and threshold policies for the election protocol.
//!
//! Keeping these values in one place makes the promotion/demotion asymmetry
//! visible: a candidate demotes on a single failing evaluation but promotes
//! only after `LEADERSHIP_WAIT` of unbroken quorum, and every vote it counts
//! is younger than `VOTE_TIMEOUT`. `VOTE_TIMEOUT < LEADERSHIP_WAIT` is what
//! makes the previous leader demote before the next one promotes.

use std::time::Duration;

/// Base polling period for a voter with a settled view.
pub const MAX_VOTE_PERIOD: Duration = Duration::from_secs(5);
/// Polling period while a voter is still warming up on a candidate.
pub const MAX_FAST_VOTE_PERIOD: Duration = Duration::from_millis(100);
/// Age beyond which a stored vote no longer counts.
pub const VOTE_TIMEOUT: Duration = Duration::from_secs(10);
/// Continuous quorum time required before a candidate may promote itself.
pub const LEADERSHIP_WAIT: Duration = Duration::from_secs(15);
/// Tolerance applied to request and response wall-clock timestamps.
pub const SKEW_WINDOW: Duration = Duration::from_secs(15);
/// Cadence of the candidate's interior re-evaluation tick.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Consecutive matching polls before a vote counts toward the majority.
pub const WARMUP_POLLS: u32 = 10;

/// Budget for establishing a voter's poll connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// Socket read/write budget for a single poll exchange.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Grace period granted to the vote server's accept loop on shutdown.
pub const SERVER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Majority threshold for a voter pool of the given size.
pub fn majority(num_voters: usize) -> usize {
    num_voters / 2 + 1
}
