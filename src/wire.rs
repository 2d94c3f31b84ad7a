//! Wire contract between voters and candidates.
//!
//! Both messages travel as JSON bodies whose exact bytes are covered by an
//! HMAC in the `Signature` header, so serialization happens exactly once per
//! exchange and the signer sees the same bytes the peer receives. Timestamps
//! are RFC-3339 UTC; each side tolerates `SKEW_WINDOW` of disagreement.

use crate::timeouts::SKEW_WINDOW;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One voter observation, sent on every poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    /// Stable opaque identifier chosen once at voter startup.
    #[serde(rename = "voterID")]
    pub voter_id: String,
    /// Candidate identifier from the most recent successful poll, or empty.
    #[serde(rename = "lastSeenCandidateID")]
    pub last_seen_candidate_id: String,
    /// Consecutive successful polls that returned the same candidate.
    #[serde(rename = "numPollsSinceChange")]
    pub num_polls_since_change: u32,
    /// Wall-clock serialization time of this vote.
    #[serde(rename = "voteSent", with = "time::serde::rfc3339")]
    pub vote_sent: OffsetDateTime,
}

impl Vote {
    pub(crate) fn new(voter_id: String) -> Self {
        Self {
            voter_id,
            last_seen_candidate_id: String::new(),
            num_polls_since_change: 0,
            vote_sent: OffsetDateTime::UNIX_EPOCH,
        }
    }
}

/// The candidate's reply to a vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteResponse {
    /// Stable opaque identifier chosen once at candidate startup.
    #[serde(rename = "candidateID")]
    pub candidate_id: String,
    /// Wall-clock serialization time of this response.
    #[serde(rename = "responseSent", with = "time::serde::rfc3339")]
    pub response_sent: OffsetDateTime,
}

/// Signed offset of `sent` relative to `now`, in seconds, for log lines.
pub(crate) fn skew_seconds(sent: OffsetDateTime, now: OffsetDateTime) -> f64 {
    (now - sent).as_seconds_f64()
}

/// Whether a remote timestamp is outside the tolerated clock-skew window.
pub(crate) fn exceeds_skew_window(sent: OffsetDateTime, now: OffsetDateTime) -> bool {
    (now - sent).unsigned_abs() > SKEW_WINDOW
}
