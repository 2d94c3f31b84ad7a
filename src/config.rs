//! Operator override for a candidate's election state.
//!
//! Pinning state is an emergency escape hatch (and a reproducible-testing
//! aid): while forced, the candidate ignores votes entirely. The override is
//! read once at construction from `QUORATE_FORCE_STATE`; an unparsable value
//! is a fatal configuration error rather than a silently-unforced candidate.

use crate::candidate::CandidateState;
use crate::error::ConfigError;

/// Environment variable consulted by [`ForcedState::from_env`].
pub const FORCE_STATE_ENV: &str = "QUORATE_FORCE_STATE";

/// Parsed forced-state override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForcedState {
    /// No override; elections run normally.
    #[default]
    Unset,
    Leader,
    NotLeader,
}

impl ForcedState {
    /// Parses an operator-supplied override value.
    ///
    /// Accepts the historical spellings for "not leader"; the empty string
    /// leaves elections unforced.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim() {
            "" => Ok(ForcedState::Unset),
            "leader" => Ok(ForcedState::Leader),
            "not-leader" | "not_leader" | "notleader" => Ok(ForcedState::NotLeader),
            other => Err(ConfigError::InvalidForceState {
                value: other.to_string(),
            }),
        }
    }

    /// Reads the override from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(FORCE_STATE_ENV) {
            Ok(value) => Self::parse(&value),
            Err(_) => Ok(ForcedState::Unset),
        }
    }

    /// The pinned state, if any.
    pub fn state(self) -> Option<CandidateState> {
        match self {
            ForcedState::Unset => None,
            ForcedState::Leader => Some(CandidateState::Leader),
            ForcedState::NotLeader => Some(CandidateState::NotLeader),
        }
    }
}
