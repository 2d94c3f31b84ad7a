//! Externally-arbitrated leader election.
//!
//! A pool of [`Voter`] agents polls whichever [`Candidate`] the operator's
//! routing layer currently points them at, carrying signed, timestamped
//! observations. A candidate promotes itself only once a stable majority of
//! the pool has been polling it for the full warm-up streak, continuously,
//! for the promotion delay — and demotes the moment any single evaluation
//! fails. There is no peer-to-peer consensus: at-most-one-leader rests on
//! message authentication, clock-skew tolerance, and the promotion delay
//! outlasting the vote staleness horizon.
#![deny(unreachable_pub)]
#![deny(unused_must_use)]
#![cfg_attr(docsrs, warn(missing_docs))]

pub mod candidate;
pub mod config;
pub mod error;
pub mod net;
pub mod signature;
pub mod timeouts;
pub mod util;
pub mod voter;
pub mod wire;

pub use candidate::{Candidate, CandidateState, VoteHandler};
pub use config::{ForcedState, FORCE_STATE_ENV};
pub use error::{ConfigError, QuorateError};
pub use net::{
    HttpError, NetError, ProtocolError, VoteHttpServer, VoteHttpServerConfig, VoteServerHandle,
};
pub use signature::{sign, verify, SignatureError, SIGNATURE_HEADER};
pub use voter::Voter;
pub use wire::{Vote, VoteResponse};
