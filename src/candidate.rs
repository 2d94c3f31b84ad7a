//! Candidate side of the election: vote accounting and state transitions.
//!
//! A candidate never coordinates with its peers. It promotes itself only
//! when a majority of the configured voter pool has been polling it for the
//! full warm-up streak, no voter is currently polling a competitor, and that
//! condition has held continuously for [`LEADERSHIP_WAIT`]. It demotes on
//! the first evaluation that fails any of those checks. The asymmetry is the
//! safety property: a deposed leader always steps down before its successor
//! finishes waiting out the promotion delay.

use crate::config::ForcedState;
use crate::error::ConfigError;
use crate::net::http::{write_error_response, write_signed_response, SimpleHttpRequest};
use crate::net::{HttpError, NetError};
use crate::signature::{self, SIGNATURE_HEADER};
use crate::timeouts::{majority, LEADERSHIP_WAIT, TICK_INTERVAL, VOTE_TIMEOUT, WARMUP_POLLS};
use crate::util::random_id;
use crate::wire::{exceeds_skew_window, skew_seconds, Vote, VoteResponse};
use log::{info, warn};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Instant;
use time::OffsetDateTime;

/// Bounded capacity of the state-transition stream. Publication never
/// blocks; a consumer that falls further behind than this loses the oldest
/// unread transitions and should fall back to polling [`Candidate::state`].
const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Election state of one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateState {
    NotLeader,
    Leader,
}

impl fmt::Display for CandidateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateState::Leader => f.write_str("LEADER"),
            CandidateState::NotLeader => f.write_str("NOT_LEADER"),
        }
    }
}

/// A vote as stored by the candidate, stamped with local arrival time.
#[derive(Debug, Clone)]
struct VoteRecord {
    vote: Vote,
    received: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BallotClass {
    /// Polling a competitor; one of these vetoes the whole evaluation.
    HardNo,
    /// Polling us but still inside the warm-up streak; counts as neither.
    SoftNo,
    Yes,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    yes: usize,
    no: usize,
}

struct Ledger {
    votes: HashMap<String, VoteRecord>,
    state: CandidateState,
    /// Start of the current unbroken streak of quorum-satisfying
    /// evaluations, cleared whenever one fails.
    first_yes: Option<Instant>,
}

struct CandidateCore {
    candidate_id: String,
    num_voters: usize,
    signing_key: Vec<u8>,
    forced: ForcedState,
    ledger: Mutex<Ledger>,
    changes: SyncSender<CandidateState>,
}

impl CandidateCore {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        match self.ledger.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn state(&self) -> CandidateState {
        self.ledger().state
    }

    /// Reruns the election, optionally ingesting one fresh vote first.
    ///
    /// Everything from ingestion to publication happens under the ledger
    /// lock, so evaluations are totally ordered and the change stream
    /// preserves transition order.
    fn elect(&self, vote: Option<Vote>) {
        if self.forced.state().is_some() {
            // Pinned at construction; the ledger never moves again.
            return;
        }
        let mut ledger = self.ledger();
        let now = Instant::now();
        if let Some(vote) = vote {
            ledger
                .votes
                .insert(vote.voter_id.clone(), VoteRecord { vote, received: now });
        }
        let tally = sweep_and_tally(&mut ledger.votes, &self.candidate_id, now);
        let (first_yes, pending) =
            decide(tally, majority(self.num_voters), ledger.first_yes, now);
        ledger.first_yes = first_yes;
        if ledger.state != pending {
            info!(
                "event=candidate_state_change id={} old={} new={} yes_votes={} no_votes={} min_yes={} max_no=0",
                self.candidate_id,
                ledger.state,
                pending,
                tally.yes,
                tally.no,
                majority(self.num_voters),
            );
            ledger.state = pending;
            let _ = self.changes.try_send(pending);
        }
    }
}

fn classify(vote: &Vote, candidate_id: &str) -> BallotClass {
    if vote.last_seen_candidate_id != candidate_id {
        BallotClass::HardNo
    } else if vote.num_polls_since_change < WARMUP_POLLS {
        BallotClass::SoftNo
    } else {
        BallotClass::Yes
    }
}

/// Evicts stale votes and tallies the rest.
fn sweep_and_tally(
    votes: &mut HashMap<String, VoteRecord>,
    candidate_id: &str,
    now: Instant,
) -> Tally {
    let mut tally = Tally::default();
    votes.retain(|_, record| {
        if now.duration_since(record.received) > VOTE_TIMEOUT {
            return false;
        }
        match classify(&record.vote, candidate_id) {
            BallotClass::HardNo => tally.no += 1,
            BallotClass::SoftNo => {}
            BallotClass::Yes => tally.yes += 1,
        }
        true
    });
    tally
}

/// The election function: maps a tally onto the streak clock and the next
/// state. Demotion needs one failing call; promotion needs the streak to
/// have started at least [`LEADERSHIP_WAIT`] ago.
fn decide(
    tally: Tally,
    majority: usize,
    first_yes: Option<Instant>,
    now: Instant,
) -> (Option<Instant>, CandidateState) {
    if tally.no > 0 || tally.yes < majority {
        return (None, CandidateState::NotLeader);
    }
    let started = first_yes.unwrap_or(now);
    if now.duration_since(started) < LEADERSHIP_WAIT {
        (Some(started), CandidateState::NotLeader)
    } else {
        (Some(started), CandidateState::Leader)
    }
}

/// An election participant.
///
/// Owns one interior ticker thread that re-evaluates every second so stale
/// votes expire (and demotion happens) even when no voter is reaching us.
pub struct Candidate {
    core: Arc<CandidateCore>,
    changes: Receiver<CandidateState>,
    stop: Option<mpsc::Sender<()>>,
    ticker: Option<thread::JoinHandle<()>>,
}

impl Candidate {
    /// Starts a candidate for a pool of `num_voters` voters.
    ///
    /// Reads the forced-state override from the environment; an invalid
    /// override value is a fatal configuration error.
    pub fn new(num_voters: usize, signing_key: impl AsRef<[u8]>) -> Result<Self, ConfigError> {
        Ok(Self::with_forced_state(
            num_voters,
            signing_key,
            ForcedState::from_env()?,
        ))
    }

    /// Starts a candidate with an explicit forced-state override.
    pub fn with_forced_state(
        num_voters: usize,
        signing_key: impl AsRef<[u8]>,
        forced: ForcedState,
    ) -> Self {
        let (changes_tx, changes_rx) = mpsc::sync_channel(CHANGE_CHANNEL_CAPACITY);
        let core = Arc::new(CandidateCore {
            candidate_id: random_id(),
            num_voters,
            signing_key: signing_key.as_ref().to_vec(),
            forced,
            ledger: Mutex::new(Ledger {
                votes: HashMap::new(),
                state: CandidateState::NotLeader,
                first_yes: None,
            }),
            changes: changes_tx,
        });
        if let Some(state) = forced.state() {
            info!(
                "event=candidate_state_forced id={} new={}",
                core.candidate_id, state
            );
            if state != CandidateState::NotLeader {
                core.ledger().state = state;
                let _ = core.changes.try_send(state);
            }
        }
        let (stop_tx, stop_rx) = mpsc::channel();
        let ticker_core = core.clone();
        let ticker = thread::spawn(move || {
            info!("event=candidate_start id={}", ticker_core.candidate_id);
            loop {
                match stop_rx.recv_timeout(TICK_INTERVAL) {
                    Err(RecvTimeoutError::Timeout) => ticker_core.elect(None),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            info!("event=candidate_stop id={}", ticker_core.candidate_id);
        });
        Self {
            core,
            changes: changes_rx,
            stop: Some(stop_tx),
            ticker: Some(ticker),
        }
    }

    /// This candidate's wire identifier.
    pub fn candidate_id(&self) -> &str {
        &self.core.candidate_id
    }

    /// Consistent snapshot of the current state.
    pub fn state(&self) -> CandidateState {
        self.core.state()
    }

    pub fn is_leader(&self) -> bool {
        self.state() == CandidateState::Leader
    }

    /// The state-transition stream.
    ///
    /// Each transition is delivered at most once, in order; subscribe before
    /// acting on [`Candidate::is_leader`] or combine with polling
    /// [`Candidate::state`] for the authoritative value.
    pub fn changes(&self) -> &Receiver<CandidateState> {
        &self.changes
    }

    /// Vote-intake handler to wire into an HTTP server.
    pub fn handler(&self) -> VoteHandler {
        VoteHandler {
            core: self.core.clone(),
        }
    }

    /// Stops the interior ticker and joins it. Idempotent.
    pub fn stop(&mut self) {
        drop(self.stop.take());
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.join();
        }
    }
}

impl Drop for Candidate {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Validates and ingests one vote request, replying with the signed
/// candidate identity.
#[derive(Clone)]
pub struct VoteHandler {
    core: Arc<CandidateCore>,
}

impl VoteHandler {
    pub(crate) fn handle_request(
        &self,
        request: &SimpleHttpRequest,
        stream: &mut (impl Write + ?Sized),
    ) -> Result<(), NetError> {
        if request.method != "POST" {
            return write_error_response(
                stream,
                405,
                &format!("method {} not supported", request.method),
            );
        }
        let Some(request_signature) = request.header(SIGNATURE_HEADER) else {
            return write_error_response(stream, 400, "missing Signature header");
        };
        let content_type = request.header("Content-Type").unwrap_or("");
        if content_type != "application/json" {
            return write_error_response(
                stream,
                415,
                &format!("Content-Type {content_type} not supported"),
            );
        }
        if !signature::verify(&self.core.signing_key, &request.body, request_signature) {
            return write_error_response(stream, 400, "Signature verification failed");
        }
        let vote: Vote = match serde_json::from_slice(&request.body) {
            Ok(vote) => vote,
            Err(err) => {
                return write_error_response(
                    stream,
                    400,
                    &format!("can't parse request body: {err}"),
                );
            }
        };
        let now = OffsetDateTime::now_utc();
        if exceeds_skew_window(vote.vote_sent, now) {
            // Informative despite the skew; rejecting here would trade
            // liveness for nothing — the MAC already authenticated the body.
            warn!(
                "event=candidate_vote_skew id={} voter={} skew_seconds={:.1} detail=\"delay, replay, or clock skew\"",
                self.core.candidate_id,
                vote.voter_id,
                skew_seconds(vote.vote_sent, now),
            );
        }
        let response = VoteResponse {
            candidate_id: self.core.candidate_id.clone(),
            response_sent: OffsetDateTime::now_utc(),
        };
        let body = serde_json::to_vec(&response).map_err(HttpError::JsonSerialize)?;
        let response_signature = match signature::sign(&self.core.signing_key, &body) {
            Ok(signature) => signature,
            Err(_) => return write_error_response(stream, 500, "can't sign response"),
        };
        // The vote counts only once the voter could have heard back.
        write_signed_response(stream, &body, &response_signature)?;
        self.core.elect(Some(vote));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeouts::MAX_VOTE_PERIOD;
    use std::time::Duration;

    fn warmed_vote(voter_id: &str, candidate_id: &str) -> Vote {
        Vote {
            voter_id: voter_id.into(),
            last_seen_candidate_id: candidate_id.into(),
            num_polls_since_change: WARMUP_POLLS,
            vote_sent: OffsetDateTime::now_utc(),
        }
    }

    fn signed_request(key: &[u8], vote: &Vote) -> SimpleHttpRequest {
        let body = serde_json::to_vec(vote).unwrap();
        let signature = signature::sign(key, &body).unwrap();
        SimpleHttpRequest {
            method: "POST".into(),
            path: "/".into(),
            headers: vec![
                ("Content-Type".into(), "application/json".into()),
                (SIGNATURE_HEADER.into(), signature),
            ],
            body,
        }
    }

    fn status_line(out: &[u8]) -> String {
        let text = String::from_utf8_lossy(out);
        text.lines().next().unwrap_or_default().to_string()
    }

    #[test]
    fn classification_table() {
        let mut vote = warmed_vote("v", "me");
        assert_eq!(classify(&vote, "me"), BallotClass::Yes);
        vote.num_polls_since_change = WARMUP_POLLS - 1;
        assert_eq!(classify(&vote, "me"), BallotClass::SoftNo);
        vote.num_polls_since_change = WARMUP_POLLS + 5;
        vote.last_seen_candidate_id = "other".into();
        assert_eq!(classify(&vote, "me"), BallotClass::HardNo);
        vote.last_seen_candidate_id = String::new();
        assert_eq!(classify(&vote, "me"), BallotClass::HardNo);
    }

    #[test]
    fn sweep_evicts_stale_votes() {
        let now = Instant::now();
        let mut votes = HashMap::new();
        votes.insert(
            "fresh".to_string(),
            VoteRecord {
                vote: warmed_vote("fresh", "me"),
                received: now,
            },
        );
        votes.insert(
            "stale".to_string(),
            VoteRecord {
                vote: warmed_vote("stale", "me"),
                received: now - (VOTE_TIMEOUT + Duration::from_secs(1)),
            },
        );
        let tally = sweep_and_tally(&mut votes, "me", now);
        assert_eq!(tally.yes, 1);
        assert_eq!(tally.no, 0);
        assert_eq!(votes.len(), 1);
        assert!(votes.contains_key("fresh"));
    }

    #[test]
    fn decide_requires_majority_and_no_hard_nos() {
        let now = Instant::now();
        let (first_yes, state) = decide(Tally { yes: 2, no: 1 }, 2, Some(now), now);
        assert_eq!(state, CandidateState::NotLeader);
        assert!(first_yes.is_none());

        let (first_yes, state) = decide(Tally { yes: 1, no: 0 }, 2, Some(now), now);
        assert_eq!(state, CandidateState::NotLeader);
        assert!(first_yes.is_none());
    }

    #[test]
    fn decide_starts_the_streak_without_promoting() {
        let now = Instant::now();
        let (first_yes, state) = decide(Tally { yes: 2, no: 0 }, 2, None, now);
        assert_eq!(state, CandidateState::NotLeader);
        assert_eq!(first_yes, Some(now));
    }

    #[test]
    fn decide_promotes_only_after_the_wait() {
        let now = Instant::now();
        let young = now - (LEADERSHIP_WAIT - Duration::from_secs(1));
        let (first_yes, state) = decide(Tally { yes: 2, no: 0 }, 2, Some(young), now);
        assert_eq!(state, CandidateState::NotLeader);
        assert_eq!(first_yes, Some(young));

        let aged = now - LEADERSHIP_WAIT;
        let (first_yes, state) = decide(Tally { yes: 2, no: 0 }, 2, Some(aged), now);
        assert_eq!(state, CandidateState::Leader);
        assert_eq!(first_yes, Some(aged));
    }

    #[test]
    fn replayed_voter_replaces_rather_than_accumulates() {
        let mut candidate = Candidate::with_forced_state(1, "abc123", ForcedState::Unset);
        let id = candidate.candidate_id().to_string();
        candidate.core.elect(Some(warmed_vote("v1", &id)));
        candidate.core.elect(Some(warmed_vote("v1", &id)));
        assert_eq!(candidate.core.ledger().votes.len(), 1);
        candidate.stop();
    }

    #[test]
    fn promotion_and_demotion_publish_alternating_transitions() {
        let mut candidate = Candidate::with_forced_state(1, "abc123", ForcedState::Unset);
        let id = candidate.candidate_id().to_string();

        candidate.core.elect(Some(warmed_vote("v1", &id)));
        assert!(!candidate.is_leader());

        // Age the streak past the promotion delay instead of sleeping it out.
        candidate.core.ledger().first_yes = Some(Instant::now() - LEADERSHIP_WAIT);
        candidate.core.elect(None);
        assert!(candidate.is_leader());

        let mut hostile = warmed_vote("v1", &id);
        hostile.last_seen_candidate_id = "someone-else".into();
        candidate.core.elect(Some(hostile));
        assert!(!candidate.is_leader());
        assert!(candidate.core.ledger().first_yes.is_none());

        let seen: Vec<_> = candidate.changes().try_iter().collect();
        assert_eq!(seen, vec![CandidateState::Leader, CandidateState::NotLeader]);
        candidate.stop();
    }

    #[test]
    fn a_single_soft_no_blocks_promotion() {
        let mut candidate = Candidate::with_forced_state(1, "abc123", ForcedState::Unset);
        let id = candidate.candidate_id().to_string();
        let mut vote = warmed_vote("v1", &id);
        vote.num_polls_since_change = WARMUP_POLLS - 1;
        candidate.core.elect(Some(vote));
        // Soft-nos neither veto nor count; below majority keeps the streak clear.
        assert!(candidate.core.ledger().first_yes.is_none());
        assert!(!candidate.is_leader());
        candidate.stop();
    }

    #[test]
    fn forced_leader_pins_state_and_emits_one_transition() {
        let mut candidate = Candidate::with_forced_state(1, "abc123", ForcedState::Leader);
        assert!(candidate.is_leader());

        let mut hostile = warmed_vote("v1", "someone-else");
        hostile.last_seen_candidate_id = "someone-else".into();
        candidate.core.elect(Some(hostile));
        assert!(candidate.is_leader());

        let seen: Vec<_> = candidate.changes().try_iter().collect();
        assert_eq!(seen, vec![CandidateState::Leader]);
        candidate.stop();
    }

    #[test]
    fn forced_not_leader_emits_nothing() {
        let mut candidate = Candidate::with_forced_state(1, "abc123", ForcedState::NotLeader);
        assert!(!candidate.is_leader());
        assert!(candidate.changes().try_iter().next().is_none());
        candidate.stop();
    }

    #[test]
    fn stop_is_idempotent() {
        let mut candidate = Candidate::with_forced_state(1, "abc123", ForcedState::Unset);
        candidate.stop();
        candidate.stop();
    }

    #[test]
    fn handler_rejects_wrong_method() {
        let candidate = Candidate::with_forced_state(1, "abc123", ForcedState::Unset);
        let mut request = signed_request(b"abc123", &warmed_vote("v", "c"));
        request.method = "GET".into();
        let mut out = Vec::new();
        candidate.handler().handle_request(&request, &mut out).unwrap();
        assert!(status_line(&out).starts_with("HTTP/1.1 405"));
    }

    #[test]
    fn handler_rejects_missing_signature() {
        let candidate = Candidate::with_forced_state(1, "abc123", ForcedState::Unset);
        let mut request = signed_request(b"abc123", &warmed_vote("v", "c"));
        request.headers.retain(|(name, _)| name != SIGNATURE_HEADER);
        let mut out = Vec::new();
        candidate.handler().handle_request(&request, &mut out).unwrap();
        assert!(status_line(&out).starts_with("HTTP/1.1 400"));
        assert!(candidate.core.ledger().votes.is_empty());
    }

    #[test]
    fn handler_rejects_wrong_content_type() {
        let candidate = Candidate::with_forced_state(1, "abc123", ForcedState::Unset);
        let mut request = signed_request(b"abc123", &warmed_vote("v", "c"));
        for (name, value) in &mut request.headers {
            if name == "Content-Type" {
                *value = "text/plain".into();
            }
        }
        let mut out = Vec::new();
        candidate.handler().handle_request(&request, &mut out).unwrap();
        assert!(status_line(&out).starts_with("HTTP/1.1 415"));
    }

    #[test]
    fn handler_rejects_bad_mac() {
        let candidate = Candidate::with_forced_state(1, "abc123", ForcedState::Unset);
        let request = signed_request(b"wrong-key", &warmed_vote("v", "c"));
        let mut out = Vec::new();
        candidate.handler().handle_request(&request, &mut out).unwrap();
        assert!(status_line(&out).starts_with("HTTP/1.1 400"));
        assert!(candidate.core.ledger().votes.is_empty());
    }

    #[test]
    fn handler_rejects_malformed_body() {
        let candidate = Candidate::with_forced_state(1, "abc123", ForcedState::Unset);
        let body = b"not json".to_vec();
        let signature = signature::sign(b"abc123", &body).unwrap();
        let request = SimpleHttpRequest {
            method: "POST".into(),
            path: "/".into(),
            headers: vec![
                ("Content-Type".into(), "application/json".into()),
                (SIGNATURE_HEADER.into(), signature),
            ],
            body,
        };
        let mut out = Vec::new();
        candidate.handler().handle_request(&request, &mut out).unwrap();
        assert!(status_line(&out).starts_with("HTTP/1.1 400"));
    }

    #[test]
    fn handler_signs_its_response_and_ingests_the_vote() {
        let candidate = Candidate::with_forced_state(1, "abc123", ForcedState::Unset);
        let request = signed_request(b"abc123", &warmed_vote("v", "c"));
        let mut out = Vec::new();
        candidate.handler().handle_request(&request, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200"));
        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        let signature_value = head
            .lines()
            .find_map(|line| line.strip_prefix("Signature: "))
            .expect("signed response");
        assert!(signature::verify(
            b"abc123",
            body.as_bytes(),
            signature_value
        ));
        let response: VoteResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.candidate_id, candidate.candidate_id());
        assert_eq!(candidate.core.ledger().votes.len(), 1);
    }

    #[test]
    fn handler_ingests_skewed_votes_anyway() {
        let candidate = Candidate::with_forced_state(1, "abc123", ForcedState::Unset);
        let mut vote = warmed_vote("v", "c");
        vote.vote_sent = OffsetDateTime::now_utc() - time::Duration::seconds(60);
        let request = signed_request(b"abc123", &vote);
        let mut out = Vec::new();
        candidate.handler().handle_request(&request, &mut out).unwrap();
        assert!(status_line(&out).starts_with("HTTP/1.1 200"));
        assert_eq!(candidate.core.ledger().votes.len(), 1);
    }

    #[test]
    fn warm_up_is_faster_than_the_base_period() {
        assert!(crate::timeouts::MAX_FAST_VOTE_PERIOD < MAX_VOTE_PERIOD);
    }
}
