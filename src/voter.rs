//! Voter side of the election: jittered polling with per-target memory.
//!
//! A voter keeps exactly one piece of state — which candidate it has been
//! hearing from and for how many consecutive polls — and retransmits that
//! observation on every tick. It never retries inside a tick; the cadence is
//! the retry mechanism.

use crate::net::{NetError, VoteTransport};
use crate::signature::{self, SIGNATURE_HEADER};
use crate::timeouts::{MAX_FAST_VOTE_PERIOD, MAX_VOTE_PERIOD, WARMUP_POLLS};
use crate::util::{rand_duration, random_id};
use crate::wire::{exceeds_skew_window, skew_seconds, Vote, VoteResponse};
use log::warn;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use time::OffsetDateTime;

/// A polling agent addressing one vote endpoint.
///
/// The endpoint it actually reaches is the routing layer's business; the
/// voter notices a re-route purely through the candidate identifier in the
/// responses it gets back.
pub struct Voter {
    voter_id: String,
    update: Option<mpsc::Sender<Duration>>,
    join: Option<thread::JoinHandle<()>>,
}

impl Voter {
    /// Starts the polling task against `url` (http only).
    pub fn new(url: impl AsRef<str>, signing_key: impl AsRef<[u8]>) -> Result<Self, NetError> {
        let transport = VoteTransport::new(url)?;
        let (update_tx, update_rx) = mpsc::channel();
        let voter_id = random_id();
        let mut poll_loop = PollLoop {
            transport,
            signing_key: signing_key.as_ref().to_vec(),
            vote: Vote::new(voter_id.clone()),
            period: MAX_VOTE_PERIOD,
            update: update_rx,
        };
        let join = thread::spawn(move || poll_loop.run());
        Ok(Self {
            voter_id,
            update: Some(update_tx),
            join: Some(join),
        })
    }

    /// This voter's wire identifier.
    pub fn voter_id(&self) -> &str {
        &self.voter_id
    }

    /// Changes the base polling period; observed at the next scheduling
    /// decision. A no-op after [`Voter::stop`].
    pub fn update_period(&self, period: Duration) {
        if let Some(update) = &self.update {
            let _ = update.send(period);
        }
    }

    /// Requests shutdown and joins the polling task. Idempotent.
    pub fn stop(&mut self) {
        drop(self.update.take());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for Voter {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PollLoop {
    transport: VoteTransport,
    signing_key: Vec<u8>,
    vote: Vote,
    period: Duration,
    update: mpsc::Receiver<Duration>,
}

impl PollLoop {
    fn run(&mut self) {
        log::info!("event=voter_start id={}", self.vote.voter_id);
        loop {
            // Race a uniformly-drawn base timer against the fast warm-up
            // timer (while the view is unsettled) by waiting the earlier of
            // the two deadlines; the update channel doubles as the shutdown
            // signal.
            let mut wait = rand_duration(self.period);
            if self.vote.num_polls_since_change <= WARMUP_POLLS {
                wait = wait.min(rand_duration(MAX_FAST_VOTE_PERIOD));
            }
            match self.update.recv_timeout(wait) {
                Ok(period) => self.period = period,
                Err(RecvTimeoutError::Timeout) => self.send_vote(),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::info!("event=voter_stop id={}", self.vote.voter_id);
    }

    /// One poll: stamp, serialize once, sign those bytes, send, validate the
    /// reply, update the streak per the failure table.
    fn send_vote(&mut self) {
        self.vote.vote_sent = OffsetDateTime::now_utc();
        let body = match serde_json::to_vec(&self.vote) {
            Ok(body) => body,
            Err(err) => {
                warn!(
                    "event=voter_serialize_error id={} error={err}",
                    self.vote.voter_id
                );
                return;
            }
        };
        let body_signature = match signature::sign(&self.signing_key, &body) {
            Ok(signature) => signature,
            Err(err) => {
                warn!(
                    "event=voter_sign_error id={} error={err}",
                    self.vote.voter_id
                );
                return;
            }
        };
        let response = match self.transport.post_vote(&body, &body_signature) {
            Ok(response) => response,
            Err(err) => {
                // The candidate likely never saw this vote; the streak of
                // consecutive same-target polls is broken.
                warn!(
                    "event=voter_send_error id={} error={err}",
                    self.vote.voter_id
                );
                self.vote.num_polls_since_change = 0;
                return;
            }
        };
        if !response.is_success() {
            warn!(
                "event=voter_response_status id={} status={}",
                self.vote.voter_id, response.status
            );
            self.vote.num_polls_since_change = 0;
            return;
        }
        // From here on the vote did reach a live peer; an unusable response
        // leaves the streak alone.
        let Some(response_signature) = response.header(SIGNATURE_HEADER) else {
            warn!(
                "event=voter_response_unsigned id={} error=\"missing Signature response header\"",
                self.vote.voter_id
            );
            return;
        };
        if !signature::verify(&self.signing_key, &response.body, response_signature) {
            warn!(
                "event=voter_response_bad_signature id={} error=\"invalid Signature response header\"",
                self.vote.voter_id
            );
            return;
        }
        let parsed: VoteResponse = match serde_json::from_slice(&response.body) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(
                    "event=voter_response_parse_error id={} error={err}",
                    self.vote.voter_id
                );
                return;
            }
        };
        let now = OffsetDateTime::now_utc();
        if exceeds_skew_window(parsed.response_sent, now) {
            warn!(
                "event=voter_response_skew id={} skew_seconds={:.1}",
                self.vote.voter_id,
                skew_seconds(parsed.response_sent, now),
            );
            return;
        }
        absorb_response(&mut self.vote, &parsed);
    }
}

/// Advances the voter's memory from one successful exchange.
fn absorb_response(vote: &mut Vote, response: &VoteResponse) {
    if response.candidate_id == vote.last_seen_candidate_id {
        vote.num_polls_since_change += 1;
    } else {
        vote.last_seen_candidate_id = response.candidate_id.clone();
        vote.num_polls_since_change = 0;
    }
}
