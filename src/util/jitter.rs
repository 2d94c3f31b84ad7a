use rand::{thread_rng, Rng};
use std::time::Duration;

/// Draws a duration uniformly from `[0, limit)`.
///
/// Voters schedule their polls off this draw rather than a fixed ticker so a
/// fleet of voters never phase-locks into a polling storm.
pub fn rand_duration(limit: Duration) -> Duration {
    if limit.is_zero() {
        return Duration::ZERO;
    }
    let nanos = thread_rng().gen_range(0..limit.as_nanos());
    Duration::from_nanos(nanos as u64)
}

/// Generates an opaque random identifier (16 bytes, lowercase hex).
pub fn random_id() -> String {
    let mut bytes = [0u8; 16];
    thread_rng().fill(&mut bytes[..]);
    hex::encode(bytes)
}
