mod jitter;

pub use jitter::{rand_duration, random_id};
