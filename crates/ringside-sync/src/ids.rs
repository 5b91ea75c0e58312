//! Identifier generation.
//!
//! Temporary ids only label optimistic entries until the store answers; they
//! never reach the store. Large ids are for the direct message table when it
//! is configured to accept client-chosen keys.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use rand::Rng;

/// Bits of randomness below the timestamp in a large id.
pub const LARGE_ID_RANDOM_BITS: u32 = 21;
const LARGE_ID_RANDOM_MASK: i64 = (1 << LARGE_ID_RANDOM_BITS) - 1;

/// Hands out millisecond timestamps as strings, bumping by one when the clock
/// has not moved so two sends in the same millisecond get distinct ids.
#[derive(Debug, Default)]
pub struct TempIdAllocator {
    last: AtomicI64,
}

impl TempIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> String {
        self.next_at(Utc::now().timestamp_millis()).to_string()
    }

    fn next_at(&self, now_ms: i64) -> i64 {
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now_ms.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// `(millis << 21) | 21 random bits`, always non-negative in an i64.
pub fn large_id() -> i64 {
    let rand21 = rand::rng().random::<u32>() as i64 & LARGE_ID_RANDOM_MASK;
    compose_large_id(Utc::now().timestamp_millis(), rand21)
}

pub fn large_id_string() -> String {
    large_id().to_string()
}

fn compose_large_id(millis: i64, random: i64) -> i64 {
    // 42 bits of milliseconds cover dates well past the year 2100, which keeps
    // the shifted value under 2^63.
    let millis = millis & ((1i64 << (63 - LARGE_ID_RANDOM_BITS)) - 1);
    (millis << LARGE_ID_RANDOM_BITS) | (random & LARGE_ID_RANDOM_MASK)
}
