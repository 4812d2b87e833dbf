//! Test payload generation.
//!
//! Large integrity checks need many megabytes of content per file. Drawing
//! every byte from the generator is needlessly slow, so buffers are grown by
//! doubling an existing random block around up to 1 KiB of fresh bytes. The
//! result is only "semi" random: good enough to catch corruption and
//! truncation, useless for anything security related.

use chrono::{DateTime, Datelike, Timelike, Utc};
use rand::{Rng, RngCore};

/// Size of each freshly drawn block.
const FRESH_BLOCK: usize = 1024;

/// The fixed text used by the small write/read checks.
pub const TEST_STRING: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Returns exactly `size` semi-random bytes from the thread-local generator.
pub fn generate_random_bytes(size: usize) -> Vec<u8> {
    generate_random_bytes_with(&mut rand::thread_rng(), size)
}

/// Returns exactly `size` semi-random bytes drawn from `rng`.
pub fn generate_random_bytes_with<R: Rng + ?Sized>(rng: &mut R, size: usize) -> Vec<u8> {
    let mut buf = fresh_block(rng, size.min(FRESH_BLOCK));
    while buf.len() < size {
        let rem = size - buf.len();
        let rnd = fresh_block(rng, rem.min(FRESH_BLOCK));
        let mut grown = Vec::with_capacity(buf.len() * 2 + rnd.len());
        grown.extend_from_slice(&buf);
        grown.extend_from_slice(&rnd);
        grown.extend_from_slice(&buf);
        buf = grown;
    }
    buf.truncate(size);
    buf
}

fn fresh_block<R: RngCore + ?Sized>(rng: &mut R, len: usize) -> Vec<u8> {
    let mut block = vec![0u8; len];
    rng.fill_bytes(&mut block);
    block
}

/// Seed derived from the UTC wall clock, reproducible from a log line.
pub fn time_seed() -> u64 {
    time_seed_at(Utc::now())
}

fn time_seed_at(now: DateTime<Utc>) -> u64 {
    let year = u64::try_from(now.year()).unwrap_or_default();
    let (day, hour, minute, second) = (
        u64::from(now.day()),
        u64::from(now.hour()),
        u64::from(now.minute()),
        u64::from(now.second()),
    );
    year * day * hour * minute / (second + 1)
}
