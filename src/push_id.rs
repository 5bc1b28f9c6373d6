//! Time-ordered unique keys for appended children.
//!
//! A key is 8 characters of millisecond timestamp followed by 12 random
//! characters, all drawn from an alphabet whose ASCII order matches its
//! numeric order. Keys generated within the same millisecond increment the
//! random tail instead of drawing a new one, so successive keys from one
//! generator always sort in increasing lexical order.

use rand::Rng;

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

const TIME_LEN: usize = 8;
const RANDOM_LEN: usize = 12;

/// Length of every generated key.
pub const PUSH_ID_LENGTH: usize = TIME_LEN + RANDOM_LEN;

/// Generates chronologically sortable child keys.
///
/// Keys generated in the same millisecond increment the random part of the
/// previous key, so ordering holds within one generator.
#[derive(Debug, Default)]
pub struct PushIdGenerator {
    last_time: Option<u64>,
    last_random: [u8; RANDOM_LEN],
}

impl PushIdGenerator {
    /// Generator with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a key for the given wall-clock time in milliseconds.
    pub fn generate(&mut self, now_ms: u64) -> String {
        self.generate_with(now_ms, &mut rand::thread_rng())
    }

    /// Like [`PushIdGenerator::generate`] with a caller-supplied RNG.
    pub fn generate_with<R: Rng + ?Sized>(&mut self, now_ms: u64, rng: &mut R) -> String {
        // Never step backwards, even if the clock does.
        let mut now = self.last_time.map_or(now_ms, |last| now_ms.max(last));

        if self.last_time == Some(now) {
            if !self.increment_random() {
                now += 1;
                self.fill_random(rng);
            }
        } else {
            self.fill_random(rng);
        }
        self.last_time = Some(now);

        let mut time = now;
        let mut time_chars = [0u8; TIME_LEN];
        for slot in time_chars.iter_mut().rev() {
            *slot = PUSH_CHARS[(time % 64) as usize];
            time /= 64;
        }

        time_chars
            .iter()
            .copied()
            .chain(self.last_random.iter().map(|&i| PUSH_CHARS[i as usize]))
            .map(char::from)
            .collect()
    }

    fn fill_random<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for slot in self.last_random.iter_mut() {
            *slot = rng.gen_range(0..64);
        }
    }

    /// Add one to the random tail; false if it wrapped around.
    fn increment_random(&mut self) -> bool {
        for slot in self.last_random.iter_mut().rev() {
            if *slot == 63 {
                *slot = 0;
            } else {
                *slot += 1;
                return true;
            }
        }
        false
    }
}
