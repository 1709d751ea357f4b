//! Push Key Generator
//!
//! Keys are 20 characters: 8 encode the creation time in milliseconds and 12
//! are random. The alphabet is in ASCII order, so keys compare in creation
//! order. Within one millisecond the random part is incremented instead of
//! regenerated, which keeps keys from one generator strictly increasing.

use super::types::now_ms;
use rand::Rng;
use std::sync::{Mutex, PoisonError};

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";
const RANDOM_LEN: usize = 12;
const TIME_LEN: usize = 8;

pub struct PushIdGenerator {
    state: Mutex<PushState>,
}

struct PushState {
    last_ms: u64,
    last_random: [u8; RANDOM_LEN],
}

impl PushIdGenerator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PushState {
                last_ms: 0,
                last_random: [0; RANDOM_LEN],
            }),
        }
    }

    pub fn next_id(&self) -> String {
        self.next_id_at(now_ms())
    }

    fn next_id_at(&self, now: u64) -> String {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        // A clock that stepped backwards is treated like a repeated millisecond.
        if now <= state.last_ms {
            if !increment(&mut state.last_random) {
                state.last_ms += 1;
                randomize(&mut state.last_random);
            }
        } else {
            state.last_ms = now;
            randomize(&mut state.last_random);
        }

        let mut id = String::with_capacity(TIME_LEN + RANDOM_LEN);
        let mut time_chars = [0u8; TIME_LEN];
        let mut ts = state.last_ms;
        for slot in time_chars.iter_mut().rev() {
            *slot = PUSH_CHARS[(ts % 64) as usize];
            ts /= 64;
        }
        id.extend(time_chars.iter().map(|&c| c as char));
        id.extend(state.last_random.iter().map(|&i| PUSH_CHARS[i as usize] as char));
        id
    }
}

impl Default for PushIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn randomize(digits: &mut [u8; RANDOM_LEN]) {
    let mut rng = rand::thread_rng();
    for digit in digits.iter_mut() {
        *digit = rng.gen_range(0..64);
    }
}

/// Adds one to the base-64 number; returns `false` on overflow.
fn increment(digits: &mut [u8; RANDOM_LEN]) -> bool {
    for digit in digits.iter_mut().rev() {
        if *digit == 63 {
            *digit = 0;
        } else {
            *digit += 1;
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_ids_are_strictly_increasing_within_one_ms() {
        let generator = PushIdGenerator::new();

        let ids: Vec<String> = (0..500).map(|_| generator.next_id_at(1_700_000_000_000)).collect();

        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1], "{} should sort before {}", pair[0], pair[1]);
        }
        assert!(ids.iter().all(|id| id.len() == 20));
    }

    #[test]
    fn test_push_ids_sort_by_time() {
        let generator = PushIdGenerator::new();

        let early = generator.next_id_at(1_000);
        let late = generator.next_id_at(2_000);

        assert!(early < late);
        assert_ne!(&early[..8], &late[..8]);
    }

    #[test]
    fn test_clock_going_backwards_keeps_order() {
        let generator = PushIdGenerator::new();

        let first = generator.next_id_at(5_000);
        let second = generator.next_id_at(4_000);

        assert!(first < second);
    }

    #[test]
    fn test_increment_overflow() {
        let mut digits = [63u8; RANDOM_LEN];
        assert!(!increment(&mut digits));
        assert_eq!(digits, [0u8; RANDOM_LEN]);
    }
}
