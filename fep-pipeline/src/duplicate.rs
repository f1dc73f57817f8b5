//! Short-horizon duplicate detector (spec §4.8, C8).

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use fep_config::DuplicateDetectorConfig;

/// (acquirer id, terminal id, STAN, transmission date-time, amount) —
/// spec §4.8 "Fingerprint".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub acquiring_institution: String,
    pub terminal_id: String,
    pub stan: String,
    pub transmission_date_time: String,
    pub amount: String,
}

struct Entry {
    fingerprint: Fingerprint,
    seen_at: Instant,
}

/// Tracks fingerprints seen within `horizon`, bounded by `max_entries`
/// (oldest evicted first when full).
pub struct DuplicateDetector {
    horizon: Duration,
    max_entries: usize,
    seen: Mutex<(HashSet<Fingerprint>, VecDeque<Entry>)>,
}

impl DuplicateDetector {
    pub fn new(config: &DuplicateDetectorConfig) -> Self {
        DuplicateDetector {
            horizon: config.horizon(),
            max_entries: config.max_entries,
            seen: Mutex::new((HashSet::new(), VecDeque::new())),
        }
    }

    /// Record `fingerprint` if it hasn't been seen within the horizon,
    /// returning `true` if this transaction is a duplicate (spec §4.8).
    pub fn check_and_record(&self, fingerprint: Fingerprint) -> bool {
        let mut guard = self.seen.lock();
        self.evict_expired(&mut *guard);

        let (set, queue) = &mut *guard;
        if set.contains(&fingerprint) {
            return true;
        }

        if queue.len() >= self.max_entries {
            if let Some(oldest) = queue.pop_front() {
                set.remove(&oldest.fingerprint);
            }
        }

        set.insert(fingerprint.clone());
        queue.push_back(Entry { fingerprint, seen_at: Instant::now() });
        false
    }

    fn evict_expired(&self, guard: &mut (HashSet<Fingerprint>, VecDeque<Entry>)) {
        let (set, queue) = guard;
        let now = Instant::now();
        while let Some(front) = queue.front() {
            if now.duration_since(front.seen_at) >= self.horizon {
                let expired = queue.pop_front().unwrap();
                set.remove(&expired.fingerprint);
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.lock().1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(stan: &str) -> Fingerprint {
        Fingerprint {
            acquiring_institution: "12345678901".to_string(),
            terminal_id: "ATM00001".to_string(),
            stan: stan.to_string(),
            transmission_date_time: "0726120000".to_string(),
            amount: "000000010000".to_string(),
        }
    }

    #[test]
    fn second_identical_transaction_is_flagged_duplicate() {
        let detector = DuplicateDetector::new(&DuplicateDetectorConfig::default());
        assert!(!detector.check_and_record(fp("000001")));
        assert!(detector.check_and_record(fp("000001")));
    }

    #[test]
    fn distinct_stan_is_not_a_duplicate() {
        let detector = DuplicateDetector::new(&DuplicateDetectorConfig::default());
        assert!(!detector.check_and_record(fp("000001")));
        assert!(!detector.check_and_record(fp("000002")));
    }

    #[test]
    fn entries_beyond_max_count_evict_the_oldest() {
        let config = DuplicateDetectorConfig { horizon_minutes: 15, max_entries: 2 };
        let detector = DuplicateDetector::new(&config);
        assert!(!detector.check_and_record(fp("000001")));
        assert!(!detector.check_and_record(fp("000002")));
        assert!(!detector.check_and_record(fp("000003")));
        assert_eq!(detector.len(), 2);
        // 000001 was evicted to make room, so it's no longer flagged as a duplicate.
        assert!(!detector.check_and_record(fp("000001")));
    }
}
