//! Outstanding-request tracking: maps a trace key to the oneshot that will
//! complete when a matching response frame arrives, or when the deadline
//! elapses first (spec §4.3).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::timeout;

use iso8583::MessageInstance;

use crate::error::ChannelError;

/// Identifies one outstanding request. Financial messages key on
/// (STAN, transmission date-time, acquiring institution id); network
/// management messages key on (STAN, message function) — spec §4.3.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TraceKey {
    Financial { stan: String, transmission_date_time: String, acquiring_institution: String },
    NetworkManagement { stan: String, message_function: String },
}

impl std::fmt::Display for TraceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceKey::Financial { stan, transmission_date_time, acquiring_institution } => {
                write!(f, "financial({stan},{transmission_date_time},{acquiring_institution})")
            }
            TraceKey::NetworkManagement { stan, message_function } => {
                write!(f, "network-mgmt({stan},{message_function})")
            }
        }
    }
}

struct Entry {
    sender: oneshot::Sender<MessageInstance>,
    submitted_at: Instant,
}

/// Tracks in-flight request traces for one Channel. A trace key may be
/// in the map at most once at a time (spec §8 "Correlator exclusivity").
///
/// Cheaply cloneable: clones share the same underlying table, which lets a
/// [`Waiting`] remove its own entry on timeout without the Channel holding
/// a separate reference back to the Correlator.
#[derive(Clone)]
pub struct Correlator {
    entries: Arc<Mutex<HashMap<TraceKey, Entry>>>,
}

impl Correlator {
    pub fn new() -> Self {
        Correlator { entries: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Register a new outstanding trace and return a receiver that resolves
    /// when [`Correlator::complete`] is called with a matching key, or when
    /// `deadline` elapses (in which case the caller sees [`ChannelError::Timeout`]
    /// and the entry is removed here).
    ///
    /// Returns [`ChannelError::TraceKeyInUse`] if the key is already tracked.
    pub fn submit(&self, key: TraceKey, deadline: Duration) -> Result<Waiting, ChannelError> {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries.lock();
        if entries.contains_key(&key) {
            return Err(ChannelError::TraceKeyInUse { key: key.to_string() });
        }
        entries.insert(key.clone(), Entry { sender: tx, submitted_at: Instant::now() });
        drop(entries);
        Ok(Waiting { key, receiver: rx, deadline, entries: self.entries.clone() })
    }

    /// Match an inbound response to its trace and wake the waiter. Returns
    /// `false` if no matching entry was found (a late or unsolicited
    /// response, per spec §5 "Cancellation").
    pub fn complete(&self, key: &TraceKey, response: MessageInstance) -> bool {
        let entry = self.entries.lock().remove(key);
        match entry {
            Some(entry) => entry.sender.send(response).is_ok(),
            None => false,
        }
    }

    /// Remove and fail every outstanding trace, e.g. on Channel close
    /// (spec §4.2 "close()").
    pub fn fail_all(&self) {
        let mut entries = self.entries.lock();
        for (_, entry) in entries.drain() {
            let _ = entry.sender.send(MessageInstance::new());
        }
    }

    /// Drop entries that have been outstanding longer than `max_age`,
    /// returning the keys removed. Intended to run on a periodic sweep so
    /// a crashed waiter (whose receiver was dropped) doesn't leak the slot.
    pub fn sweep_expired(&self, max_age: Duration) -> Vec<TraceKey> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let expired: Vec<TraceKey> = entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.submitted_at) >= max_age)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.remove(key);
        }
        expired
    }

    /// Whether any in-flight entry already uses this STAN, regardless of
    /// the rest of its trace key (spec §4.3 "Channel advances the counter
    /// until a free slot is found").
    pub fn stan_in_use(&self, stan: &str) -> bool {
        self.entries.lock().keys().any(|key| match key {
            TraceKey::Financial { stan: s, .. } => s == stan,
            TraceKey::NetworkManagement { stan: s, .. } => s == stan,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

/// A pending request, returned by [`Correlator::submit`]. Await it to get
/// the matched response or a timeout/cancellation error.
pub struct Waiting {
    key: TraceKey,
    receiver: oneshot::Receiver<MessageInstance>,
    deadline: Duration,
    entries: Arc<Mutex<HashMap<TraceKey, Entry>>>,
}

impl Waiting {
    pub fn key(&self) -> &TraceKey {
        &self.key
    }

    /// Await the match, failing with [`ChannelError::Timeout`] if the
    /// deadline elapses first.
    pub async fn wait(mut self) -> Result<MessageInstance, ChannelError> {
        match timeout(self.deadline, &mut self.receiver).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ChannelError::ChannelClosed),
            Err(_) => Err(ChannelError::Timeout),
        }
    }
}

/// Removes this trace's own entry, whether `wait()` timed out, the
/// `Waiting` was dropped before being awaited, or a caller's own outer
/// deadline (spec §4.7) cancelled the future mid-poll — the STAN it held
/// is freed for reuse as soon as the Channel is no longer waiting on it
/// (spec §4.3 "Correlator exclusivity").
impl Drop for Waiting {
    fn drop(&mut self) {
        self.entries.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(stan: &str) -> TraceKey {
        TraceKey::NetworkManagement { stan: stan.to_string(), message_function: "001".to_string() }
    }

    #[tokio::test]
    async fn complete_wakes_the_matching_waiter() {
        let correlator = Correlator::new();
        let waiting = correlator.submit(key("000001"), Duration::from_secs(1)).unwrap();

        let mut response = MessageInstance::new();
        response.set("mti", "0810");
        assert!(correlator.complete(&key("000001"), response.clone()));

        let got = waiting.wait().await.unwrap();
        assert_eq!(got.get_str("mti"), Some("0810"));
    }

    #[tokio::test]
    async fn duplicate_trace_key_is_rejected() {
        let correlator = Correlator::new();
        let _first = correlator.submit(key("000001"), Duration::from_secs(1)).unwrap();
        let err = correlator.submit(key("000001"), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ChannelError::TraceKeyInUse { .. }));
    }

    #[tokio::test]
    async fn unmatched_wait_times_out() {
        let correlator = Correlator::new();
        let waiting = correlator.submit(key("000002"), Duration::from_millis(10)).unwrap();
        let err = waiting.wait().await.unwrap_err();
        assert!(matches!(err, ChannelError::Timeout));
    }

    #[tokio::test]
    async fn complete_on_unknown_key_is_reported_as_unmatched() {
        let correlator = Correlator::new();
        assert!(!correlator.complete(&key("999999"), MessageInstance::new()));
    }

    #[test]
    fn sweep_expired_removes_stale_entries_freeing_the_key() {
        let correlator = Correlator::new();
        let _waiting = correlator.submit(key("000003"), Duration::from_secs(60)).unwrap();
        assert_eq!(correlator.len(), 1);

        let expired = correlator.sweep_expired(Duration::from_secs(0));
        assert_eq!(expired, vec![key("000003")]);
        assert!(correlator.is_empty());

        assert!(correlator.submit(key("000003"), Duration::from_secs(60)).is_ok());
    }
}
