//! Abstract persistence collaborator (spec §6 "Persisted state"): this
//! crate does not prescribe a storage technology, only the shape of what
//! gets persisted. An in-memory implementation backs the tests; a real
//! deployment supplies its own.

use std::collections::HashMap;

use parking_lot::Mutex;

use iso8583::standard::fields;
use iso8583::MessageInstance;

/// Per-account limit thresholds (spec §4.9 "Limit check").
#[derive(Debug, Clone, Copy)]
pub struct AccountLimits {
    pub single_transaction_max: u64,
    pub daily_cumulative_max: u64,
    pub monthly_cumulative_max: u64,
    pub daily_count_max: u32,
}

impl Default for AccountLimits {
    fn default() -> Self {
        AccountLimits {
            single_transaction_max: 500_000,
            daily_cumulative_max: 2_000_000,
            monthly_cumulative_max: 20_000_000,
            daily_count_max: 20,
        }
    }
}

/// Which family of limit was exceeded, used to pick response code 61 vs
/// 65 (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    Amount,
    Frequency,
}

/// Looks up per-account limits and records cumulative usage (spec §4.9
/// "Limit check", §6 "limit counters").
pub trait LimitRepository: Send + Sync {
    fn limits_for(&self, account: &str) -> AccountLimits;

    /// Record `amount` against `account` and return which limit, if any,
    /// was exceeded by this transaction.
    fn record_and_check(&self, account: &str, amount: u64) -> Option<LimitKind>;
}

#[derive(Default)]
struct AccountUsage {
    daily_total: u64,
    monthly_total: u64,
    daily_count: u32,
}

/// An in-process stand-in for a real limits store; counters never reset
/// by wall-clock day/month boundary, which is fine for the pipeline's own
/// tests but not for production use.
#[derive(Default)]
pub struct InMemoryLimitRepository {
    limits: Mutex<HashMap<String, AccountLimits>>,
    usage: Mutex<HashMap<String, AccountUsage>>,
}

impl InMemoryLimitRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_limits(&self, account: impl Into<String>, limits: AccountLimits) {
        self.limits.lock().insert(account.into(), limits);
    }
}

impl LimitRepository for InMemoryLimitRepository {
    fn limits_for(&self, account: &str) -> AccountLimits {
        self.limits.lock().get(account).copied().unwrap_or_default()
    }

    fn record_and_check(&self, account: &str, amount: u64) -> Option<LimitKind> {
        let limits = self.limits_for(account);
        if amount > limits.single_transaction_max {
            return Some(LimitKind::Amount);
        }

        let mut usage = self.usage.lock();
        let entry = usage.entry(account.to_string()).or_default();
        entry.daily_total += amount;
        entry.monthly_total += amount;
        entry.daily_count += 1;

        if entry.daily_count > limits.daily_count_max {
            Some(LimitKind::Frequency)
        } else if entry.daily_total > limits.daily_cumulative_max || entry.monthly_total > limits.monthly_cumulative_max {
            Some(LimitKind::Amount)
        } else {
            None
        }
    }
}

/// Blacklist of accounts/PANs/terminals barred from transacting (spec §6
/// "blacklist entries").
pub trait Blacklist: Send + Sync {
    fn is_blacklisted(&self, pan: &str) -> bool;
}

#[derive(Default)]
pub struct InMemoryBlacklist {
    entries: Mutex<std::collections::HashSet<String>>,
}

impl InMemoryBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, pan: impl Into<String>) {
        self.entries.lock().insert(pan.into());
    }
}

impl Blacklist for InMemoryBlacklist {
    fn is_blacklisted(&self, pan: &str) -> bool {
        self.entries.lock().contains(pan)
    }
}

/// One completed pipeline run, appended on every AUDIT stage execution
/// (spec §6 "transaction log records").
pub struct TransactionLogRecord {
    pub request: MessageInstance,
    pub response: Option<MessageInstance>,
    pub response_code: Option<String>,
    /// Set later by `mark_reversed` once a reversal for this STAN was
    /// accepted by the peer (spec §8 "E5 Reversal").
    pub reversed: bool,
}

pub trait TransactionLog: Send + Sync {
    fn append(&self, record: TransactionLogRecord);

    /// Mark the record whose request carries `stan` as reversed. A no-op
    /// if no such record exists (spec §8 "E5 Reversal").
    fn mark_reversed(&self, stan: &str);
}

#[derive(Default)]
pub struct InMemoryTransactionLog {
    records: Mutex<Vec<TransactionLogRecord>>,
}

impl InMemoryTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_reversed(&self, stan: &str) -> bool {
        self.records.lock().iter().any(|r| r.request.get_str(fields::STAN) == Some(stan) && r.reversed)
    }
}

impl TransactionLog for InMemoryTransactionLog {
    fn append(&self, record: TransactionLogRecord) {
        self.records.lock().push(record);
    }

    fn mark_reversed(&self, stan: &str) {
        let mut records = self.records.lock();
        if let Some(record) = records.iter_mut().find(|r| r.request.get_str(fields::STAN) == Some(stan)) {
            record.reversed = true;
        }
    }
}
