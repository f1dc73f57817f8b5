//! Configuration structs for the front-end processor (spec §6
//! "Configuration (enumerated)").
//!
//! Every knob named in spec §6 has a field here; defaults match the
//! worked examples in spec §8 (transaction-type deadlines, the E6 breaker
//! scenario).

use std::time::Duration;

use facet::Facet;

/// One acquirer/switch endpoint profile (spec §6 "channel profile").
#[derive(Debug, Clone, Facet)]
pub struct ChannelProfileConfig {
    pub host: String,
    pub send_port: u16,
    pub receive_port: u16,
    pub connect_timeout_ms: u64,
    pub response_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub retries: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub tls: bool,
}

impl ChannelProfileConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

impl Default for ChannelProfileConfig {
    fn default() -> Self {
        ChannelProfileConfig {
            host: "127.0.0.1".to_string(),
            send_port: 5000,
            receive_port: 5001,
            connect_timeout_ms: 3_000,
            response_timeout_ms: 10_000,
            heartbeat_interval_ms: 30_000,
            retries: 3,
            backoff_initial_ms: 500,
            backoff_max_ms: 30_000,
            tls: false,
        }
    }
}

/// Channel pool sizing (spec §6 "pool").
#[derive(Debug, Clone, Facet)]
pub struct PoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub max_wait_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig { min_size: 1, max_size: 4, max_wait_ms: 0 }
    }
}

/// Circuit-breaker thresholds (spec §6 "breaker", §4.6).
#[derive(Debug, Clone, Facet)]
pub struct BreakerConfig {
    pub failure_rate_threshold_pct: u8,
    pub minimum_calls: u32,
    pub sliding_window_size: u32,
    pub wait_in_open_ms: u64,
    pub permitted_probes: u32,
    pub success_threshold_pct: u8,
    pub slow_call_threshold_ms: u64,
    pub slow_calls_count_as_failures: bool,
}

impl BreakerConfig {
    pub fn wait_in_open(&self) -> Duration {
        Duration::from_millis(self.wait_in_open_ms)
    }

    pub fn slow_call_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_call_threshold_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        // Matches spec §8 scenario E6: 20 failures within the window trips
        // the breaker before the 21st call.
        BreakerConfig {
            failure_rate_threshold_pct: 50,
            minimum_calls: 20,
            sliding_window_size: 20,
            wait_in_open_ms: 30_000,
            permitted_probes: 5,
            success_threshold_pct: 80,
            slow_call_threshold_ms: 2_000,
            slow_calls_count_as_failures: true,
        }
    }
}

/// Rate-limiter configuration (spec §6 "rate-limiter", §4.6).
#[derive(Debug, Clone, Copy, Facet, PartialEq, Eq)]
pub enum RateLimiterAlgorithm {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
    LeakyBucket,
}

#[derive(Debug, Clone, Facet)]
pub struct RateLimiterConfig {
    pub algorithm: RateLimiterAlgorithm,
    pub capacity: u64,
    pub refill_per_sec: u64,
    pub window_ms: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        RateLimiterConfig {
            algorithm: RateLimiterAlgorithm::TokenBucket,
            capacity: 1_000,
            refill_per_sec: 1_000,
            window_ms: 1_000,
        }
    }
}

/// Duplicate detector horizon (spec §6 "duplicate-detector", §4.8).
#[derive(Debug, Clone, Facet)]
pub struct DuplicateDetectorConfig {
    pub horizon_minutes: u64,
    pub max_entries: usize,
}

impl DuplicateDetectorConfig {
    pub fn horizon(&self) -> Duration {
        Duration::from_secs(self.horizon_minutes * 60)
    }
}

impl Default for DuplicateDetectorConfig {
    fn default() -> Self {
        DuplicateDetectorConfig { horizon_minutes: 15, max_entries: 1_000_000 }
    }
}

/// Per-transaction-type pipeline deadlines (spec §4.7, examples from §8).
#[derive(Debug, Clone, Facet)]
pub struct PipelineConfig {
    pub balance_inquiry_deadline_ms: u64,
    pub withdrawal_deadline_ms: u64,
    pub transfer_deadline_ms: u64,
    pub bill_payment_deadline_ms: u64,
    pub default_deadline_ms: u64,
    pub max_in_flight_per_connection: usize,
}

impl PipelineConfig {
    pub fn deadline_for(&self, transaction_type: &str) -> Duration {
        let ms = match transaction_type {
            "balance_inquiry" => self.balance_inquiry_deadline_ms,
            "withdrawal" => self.withdrawal_deadline_ms,
            "transfer" => self.transfer_deadline_ms,
            "bill_payment" => self.bill_payment_deadline_ms,
            _ => self.default_deadline_ms,
        };
        Duration::from_millis(ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            balance_inquiry_deadline_ms: 5_000,
            withdrawal_deadline_ms: 10_000,
            transfer_deadline_ms: 15_000,
            bill_payment_deadline_ms: 30_000,
            default_deadline_ms: 10_000,
            max_in_flight_per_connection: 32,
        }
    }
}

/// The aggregate document loaded from a JSON config file.
#[derive(Debug, Clone, Facet)]
pub struct FepConfig {
    pub channel_profile: ChannelProfileConfig,
    pub pool: PoolConfig,
    pub breaker: BreakerConfig,
    pub rate_limiter: RateLimiterConfig,
    pub duplicate_detector: DuplicateDetectorConfig,
    pub pipeline: PipelineConfig,
}

impl Default for FepConfig {
    fn default() -> Self {
        FepConfig {
            channel_profile: ChannelProfileConfig::default(),
            pool: PoolConfig::default(),
            breaker: BreakerConfig::default(),
            rate_limiter: RateLimiterConfig::default(),
            duplicate_detector: DuplicateDetectorConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

/// Errors loading a configuration document.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read config file: {e}"),
            ConfigError::Parse(msg) => write!(f, "failed to parse config document: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

/// Load a [`FepConfig`] from a JSON document on disk, the way the
/// teacher's CLI binaries load structured documents with `facet_json`.
pub fn load_from_file(path: &std::path::Path) -> Result<FepConfig, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    facet_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_examples() {
        let cfg = FepConfig::default();
        assert_eq!(cfg.pipeline.withdrawal_deadline_ms, 10_000);
        assert_eq!(cfg.breaker.minimum_calls, 20);
    }
}
