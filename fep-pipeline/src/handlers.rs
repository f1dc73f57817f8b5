//! Concrete stage handlers (spec §4.9, C9).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use fep_config::{BreakerConfig, RateLimiterConfig};
use fep_resilience::{build_rate_limiter, CircuitBreaker, Outcome, RateLimiter};
use fep_router::{ChannelPool, Route};
use iso8583::standard::fields;
use iso8583::{mti, response_code, MessageInstance};

use crate::context::PipelineContext;
use crate::duplicate::{DuplicateDetector, Fingerprint};
use crate::error::{PipelineError, ValidationFailure};
use crate::repository::{Blacklist, LimitKind, LimitRepository};
use crate::stage::{Handler, Stage};

/// Build a response instance for `request`: the paired response MTI (or
/// the same MTI if there is no known pairing) with `response_code`,
/// echoing every field the request carried.
pub fn response_with_code(request: &MessageInstance, response_code: &str) -> MessageInstance {
    let mut response = request.clone();
    let request_mti = request.get_str(fields::MTI).unwrap_or("");
    if let Some(response_mti) = mti::response_for(request_mti) {
        response.set(fields::MTI, response_mti);
    }
    response.set(fields::RESPONSE_CODE, response_code);
    response
}

/// Build the 0400 reversal for a request whose processing timed out:
/// echoes the original's fields and fills F90 (original data elements)
/// with the original MTI, STAN, transmission date-time and acquiring
/// institution, concatenated with no separators (spec §8 "E5 Reversal").
/// The STAN is cleared so the Channel assigns a fresh one on send.
pub fn build_reversal(original: &MessageInstance) -> MessageInstance {
    let original_mti = original.get_str(fields::MTI).unwrap_or("").to_string();
    let original_stan = original.get_str(fields::STAN).unwrap_or("").to_string();
    let original_datetime = original.get_str(fields::TRANSMISSION_DATE_TIME).unwrap_or("").to_string();
    let original_institution = original.get_str(fields::ACQUIRING_INSTITUTION).unwrap_or("").to_string();

    let mut reversal = original.clone();
    reversal.set(fields::MTI, mti::REVERSAL_REQUEST);
    reversal.remove(fields::STAN);
    reversal.set(fields::ORIGINAL_DATA_ELEMENTS, format!("{original_mti}{original_stan}{original_datetime}{original_institution}"));
    reversal
}

/// DUPLICATE_CHECK: rejects with [`PipelineError::DuplicateTransaction`]
/// (`94`) if this fingerprint has been seen within the configured horizon
/// (spec §4.8).
pub struct DuplicateCheckHandler {
    detector: Arc<DuplicateDetector>,
}

impl DuplicateCheckHandler {
    pub fn new(detector: Arc<DuplicateDetector>) -> Self {
        DuplicateCheckHandler { detector }
    }
}

#[async_trait]
impl Handler for DuplicateCheckHandler {
    fn stage(&self) -> Stage {
        Stage::DuplicateCheck
    }

    async fn handle(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let request_mti = ctx.request.get_str(fields::MTI).unwrap_or("");
        if mti::is_network_management(request_mti) {
            return Ok(());
        }

        let fingerprint = Fingerprint {
            acquiring_institution: ctx.request.get_str(fields::ACQUIRING_INSTITUTION).unwrap_or("").to_string(),
            terminal_id: ctx.request.get_str(fields::TERMINAL_ID).unwrap_or("").to_string(),
            stan: ctx.request.get_str(fields::STAN).unwrap_or("").to_string(),
            transmission_date_time: ctx.request.get_str(fields::TRANSMISSION_DATE_TIME).unwrap_or("").to_string(),
            amount: ctx.request.get_str(fields::AMOUNT).unwrap_or("").to_string(),
        };

        if self.detector.check_and_record(fingerprint) {
            return Err(PipelineError::DuplicateTransaction);
        }
        Ok(())
    }
}

/// VALIDATION: required-field presence, digit-only checks, PAN Luhn
/// checksum and blacklist lookup, each rejecting with the matching
/// [`PipelineError::Validation`] or [`PipelineError::Blacklisted`] variant
/// (spec §4.9 "Validator").
pub struct ValidationHandler {
    blacklist: Arc<dyn Blacklist>,
}

impl ValidationHandler {
    pub fn new(blacklist: Arc<dyn Blacklist>) -> Self {
        ValidationHandler { blacklist }
    }
}

#[async_trait]
impl Handler for ValidationHandler {
    fn stage(&self) -> Stage {
        Stage::Validation
    }

    async fn handle(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        if mti::is_network_management(ctx.request.get_str(fields::MTI).unwrap_or("")) {
            return Ok(());
        }

        for field in [fields::PAN, fields::PROCESSING_CODE, fields::AMOUNT, fields::STAN, fields::TERMINAL_ID] {
            if ctx.request.get_str(field).is_none_or(str::is_empty) {
                return Err(PipelineError::Validation(ValidationFailure::MissingField { field: field.to_string() }));
            }
        }

        let amount = ctx.request.get_str(fields::AMOUNT).unwrap();
        if amount.len() != 12 || !amount.chars().all(|c| c.is_ascii_digit()) {
            return Err(PipelineError::Validation(ValidationFailure::InvalidAmount { field: fields::AMOUNT.to_string() }));
        }

        let pan = ctx.request.get_str(fields::PAN).unwrap();
        if !pan.chars().all(|c| c.is_ascii_digit()) || !passes_luhn(pan) {
            return Err(PipelineError::Validation(ValidationFailure::InvalidCard { field: fields::PAN.to_string() }));
        }

        if self.blacklist.is_blacklisted(pan) {
            return Err(PipelineError::Blacklisted);
        }
        Ok(())
    }
}

fn passes_luhn(pan: &str) -> bool {
    let digits: Vec<u32> = match pan.chars().map(|c| c.to_digit(10)).collect() {
        Some(d) => d,
        None => return false,
    };
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| if i % 2 == 1 { let doubled = d * 2; if doubled > 9 { doubled - 9 } else { doubled } } else { d })
        .sum();
    sum % 10 == 0
}

/// LIMIT_CHECK: per-account single/daily/monthly/count limits, rejecting
/// with [`PipelineError::LimitExceeded`] once the repository reports a
/// breach (spec §4.9).
pub struct LimitCheckHandler {
    repository: Arc<dyn LimitRepository>,
}

impl LimitCheckHandler {
    pub fn new(repository: Arc<dyn LimitRepository>) -> Self {
        LimitCheckHandler { repository }
    }
}

#[async_trait]
impl Handler for LimitCheckHandler {
    fn stage(&self) -> Stage {
        Stage::LimitCheck
    }

    async fn handle(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        if mti::is_network_management(ctx.request.get_str(fields::MTI).unwrap_or("")) {
            return Ok(());
        }
        let Some(account) = ctx.request.get_str(fields::SOURCE_ACCOUNT).or_else(|| ctx.request.get_str(fields::PAN)) else {
            return Ok(());
        };
        let Some(amount) = ctx.request.get_str(fields::AMOUNT).and_then(|a| a.parse::<u64>().ok()) else {
            return Ok(());
        };

        if let Some(kind) = self.repository.record_and_check(account, amount) {
            return Err(PipelineError::LimitExceeded { frequency: kind == LimitKind::Frequency });
        }
        Ok(())
    }
}

/// ROUTING: assigns a route identifier and the destination MTI (spec
/// §4.9 "Routing"). The stage timeout itself is looked up by the pipeline
/// runner from `ctx.transaction_type`.
pub struct RoutingHandler {
    default_route: String,
}

impl RoutingHandler {
    pub fn new(default_route: impl Into<String>) -> Self {
        RoutingHandler { default_route: default_route.into() }
    }
}

#[async_trait]
impl Handler for RoutingHandler {
    fn stage(&self) -> Stage {
        Stage::Routing
    }

    async fn handle(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let request_mti = ctx.request.get_str(fields::MTI).unwrap_or("").to_string();
        let Some(destination_mti) = mti::response_for(&request_mti) else {
            return Err(PipelineError::RoutingFailure { route: self.default_route.clone() });
        };
        ctx.route = Some(Route::new(self.default_route.clone()));
        ctx.destination_mti = Some(destination_mti.to_string());
        Ok(())
    }
}

/// PROCESSING: acquires a Channel, consults the breaker and rate limiter,
/// submits the request, and attaches the decoded response (spec §4.9).
pub struct ProcessingHandler {
    pool: Arc<ChannelPool>,
    breakers: Arc<parking_lot::Mutex<HashMap<String, Arc<CircuitBreaker>>>>,
    limiters: Arc<parking_lot::Mutex<HashMap<String, Arc<dyn RateLimiter>>>>,
    breaker_config: BreakerConfig,
    rate_limiter_config: RateLimiterConfig,
    response_timeout: std::time::Duration,
}

impl ProcessingHandler {
    pub fn new(
        pool: Arc<ChannelPool>,
        breaker_config: BreakerConfig,
        rate_limiter_config: RateLimiterConfig,
        response_timeout: std::time::Duration,
    ) -> Self {
        ProcessingHandler {
            pool,
            breakers: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            limiters: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            breaker_config,
            rate_limiter_config,
            response_timeout,
        }
    }

    fn breaker_for(&self, route: &str) -> Arc<CircuitBreaker> {
        self.breakers.lock().entry(route.to_string()).or_insert_with(|| CircuitBreaker::new(self.breaker_config.clone())).clone()
    }

    fn limiter_for(&self, route: &str) -> Arc<dyn RateLimiter> {
        self.limiters.lock().entry(route.to_string()).or_insert_with(|| build_rate_limiter(&self.rate_limiter_config)).clone()
    }
}

#[async_trait]
impl Handler for ProcessingHandler {
    fn stage(&self) -> Stage {
        Stage::Processing
    }

    async fn handle(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        if ctx.response.is_some() {
            return Ok(());
        }
        let Some(route) = ctx.route.clone() else {
            return Err(PipelineError::RoutingFailure { route: "unassigned".to_string() });
        };

        let breaker = self.breaker_for(&route.name);
        breaker.try_acquire().map_err(|_| PipelineError::CircuitOpen)?;

        let limiter = self.limiter_for(&route.name);
        if !limiter.try_acquire() {
            return Err(PipelineError::RateLimited);
        }

        let channel = self.pool.acquire(&route)?;
        let outcome = channel.send_and_receive(ctx.request.clone(), self.response_timeout).await;
        match outcome {
            Ok(response) => {
                breaker.record(Outcome::Success);
                ctx.response = Some(response);
                Ok(())
            }
            Err(e) => {
                breaker.record(Outcome::Failure);
                warn!(route = %route.name, error = %e, "processing send failed");
                Err(e.into())
            }
        }
    }
}

/// AUDIT: always runs, even after a short-circuit, and records the
/// transaction log entry (spec §4.7 "AUDIT, which always runs").
pub struct AuditHandler {
    log: Arc<dyn crate::repository::TransactionLog>,
}

impl AuditHandler {
    pub fn new(log: Arc<dyn crate::repository::TransactionLog>) -> Self {
        AuditHandler { log }
    }
}

#[async_trait]
impl Handler for AuditHandler {
    fn stage(&self) -> Stage {
        Stage::Audit
    }

    async fn handle(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let response_code = ctx.response.as_ref().and_then(|r| r.get_str(fields::RESPONSE_CODE)).map(str::to_string);
        self.log.append(crate::repository::TransactionLogRecord {
            request: ctx.request.clone(),
            response: ctx.response.clone(),
            response_code,
            reversed: false,
        });
        Ok(())
    }
}

/// AUDIT (runs after [`AuditHandler`]): sends the reversal [`build_reversal`]
/// produced for a timed-out transaction and, once the peer replies with
/// F39=00, marks the original's log record as reversed (spec §8 "E5
/// Reversal"). A no-op whenever the run did not time out, or no route was
/// ever assigned to send the reversal on.
pub struct ReversalHandler {
    pool: Arc<ChannelPool>,
    log: Arc<dyn crate::repository::TransactionLog>,
    response_timeout: std::time::Duration,
}

impl ReversalHandler {
    pub fn new(pool: Arc<ChannelPool>, log: Arc<dyn crate::repository::TransactionLog>, response_timeout: std::time::Duration) -> Self {
        ReversalHandler { pool, log, response_timeout }
    }
}

#[async_trait]
impl Handler for ReversalHandler {
    fn stage(&self) -> Stage {
        Stage::Audit
    }

    fn order(&self) -> u32 {
        1
    }

    async fn handle(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let Some(reversal) = ctx.reversal.take() else { return Ok(()) };
        let Some(route) = ctx.route.clone() else { return Ok(()) };
        let original_stan = ctx.request.get_str(fields::STAN).unwrap_or("").to_string();

        let channel = match self.pool.acquire(&route) {
            Ok(channel) => channel,
            Err(e) => {
                warn!(route = %route.name, error = %e, "no channel available to send reversal");
                return Ok(());
            }
        };

        match channel.send_and_receive(reversal, self.response_timeout).await {
            Ok(response) if response.get_str(fields::RESPONSE_CODE).is_some_and(response_code::is_approved) => {
                self.log.mark_reversed(&original_stan);
            }
            Ok(response) => {
                warn!(route = %route.name, code = ?response.get_str(fields::RESPONSE_CODE), "reversal declined by peer");
            }
            Err(e) => warn!(route = %route.name, error = %e, "reversal send failed"),
        }
        Ok(())
    }
}
