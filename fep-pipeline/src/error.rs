//! Pipeline error kinds and their mapping to ISO 8583 response codes
//! (spec §7 "Error handling design").

use iso8583::response_code;

/// A handler-local validation failure, with enough detail to log and to
/// pick the right response-code subkind (spec §4.9 "Validator").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    MissingField { field: String },
    PatternMismatch { field: String },
    OutOfRange { field: String },
    InvalidAmount { field: String },
    InvalidCard { field: String },
}

/// Every failure class the pipeline can raise (spec §7 "Kinds").
#[derive(Debug)]
pub enum PipelineError {
    ParseError(iso8583::CodecError),
    SchemaViolation(iso8583::CodecError),
    Validation(ValidationFailure),
    LimitExceeded { frequency: bool },
    DuplicateTransaction,
    Blacklisted,
    RoutingFailure { route: String },
    ChannelUnavailable,
    ChannelClosed,
    CircuitOpen,
    RateLimited,
    Timeout,
    SystemError(String),
}

impl PipelineError {
    /// Map this error to the ISO 8583 response code the client ultimately
    /// sees (spec §7 "Mapping to response codes").
    pub fn response_code(&self) -> &'static str {
        match self {
            PipelineError::ParseError(_) | PipelineError::SchemaViolation(_) => response_code::FORMAT_ERROR,
            PipelineError::Validation(failure) => match failure {
                ValidationFailure::InvalidAmount { .. } => response_code::INVALID_AMOUNT,
                ValidationFailure::InvalidCard { .. } => response_code::INVALID_CARD,
                ValidationFailure::MissingField { .. }
                | ValidationFailure::PatternMismatch { .. }
                | ValidationFailure::OutOfRange { .. } => response_code::FORMAT_ERROR,
            },
            PipelineError::LimitExceeded { frequency: true } => response_code::EXCEEDS_FREQUENCY_LIMIT,
            PipelineError::LimitExceeded { frequency: false } => response_code::EXCEEDS_WITHDRAWAL_LIMIT,
            PipelineError::DuplicateTransaction => response_code::DUPLICATE_TRANSACTION,
            PipelineError::Blacklisted => response_code::TRANSACTION_NOT_PERMITTED,
            PipelineError::RoutingFailure { .. }
            | PipelineError::ChannelUnavailable
            | PipelineError::ChannelClosed
            | PipelineError::CircuitOpen
            | PipelineError::RateLimited => response_code::ISSUER_INOPERATIVE,
            PipelineError::Timeout => response_code::TIMEOUT,
            PipelineError::SystemError(_) => response_code::SYSTEM_MALFUNCTION,
        }
    }

    /// `SystemError` is the only class also logged at error severity
    /// (spec §7 "Propagation").
    pub fn is_system_error(&self) -> bool {
        matches!(self, PipelineError::SystemError(_))
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::ParseError(e) => write!(f, "parse error: {e}"),
            PipelineError::SchemaViolation(e) => write!(f, "schema violation: {e}"),
            PipelineError::Validation(failure) => write!(f, "validation failed: {failure:?}"),
            PipelineError::LimitExceeded { frequency } => {
                write!(f, "{} limit exceeded", if *frequency { "frequency" } else { "amount" })
            }
            PipelineError::DuplicateTransaction => write!(f, "duplicate transaction"),
            PipelineError::Blacklisted => write!(f, "blacklisted"),
            PipelineError::RoutingFailure { route } => write!(f, "routing failure for {route}"),
            PipelineError::ChannelUnavailable => write!(f, "channel unavailable"),
            PipelineError::ChannelClosed => write!(f, "channel closed"),
            PipelineError::CircuitOpen => write!(f, "circuit open"),
            PipelineError::RateLimited => write!(f, "rate limited"),
            PipelineError::Timeout => write!(f, "timeout"),
            PipelineError::SystemError(msg) => write!(f, "system error: {msg}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<fep_router::PoolError> for PipelineError {
    fn from(e: fep_router::PoolError) -> Self {
        match e {
            fep_router::PoolError::PoolExhausted { .. } => PipelineError::ChannelUnavailable,
            fep_router::PoolError::UnknownRoute { route } => PipelineError::RoutingFailure { route },
        }
    }
}

impl From<fep_net::ChannelError> for PipelineError {
    fn from(e: fep_net::ChannelError) -> Self {
        match e {
            fep_net::ChannelError::ChannelClosed => PipelineError::ChannelClosed,
            fep_net::ChannelError::Timeout => PipelineError::Timeout,
            fep_net::ChannelError::TraceKeyInUse { .. } => PipelineError::SystemError(e.to_string()),
            fep_net::ChannelError::Framing(_) => PipelineError::SystemError(e.to_string()),
        }
    }
}

impl From<fep_resilience::CircuitOpen> for PipelineError {
    fn from(_: fep_resilience::CircuitOpen) -> Self {
        PipelineError::CircuitOpen
    }
}

impl From<fep_resilience::RateLimited> for PipelineError {
    fn from(_: fep_resilience::RateLimited) -> Self {
        PipelineError::RateLimited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_matches_spec_table() {
        assert_eq!(PipelineError::DuplicateTransaction.response_code(), "94");
        assert_eq!(PipelineError::Blacklisted.response_code(), "57");
        assert_eq!(PipelineError::Timeout.response_code(), "98");
        assert_eq!(PipelineError::ChannelClosed.response_code(), "91");
        assert_eq!(PipelineError::CircuitOpen.response_code(), "91");
        assert_eq!(PipelineError::SystemError("x".into()).response_code(), "96");
        assert_eq!(PipelineError::LimitExceeded { frequency: true }.response_code(), "65");
        assert_eq!(PipelineError::LimitExceeded { frequency: false }.response_code(), "61");
    }
}
