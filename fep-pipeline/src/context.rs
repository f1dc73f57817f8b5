//! The mutable state threaded through one transaction's pipeline run
//! (spec §4.7, §3 "Ownership": "Pipeline contexts are owned by the worker
//! processing the transaction").

use std::time::Instant;

use iso8583::MessageInstance;

use fep_router::Route;

/// A pipeline context: the decoded request, whatever response a handler
/// has produced so far, and the routing decision made by the ROUTING
/// stage.
pub struct PipelineContext {
    pub request: MessageInstance,
    pub response: Option<MessageInstance>,
    pub transaction_type: String,
    pub route: Option<Route>,
    pub destination_mti: Option<String>,
    /// The 0400 reversal to send for this transaction, set by the runner
    /// on a deadline timeout and consumed by `ReversalHandler` (spec §8
    /// "E5 Reversal").
    pub reversal: Option<MessageInstance>,
    /// Cleared by a handler that wants later stages (other than AUDIT)
    /// skipped (spec §4.7 "short-circuit").
    pub keep_going: bool,
    pub started_at: Instant,
}

impl PipelineContext {
    pub fn new(request: MessageInstance, transaction_type: impl Into<String>) -> Self {
        PipelineContext {
            request,
            response: None,
            transaction_type: transaction_type.into(),
            route: None,
            destination_mti: None,
            reversal: None,
            keep_going: true,
            started_at: Instant::now(),
        }
    }

    /// Set an early response and stop running further non-AUDIT stages.
    pub fn short_circuit(&mut self, response: MessageInstance) {
        self.response = Some(response);
        self.keep_going = false;
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}
