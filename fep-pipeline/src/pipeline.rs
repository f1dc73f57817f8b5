//! Runs a transaction's handler chain under a per-type deadline,
//! short-circuiting non-AUDIT stages on the first early response or
//! error (spec §4.7).

use std::sync::Arc;

use tracing::error;

use fep_config::PipelineConfig;
use iso8583::{response_code, MessageInstance};

use crate::context::PipelineContext;
use crate::handlers::{build_reversal, response_with_code};
use crate::stage::{Handler, Stage};

pub struct Pipeline {
    handlers: Vec<Arc<dyn Handler>>,
    config: Arc<PipelineConfig>,
}

impl Pipeline {
    pub fn new(mut handlers: Vec<Arc<dyn Handler>>, config: Arc<PipelineConfig>) -> Self {
        handlers.sort_by_key(|h| (h.stage(), h.order()));
        Pipeline { handlers, config }
    }

    /// Run the full chain and return a response — always, even on
    /// deadline or a raised `PipelineError` (spec §8 "Pipeline deadline").
    pub async fn run(&self, request: MessageInstance, transaction_type: impl Into<String>) -> MessageInstance {
        let transaction_type = transaction_type.into();
        let deadline = self.config.deadline_for(&transaction_type);
        let mut ctx = PipelineContext::new(request, transaction_type);

        if tokio::time::timeout(deadline, self.run_stages(&mut ctx)).await.is_err() {
            ctx.short_circuit(response_with_code(&ctx.request, response_code::TIMEOUT));
            ctx.reversal = Some(build_reversal(&ctx.request));
            self.run_audit(&mut ctx).await;
        }

        ctx.response.unwrap_or_else(|| response_with_code(&ctx.request, response_code::SYSTEM_MALFUNCTION))
    }

    async fn run_stages(&self, ctx: &mut PipelineContext) {
        for stage in Stage::ALL {
            if stage != Stage::Audit && !ctx.keep_going {
                continue;
            }
            for handler in self.handlers.iter().filter(|h| h.stage() == stage) {
                if let Err(e) = handler.handle(ctx).await {
                    if e.is_system_error() {
                        error!(error = %e, "system error in pipeline stage");
                    }
                    ctx.short_circuit(response_with_code(&ctx.request, e.response_code()));
                    break;
                }
            }
        }
    }

    async fn run_audit(&self, ctx: &mut PipelineContext) {
        for handler in self.handlers.iter().filter(|h| h.stage() == Stage::Audit) {
            let _ = handler.handle(ctx).await;
        }
    }
}
