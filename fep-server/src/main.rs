//! fep-server: the front-end processor's server terminator. Accepts
//! acquirer connections, decodes each request through the same codec and
//! framing the downstream Channel uses, and dispatches it through the
//! transaction pipeline (spec §4.10, C10).

mod connection;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fep_config::FepConfig;
use fep_pipeline::handlers::{
    AuditHandler, DuplicateCheckHandler, LimitCheckHandler, ProcessingHandler, ReversalHandler, RoutingHandler, ValidationHandler,
};
use fep_pipeline::repository::{InMemoryBlacklist, InMemoryLimitRepository, InMemoryTransactionLog};
use fep_pipeline::{DuplicateDetector, Handler, Pipeline};
use fep_router::{ChannelPool, Route};
use iso8583::standard::default_schema;

#[derive(Parser, Debug)]
#[command(name = "fep-server")]
#[command(about = "ISO 8583 front-end processor server terminator")]
struct Args {
    /// Path to the JSON configuration document (spec §6).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on for acquirer connections.
    #[arg(long, default_value = "0.0.0.0:7000")]
    listen: String,

    /// Name of the downstream route this server dispatches approved
    /// transactions to.
    #[arg(long, default_value = "core-host")]
    route: String,

    /// tracing-subscriber filter directive, e.g. "info" or "fep_pipeline=debug".
    #[arg(long, default_value = "info")]
    log_filter: String,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match &args.config {
        Some(path) => match fep_config::load_from_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                error!(error = %e, path = %path.display(), "failed to load configuration");
                std::process::exit(1);
            }
        },
        None => FepConfig::default(),
    };

    if let Err(e) = run(args, config).await {
        error!(error = %e, "server exited with error");
        std::process::exit(1);
    }
}

async fn run(args: Args, config: FepConfig) -> Result<(), std::io::Error> {
    let schema = Arc::new(default_schema());
    let route = Route::new(args.route.clone());

    let pool = Arc::new(ChannelPool::new());
    pool.register_route(route.clone(), config.channel_profile.clone(), (*schema).clone(), config.pool.clone()).await;

    let log = Arc::new(InMemoryTransactionLog::new());
    let detector = Arc::new(DuplicateDetector::new(&config.duplicate_detector));
    let blacklist = Arc::new(InMemoryBlacklist::new());
    let limits = Arc::new(InMemoryLimitRepository::new());

    let handlers: Vec<Arc<dyn Handler>> = vec![
        Arc::new(DuplicateCheckHandler::new(detector)),
        Arc::new(ValidationHandler::new(blacklist)),
        Arc::new(LimitCheckHandler::new(limits)),
        Arc::new(RoutingHandler::new(args.route.clone())),
        Arc::new(ProcessingHandler::new(
            pool.clone(),
            config.breaker.clone(),
            config.rate_limiter.clone(),
            config.channel_profile.response_timeout(),
        )),
        Arc::new(AuditHandler::new(log.clone())),
        Arc::new(ReversalHandler::new(pool, log, config.channel_profile.response_timeout())),
    ];
    let pipeline = Arc::new(Pipeline::new(handlers, Arc::new(config.pipeline.clone())));
    let max_in_flight = config.pipeline.max_in_flight_per_connection;

    let listener = TcpListener::bind(&args.listen).await?;
    info!(listen = %args.listen, route = %args.route, "fep-server listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "accepted acquirer connection");

        let schema = schema.clone();
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            connection::handle_connection(stream, schema, pipeline, max_in_flight).await;
        });
    }
}
