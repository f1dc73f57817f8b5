//! End-to-end pipeline scenarios against a simulated peer (spec §8
//! "E1 Successful withdrawal", "E2 Declined", "E3 Duplicate", "E4 Peer
//! timeout", "E5 Reversal").

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use fep_config::{BreakerConfig, ChannelProfileConfig, PipelineConfig, PoolConfig, RateLimiterConfig};
use fep_net::framing;
use fep_pipeline::duplicate::DuplicateDetector;
use fep_pipeline::handlers::{
    AuditHandler, DuplicateCheckHandler, LimitCheckHandler, ProcessingHandler, ReversalHandler, RoutingHandler, ValidationHandler,
};
use fep_pipeline::repository::{InMemoryBlacklist, InMemoryLimitRepository, InMemoryTransactionLog};
use fep_pipeline::{Handler, Pipeline};
use fep_router::{ChannelPool, Route};
use iso8583::standard::{default_schema, fields};
use iso8583::{mti, MessageInstance};

async fn start_fake_peer(respond_with_code: &'static str, auth_code: &'static str) -> (u16, u16) {
    let schema = default_schema();
    let send_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let send_port = send_listener.local_addr().unwrap().port();
    let receive_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let receive_port = receive_listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut peer_recv, _) = send_listener.accept().await.unwrap();
        let (mut peer_send, _) = receive_listener.accept().await.unwrap();
        loop {
            let frame = match framing::read_frame(&mut peer_recv, &schema).await {
                Ok(f) => f,
                Err(_) => return,
            };
            let mut message = iso8583::decode(&frame, &schema).unwrap();
            let request_mti = message.get_str(fields::MTI).unwrap().to_string();
            if request_mti == mti::NETWORK_MGMT_REQUEST {
                message.set(fields::MTI, mti::NETWORK_MGMT_RESPONSE);
                message.set(fields::RESPONSE_CODE, "00");
            } else if let Some(response_mti) = mti::response_for(&request_mti) {
                message.set(fields::MTI, response_mti);
                message.set(fields::RESPONSE_CODE, respond_with_code);
                message.set(fields::AUTH_CODE, auth_code);
            } else {
                continue;
            }
            let encoded = iso8583::encode(&message, &schema).unwrap();
            peer_send.write_all(&encoded).await.unwrap();
            peer_send.flush().await.unwrap();
        }
    });

    (send_port, receive_port)
}

/// A peer that goes silent on the original 0200 (to force an E4 timeout)
/// but replies 0410/00 to the 0400 reversal that follows it.
async fn start_timeout_then_reversal_peer() -> (u16, u16) {
    let schema = default_schema();
    let send_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let send_port = send_listener.local_addr().unwrap().port();
    let receive_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let receive_port = receive_listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut peer_recv, _) = send_listener.accept().await.unwrap();
        let (mut peer_send, _) = receive_listener.accept().await.unwrap();
        loop {
            let frame = match framing::read_frame(&mut peer_recv, &schema).await {
                Ok(f) => f,
                Err(_) => return,
            };
            let mut message = iso8583::decode(&frame, &schema).unwrap();
            let request_mti = message.get_str(fields::MTI).unwrap().to_string();
            if request_mti == mti::FINANCIAL_REQUEST {
                continue;
            }
            let Some(response_mti) = mti::response_for(&request_mti) else { continue };
            message.set(fields::MTI, response_mti);
            message.set(fields::RESPONSE_CODE, "00");
            let encoded = iso8583::encode(&message, &schema).unwrap();
            peer_send.write_all(&encoded).await.unwrap();
            peer_send.flush().await.unwrap();
        }
    });

    (send_port, receive_port)
}

async fn build_pool_and_route(send_port: u16, receive_port: u16) -> (Arc<ChannelPool>, Route) {
    let pool = Arc::new(ChannelPool::new());
    let route = Route::new("core-host");
    let mut profile = ChannelProfileConfig::default();
    profile.send_port = send_port;
    profile.receive_port = receive_port;
    profile.connect_timeout_ms = 500;
    profile.response_timeout_ms = 2_000;

    let mut pool_config = PoolConfig::default();
    pool_config.min_size = 1;
    pool_config.max_size = 1;

    pool.register_route(route.clone(), profile, default_schema(), pool_config).await;

    for _ in 0..100 {
        if pool.acquire(&route).is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    (pool, route)
}

fn build_pipeline(pool: Arc<ChannelPool>, log: Arc<InMemoryTransactionLog>, detector: Arc<DuplicateDetector>) -> Pipeline {
    let handlers: Vec<Arc<dyn Handler>> = vec![
        Arc::new(DuplicateCheckHandler::new(detector)),
        Arc::new(ValidationHandler::new(Arc::new(InMemoryBlacklist::new()))),
        Arc::new(LimitCheckHandler::new(Arc::new(InMemoryLimitRepository::new()))),
        Arc::new(RoutingHandler::new("core-host")),
        Arc::new(ProcessingHandler::new(pool, BreakerConfig::default(), RateLimiterConfig::default(), Duration::from_secs(2))),
        Arc::new(AuditHandler::new(log)),
    ];
    Pipeline::new(handlers, Arc::new(PipelineConfig::default()))
}

fn withdrawal_request(stan: &str) -> MessageInstance {
    let mut req = MessageInstance::new();
    req.set(fields::MTI, mti::FINANCIAL_REQUEST);
    req.set(fields::PAN, "4111111111111111");
    req.set(fields::PROCESSING_CODE, "011000");
    req.set(fields::AMOUNT, "000000010000");
    req.set(fields::STAN, stan);
    req.set(fields::TRANSMISSION_DATE_TIME, "0726120000");
    req.set(fields::ACQUIRING_INSTITUTION, "12345678901");
    req.set(fields::RRN, "123456789012");
    req.set(fields::TERMINAL_ID, "ATM00001");
    req.set(fields::CURRENCY_CODE, "901");
    req
}

#[tokio::test]
async fn e1_successful_withdrawal_approves_and_echoes_fields() {
    let (send_port, receive_port) = start_fake_peer("00", "987654").await;
    let (pool, _route) = build_pool_and_route(send_port, receive_port).await;
    let log = Arc::new(InMemoryTransactionLog::new());
    let pipeline = build_pipeline(pool, log.clone(), Arc::new(DuplicateDetector::new(&Default::default())));

    let response = pipeline.run(withdrawal_request("000001"), "withdrawal").await;

    assert_eq!(response.get_str(fields::RESPONSE_CODE), Some("00"));
    assert_eq!(response.get_str(fields::AUTH_CODE), Some("987654"));
    assert_eq!(response.get_str(fields::PAN), Some("4111111111111111"));
    assert_eq!(log.len(), 1);
}

#[tokio::test]
async fn e2_declined_insufficient_funds_is_not_retried() {
    let (send_port, receive_port) = start_fake_peer("51", "000000").await;
    let (pool, _route) = build_pool_and_route(send_port, receive_port).await;
    let log = Arc::new(InMemoryTransactionLog::new());
    let pipeline = build_pipeline(pool, log.clone(), Arc::new(DuplicateDetector::new(&Default::default())));

    let response = pipeline.run(withdrawal_request("000002"), "withdrawal").await;

    assert_eq!(response.get_str(fields::RESPONSE_CODE), Some("51"));
    assert_eq!(log.len(), 1);
}

#[tokio::test]
async fn e3_duplicate_is_rejected_without_reaching_the_peer() {
    let (send_port, receive_port) = start_fake_peer("00", "987654").await;
    let (pool, _route) = build_pool_and_route(send_port, receive_port).await;
    let log = Arc::new(InMemoryTransactionLog::new());
    let detector = Arc::new(DuplicateDetector::new(&Default::default()));
    let pipeline = build_pipeline(pool, log.clone(), detector);

    let first = pipeline.run(withdrawal_request("000003"), "withdrawal").await;
    let second = pipeline.run(withdrawal_request("000003"), "withdrawal").await;

    assert_eq!(first.get_str(fields::RESPONSE_CODE), Some("00"));
    assert_eq!(second.get_str(fields::RESPONSE_CODE), Some("94"));
    assert_eq!(log.len(), 2);
}

#[tokio::test]
async fn malformed_request_is_rejected_at_validation_without_touching_the_peer() {
    let (send_port, receive_port) = start_fake_peer("00", "987654").await;
    let (pool, _route) = build_pool_and_route(send_port, receive_port).await;
    let log = Arc::new(InMemoryTransactionLog::new());
    let pipeline = build_pipeline(pool, log.clone(), Arc::new(DuplicateDetector::new(&Default::default())));

    let mut req = withdrawal_request("000004");
    req.remove(fields::TERMINAL_ID);

    let response = pipeline.run(req, "withdrawal").await;
    assert_eq!(response.get_str(fields::RESPONSE_CODE), Some("30"));
}

#[tokio::test]
async fn e5_timeout_sends_a_reversal_and_marks_the_original_as_reversed() {
    let (send_port, receive_port) = start_timeout_then_reversal_peer().await;
    let (pool, _route) = build_pool_and_route(send_port, receive_port).await;
    let log = Arc::new(InMemoryTransactionLog::new());
    let detector = Arc::new(DuplicateDetector::new(&Default::default()));

    let handlers: Vec<Arc<dyn Handler>> = vec![
        Arc::new(DuplicateCheckHandler::new(detector)),
        Arc::new(ValidationHandler::new(Arc::new(InMemoryBlacklist::new()))),
        Arc::new(LimitCheckHandler::new(Arc::new(InMemoryLimitRepository::new()))),
        Arc::new(RoutingHandler::new("core-host")),
        Arc::new(ProcessingHandler::new(pool.clone(), BreakerConfig::default(), RateLimiterConfig::default(), Duration::from_secs(5))),
        Arc::new(AuditHandler::new(log.clone())),
        Arc::new(ReversalHandler::new(pool, log.clone(), Duration::from_secs(2))),
    ];
    let mut pipeline_config = PipelineConfig::default();
    pipeline_config.withdrawal_deadline_ms = 300;
    let pipeline = Pipeline::new(handlers, Arc::new(pipeline_config));

    let response = pipeline.run(withdrawal_request("000005"), "withdrawal").await;

    assert_eq!(response.get_str(fields::RESPONSE_CODE), Some("98"));
    assert_eq!(log.len(), 1);
    assert!(log.is_reversed("000005"));
}
