//! Framing and correlation exercised together over an in-memory duplex
//! pipe standing in for a peer, without a real socket (spec §10.4).

use std::time::Duration;

use tokio::io::split;

use fep_net::correlator::{Correlator, TraceKey};
use fep_net::{framing, FramingError};
use iso8583::standard::{default_schema, fields};
use iso8583::{mti, MessageInstance};

#[tokio::test]
async fn request_over_a_duplex_pipe_is_correlated_to_its_response() {
    let schema = default_schema();
    let (client_stream, peer_stream) = tokio::io::duplex(4096);
    let (mut client_read, mut client_write) = split(client_stream);
    let (mut peer_read, mut peer_write) = split(peer_stream);

    let peer_schema = schema.clone();
    tokio::spawn(async move {
        let frame = framing::read_frame(&mut peer_read, &peer_schema).await.unwrap();
        let mut message = iso8583::decode(&frame, &peer_schema).unwrap();
        message.set(fields::MTI, mti::NETWORK_MGMT_RESPONSE);
        message.set(fields::RESPONSE_CODE, "00");
        let encoded = iso8583::encode(&message, &peer_schema).unwrap();
        framing::write_frame(&mut peer_write, &encoded).await.unwrap();
    });

    let correlator = Correlator::new();
    let key = TraceKey::NetworkManagement { stan: "000001".to_string(), message_function: "001".to_string() };
    let waiting = correlator.submit(key.clone(), Duration::from_secs(2)).unwrap();

    let mut request = MessageInstance::new();
    request.set(fields::MTI, mti::NETWORK_MGMT_REQUEST);
    request.set(fields::STAN, "000001");
    request.set(fields::NETWORK_MANAGEMENT_CODE, "001");
    let encoded_request = iso8583::encode(&request, &schema).unwrap();
    framing::write_frame(&mut client_write, &encoded_request).await.unwrap();

    let frame = framing::read_frame(&mut client_read, &schema).await.unwrap();
    let response = iso8583::decode(&frame, &schema).unwrap();
    assert!(correlator.complete(&key, response));

    let matched = waiting.wait().await.unwrap();
    assert_eq!(matched.get_str(fields::RESPONSE_CODE), Some("00"));
}

#[tokio::test]
async fn peer_closing_before_any_bytes_is_reported_as_closed() {
    let schema = default_schema();
    let (a, b) = tokio::io::duplex(4096);
    drop(a);
    let mut b = b;
    let err = framing::read_frame(&mut b, &schema).await.unwrap_err();
    assert!(matches!(err, FramingError::Closed));
}
