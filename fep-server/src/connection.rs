//! One accepted acquirer connection: decode, hand off to the pipeline,
//! multiplex responses back keyed by STAN (spec §4.10).

use std::sync::Arc;

use tokio::io::{split, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tracing::{info, warn};

use fep_net::framing;
use fep_pipeline::Pipeline;
use iso8583::standard::fields;
use iso8583::MessageSchema;

/// Maps a processing code's first two digits to the pipeline's named
/// transaction types, which drive the per-type deadline (spec §6, §4.7).
fn transaction_type_for(processing_code: &str) -> &'static str {
    match processing_code.get(0..2) {
        Some("01") => "withdrawal",
        Some("30") => "balance_inquiry",
        Some("40") => "transfer",
        Some("50") => "bill_payment",
        _ => "default",
    }
}

/// Accept and serve one connection until the peer closes it or a frame
/// fails to decode, processing up to `max_in_flight` requests
/// concurrently (spec §5 "Backpressure").
pub async fn handle_connection(stream: TcpStream, schema: Arc<MessageSchema>, pipeline: Arc<Pipeline>, max_in_flight: usize) {
    let (mut reader, writer): (ReadHalf<TcpStream>, WriteHalf<TcpStream>) = split(stream);
    let writer = Arc::new(AsyncMutex::new(writer));
    let in_flight = Arc::new(Semaphore::new(max_in_flight));

    loop {
        let frame = match framing::read_frame(&mut reader, &schema).await {
            Ok(f) => f,
            Err(e) => {
                info!(error = %e, "connection closed");
                return;
            }
        };

        let message = match iso8583::decode(&frame, &schema) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "dropping frame that failed to decode");
                continue;
            }
        };

        let permit = in_flight.clone().acquire_owned().await.expect("semaphore never closed");
        let pipeline = pipeline.clone();
        let schema = schema.clone();
        let writer = writer.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let processing_code = message.get_str(fields::PROCESSING_CODE).unwrap_or("");
            let transaction_type = transaction_type_for(processing_code);
            let response = pipeline.run(message, transaction_type).await;

            match iso8583::encode(&response, &schema) {
                Ok(encoded) => {
                    let mut guard = writer.lock().await;
                    if let Err(e) = framing::write_frame(&mut *guard, &encoded).await {
                        warn!(error = %e, "failed to write response");
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode response"),
            }
        });
    }
}
