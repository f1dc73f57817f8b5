//! Network management protocol engine: sign-on, echo and sign-off over a
//! [`Channel`], distinguished by the network-management-code field within
//! the 0800/0810 message class (spec §4.4).

use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use iso8583::mti::network_management_code;
use iso8583::standard::fields;
use iso8583::{mti, MessageInstance};

use crate::channel::{Channel, ChannelState};
use crate::error::ChannelError;

/// Runs sign-on once, then drives the idle/liveness echo loop until the
/// channel is closed or three consecutive echoes fail (spec §4.2
/// "Idle/liveness").
pub struct ProtocolEngine {
    channel: Channel,
    heartbeat_interval: Duration,
    response_timeout: Duration,
}

impl ProtocolEngine {
    pub fn new(channel: Channel, heartbeat_interval: Duration, response_timeout: Duration) -> Self {
        ProtocolEngine { channel, heartbeat_interval, response_timeout }
    }

    /// Send 0800/001 and wait for 0810/001 with an approving response
    /// code, transitioning the channel through SIGNING_ON to SIGNED_ON.
    pub async fn sign_on(&self) -> Result<(), ChannelError> {
        self.channel.set_state(ChannelState::SigningOn);
        let request = network_management_request(network_management_code::SIGN_ON, &self.channel.next_stan());
        let response = self.channel.send_and_receive(request, self.response_timeout).await?;

        if response.get_str(fields::RESPONSE_CODE) == Some("00") {
            self.channel.set_state(ChannelState::SignedOn);
            info!("sign-on accepted");
            Ok(())
        } else {
            self.channel.set_state(ChannelState::Failed);
            warn!(response_code = ?response.get_str(fields::RESPONSE_CODE), "sign-on rejected");
            Err(ChannelError::ChannelClosed)
        }
    }

    /// Send 0800/002 and transition to SIGNING_OFF then rely on the
    /// caller's subsequent `Channel::close()` to finish the teardown.
    pub async fn sign_off(&self) -> Result<(), ChannelError> {
        self.channel.set_state(ChannelState::SigningOff);
        let request = network_management_request(network_management_code::SIGN_OFF, &self.channel.next_stan());
        self.channel.send_and_receive(request, self.response_timeout).await?;
        Ok(())
    }

    /// Loop forever, emitting an echo whenever the channel has been idle
    /// for at least `heartbeat_interval`. Three consecutive failures force
    /// the channel to FAILED and end the loop (spec §4.2).
    pub async fn run_idle_liveness_loop(&self) {
        let mut consecutive_failures = 0u32;
        loop {
            sleep(self.heartbeat_interval / 4).await;

            if self.channel.state() != ChannelState::SignedOn {
                return;
            }
            if self.channel.idle_for() < self.heartbeat_interval {
                continue;
            }

            let request = network_management_request(network_management_code::ECHO, &self.channel.next_stan());
            match self.channel.send_and_receive(request, self.response_timeout).await {
                Ok(response) if response.get_str(fields::RESPONSE_CODE) == Some("00") => {
                    consecutive_failures = 0;
                }
                _ => {
                    consecutive_failures += 1;
                    warn!(consecutive_failures, "echo failed");
                    if consecutive_failures >= 3 {
                        self.channel.set_state(ChannelState::Failed);
                        return;
                    }
                }
            }
        }
    }
}

fn network_management_request(code: &str, stan: &str) -> MessageInstance {
    let mut message = MessageInstance::new();
    message.set(fields::MTI, mti::NETWORK_MGMT_REQUEST);
    message.set(fields::NETWORK_MANAGEMENT_CODE, code);
    message.set(fields::STAN, stan);
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use fep_config::ChannelProfileConfig;
    use iso8583::standard::default_schema;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn sign_on_peer(send_listener: TcpListener, receive_listener: TcpListener) {
        let schema = default_schema();
        let (mut peer_recv, _) = send_listener.accept().await.unwrap();
        let (mut peer_send, _) = receive_listener.accept().await.unwrap();
        loop {
            let frame = match crate::framing::read_frame(&mut peer_recv, &schema).await {
                Ok(f) => f,
                Err(_) => return,
            };
            let mut message = iso8583::decode(&frame, &schema).unwrap();
            message.set(fields::MTI, mti::NETWORK_MGMT_RESPONSE);
            message.set(fields::RESPONSE_CODE, "00");
            let encoded = iso8583::encode(&message, &schema).unwrap();
            peer_send.write_all(&encoded).await.unwrap();
            peer_send.flush().await.unwrap();
        }
    }

    #[tokio::test]
    async fn sign_on_transitions_channel_to_signed_on() {
        let schema = default_schema();
        let send_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let send_port = send_listener.local_addr().unwrap().port();
        let receive_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let receive_port = receive_listener.local_addr().unwrap().port();
        tokio::spawn(sign_on_peer(send_listener, receive_listener));

        let mut profile = ChannelProfileConfig::default();
        profile.send_port = send_port;
        profile.receive_port = receive_port;

        let channel = Channel::new(profile, schema);
        channel.connect().await.unwrap();

        let engine = ProtocolEngine::new(channel.clone(), Duration::from_secs(30), Duration::from_secs(2));
        engine.sign_on().await.unwrap();

        assert_eq!(channel.state(), ChannelState::SignedOn);
    }
}
