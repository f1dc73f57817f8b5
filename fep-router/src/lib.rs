//! Channel pool and route selection (spec §4.5, C5): acquire a SIGNED_ON
//! Channel for a route under a round-robin, skip-failed policy; grow the
//! pool on demand up to its configured maximum; retire Channels that keep
//! failing sign-on.

pub mod error;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use fep_config::{ChannelProfileConfig, PoolConfig};
use fep_net::{Channel, ProtocolEngine};
use iso8583::MessageSchema;

pub use error::PoolError;

/// A named group of Channels backing one downstream destination (spec
/// GLOSSARY "Route").
#[derive(Debug, Clone)]
pub struct Route {
    pub name: String,
}

impl Route {
    pub fn new(name: impl Into<String>) -> Self {
        Route { name: name.into() }
    }
}

struct ManagedChannel {
    id: u64,
    channel: Channel,
    consecutive_sign_on_failures: u32,
}

struct RouteEntry {
    profile: ChannelProfileConfig,
    schema: MessageSchema,
    pool_config: PoolConfig,
    heartbeat_interval: std::time::Duration,
    response_timeout: std::time::Duration,
    channels: Mutex<Vec<ManagedChannel>>,
    cursor: AtomicUsize,
}

/// Owns all Channels for every registered route.
pub struct ChannelPool {
    routes: Mutex<HashMap<String, Arc<RouteEntry>>>,
    next_channel_id: AtomicU64,
}

impl ChannelPool {
    pub fn new() -> Self {
        ChannelPool { routes: Mutex::new(HashMap::new()), next_channel_id: AtomicU64::new(1) }
    }

    /// Register a route and pre-connect `pool.min_size` Channels for it.
    /// If `pool.max_wait_ms` is set, waits up to that long for at least one
    /// of them to reach SIGNED_ON before returning, so a caller that
    /// registers a route at startup and immediately tries to use it sees a
    /// warm pool rather than an empty one — `acquire` itself stays
    /// non-blocking regardless (spec §4.5, §6 "pool max-wait").
    pub async fn register_route(
        self: &Arc<Self>,
        route: Route,
        profile: ChannelProfileConfig,
        schema: MessageSchema,
        pool: PoolConfig,
    ) {
        let entry = Arc::new(RouteEntry {
            heartbeat_interval: profile.heartbeat_interval(),
            response_timeout: profile.response_timeout(),
            profile,
            schema,
            pool_config: pool,
            channels: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        });
        let min_size = entry.pool_config.min_size;
        self.routes.lock().insert(route.name.clone(), entry.clone());
        for _ in 0..min_size {
            self.spawn_new_channel(&route.name, &entry);
        }

        let max_wait_ms = entry.pool_config.max_wait_ms;
        if max_wait_ms > 0 {
            let deadline = Instant::now() + Duration::from_millis(max_wait_ms);
            while Instant::now() < deadline {
                let any_signed_on = entry.channels.lock().iter().any(|c| c.channel.state() == fep_net::ChannelState::SignedOn);
                if any_signed_on {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }

    /// Return a SIGNED_ON Channel for `route` under a round-robin,
    /// skip-failed policy. Non-blocking: if no Channel is currently usable
    /// it grows the pool in the background (up to `maxSize`) and returns
    /// [`PoolError::PoolExhausted`] immediately (spec §4.5).
    pub fn acquire(&self, route: &Route) -> Result<Channel, PoolError> {
        let routes = self.routes.lock();
        let entry = routes
            .get(&route.name)
            .cloned()
            .ok_or_else(|| PoolError::UnknownRoute { route: route.name.clone() })?;
        drop(routes);

        let channels = entry.channels.lock();
        let len = channels.len();
        if len > 0 {
            let start = entry.cursor.fetch_add(1, Ordering::Relaxed) % len;
            for offset in 0..len {
                let candidate = &channels[(start + offset) % len];
                if candidate.channel.state() == fep_net::ChannelState::SignedOn {
                    return Ok(candidate.channel.clone());
                }
            }
        }
        let can_grow = len < entry.pool_config.max_size;
        drop(channels);

        if can_grow {
            self.spawn_new_channel(&route.name, &entry);
        }
        Err(PoolError::PoolExhausted { route: route.name.clone() })
    }

    fn spawn_new_channel(&self, route_name: &str, entry: &Arc<RouteEntry>) {
        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let channel = Channel::new(entry.profile.clone(), entry.schema.clone());
        entry.channels.lock().push(ManagedChannel { id, channel: channel.clone(), consecutive_sign_on_failures: 0 });

        let entry = entry.clone();
        let route_name = route_name.to_string();
        tokio::spawn(async move {
            connect_and_sign_on(route_name, id, channel, entry).await;
        });
    }

    pub fn route_len(&self, route: &Route) -> usize {
        self.routes.lock().get(&route.name).map(|e| e.channels.lock().len()).unwrap_or(0)
    }
}

impl Default for ChannelPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Connect and sign on a freshly spawned channel, retrying a failed
/// connect or sign-on with the channel's own backoff up to
/// `profile.retries` times before retiring it (spec §6 "channel profile").
async fn connect_and_sign_on(route_name: String, id: u64, channel: Channel, entry: Arc<RouteEntry>) {
    if let Err(e) = channel.connect().await {
        warn!(route = %route_name, error = %e, "initial connect failed");
    }

    loop {
        let engine = ProtocolEngine::new(channel.clone(), entry.heartbeat_interval, entry.response_timeout);
        let outcome = engine.sign_on().await;

        let mut channels = entry.channels.lock();
        let Some(managed) = channels.iter_mut().find(|c| c.id == id) else { return };
        match outcome {
            Ok(()) => {
                managed.consecutive_sign_on_failures = 0;
                info!(route = %route_name, "channel signed on");
                return;
            }
            Err(e) => {
                managed.consecutive_sign_on_failures += 1;
                let failures = managed.consecutive_sign_on_failures;
                warn!(route = %route_name, error = %e, failures, "sign-on failed");
                if failures >= entry.profile.retries {
                    warn!(route = %route_name, "retiring channel after repeated sign-on failure");
                    channels.retain(|c| c.id != id);
                    return;
                }
                drop(channels);
                channel.reconnect_with_backoff().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_on_unregistered_route_is_unknown_route() {
        let pool = Arc::new(ChannelPool::new());
        let err = pool.acquire(&Route::new("missing")).unwrap_err();
        assert!(matches!(err, PoolError::UnknownRoute { .. }));
    }

    #[tokio::test]
    async fn registering_a_route_with_no_live_peer_eventually_exhausts_and_grows_up_to_max_size() {
        let pool = Arc::new(ChannelPool::new());
        let route = Route::new("core-host");
        let mut profile = ChannelProfileConfig::default();
        profile.host = "127.0.0.1".to_string();
        profile.send_port = 1; // nothing listening; connect fails fast
        profile.receive_port = 1;
        profile.connect_timeout_ms = 50;

        let mut pool_config = PoolConfig::default();
        pool_config.min_size = 1;
        pool_config.max_size = 2;

        pool.register_route(route.clone(), profile, iso8583::standard::default_schema(), pool_config).await;

        // No peer is listening, so no channel ever reaches SIGNED_ON.
        let err = pool.acquire(&route).unwrap_err();
        assert!(matches!(err, PoolError::PoolExhausted { .. }));
    }
}
