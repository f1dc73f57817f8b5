//! Errors raised by the pool (spec §4.5).

#[derive(Debug)]
pub enum PoolError {
    /// No Channel in the route is usable and `maxSize` has been reached.
    PoolExhausted { route: String },
    UnknownRoute { route: String },
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolError::PoolExhausted { route } => write!(f, "channel pool exhausted for route {route}"),
            PoolError::UnknownRoute { route } => write!(f, "no pool configured for route {route}"),
        }
    }
}

impl std::error::Error for PoolError {}
