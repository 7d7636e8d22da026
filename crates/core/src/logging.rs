//! Logging bootstrap.

use tracing_subscriber::EnvFilter;

/// Install a formatted `tracing` subscriber.
///
/// `RUST_LOG` overrides `default_directive` (e.g. `"info"` or
/// `"biotrade_aggregate=debug"`). Calling this more than once is harmless; only
/// the first subscriber is kept.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice() {
        init("warn");
        init("debug");
        tracing::warn!("logging initialized");
    }
}
