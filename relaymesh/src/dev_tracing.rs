//! Development helpers (tests/tools).

/// Initialize a tracing subscriber when `RUST_LOG` is set.
///
/// Tests and tools can call `relaymesh::dev_tracing::init_tracing()` to get
/// structured logs for debugging. This is a no-op when `RUST_LOG` is unset
/// or a global subscriber is already installed.
pub fn init_tracing() {
    use std::env;

    if env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}
