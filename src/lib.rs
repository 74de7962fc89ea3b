pub mod config;
pub mod heuristic;
pub mod predictor;
pub mod preprocess;
pub mod server;
pub mod torch;

/// Process-level helpers
pub mod util {
    use tracing_subscriber::EnvFilter;

    /// Log filter used when `RUST_LOG` is not set
    pub const RUST_LOG: &str = "info,actix_web=info";

    /// Install the global tracing subscriber. `log` records emitted by actix
    /// are bridged into it.
    pub fn init_tracing() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(RUST_LOG));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
