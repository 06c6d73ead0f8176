//! `tracing-subscriber` initialization: env-filter driven, defaulting to
//! `info` when `RUST_LOG` is unset.

pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}
