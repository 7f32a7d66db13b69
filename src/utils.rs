use tracing_subscriber::EnvFilter;

/// Installs a global `fmt` subscriber filtered by `RUST_LOG`.
///
/// Plan analysis is logged at `debug`, every node run at `debug` and cache
/// hits at `trace`, so `RUST_LOG=calcgraph=debug` shows what gets computed.
pub fn init_logging() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install subscriber: {err}"))
}
