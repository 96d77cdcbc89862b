use anyhow::Context;
use clap::Parser;
use mock_generate_server::{MockBehavior, MockServer};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Serve a fake `/generate` endpoint for trying the load tester locally.
#[derive(Debug, Parser)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: String,

    /// Artificial latency added to every response, in milliseconds
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;
    let _g = rt.enter();
    rt.block_on(run_server(args))
}

async fn run_server(args: Args) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("Failed to bind {}", args.addr))?;
    let behavior = MockBehavior::default().with_latency(Duration::from_millis(args.latency_ms));
    let server = MockServer::serve(listener, behavior)?;
    tracing::info!(url = %server.generate_url(), "mock generate server listening");
    server.wait().await
}
