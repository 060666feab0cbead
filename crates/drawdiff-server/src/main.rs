//! Drawing comparison HTTP service.
//!
//! ```text
//! drawdiff-server --bind 127.0.0.1:5050 --max-concurrent 4
//! RUST_LOG=drawdiff_pipeline=debug,info drawdiff-server
//! ```

use std::net::SocketAddr;
use std::num::NonZeroUsize;

use anyhow::Context;
use clap::Parser;
use drawdiff_server::{AppState, DEFAULT_MAX_BODY_BYTES, router};
use tracing_subscriber::EnvFilter;

/// Detect and localize changes between two revisions of a drawing.
#[derive(Debug, Parser)]
#[command(name = "drawdiff-server", version, about)]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "DRAWDIFF_BIND", default_value = "0.0.0.0:5050")]
    bind: SocketAddr,

    /// Largest accepted request body, in bytes.
    #[arg(long, env = "DRAWDIFF_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    max_body_bytes: usize,

    /// Comparisons allowed to run at once [default: available parallelism].
    #[arg(long, env = "DRAWDIFF_MAX_CONCURRENT")]
    max_concurrent: Option<NonZeroUsize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let max_concurrent = cli
        .max_concurrent
        .or_else(|| std::thread::available_parallelism().ok())
        .map_or(1, NonZeroUsize::get);

    let app = router(AppState::new(max_concurrent), cli.max_body_bytes);
    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("failed to bind {}", cli.bind))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        max_concurrent,
        max_body_bytes = cli.max_body_bytes,
        imageproc = drawdiff_pipeline::IMAGEPROC_VERSION,
        "drawing comparison service listening"
    );

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
