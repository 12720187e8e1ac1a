use std::sync::Arc;

use rmcp::{ServiceExt, transport::stdio};

use infill::app::App;
use infill::config::Config;
use infill::server::InfillServer;

/// Characters of stderr included in the exit log line.
const STDERR_LOG_TAIL: usize = 500;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    // Load .env from the binary's directory (MCP servers may start with any CWD).
    // Falls back to dotenvy's default CWD search if the binary path can't be resolved.
    let env_loaded = std::env::current_exe().ok().and_then(|exe| {
        let dir = exe.parent()?;
        [dir.join(".env"), dir.join("../../.env")]
            .into_iter()
            .find(|p| p.exists())
            .map(|p| dotenvy::from_path(&p).is_ok())
    });
    if env_loaded.is_none() {
        dotenvy::dotenv().ok();
    }

    tracing::info!("infill starting");

    let config = Config::load();
    let app = App::new(config)?;

    app.supervisor.on_terminate(|event| {
        let tail = infill::template::tail_chars(&event.stderr, STDERR_LOG_TAIL);
        if event.exit_code == 0 {
            tracing::info!("inference server exited cleanly");
        } else {
            tracing::warn!(exit_code = event.exit_code, stderr = %tail, "inference server exited");
        }
    });

    let app = Arc::new(app);
    let server = InfillServer::new(app.clone());

    let service = server
        .serve(stdio())
        .await
        .inspect_err(|e| tracing::error!("serving error: {e:?}"))?;

    service.waiting().await?;

    app.supervisor.terminate();
    tracing::info!("infill shutting down");
    Ok(())
}
