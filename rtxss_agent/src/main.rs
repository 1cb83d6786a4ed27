//! Entry point for rtxss_agent. Parses args, probes the telemetry tool,
//! starts the sampler and serves HTTP/WebSocket.

use std::net::SocketAddr;
use std::time::Duration;

use rtxss_agent::api::router;
use rtxss_agent::config::{parse_args, Parsed, USAGE};
use rtxss_agent::invoker::CommandSpec;
use rtxss_agent::state::AppState;
use rtxss_agent::tls;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = match parse_args(std::env::args(), |k| std::env::var(k).ok()) {
        Ok(Parsed::Run(cfg)) => cfg,
        Ok(Parsed::Help) => {
            eprintln!("{USAGE}");
            return Ok(());
        }
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            std::process::exit(2);
        }
    };

    info!("rtxss_agent {} starting", env!("CARGO_PKG_VERSION"));
    let port = cfg.port;
    let enable_ssl = cfg.enable_ssl;
    let state = AppState::new(cfg);

    // Not fatal: the sampler keeps retrying and reports status until the tool shows up.
    match state
        .runner
        .run(CommandSpec::Version, state.config.command_timeout)
        .await
    {
        Ok(out) => info!("{}", out.stdout.lines().next().unwrap_or("nvidia-smi found").trim()),
        Err(e) => warn!("nvidia-smi probe failed ({e}); is the NVIDIA driver installed?"),
    }

    state.start();
    let app = router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let served = if enable_ssl {
        let (cert, key) = tls::ensure_self_signed_cert()?;
        let rustls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key).await?;
        let handle = axum_server::Handle::new();
        let shutdown = handle.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.graceful_shutdown(Some(Duration::from_secs(2)));
        });
        info!("listening on https://{addr} (ws at wss://{addr}/ws)");
        axum_server::bind_rustls(addr, rustls)
            .handle(handle)
            .serve(app.into_make_service())
            .await
    } else {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("listening on http://{} (ws at ws://{}/ws)", listener.local_addr()?, listener.local_addr()?);
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
    };

    if let Err(e) = served {
        error!("server error: {e}");
    }
    state.stop().await;
    info!("rtxss_agent stopped");
    Ok(())
}
