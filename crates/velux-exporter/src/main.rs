mod cli;
mod error;
mod server;

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use velux_core::{ExporterContext, MetricsState};

use crate::cli::Cli;
use crate::error::ExporterError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_json);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, json: bool) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<(), ExporterError> {
    let mut config = velux_config::load_config(cli.config.as_deref())?;
    cli.apply(&mut config);

    let identity = velux_config::resolve_identity(&config)?;
    let exporter = velux_config::to_exporter_config(&config, identity)?;

    let metrics = Arc::new(MetricsState::new(exporter.metric_prefix.as_str()));
    let mut ctx = ExporterContext::from_config(&exporter, Arc::clone(&metrics))?;

    if cli.once {
        let report = ctx.run_cycle().await?;
        tracing::debug!(?report, "single cycle complete");
        print!("{}", metrics.render());
        return Ok(());
    }

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let listener = TcpListener::bind(config.listen)
        .await
        .map_err(|source| ExporterError::Bind {
            addr: config.listen,
            source,
        })?;
    info!(addr = %config.listen, "serving metrics");
    let server = tokio::spawn(server::serve(listener, Arc::clone(&metrics), cancel.clone()));

    let result = ctx.run(cancel.clone()).await;
    cancel.cancel();

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "metrics server failed"),
        Err(e) => warn!(error = %e, "metrics server task panicked"),
    }

    result.map_err(ExporterError::from)
}

/// Cancel `cancel` on SIGINT or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
        () = cancel.cancelled() => return,
    }

    info!("shutdown requested");
    cancel.cancel();
}
