mod api;
mod cli;
mod config;
mod error;
mod state_machine;
mod supervisor;
mod ui;

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use api::OasisClient;
use cli::{Cli, Command};
use config::OasisConfig;
use supervisor::{Supervisor, spawn_retention_sweeper};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let config = OasisConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let server_url = cli.server.clone().unwrap_or_else(|| config.server_url.clone());

    match cli.command {
        Command::Serve { listen } => {
            let listen_addr = listen.unwrap_or_else(|| config.listen_addr.clone());
            serve(&config, &listen_addr).await
        }
        Command::Submit { query, model, wait } => {
            let client = OasisClient::new(&server_url)?;
            let created = client.execute(&query, model.as_deref()).await?;
            println!("{}", created.workflow_id);
            if wait {
                wait_for_terminal(&client, &created.workflow_id).await?;
            }
            Ok(())
        }
        Command::Status { id, logs } => {
            let client = OasisClient::new(&server_url)?;
            let status = client.status(&id).await?;
            ui::print_status(&status, logs);
            Ok(())
        }
        Command::Cancel { id } => {
            let client = OasisClient::new(&server_url)?;
            let cancelled = client.cancel(&id).await?;
            println!("{} {}: {}", cancelled.workflow_id, cancelled.status, cancelled.message);
            Ok(())
        }
        Command::Active => {
            let client = OasisClient::new(&server_url)?;
            ui::print_active(&client.active().await?);
            Ok(())
        }
    }
}

async fn serve(config: &OasisConfig, listen_addr: &str) -> anyhow::Result<()> {
    let supervisor = Supervisor::from_config(config);
    let sweeper = spawn_retention_sweeper(
        supervisor.registry().clone(),
        config.limits.sweep_interval(),
        config.limits.retention(),
    );
    info!(
        listen_addr,
        program = %config.agent.program,
        default_model = %config.agent.default_model,
        "oasis supervisor ready"
    );

    let result = api::server::serve(listen_addr, supervisor.clone(), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
    })
    .await;

    supervisor.shutdown().await;
    sweeper.abort();
    result.with_context(|| format!("HTTP server on {listen_addr} failed"))
}

async fn wait_for_terminal(client: &OasisClient, id: &str) -> anyhow::Result<()> {
    let progress = ui::WorkflowProgress::start(id);
    loop {
        let status = client.status(id).await?;
        if status.status.is_terminal() {
            progress.finish(&status);
            return Ok(());
        }
        progress.update(&status);
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
