//! Credential Agent - Main Entry Point
//!
//! Logs in to Vault with the pod's service account, keeps the database
//! credential fresh and stops cleanly on SIGINT or SIGTERM.

use std::process::ExitCode;
use std::sync::Arc;

use auth_vault_client::HttpBroker;
use credential_agent::{Agent, AgentConfig};
use rust_common::{LogFormat, TracingConfig, init_tracing, wait_for_signal};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("credential-agent: {e}");
            return ExitCode::FAILURE;
        }
    };

    let tracing_config = TracingConfig::new("credential-agent")
        .with_filter(config.log_level.clone())
        .with_format(if config.log_json { LogFormat::Json } else { LogFormat::Text });
    if let Err(e) = init_tracing(&tracing_config) {
        eprintln!("credential-agent: {e}");
        return ExitCode::FAILURE;
    }

    info!(
        vault = %config.vault.addr,
        role = %config.vault.role,
        secret = %format!("{}/{}", config.vault.kv_mount, config.vault.secret_path),
        "Starting Credential Agent"
    );

    let broker = match HttpBroker::new(&config.vault) {
        Ok(broker) => Arc::new(broker),
        Err(e) => {
            error!(error = %e, "Failed to build Vault client");
            return ExitCode::FAILURE;
        }
    };

    match Agent::new(broker, config).run(wait_for_signal()).await {
        Ok(()) => {
            info!("Credential Agent stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "Credential Agent failed");
            ExitCode::FAILURE
        }
    }
}
