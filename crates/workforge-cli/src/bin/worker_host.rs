//! `worker-host` — runs a single Worker Runtime (C4) bound to one role
//! against an MQTT broker until interrupted.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;

use workforge_bus::{MqttBus, MqttConfig};
use workforge_cli::{env_non_empty, init_tracing, WorkerArgs};
use workforge_core::Role;
use workforge_worker::{LocalProvider, NoopRag, Provider, RemoteProvider, WorkerConfig, WorkerRuntime};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = WorkerArgs::parse();
    init_tracing(if args.verbose { "debug" } else { "info" });

    let role = Role::from_str(&args.role).with_context(|| format!("invalid role `{}`", args.role))?;

    let bus_config = MqttConfig {
        host: args.mqtt_host,
        port: args.mqtt_port,
        client_id: format!("workforge-worker-{}", args.id),
        ..MqttConfig::default()
    };
    let bus = Arc::new(MqttBus::new(bus_config));

    let provider = build_provider();
    let config = WorkerConfig::new(args.id, role);
    let runtime = Arc::new(WorkerRuntime::new(config, bus, provider, Arc::new(NoopRag)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut run_handle = {
        let runtime = runtime.clone();
        tokio::spawn(async move { runtime.run(shutdown_rx).await })
    };

    tokio::select! {
        result = &mut run_handle => {
            match result.context("worker task panicked") {
                Ok(Ok(())) => std::process::exit(0),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "worker runtime failed");
                    std::process::exit(2);
                }
                Err(e) => {
                    tracing::error!(error = %e, "worker task panicked");
                    std::process::exit(2);
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
            let _ = run_handle.await;
            std::process::exit(130);
        }
    }
}

/// Build the provider from environment configuration: a remote HTTP backend
/// when `WORKFORGE_PROVIDER_URL`/`WORKFORGE_PROVIDER_API_KEY` are set,
/// otherwise a local stand-in. The actual inference backend is out of scope
/// (§6: consumed, not implemented) — this just wires whichever is configured.
fn build_provider() -> Provider {
    match (
        env_non_empty("WORKFORGE_PROVIDER_URL"),
        env_non_empty("WORKFORGE_PROVIDER_API_KEY"),
    ) {
        (Some(url), Some(api_key)) => Provider::Remote(RemoteProvider::new(
            "configured-remote",
            url,
            api_key,
            Duration::from_secs(60),
        )),
        _ => Provider::Local(LocalProvider::new("unconfigured-local", |prompt, _params| {
            tracing::warn!("no remote provider configured, echoing prompt length as a placeholder result");
            Ok(format!("PASSED: no provider configured ({} byte prompt)", prompt.len()))
        })),
    }
}
