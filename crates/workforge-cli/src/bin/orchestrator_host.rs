//! `orchestrator-host` — runs the Orchestrator Runtime (C6) against an MQTT
//! broker until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;

use workforge_bus::{MqttBus, MqttConfig};
use workforge_cli::{init_tracing, Orchestrator, OrchestratorArgs, OrchestratorConfig};
use workforge_core::EngineConfig;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = OrchestratorArgs::parse();
    init_tracing(if args.verbose { "debug" } else { "info" });

    let bus_config = MqttConfig {
        host: args.mqtt_host,
        port: args.mqtt_port,
        client_id: format!("workforge-orchestrator-{}", uuid::Uuid::now_v7()),
        ..MqttConfig::default()
    };
    let bus = Arc::new(MqttBus::new(bus_config));

    let engine_config = EngineConfig {
        max_transitions: args.max_transitions,
        stage_timeout: Duration::from_secs(args.stage_timeout),
        ..EngineConfig::default()
    };
    let orchestrator_config = OrchestratorConfig {
        engine: engine_config,
        ..OrchestratorConfig::default()
    };
    let orchestrator = Arc::new(Orchestrator::new(orchestrator_config, bus));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut run_handle = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run(shutdown_rx).await })
    };

    tokio::select! {
        result = &mut run_handle => {
            match result.context("orchestrator task panicked") {
                Ok(Ok(())) => std::process::exit(0),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "orchestrator runtime failed");
                    std::process::exit(2);
                }
                Err(e) => {
                    tracing::error!(error = %e, "orchestrator task panicked");
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
