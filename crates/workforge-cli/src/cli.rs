//! Clap argument definitions for the two host binaries (§10.4). Each host is
//! a standalone process, so each gets its own top-level `Parser` rather than
//! sharing one `Commands` enum the way this codebase's single CLI binary does.

use clap::Parser;

/// Runs the Orchestrator Runtime (C6) against an MQTT broker.
#[derive(Debug, Parser)]
#[command(name = "orchestrator-host", version, about)]
pub struct OrchestratorArgs {
    #[arg(long, default_value = "localhost")]
    pub mqtt_host: String,

    #[arg(long, default_value_t = 1883)]
    pub mqtt_port: u16,

    #[arg(long, default_value_t = 15)]
    pub max_transitions: u32,

    /// Per-stage result-wait liveness timeout, in seconds.
    #[arg(long, default_value_t = 900)]
    pub stage_timeout: u64,

    #[arg(short, long)]
    pub verbose: bool,
}

/// Runs a single Worker Runtime (C4) bound to one role.
#[derive(Debug, Parser)]
#[command(name = "worker-host", version, about)]
pub struct WorkerArgs {
    #[arg(long)]
    pub id: String,

    /// One of `developer`, `reviewer`, `approver`, `tester`.
    #[arg(long)]
    pub role: String,

    #[arg(long, default_value = "localhost")]
    pub mqtt_host: String,

    #[arg(long, default_value_t = 1883)]
    pub mqtt_port: u16,

    #[arg(short, long)]
    pub verbose: bool,
}
