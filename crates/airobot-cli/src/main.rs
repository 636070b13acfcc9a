//! CLI entry point for airobot.
//!
//! This binary provides the `airobot` command: `run` builds a kernel from
//! the configuration, starts the demo agents on their own threads and drives
//! the dispatch loop on a fixed tick; `config` prints the effective
//! configuration.

mod agents;
mod helpers;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use airobot_kernel::{Agent, Kernel, KernelConfig, Message};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::agents::{EchoHandler, TallyHandler};
use crate::helpers::{demo_messages, init_tracing, post_all, spawn_event_logger};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// airobot -- an in-process message kernel for cooperating agents.
#[derive(Parser)]
#[command(
    name = "airobot",
    version,
    about = "airobot -- in-process priority message kernel",
    long_about = "Registers a set of agents with a message kernel, posts a demo workload \
                  and dispatches it in priority order, one message per tick."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the demo agents against a freshly built kernel.
    Run {
        /// Path to the TOML configuration file.
        #[arg(long, default_value = "config/default.toml")]
        config: PathBuf,

        /// Maximum number of dispatch ticks before shutting down.
        #[arg(long, default_value_t = 1_000)]
        ticks: u64,

        /// Milliseconds between ticks.
        #[arg(long, default_value_t = 10)]
        tick_ms: u64,

        /// Number of demo messages to post.
        #[arg(long, default_value_t = 12)]
        messages: usize,
    },

    /// Print the effective configuration.
    Config {
        /// Path to the TOML configuration file.
        #[arg(long, default_value = "config/default.toml")]
        config: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            ticks,
            tick_ms,
            messages,
        } => cmd_run(config, ticks, tick_ms, messages).await,
        Commands::Config { config } => cmd_config(config),
    }
}

// ---------------------------------------------------------------------------
// Subcommand: run
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: PathBuf, ticks: u64, tick_ms: u64, messages: usize) -> Result<()> {
    // 1. Initialize tracing subscriber.
    init_tracing("info");

    // 2. Load config and build the kernel.
    let config = KernelConfig::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    info!(?config, "configuration loaded");
    let kernel = Arc::new(Kernel::with_config(config));
    let logger = spawn_event_logger(&kernel);

    // 3. Register agents and start one consumer thread each.
    let echo = Arc::new(Agent::new("echo", EchoHandler));
    let (tally_handler, tally) = TallyHandler::new();
    let tally_agent = Arc::new(Agent::new("tally", tally_handler));

    let echo_id = kernel.register_agent(&echo).context("failed to register echo")?;
    let tally_id = kernel
        .register_agent(&tally_agent)
        .context("failed to register tally")?;

    let consumers = [&echo, &tally_agent]
        .into_iter()
        .map(|agent| {
            let agent = Arc::clone(agent);
            thread::Builder::new()
                .name(format!("agent-{}", agent.name()))
                .spawn(move || agent.run())
                .context("failed to spawn agent thread")
        })
        .collect::<Result<Vec<_>>>()?;

    // 4. Post the demo workload, plus one message nobody can receive.
    let accepted = post_all(&kernel, demo_messages(messages, echo_id, &[tally_id, echo_id]));
    let orphan = Message::new(echo_id, tally_id.saturating_add(100), "orphan", 0);
    kernel.post(orphan).context("failed to post orphan message")?;
    info!(accepted, pending = kernel.pending(), "workload posted");

    // 5. Drive the dispatch loop, one message per tick.
    let mut interval = tokio::time::interval(Duration::from_millis(tick_ms.max(1)));
    let mut elapsed = 0;
    while elapsed < ticks {
        interval.tick().await;
        elapsed += 1;
        if !kernel.run_once() {
            info!(ticks = elapsed, "queue idle");
            break;
        }
    }

    // 6. Shut down: refuse new work, flush what is left, stop consumers.
    kernel.shutdown();
    let flushed = kernel.run_until_idle();
    if flushed > 0 {
        warn!(flushed, "tick budget exhausted, flushed remaining messages");
    }
    kernel.close_agents();

    let mut handled = 0;
    for consumer in consumers {
        handled += tokio::task::spawn_blocking(move || consumer.join())
            .await
            .context("failed to join agent thread")?
            .map_err(|_| anyhow!("agent thread panicked"))?;
    }
    logger.abort();

    // 7. Summary.
    let stats = kernel.stats();
    println!();
    println!("  airobot v{}", env!("CARGO_PKG_VERSION"));
    println!("  ==========");
    println!("  Posted:     {}", stats.posted);
    println!("  Delivered:  {}", stats.delivered);
    println!("  Dropped:    {}", stats.dropped);
    println!("  Handled:    {handled}");
    println!();
    println!("  Tally by method:");
    for (method, count) in agents::snapshot(&tally) {
        println!("    {method:<12} {count}");
    }
    println!();

    info!("shutdown complete");
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: config
// ---------------------------------------------------------------------------

fn cmd_config(config_path: PathBuf) -> Result<()> {
    init_tracing("warn");

    let config = KernelConfig::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let rendered = config
        .to_toml_string()
        .context("failed to render configuration")?;

    println!("# effective configuration ({})", config_path.display());
    print!("{rendered}");
    Ok(())
}
