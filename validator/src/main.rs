mod backend;
mod block;
mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use tokio::signal;

use ibft_core::{Backend, Config, Core, Proposal, Request, TimeoutConfig, ValidatorId};

use crate::backend::LoopbackBackend;
use crate::block::Block;
use crate::config::ClusterConfig;

/// In-process IBFT validator cluster
#[derive(Parser)]
#[command(name = "ibft-validator", version, about = "Runs an in-process IBFT validator cluster")]
struct Args {
    /// Path to a JSON cluster config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of validators (overrides the config file)
    #[arg(long)]
    validators: Option<usize>,

    /// Stop after every chain reaches this height (overrides the config file)
    #[arg(long)]
    blocks: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut cluster = match &args.config {
        Some(path) => ClusterConfig::from_file(path).unwrap_or_else(|e| {
            tracing::warn!("could not load cluster config: {e}, using defaults");
            ClusterConfig::default()
        }),
        None => ClusterConfig::default(),
    };
    if let Some(validators) = args.validators {
        cluster.validators = validators;
    }
    if let Some(blocks) = args.blocks {
        cluster.target_height = blocks;
    }
    cluster.validate().unwrap_or_else(|e| {
        tracing::error!("cluster config validation failed: {e}");
        std::process::exit(1);
    });

    tracing::info!(
        validators = cluster.validators,
        fault_tolerance = cluster.fault_tolerance(),
        target_height = cluster.target_height,
        policy = ?cluster.proposer_policy,
        "starting IBFT cluster"
    );

    // Generate validator identities, sorted the way the set orders them so
    // log output lines up with proposer rotation.
    let mut keys: Vec<SigningKey> = (0..cluster.validators)
        .map(|_| SigningKey::generate(&mut OsRng))
        .collect();
    keys.sort_by(|a, b| {
        a.verifying_key()
            .as_bytes()
            .cmp(b.verifying_key().as_bytes())
    });
    let all: Vec<ValidatorId> = keys.iter().map(|k| ValidatorId(k.verifying_key())).collect();

    let engine_config = Config {
        timeouts: TimeoutConfig {
            base: Duration::from_millis(cluster.round_timeout_ms),
            backoff: Duration::from_millis(cluster.round_backoff_ms),
            max_backoff_exponent: 8,
        },
        backlog_capacity: 128,
    };

    // Build one backend and engine per validator, then wire every backend's
    // broadcast to every engine's event channel.
    let backends: Vec<Arc<LoopbackBackend>> = keys
        .iter()
        .map(|key| {
            Arc::new(LoopbackBackend::new(
                key.clone(),
                all.clone(),
                cluster.proposer_policy,
            ))
        })
        .collect();

    let mut senders = Vec::new();
    let mut cores = Vec::new();
    for backend in &backends {
        let (core, sender) = Core::new(backend.clone(), engine_config.clone());
        backend.set_own(sender.clone());
        senders.push(sender);
        cores.push(core);
    }
    for backend in &backends {
        backend.set_peers(senders.clone());
    }
    for core in cores {
        tokio::spawn(core.run());
    }

    // Block builders: each validator keeps offering the next block on top of
    // its local head; the engine only proposes when it holds the slot.
    for (backend, sender) in backends.iter().zip(&senders) {
        let backend = backend.clone();
        let sender = sender.clone();
        tokio::spawn(async move {
            let proposer = backend.address();
            loop {
                let head = backend.head();
                let payload = format!("block {} payload", head.number + 1).into_bytes();
                let offered = Block::build(&head, proposer.clone(), payload);
                if !sender.request(Request { proposal: offered }) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        });
    }

    // Run until every chain reaches the target height or we are interrupted.
    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                let lowest = backends.iter().map(|b| b.height()).min().unwrap_or(0);
                if lowest >= cluster.target_height {
                    tracing::info!(height = lowest, "target height reached on every validator");
                    break;
                }
            }
            _ = signal::ctrl_c() => {
                tracing::info!("received shutdown signal");
                break;
            }
        }
    }

    for sender in &senders {
        sender.stop();
    }

    for (validator, backend) in all.iter().zip(&backends) {
        let head = backend.head();
        tracing::info!(
            validator = %validator,
            height = head.number,
            head = %head.hash(),
            "final chain state"
        );
    }
    tracing::info!("IBFT cluster shut down");
    Ok(())
}
