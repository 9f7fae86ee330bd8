// src/lib.rs

pub mod build_cause;
pub mod cli;
pub mod config;
pub mod digest;
pub mod errors;
pub mod fanin;
pub mod health;
pub mod history;
pub mod logging;
pub mod material;
pub mod memory;
pub mod poll;
pub mod ports;
pub mod producer;
pub mod secrets;
pub mod trigger;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{debug, info};

use crate::build_cause::BuildCause;
use crate::cli::CliArgs;
use crate::config::ConfigFile;
use crate::config::loader::load_and_validate;
use crate::history::load_history;
use crate::material::NoExternals;
use crate::memory::{InMemoryRevisionStore, InMemoryScheduleQueue, TracingHealthSink};
use crate::poll::{DependencyPoller, PollerRegistry};
use crate::ports::AllowAll;
use crate::producer::{
    BuildCauseProducer, Collaborators, ProduceOutcome, ScheduleOptions, Trigger,
};
use crate::secrets::MapSecretResolver;

/// High-level entry point used by `main.rs`.
///
/// - loads and validates the configuration
/// - with `--dry-run` (or no `--history`), prints pipelines and materials
/// - otherwise replays the recorded history into in-memory collaborators and
///   resolves one build cause without polling anything
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config))?;

    let Some(history_path) = args.history.as_deref().filter(|_| !args.dry_run) else {
        print_dry_run(&cfg);
        return Ok(());
    };

    let Some(pipeline) = args.pipeline.clone() else {
        bail!("--pipeline is required to resolve a build cause");
    };

    let store = Arc::new(InMemoryRevisionStore::new());
    load_history(history_path)
        .with_context(|| format!("loading history from {history_path}"))?
        .apply(&cfg, &store)?;

    let mut settings = cfg.producer_settings();
    // Offline: no poller can reach a source system.
    settings.final_modification_check = false;

    let cfg = Arc::new(cfg);
    let queue = Arc::new(InMemoryScheduleQueue::new());
    let ports = Collaborators {
        config: cfg.clone(),
        poller: Arc::new(
            PollerRegistry::new().with_dependency(Arc::new(DependencyPoller::new(store.clone()))),
        ),
        store: store.clone(),
        secrets: Arc::new(MapSecretResolver::new()),
        authorizer: Arc::new(AllowAll),
        queue,
        health: Arc::new(TracingHealthSink),
        externals: Arc::new(NoExternals),
    };
    let producer = BuildCauseProducer::new(ports, settings);

    let options = args
        .pins
        .iter()
        .fold(ScheduleOptions::new().without_material_update(), |opts, (key, rev)| {
            opts.with_revision(key.clone(), rev.clone())
        });
    let trigger = if args.automatic {
        Trigger::Automatic
    } else {
        Trigger::manual(args.actor.clone())
    };

    info!(pipeline = %pipeline, pins = options.specified_revisions.len(), "resolving build cause");
    let outcome = producer
        .produce_build_cause(&pipeline, &trigger, &options, Utc::now())
        .await?;

    match outcome {
        ProduceOutcome::Scheduled(cause) if args.json => {
            println!("{}", serde_json::to_string_pretty(&cause)?);
        }
        ProduceOutcome::Scheduled(cause) => print_build_cause(&pipeline, &cause),
        ProduceOutcome::NoModifications => println!("{pipeline}: no modifications"),
        ProduceOutcome::AlreadyPending => println!("{pipeline}: build cause already pending"),
    }
    Ok(())
}

fn print_build_cause(pipeline: &str, cause: &BuildCause) {
    println!("build cause for {pipeline}");
    println!("  trigger: {} (approver: {})", cause.kind, cause.approver);
    println!("  message: {}", cause.message);
    println!();
    println!("revisions ({}):", cause.revisions.len());
    for revision in &cause.revisions {
        let marker = if revision.changed { " *" } else { "" };
        println!(
            "  - {}: {}{marker}",
            revision.material,
            revision.latest_revision()
        );
        for modification in revision.modifications() {
            let author = modification.author.as_deref().unwrap_or("-");
            println!(
                "      {} {} {}",
                modification.revision,
                modification.modified_time.to_rfc3339(),
                author
            );
        }
    }
}

/// Simple dry-run output: print pipelines, materials and fingerprints.
fn print_dry_run(cfg: &ConfigFile) {
    println!("buildcause dry-run");
    println!(
        "  settings.fanin_backtrack_limit = {}",
        cfg.settings.fanin_backtrack_limit
    );
    println!("  settings.poll_timeout_secs = {}", cfg.settings.poll_timeout_secs);
    println!(
        "  settings.final_modification_check = {}",
        cfg.settings.final_modification_check
    );
    println!("  settings.expansion_depth = {}", cfg.settings.expansion_depth);
    println!();

    println!("pipelines ({}):", cfg.pipeline.len());
    for (name, pipeline) in &cfg.pipeline {
        println!("  - {name}");
        if let Some(ops) = &pipeline.operators {
            println!("      operators: {ops:?}");
        }
        for material in &pipeline.material {
            println!("      {material}  {}", material.fingerprint());
        }
    }

    debug!("dry-run complete (nothing resolved)");
}
