//! `info` command implementation.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use contracts::PipelineBlueprint;
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    source: SourceInfo,
    delivery: DeliveryInfo,
    checkpoint: CheckpointInfo,
    exception_strategy: String,
    sinks: Vec<SinkInfo>,
}

#[derive(Serialize)]
struct SourceInfo {
    path: String,
    batch_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    id_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    partition_key_field: Option<String>,
}

#[derive(Serialize)]
struct DeliveryInfo {
    max_attempts: u32,
    backoff_policy: String,
    delay_or_seed: f64,
    retryable_error_kinds: Vec<String>,
}

#[derive(Serialize)]
struct CheckpointInfo {
    max_attempts: u32,
    delay_ms: u64,
    dry: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    params: BTreeMap<String, String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn build_config_info(blueprint: &PipelineBlueprint, args: &InfoArgs) -> ConfigInfo {
    let sinks = blueprint
        .sinks
        .iter()
        .map(|s| SinkInfo {
            name: s.name.clone(),
            sink_type: format!("{:?}", s.sink_type),
            params: if args.params {
                s.params.clone().into_iter().collect()
            } else {
                BTreeMap::new()
            },
        })
        .collect();

    let delivery = &blueprint.delivery;
    let checkpoint = &blueprint.checkpoint;
    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        source: SourceInfo {
            path: blueprint.source.path.display().to_string(),
            batch_size: blueprint.source.batch_size,
            id_field: blueprint.source.id_field.clone(),
            partition_key_field: blueprint.source.partition_key_field.clone(),
        },
        delivery: DeliveryInfo {
            max_attempts: delivery.max_attempts,
            backoff_policy: format!("{:?}", delivery.backoff_policy),
            delay_or_seed: delivery.delay_or_seed,
            retryable_error_kinds: delivery
                .retryable_error_kinds
                .iter()
                .map(|kind| kind.to_string())
                .collect(),
        },
        checkpoint: CheckpointInfo {
            max_attempts: checkpoint.max_attempts,
            delay_ms: checkpoint.delay_ms,
            dry: checkpoint.dry,
            path: checkpoint.path.as_ref().map(|p| p.display().to_string()),
        },
        exception_strategy: format!("{:?}", blueprint.exception_strategy),
        sinks,
    }
}

fn print_config_info(blueprint: &PipelineBlueprint, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║               batchline Configuration                        ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let source = &blueprint.source;
    println!("📥 Source");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!("   ├─ Path: {}", source.path.display());
    println!("   ├─ Batch size: {}", source.batch_size);
    match &source.id_field {
        Some(field) => println!("   └─ Id field: {}", field),
        None => println!("   └─ Id field: (line-<n>)"),
    }

    let delivery = &blueprint.delivery;
    println!("\n🔁 Delivery");
    println!("   ├─ Max attempts: {}", delivery.max_attempts);
    println!(
        "   ├─ Backoff: {:?} ({})",
        delivery.backoff_policy, delivery.delay_or_seed
    );
    if delivery.retryable_error_kinds.is_empty() {
        println!("   └─ Retryable kinds: any");
    } else {
        let kinds: Vec<String> = delivery
            .retryable_error_kinds
            .iter()
            .map(|kind| kind.to_string())
            .collect();
        println!("   └─ Retryable kinds: {}", kinds.join(", "));
    }

    let checkpoint = &blueprint.checkpoint;
    println!("\n💾 Checkpoint");
    println!(
        "   ├─ Retry: {} attempts, {} ms apart",
        checkpoint.max_attempts, checkpoint.delay_ms
    );
    println!("   ├─ Dry: {}", checkpoint.dry);
    println!("   └─ On pipeline failure: {:?}", blueprint.exception_strategy);

    println!("\n📤 Sinks ({})", blueprint.sinks.len());
    for (i, sink) in blueprint.sinks.iter().enumerate() {
        let is_last = i == blueprint.sinks.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };
        println!("   {} {} ({:?})", prefix, sink.name, sink.sink_type);

        if args.params {
            let params: BTreeMap<_, _> = sink.params.iter().collect();
            for (key, value) in params {
                println!("   {}  · {} = {}", child_prefix, key, value);
            }
        }
    }

    println!();
}
