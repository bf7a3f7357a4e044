//! GC command - migrate and expire manifests in a store snapshot

use crate::cli::args::GcArgs;
use crate::config::Config;
use crate::error::{IndexerError, IndexerResult};
use crate::lock::MemoryLocker;
use crate::manifest::{ManifestManager, MemoryManifestStore};
use crate::ui::{self, UiContext};
use std::sync::Arc;
use tracing::{debug, info};

/// Execute the gc command
pub async fn execute(args: GcArgs, config: &Config) -> IndexerResult<()> {
    let ctx = UiContext::detect();
    let store = Arc::new(MemoryManifestStore::load(&args.store).await?);
    let manager = Arc::new(build_manager(config, Arc::clone(&store)));
    debug!(
        store = %args.store.display(),
        interval = ?manager.gc_interval(),
        "manifest manager configured"
    );

    // The snapshot is written back even when a pass failed part way.
    let outcome = run(&ctx, &args, config, &manager).await;
    manager.stop();
    let saved = store.save(&args.store);
    outcome?;
    saved?;

    ui::key_value(&ctx, "store", &args.store.display().to_string());
    ui::key_value(&ctx, "manifests", &store.metadata_len().to_string());
    Ok(())
}

/// Manager wired from the `[gc]` and `[manifest]` config sections
pub fn build_manager(config: &Config, store: Arc<MemoryManifestStore>) -> ManifestManager {
    ManifestManager::new(store.clone(), Arc::new(MemoryLocker::new()))
        .with_content_store(store)
        .with_gc_interval(config.gc.interval())
        .with_gc_options(config.gc.options())
        .with_expiry_window(config.manifest.expiry_window())
}

async fn run(
    ctx: &UiContext,
    args: &GcArgs,
    config: &Config,
    manager: &Arc<ManifestManager>,
) -> IndexerResult<()> {
    if config.gc.migrate_on_start {
        let migrated = manager.migrate_manifests().await?;
        ui::step_ok(ctx, &format!("Migrated {} manifest(s)", migrated.len()));
    }

    if args.once {
        let deleted = manager.run_gc().await?;
        ui::step_ok(ctx, &format!("Deleted {} expired manifest(s)", deleted.len()));
        return Ok(());
    }

    if !config.gc.enabled {
        ui::step_warn_hint(
            ctx,
            "Manifest GC is disabled",
            "Run: scanner-indexer config set gc.enabled true",
        );
        return Ok(());
    }

    let gc = tokio::spawn({
        let manager = Arc::clone(manager);
        async move { manager.start_gc().await }
    });
    ui::step_ok_detail(ctx, "Manifest GC running", "press Ctrl-C to stop");

    let signal = tokio::signal::ctrl_c()
        .await
        .map_err(|e| IndexerError::io("waiting for Ctrl-C", e));
    info!("stopping manifest GC");
    manager.stop();
    gc.await.map_err(|e| IndexerError::Task(e.to_string()))??;
    signal
}
