//! Fetch command - realize an image's layers from an OCI layout

use crate::cli::args::{FetchArgs, OutputFormat};
use crate::config::Config;
use crate::error::IndexerResult;
use crate::fetch::FetchArena;
use crate::registry::{ImageReference, Manifest, OciLayoutRegistry, Platform, ResolveOptions};
use crate::ui::{self, UiContext};
use console::style;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Serialize)]
struct FetchedLayer {
    digest: String,
    path: PathBuf,
    size: u64,
}

#[derive(Debug, Serialize)]
struct FetchReport {
    reference: String,
    manifest: String,
    layers: Vec<FetchedLayer>,
}

/// Execute the fetch command
pub async fn execute(args: FetchArgs, config: &Config) -> IndexerResult<()> {
    let reference = ImageReference::parse(&args.reference)?;
    let opts = ResolveOptions {
        platform: Platform::parse(&args.platform)?,
        ..Default::default()
    };
    let root = args.arena.clone().unwrap_or_else(|| config.arena.root());
    debug!(root = %root.display(), layout = %args.layout.display(), "opening arena");

    let registry = Arc::new(OciLayoutRegistry::new(&args.layout));
    let arena = FetchArena::new(root, registry).await?;

    // The arena is cleaned up whether or not fetching succeeded.
    let fetched = fetch_layers(&arena, &reference, &opts).await;
    let closed = arena.close().await;
    let (manifest, layers) = fetched?;
    closed?;

    let report = FetchReport {
        reference: reference.to_string(),
        manifest: manifest.digest.to_string(),
        layers,
    };
    match args.format {
        OutputFormat::Table => print_table(&report),
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Plain => print_plain(&report),
    }
    Ok(())
}

async fn fetch_layers(
    arena: &FetchArena,
    reference: &ImageReference,
    opts: &ResolveOptions,
) -> IndexerResult<(Manifest, Vec<FetchedLayer>)> {
    let manifest = arena.get(reference, opts).await?;
    let mut realizer = arena.realizer();

    let described = match realizer.realize(&manifest.layers).await {
        Ok(realized) => {
            let mut layers = Vec::with_capacity(realized.len());
            for layer in realized {
                let size = tokio::fs::metadata(&layer.path)
                    .await
                    .map(|m| m.len())
                    .unwrap_or(0);
                layers.push(FetchedLayer {
                    digest: layer.digest.to_string(),
                    path: layer.path,
                    size,
                });
            }
            Ok(layers)
        }
        Err(e) => Err(e),
    };

    let closed = realizer.close();
    let layers = described?;
    closed?;
    Ok((manifest, layers))
}

fn print_table(report: &FetchReport) {
    let ctx = UiContext::detect();
    ui::intro(&ctx, &format!("Fetched {}", report.reference));
    ui::key_value(&ctx, "manifest", &report.manifest);
    println!();

    println!(
        "{:<20} {:>12}  {}",
        style("DIGEST").bold(),
        style("SIZE").bold(),
        style("PATH").bold()
    );
    println!("{}", "-".repeat(72));
    for layer in &report.layers {
        let short = layer.digest.split(':').nth(1).unwrap_or(&layer.digest);
        println!(
            "{:<20} {:>12}  {}",
            &short[..short.len().min(12)],
            format_size(layer.size),
            layer.path.display()
        );
    }

    println!();
    println!("{} layer(s)", report.layers.len());
}

fn print_json(report: &FetchReport) -> IndexerResult<()> {
    let json = serde_json::to_string_pretty(report)?;
    println!("{}", json);
    Ok(())
}

fn print_plain(report: &FetchReport) {
    for layer in &report.layers {
        println!("{}", layer.path.display());
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
