//! Build and publish the per-category icon bundles.
//!
//! Takes no arguments.  Reads `icon-bundles.toml` from the working directory if present, builds an archive for every
//! category with an icon directory, then hashes the archives, writes the manifest and removes stale archives.
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use icon_bundle_cache::{build_bundles, publish, BundleSettings, SETTINGS_FILE};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "icon_bundle_cache=info,icon_bundles=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = BundleSettings::load(Path::new(SETTINGS_FILE))
        .with_context(|| format!("Failed to load {}", SETTINGS_FILE))?;

    let built = build_bundles(&settings.build_config()).context("Failed to build bundles")?;
    info!(
        "Built {} archives ({} categories had no icons)",
        built.built.len(),
        built.skipped.len()
    );

    let published = publish(&settings.publish_config()).context("Failed to publish bundles")?;
    info!(
        "Published {} categories: {} hashed, {} unchanged, {} missing, {} stale removed",
        published.manifest.len(),
        published.renamed.len(),
        published.kept.len(),
        published.missing.len(),
        published.removed.len()
    );

    Ok(())
}
