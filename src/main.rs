use anyhow::{bail, Context};
use std::path::PathBuf;

use gtfs_etl::{run_pipeline, FeedSource, MemoryDb};

/// Thin wrapper around [gtfs_etl::run_pipeline]: dry-runs a feed against the
/// in-memory store and prints the per-table summary. Real deployments hand
/// the pipeline their own `Database` implementation.
fn main() -> anyhow::Result<()> {
    env_logger::init();

    let Some(arg) = std::env::args().nth(1) else {
        bail!("usage: etl <feed url or path>");
    };
    let source = if arg.starts_with("http") {
        FeedSource::Url(arg)
    } else {
        FeedSource::Path(PathBuf::from(arg))
    };

    let mut db = MemoryDb::new();
    let stats = run_pipeline(&source, &mut db).context("pipeline run failed")?;
    print!("{stats}");
    Ok(())
}
