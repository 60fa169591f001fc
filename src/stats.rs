//! Index statistics (`kopi stats`).

use anyhow::Result;
use std::path::Path;

use kopi_rag_core::store::VectorIndex;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteIndex;

/// Print a summary of what's indexed.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::open_existing(config).await?;
    let index = SqliteIndex::new(pool);

    let count = index.count().await?;
    let info = index.read_info().await?;
    let db_path = config.index_db_path();
    let db_size = index_file_size(&db_path);

    println!("kopi-rag index stats");
    println!("====================");
    println!();
    println!("  Index:       {}", config.paths.vector_store.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", count);
    println!(
        "  Model:       {}",
        info.model.as_deref().unwrap_or("(unknown)")
    );
    println!(
        "  Dims:        {}",
        info.dims
            .map(|d| d.to_string())
            .unwrap_or_else(|| "(unknown)".to_string())
    );
    println!(
        "  Ingested:    {}",
        info.ingested_at
            .as_deref()
            .map(format_ingested_at)
            .unwrap_or_else(|| "never".to_string())
    );
    if let Some(fp) = &info.fingerprint {
        println!("  Fingerprint: {}", fp);
    }
    println!();

    index.pool().close().await;
    Ok(())
}

/// Size of the database file plus its WAL/SHM siblings.
fn index_file_size(db_path: &Path) -> u64 {
    ["", "-wal", "-shm"]
        .iter()
        .filter_map(|suffix| {
            let mut p = db_path.as_os_str().to_owned();
            p.push(suffix);
            std::fs::metadata(p).ok()
        })
        .map(|m| m.len())
        .sum()
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// RFC 3339 timestamp to `YYYY-MM-DD HH:MM UTC`; unparseable input is
/// shown as-is.
fn format_ingested_at(ts: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(ts)
        .map(|dt| {
            dt.with_timezone(&chrono::Utc)
                .format("%Y-%m-%d %H:%M UTC")
                .to_string()
        })
        .unwrap_or_else(|_| ts.to_string())
}
