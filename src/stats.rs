//! Index statistics.
//!
//! Prints a quick summary of what is stored: backend, collection, and record
//! counts overall and for one video. Used by `reel stats`.

use anyhow::Result;

use crate::config::Config;
use crate::store::create_index;

/// Run the stats command: count stored records and print a summary.
pub async fn run_stats(config: &Config, video_id: Option<&str>) -> Result<()> {
    let index = create_index(config).await?;
    let total = index.count(None).await?;

    println!("Reelsearch — Index Stats");
    println!("========================");
    println!();
    println!("  Backend:     {}", config.storage.backend);
    println!("  Collection:  {}", config.storage.collection);
    if config.storage.backend == "sqlite" {
        let db_size = std::fs::metadata(&config.storage.path)
            .map(|m| m.len())
            .unwrap_or(0);
        println!("  Database:    {}", config.storage.path.display());
        println!("  Size:        {}", format_bytes(db_size));
    }
    println!();
    println!("  Records:     {}", total);
    if let Some(video_id) = video_id {
        let count = index.count(Some(video_id)).await?;
        println!("  Video {}: {}", video_id, count);
    }
    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
