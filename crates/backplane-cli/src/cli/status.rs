//! Status summary command.

use anyhow::Result;
use console::style;

use crate::state::AppState;

/// Show the data directory, storage backend, file config, and stored keys.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let config = &state.file_config;
    let keys = state.store.list().await?;

    if json {
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "storage": state.store.label(),
            "config": config,
            "stored_keys": keys
                .iter()
                .map(|(key, updated_at)| serde_json::json!({"key": key, "updated_at": updated_at}))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let or_unset = |value: &str| {
        if value.trim().is_empty() {
            style("(unset)".to_string()).yellow()
        } else {
            style(value.to_string()).cyan()
        }
    };

    println!();
    println!(
        "  {} Backplane client v{}",
        style("⚡").bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!();

    println!("  {}", style("── Config ──").dim());
    println!("  Server:    {}", or_unset(&config.server_base_url));
    println!("  Bus:       {}", or_unset(&config.bus_name));
    println!(
        "  Channel:   {}",
        if config.server_channel {
            "server-assigned"
        } else {
            "self-assigned"
        }
    );
    println!("  Cache max: {}", config.cache_max);
    println!(
        "  Intervals: min {}s, frequent {}s, regular {}s, slowdown {}s",
        config.intervals.min,
        config.intervals.frequent,
        config.intervals.regular,
        config.intervals.slowdown
    );
    println!();

    println!("  {}", style("── Stored state ──").dim());
    if keys.is_empty() {
        println!("  {}", style("(none)").dim());
    }
    for (key, updated_at) in &keys {
        println!("  {:<32} {}", key, style(updated_at).dim());
    }
    println!();

    println!("  {}", style("── System ──").dim());
    println!("  Data dir: {}", style(state.data_dir.display()).dim());
    println!("  Storage:  {}", style(state.store.label()).dim());
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use backplane_core::storage::StateStore;
    use tempfile::TempDir;

    #[tokio::test]
    async fn status_renders_for_both_formats() {
        let tmp = TempDir::new().unwrap();
        let state = AppState::open(tmp.path(), false).await.unwrap();
        state
            .store
            .set("backplane-channel", &serde_json::json!({}))
            .await
            .unwrap();

        status(&state, true).await.unwrap();
        status(&state, false).await.unwrap();
    }
}
