//! `backplane channel`: persisted channel identities.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use backplane_core::storage::StateStore;
use backplane_types::channel::{channel_endpoint, normalize_base_url};
use backplane_types::persisted::{decode_record, PersistedChannels, CHANNELS_KEY};

use super::ConnectArgs;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum ChannelCommand {
    /// List the channel stored for every bus.
    Show,

    /// Drop a bus's channel and resolve a new one.
    Reset(ConnectArgs),
}

pub async fn handle_channel_command(
    cmd: ChannelCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match cmd {
        ChannelCommand::Show => show_channels(state, json).await,
        ChannelCommand::Reset(connect) => reset_channel(state, &connect, json).await,
    }
}

/// Read the persisted mapping. Missing or unreadable state reads as `None`.
async fn stored_channels(state: &AppState) -> Result<Option<PersistedChannels>> {
    let Some(raw) = state.store.get(CHANNELS_KEY).await? else {
        return Ok(None);
    };
    match decode_record::<PersistedChannels>(raw) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            tracing::warn!(error = %e, "stored channel mapping is unreadable");
            Ok(None)
        }
    }
}

async fn show_channels(state: &AppState, json: bool) -> Result<()> {
    let record = stored_channels(state).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    let Some(record) = record.filter(|r| !r.channels.is_empty()) else {
        println!();
        println!("  No channels stored yet. Run `backplane listen` to create one.");
        println!();
        return Ok(());
    };

    let base_url = (!state.file_config.server_base_url.trim().is_empty())
        .then(|| normalize_base_url(&state.file_config.server_base_url));

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Bus").fg(Color::White),
        Cell::new("Channel").fg(Color::White),
        Cell::new("Endpoint").fg(Color::White),
    ]);

    for (bus, name) in &record.channels {
        let endpoint = base_url
            .as_deref()
            .map(|base| channel_endpoint(base, bus, name))
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(bus).fg(Color::Cyan),
            Cell::new(name),
            Cell::new(endpoint).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!(
        "  {}",
        style(format!(
            "Expires {}",
            record.expires_at.format("%Y-%m-%d %H:%M UTC")
        ))
        .dim()
    );
    println!();
    Ok(())
}

async fn reset_channel(state: &AppState, connect: &ConnectArgs, json: bool) -> Result<()> {
    let config = connect.apply(&state.file_config);
    let bus_name = config.bus_name.clone();
    let client = state.client();
    client.init(config).await.context("Invalid client configuration")?;

    let spinner = ProgressBar::new_spinner();
    if json {
        spinner.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }
    spinner.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
    spinner.set_message(format!("Resetting channel for '{bus_name}'..."));
    spinner.enable_steady_tick(Duration::from_millis(80));

    let previous = client.ready().await;
    client.reset_channel().await?;

    let shutdown = crate::shutdown_signal();
    let current = tokio::select! {
        id = client.ready() => id,
        _ = shutdown => None,
    };
    spinner.finish_and_clear();
    client.shutdown().await;

    let current = current.context("Interrupted before a new channel was assigned")?;

    if json {
        let result = serde_json::json!({
            "bus": bus_name,
            "previous": previous,
            "channel_id": current,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} New channel for '{}'",
        style("ok").green(),
        style(&bus_name).cyan()
    );
    if let Some(previous) = previous {
        println!("  Old: {}", style(previous).dim());
    }
    println!("  New: {}", style(current).cyan());
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use backplane_types::persisted::encode_record;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[tokio::test]
    async fn stored_channels_reads_mapping() {
        let tmp = TempDir::new().unwrap();
        let state = AppState::open(tmp.path(), true).await.unwrap();

        let mut channels = BTreeMap::new();
        channels.insert("example.com".to_string(), "abc".to_string());
        let expires = Utc.with_ymd_and_hms(2031, 1, 1, 0, 0, 0).unwrap();
        let record = PersistedChannels::new(channels, expires);
        state
            .store
            .set(CHANNELS_KEY, &encode_record(&record).unwrap())
            .await
            .unwrap();

        assert_eq!(stored_channels(&state).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn stored_channels_treats_garbage_as_empty() {
        let tmp = TempDir::new().unwrap();
        let state = AppState::open(tmp.path(), true).await.unwrap();
        state
            .store
            .set(CHANNELS_KEY, &serde_json::json!("garbage"))
            .await
            .unwrap();

        assert_eq!(stored_channels(&state).await.unwrap(), None);
    }

    #[tokio::test]
    async fn reset_self_assigned_channel_replaces_name() {
        let tmp = TempDir::new().unwrap();
        let state = AppState::open(tmp.path(), true).await.unwrap();
        let connect = ConnectArgs {
            server: Some("http://127.0.0.1:9".to_string()),
            bus: Some("example.com".to_string()),
            self_assigned: true,
            cache_max: None,
        };

        reset_channel(&state, &connect, true).await.unwrap();

        let record = stored_channels(&state).await.unwrap().unwrap();
        assert!(record.channels.contains_key("example.com"));
    }
}
