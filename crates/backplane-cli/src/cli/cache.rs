//! `backplane cache`: the persisted message cache.

use anyhow::Result;
use chrono::Utc;
use clap::Subcommand;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

use backplane_core::cache::MessageCache;
use backplane_core::storage::StateStore;
use backplane_types::persisted::{decode_expiry, CACHE_EXPIRES_KEY};

use crate::state::AppState;

#[derive(Subcommand)]
pub enum CacheCommand {
    /// List cached messages, oldest first.
    Show,

    /// Delete the persisted cache.
    Clear,
}

pub async fn handle_cache_command(cmd: CacheCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        CacheCommand::Show => show_cache(state, json).await,
        CacheCommand::Clear => clear_cache(state, json).await,
    }
}

async fn show_cache(state: &AppState, json: bool) -> Result<()> {
    // Read with no size limit; an expired cache is cleared here as it would
    // be on the next `listen`.
    let mut cache = MessageCache::new(usize::MAX);
    let messages = cache
        .load_if_valid(state.store.as_ref(), Utc::now())
        .await?
        .unwrap_or_default();
    let expires = match state.store.get(CACHE_EXPIRES_KEY).await? {
        Some(raw) => decode_expiry(&raw).ok(),
        None => None,
    };

    if json {
        let result = serde_json::json!({
            "expires_at": expires,
            "messages": messages,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if messages.is_empty() {
        println!();
        println!("  No cached messages.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Id").fg(Color::White),
        Cell::new("Type").fg(Color::White),
        Cell::new("Payload").fg(Color::White),
    ]);

    for message in &messages {
        table.add_row(vec![
            Cell::new(&message.id).fg(Color::DarkGrey),
            Cell::new(message.message_type().unwrap_or("-")).fg(Color::Cyan),
            Cell::new(serde_json::to_string(&message.message)?),
        ]);
    }

    println!();
    println!("{table}");
    if let Some(expires) = expires {
        println!(
            "  {}",
            style(format!("Expires {}", expires.format("%Y-%m-%d %H:%M UTC"))).dim()
        );
    }
    println!();
    Ok(())
}

async fn clear_cache(state: &AppState, json: bool) -> Result<()> {
    MessageCache::new(0).clear(state.store.as_ref()).await?;

    if json {
        println!("{}", serde_json::json!({ "cleared": true }));
    } else {
        println!();
        println!("  {} Message cache cleared", style("ok").green());
        println!();
    }
    Ok(())
}
