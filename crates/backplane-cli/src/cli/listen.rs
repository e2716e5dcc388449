//! `backplane listen`: run a session and print delivered messages.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;

use backplane_core::session::DEFAULT_EXPECT_SECS;
use backplane_types::message::ChannelMessage;

use super::ConnectArgs;
use crate::state::{AppState, ConcreteClient};

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Message types to expect; polling speeds up until one of them arrives.
    #[arg(long, value_delimiter = ',')]
    pub expect: Vec<String>,

    /// Poll fast for this many seconds (60 when only --expect is given).
    #[arg(long)]
    pub within: Option<u64>,

    /// Deliver the messages already on the channel instead of skipping them.
    #[arg(long)]
    pub backlog: bool,

    /// Exit after this many messages.
    #[arg(long)]
    pub count: Option<usize>,
}

/// What to pass to `expect_messages_within`, if anything.
fn expectation_window(args: &ListenArgs) -> Option<(u64, Option<Vec<String>>)> {
    if !args.expect.is_empty() {
        let seconds = args.within.unwrap_or(DEFAULT_EXPECT_SECS);
        return Some((seconds, Some(args.expect.clone())));
    }
    args.within.map(|seconds| (seconds, None))
}

/// Run a session until Ctrl+C or `--count` messages.
pub async fn listen(
    state: &AppState,
    args: ListenArgs,
    json: bool,
    quiet: bool,
    show_events: bool,
) -> Result<()> {
    let config = args.connect.apply(&state.file_config);
    let bus_name = config.bus_name.clone();
    let client = state.client();

    if args.backlog {
        client
            .init_with_frame_filter(config, |batch| batch)
            .await
            .context("Invalid client configuration")?;
    } else {
        client.init(config).await.context("Invalid client configuration")?;
    }

    if show_events && !json {
        spawn_event_printer(&client);
    }

    let shutdown = crate::shutdown_signal();
    tokio::pin!(shutdown);

    let spinner = ProgressBar::new_spinner();
    if json || quiet {
        spinner.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }
    spinner.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
    spinner.set_message(format!("Resolving channel for '{bus_name}'..."));
    spinner.enable_steady_tick(Duration::from_millis(80));

    let channel_id = tokio::select! {
        id = client.ready() => id,
        _ = &mut shutdown => None,
    };
    spinner.finish_and_clear();

    let Some(channel_id) = channel_id else {
        client.shutdown().await;
        return Ok(());
    };

    let (subscription, mut messages) = client.subscribe_channel().await?;
    let subscribers = client.subscriber_count().await;
    tracing::debug!(%subscription, subscribers, "listening");
    if let Some((seconds, types)) = expectation_window(&args) {
        client.expect_messages_within(seconds, types).await?;
    }

    if !json && !quiet {
        println!();
        println!(
            "  {} Listening on {}",
            style("⚡").bold(),
            style(&channel_id).cyan()
        );
        println!("  {}", style("Press Ctrl+C to stop").dim());
        println!();
    }

    let mut delivered = 0usize;
    loop {
        tokio::select! {
            message = messages.recv() => {
                let Some(message) = message else { break };
                print_message(&message, json)?;
                delivered += 1;
                if args.count.is_some_and(|count| delivered >= count) {
                    break;
                }
            }
            _ = &mut shutdown => break,
        }
    }

    client.unsubscribe(subscription).await?;
    client.shutdown().await;
    tracing::debug!(delivered, "listener stopped");

    if !json && !quiet {
        println!();
        println!("  Stopped after {delivered} message(s).");
    }
    Ok(())
}

fn print_message(message: &ChannelMessage, json: bool) -> Result<()> {
    if json {
        // One object per line so the output can be piped.
        println!("{}", serde_json::to_string(message)?);
        return Ok(());
    }

    let kind = message.message_type().unwrap_or("(untyped)");
    println!(
        "  {} {}  {}",
        style(chrono::Local::now().format("%H:%M:%S")).dim(),
        style(kind).cyan().bold(),
        style(&message.id).dim()
    );
    println!("    {}", serde_json::to_string(&message.message)?);
    Ok(())
}

fn spawn_event_printer(client: &ConcreteClient) {
    let mut events = client.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => eprintln!("  {}", style(line).dim()),
                    Err(e) => tracing::warn!(error = %e, "failed to render client event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    eprintln!("  {}", style(format!("({skipped} events skipped)")).dim());
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
