//! Streaming commands: watch, map.

use std::time::Duration;

use chrono::Local;
use owo_colors::OwoColorize;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use thingsync_core::{BusMessage, LinkState, RegistrySync, Subscription};
use thingsync_api::ThingState;

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct Update<'a> {
    time: String,
    device: &'a str,
    state: &'a ThingState,
}

fn format_update(format: &OutputFormat, update: &Update<'_>, color: bool) -> Result<String, CliError> {
    match format {
        OutputFormat::Json | OutputFormat::JsonCompact => output::render_json(update, true),
        OutputFormat::Yaml => Ok(format!("---\n{}", output::render_yaml(update)?.trim_end())),
        OutputFormat::Table | OutputFormat::Plain => {
            let pairs: Vec<String> = update
                .state
                .iter()
                .map(|(k, v)| match v {
                    serde_json::Value::String(s) => format!("{k}={s}"),
                    other => format!("{k}={other}"),
                })
                .collect();
            let device = if color {
                update.device.cyan().to_string()
            } else {
                update.device.to_owned()
            };
            Ok(format!("{}  {device}  {}", update.time, pairs.join(" ")))
        }
    }
}

pub async fn watch(
    registry: &RegistrySync,
    args: &WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let names = if args.names.is_empty() {
        registry.catalog().names()
    } else {
        for name in &args.names {
            if registry.device(name).is_none() {
                return Err(CliError::DeviceNotFound { name: name.clone() });
            }
        }
        args.names.clone()
    };
    if names.is_empty() {
        output::print_warning("no devices to watch", output::should_color(&global.color));
        return Ok(());
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<(String, ThingState)>();
    let consumer = registry.bus().consumer();
    let _subscriptions: Vec<Subscription> = names
        .iter()
        .map(|name| {
            let tx = tx.clone();
            let device = name.clone();
            consumer.subscribe(name.clone(), move |msg| {
                if let BusMessage::State(partial) = msg {
                    let _ = tx.send((device.clone(), partial.clone()));
                }
            })
        })
        .collect();
    drop(tx);
    debug!(devices = names.len(), "watching");

    let color = output::should_color(&global.color);
    let mut link = registry.bus().link_state();
    let mut seen = 0usize;
    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some((device, state)) = received else { break };
                let update = Update {
                    time: Local::now().format("%H:%M:%S").to_string(),
                    device: &device,
                    state: &state,
                };
                output::print_output(&format_update(&global.output, &update, color)?, global.quiet);
                seen += 1;
                if args.count.is_some_and(|n| seen >= n) {
                    break;
                }
            }
            changed = link.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *link.borrow_and_update();
                match state {
                    LinkState::Disconnected => output::print_warning("stream disconnected, reconnecting", color),
                    LinkState::Connected => debug!("stream connected"),
                    LinkState::Closed | LinkState::Connecting => {}
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

pub async fn map(registry: &RegistrySync, wait: u64, global: &GlobalOpts) -> Result<(), CliError> {
    let map = tokio::time::timeout(
        Duration::from_secs(wait),
        registry.bus().request_network_map(),
    )
    .await
    .map_err(|_| CliError::WaitTimedOut {
        what: "network map".into(),
        secs: wait,
    })??;

    let out = output::render_single(
        &global.output,
        &map,
        |m| serde_json::to_string_pretty(m).unwrap_or_default(),
        |m| m.to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
