//! Command dispatch: routes each `Command` to its handler.

pub mod battery;
pub mod config_cmd;
pub mod devices;
pub mod live;
pub mod sync;

use tracing::debug;

use thingsync_core::RegistrySync;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;
use crate::output;

/// Dispatch a command that needs a registry.
pub async fn dispatch(
    cmd: Command,
    registry: &RegistrySync,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::List(args) => {
            prepare(registry, global).await?;
            devices::list(registry, &args, global)
        }
        Command::Show { name } => {
            prepare(registry, global).await?;
            devices::show(registry, &name, global)
        }
        Command::Set(args) => {
            prepare(registry, global).await?;
            devices::set(registry, &args, global).await
        }
        Command::Watch(args) => {
            prepare(registry, global).await?;
            live::watch(registry, &args, global).await
        }
        Command::Battery(args) => {
            prepare(registry, global).await?;
            battery::handle(registry, &args, global)
        }
        Command::Check => sync::check(registry, global).await,
        Command::Reload => sync::reload(registry, global).await,
        Command::Map { wait } => live::map(registry, wait, global).await,
        Command::Cache(args) => sync::cache(registry, &args.command, global),
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "command does not use the registry".into(),
        )),
    }
}

/// Reconcile the cached catalog with the server before a read.
///
/// With `--offline` the cache is used as-is. A failed revalidation falls
/// back to the last known catalog when there is one.
async fn prepare(registry: &RegistrySync, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(&global.color);
    if global.offline {
        if registry.needs_rebuild() {
            output::print_warning(
                "no complete cached catalog; run `thingsync reload` when online",
                color,
            );
        } else if registry.all_devices().iter().any(|d| d.stale) {
            output::print_warning("cached catalog has expired entries", color);
        }
        return Ok(());
    }

    match registry.ensure_fresh().await {
        Ok(freshness) => {
            debug!(?freshness, "catalog reconciled");
            Ok(())
        }
        Err(err) if !registry.catalog().is_empty() => {
            output::print_warning(&format!("using cached catalog: {err}"), color);
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
