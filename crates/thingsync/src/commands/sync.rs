//! Catalog reconciliation commands: check, reload, cache clear.

use serde::Serialize;

use thingsync_core::{Freshness, RegistrySync};

use crate::cli::{CacheCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct CheckReport {
    status: &'static str,
    devices: usize,
    hash: String,
    last_rebuild: Option<String>,
}

fn detail(r: &CheckReport) -> String {
    let headline = match r.status {
        "up_to_date" => "Catalog is up to date",
        _ => "Catalog rebuilt",
    };
    [
        headline.to_owned(),
        format!("Devices:      {}", r.devices),
        format!("Hash:         {}", r.hash),
        format!(
            "Last rebuild: {}",
            r.last_rebuild.as_deref().unwrap_or("-")
        ),
    ]
    .join("\n")
}

fn report(registry: &RegistrySync, freshness: Freshness) -> CheckReport {
    let catalog = registry.catalog();
    CheckReport {
        status: match freshness {
            Freshness::UpToDate => "up_to_date",
            Freshness::Rebuilt { .. } => "rebuilt",
        },
        devices: catalog.len(),
        hash: catalog.local_hash().to_string(),
        last_rebuild: catalog.last_rebuild().map(|t| t.to_rfc3339()),
    }
}

pub async fn check(registry: &RegistrySync, global: &GlobalOpts) -> Result<(), CliError> {
    let freshness = registry.ensure_fresh().await?;
    let report = report(registry, freshness);
    let out = output::render_single(&global.output, &report, detail, |r| r.status.to_owned())?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn reload(registry: &RegistrySync, global: &GlobalOpts) -> Result<(), CliError> {
    let count = registry.reload().await?;
    output::print_success(
        &format!("Catalog rebuilt: {count} devices"),
        output::should_color(&global.color),
        global.quiet,
    );
    Ok(())
}

pub fn cache(registry: &RegistrySync, command: &CacheCommand, global: &GlobalOpts) -> Result<(), CliError> {
    match command {
        CacheCommand::Clear => {
            registry.reset_cache();
            output::print_success(
                "Catalog cache cleared",
                output::should_color(&global.color),
                global.quiet,
            );
        }
    }
    Ok(())
}
