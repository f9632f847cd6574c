//! Device command handlers: list, show, set.

use std::sync::Arc;

use serde_json::Value;
use tabled::Tabled;

use thingsync_core::{
    Capabilities, Capability, Device, DeviceFilter, Group, GroupingEngine, RegistrySync,
};

use crate::cli::{GlobalOpts, ListArgs, SetArgs};
use crate::error::CliError;
use crate::output;

// ── Table rows ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    device_type: String,
    #[tabled(rename = "Capabilities")]
    capabilities: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Stale")]
    stale: &'static str,
}

fn device_row(d: &Arc<Device>) -> DeviceRow {
    DeviceRow {
        name: d.name.clone(),
        device_type: d.device_type.to_string(),
        capabilities: capability_list(&d.capabilities),
        state: state_summary(d),
        stale: if d.stale { "yes" } else { "" },
    }
}

#[derive(Tabled)]
struct GroupRow {
    #[tabled(rename = "Group")]
    label: String,
    #[tabled(rename = "Count")]
    count: usize,
    #[tabled(rename = "Members")]
    members: String,
}

fn group_row(g: &Group) -> GroupRow {
    GroupRow {
        label: g.label.clone(),
        count: g.members.len(),
        members: g.members.join(", "),
    }
}

const ALL_CAPABILITIES: [Capability; 6] = [
    Capability::OnOff,
    Capability::Brightness,
    Capability::Color,
    Capability::ColorTemp,
    Capability::Volume,
    Capability::Battery,
];

fn capability_list(caps: &Capabilities) -> String {
    let names: Vec<String> = ALL_CAPABILITIES
        .iter()
        .filter(|c| caps.has(**c))
        .map(ToString::to_string)
        .collect();
    if names.is_empty() {
        "-".into()
    } else {
        names.join(", ")
    }
}

fn state_summary(d: &Device) -> String {
    if d.current_state.is_empty() {
        return "-".into();
    }
    let mut pairs: Vec<String> = d
        .current_state
        .iter()
        .map(|(k, v)| format!("{k}={}", display_value(v)))
        .collect();
    pairs.sort();
    pairs.join(" ")
}

fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn detail(d: &Arc<Device>) -> String {
    let mut lines = vec![
        format!("Name:         {}", d.name),
        format!("Type:         {}", d.device_type),
        format!("Capabilities: {}", capability_list(&d.capabilities)),
    ];
    if d.stale {
        lines.push("Cache:        stale".into());
    }

    lines.push(String::new());
    lines.push("Actions:".into());
    if d.actions.is_empty() {
        lines.push("  (none)".into());
    }
    for action in &d.actions {
        let mut line = format!("  {:<18} {}", action.name, action.kind);
        if let Some(b) = action.bounds {
            line.push_str(&format!(" [{}..{}]", b.min, b.max));
        }
        if !action.values.is_empty() {
            let values: Vec<String> = action.values.iter().map(display_value).collect();
            line.push_str(&format!(" {{{}}}", values.join("|")));
        }
        if !action.settable {
            line.push_str(" (read-only)");
        }
        if let Some(current) = d.current_state.get(&action.name) {
            line.push_str(&format!(" = {}", display_value(current)));
        }
        lines.push(line);
    }
    lines.join("\n")
}

// ── Handlers ─────────────────────────────────────────────────────────

fn filters(args: &ListArgs) -> Vec<DeviceFilter> {
    let mut filters = Vec::new();
    if let Some(dt) = args.r#type {
        filters.push(DeviceFilter::ByType(dt));
    }
    if let Some(cap) = args.capability {
        filters.push(DeviceFilter::WithCapability(cap));
    }
    if let Some(name) = &args.name {
        filters.push(DeviceFilter::NameContains(name.clone()));
    }
    if args.stale {
        filters.push(DeviceFilter::Stale);
    }
    filters
}

pub fn list(registry: &RegistrySync, args: &ListArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let filters = filters(args);
    let devices: Vec<Arc<Device>> = registry
        .all_devices()
        .iter()
        .filter(|d| filters.iter().all(|f| f.matches(d)))
        .cloned()
        .collect();

    let out = if args.group {
        let grouping = GroupingEngine::new(registry.config().grouping)
            .group(devices.iter().map(|d| d.name.as_str()));
        output::render_list(
            &global.output,
            &grouping.groups,
            group_row,
            |g| format!("{}\t{}", g.label, g.members.join(",")),
        )?
    } else {
        output::render_list(&global.output, &devices, device_row, |d| d.name.clone())?
    };
    output::print_output(&out, global.quiet);
    Ok(())
}

pub fn show(registry: &RegistrySync, name: &str, global: &GlobalOpts) -> Result<(), CliError> {
    let device = registry
        .device(name)
        .ok_or_else(|| CliError::DeviceNotFound { name: name.into() })?;
    let out = output::render_single(&global.output, &device, detail, |d| d.name.clone())?;
    output::print_output(&out, global.quiet);
    Ok(())
}

/// Command-line values are JSON when they parse as JSON (`true`, `120`,
/// `"ON"`, `{"x":1}`), otherwise a bare string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

pub async fn set(registry: &RegistrySync, args: &SetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let value = parse_value(&args.value);
    registry.set_action(&args.name, &args.action, value).await?;

    // Report what the device now holds, which reflects any clamping.
    let applied = registry
        .device(&args.name)
        .and_then(|d| d.current_state.get(&args.action).map(display_value))
        .unwrap_or_default();
    output::print_success(
        &format!("{} {} = {applied}", args.name, args.action),
        output::should_color(&global.color),
        global.quiet,
    );
    Ok(())
}
