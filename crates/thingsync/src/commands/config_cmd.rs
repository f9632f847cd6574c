//! Config subcommand handlers.

use serde::Serialize;
use tabled::Tabled;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct ProfileEntry {
    name: String,
    server: String,
    default: bool,
}

#[derive(Tabled)]
struct ProfileRow {
    #[tabled(rename = "")]
    marker: &'static str,
    #[tabled(rename = "Profile")]
    name: String,
    #[tabled(rename = "Server")]
    server: String,
}

fn profile_row(e: &ProfileEntry) -> ProfileRow {
    ProfileRow {
        marker: if e.default { "*" } else { "" },
        name: e.name.clone(),
        server: e.server.clone(),
    }
}

fn available(cfg: &Config) -> String {
    let mut names: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
    names.sort_unstable();
    if names.is_empty() {
        "(none)".into()
    } else {
        names.join(", ")
    }
}

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = config::config_file(global);
    let color = output::should_color(&global.color);

    match &args.command {
        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Init { url, name, force } => {
            let mut cfg = config::load(global)?;
            if cfg.profiles.contains_key(name) && !force {
                return Err(CliError::ProfileExists { name: name.clone() });
            }
            let server: url::Url = url.parse().map_err(|_| CliError::Validation {
                field: "server".into(),
                reason: format!("invalid URL: {url}"),
            })?;

            if cfg.profiles.is_empty() {
                cfg.default_profile = Some(name.clone());
            }
            cfg.profiles.insert(
                name.clone(),
                Profile {
                    server: server.to_string(),
                    ..Profile::default()
                },
            );
            config::save_config_to(&cfg, &path)?;
            output::print_success(
                &format!("Profile '{name}' saved to {}", path.display()),
                color,
                global.quiet,
            );
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load(global)?;
            let out = match global.output {
                OutputFormat::Table | OutputFormat::Plain => toml::to_string_pretty(&cfg)
                    .map_err(|e| CliError::Render(e.to_string()))?,
                OutputFormat::Json => output::render_json(&cfg, false)?,
                OutputFormat::JsonCompact => output::render_json(&cfg, true)?,
                OutputFormat::Yaml => output::render_yaml(&cfg)?,
            };
            output::print_output(out.trim_end(), global.quiet);
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = config::load(global)?;
            let default = config::active_profile_name(global, &cfg);
            let mut entries: Vec<ProfileEntry> = cfg
                .profiles
                .iter()
                .map(|(name, p)| ProfileEntry {
                    default: *name == default,
                    name: name.clone(),
                    server: p.server.clone(),
                })
                .collect();
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            let out = output::render_list(&global.output, &entries, profile_row, |e| {
                e.name.clone()
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = config::load(global)?;
            if !cfg.profiles.contains_key(name) {
                return Err(CliError::ProfileNotFound {
                    name: name.clone(),
                    available: available(&cfg),
                });
            }
            cfg.default_profile = Some(name.clone());
            config::save_config_to(&cfg, &path)?;
            output::print_success(
                &format!("Default profile set to '{name}'"),
                color,
                global.quiet,
            );
            Ok(())
        }
    }
}
