//! Clap derive structures for the `thingsync` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use thingsync_core::{Capability, DeviceType};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// thingsync -- inspect and drive a smart-home things service
#[derive(Debug, Parser)]
#[command(
    name = "thingsync",
    version,
    about = "Inspect and drive a smart-home things service from the command line",
    long_about = "Keeps a cached catalog of the devices a things service knows about,\n\
        revalidates it by content hash, and streams live state updates.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Server profile to use
    #[arg(long, short = 'p', env = "THINGSYNC_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Things service URL (overrides profile)
    #[arg(long, short = 's', env = "THINGSYNC_SERVER", global = true)]
    pub server: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "THINGSYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Catalog cache directory (overrides profile)
    #[arg(long, env = "THINGSYNC_CACHE_DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Use the cached catalog without contacting the server
    #[arg(long, global = true)]
    pub offline: bool,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "THINGSYNC_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "THINGSYNC_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "THINGSYNC_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List known devices
    #[command(alias = "ls")]
    List(ListArgs),

    /// Show one device's actions and current state
    Show {
        /// Device name
        name: String,
    },

    /// Set an action on a device
    Set(SetArgs),

    /// Stream live state updates
    Watch(WatchArgs),

    /// Revalidate the cached catalog against the server hash
    Check,

    /// Rebuild the catalog from scratch
    Reload,

    /// Report battery-powered devices running low
    Battery(BatteryArgs),

    /// Wait for the next network map from the stream
    Map {
        /// Give up after this many seconds
        #[arg(long, default_value = "30")]
        wait: u64,
    },

    /// Manage the local catalog cache
    Cache(CacheArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  DEVICES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only devices of this type (light, switch, sensor, button, media_player, scene, unknown)
    #[arg(long, short = 't')]
    pub r#type: Option<DeviceType>,

    /// Only devices with this capability (on-off, brightness, color, color-temp, volume, battery)
    #[arg(long, short = 'c')]
    pub capability: Option<Capability>,

    /// Only devices whose name contains this text
    #[arg(long, short = 'n')]
    pub name: Option<String>,

    /// Only devices read from an expired cache entry
    #[arg(long)]
    pub stale: bool,

    /// Group devices by shared name prefix
    #[arg(long, short = 'g')]
    pub group: bool,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Device name
    pub name: String,

    /// Action name (e.g. state, brightness)
    pub action: String,

    /// Value; parsed as JSON when possible, otherwise taken as a string
    pub value: String,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Devices to watch (default: every device in the catalog)
    pub names: Vec<String>,

    /// Exit after this many updates
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Debug, Args)]
pub struct BatteryArgs {
    /// Report levels below this percentage (overrides profile)
    #[arg(long)]
    pub threshold: Option<f64>,

    /// List every battery-powered device with its last known level
    #[arg(long, short = 'a')]
    pub all: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CACHE / CONFIG / COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Forget the cached catalog; the next command rebuilds it
    Clear,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create a config file with one profile
    Init {
        /// Things service URL, e.g. http://192.168.1.20:5000/
        url: String,

        /// Profile name
        #[arg(long, default_value = "default")]
        name: String,

        /// Overwrite an existing profile of the same name
        #[arg(long)]
        force: bool,
    },

    /// Display the current configuration
    Show,

    /// Print the config file path
    Path,

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_typed_filters() {
        let cli = Cli::try_parse_from([
            "thingsync", "list", "--type", "media_player", "--capability", "color-temp", "-g",
        ])
        .unwrap();
        let Command::List(args) = cli.command else {
            panic!("expected list");
        };
        assert_eq!(args.r#type, Some(DeviceType::MediaPlayer));
        assert_eq!(args.capability, Some(Capability::ColorTemp));
        assert!(args.group);
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(Cli::try_parse_from(["thingsync", "list", "--type", "toaster"]).is_err());
    }
}
