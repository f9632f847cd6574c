// ── Device domain types ──

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumIter, EnumString};

use thingsync_api::{ActionMeta, ThingMeta, ThingState};

/// Canonical device category, classified from the declared `type` in
/// `/meta`. Anything missing or unrecognized lands in `Unknown`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum DeviceType {
    Light,
    Switch,
    Sensor,
    Button,
    MediaPlayer,
    Scene,
    Unknown,
}

impl DeviceType {
    /// Classify a declared type string. Dashes and spaces are treated as
    /// underscores, so `"media-player"` and `"Media Player"` both map to
    /// `MediaPlayer`.
    pub fn from_declared(declared: Option<&str>) -> Self {
        let Some(raw) = declared else {
            return Self::Unknown;
        };
        let canonical = raw.trim().replace(['-', ' '], "_");
        canonical.parse().unwrap_or(Self::Unknown)
    }

    /// Persisted cache key holding this category's device list.
    pub fn cache_key(self) -> &'static str {
        match self {
            Self::Light => "things_metas_lights",
            Self::Switch => "things_metas_switches",
            Self::Sensor => "things_metas_sensors",
            Self::Button => "things_metas_buttons",
            Self::MediaPlayer => "things_metas_media_players",
            Self::Scene => "things_metas_scenes",
            Self::Unknown => "things_metas_unknown",
        }
    }
}

/// Shape of an action's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
    Binary,
    Numeric,
    Enum,
    Opaque,
}

impl ActionKind {
    fn classify(meta: &ActionMeta) -> Self {
        match meta.kind.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("binary" | "bool" | "boolean") => Self::Binary,
            Some("numeric" | "number" | "int" | "float") => Self::Numeric,
            Some("enum") => Self::Enum,
            Some(_) => Self::Opaque,
            // Untyped actions: infer from what the server did send.
            None if meta.min.is_some() || meta.max.is_some() => Self::Numeric,
            None if !meta.values.is_empty() => Self::Enum,
            None => Self::Opaque,
        }
    }
}

/// Inclusive numeric range of an action.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    /// Build bounds, swapping the ends if the server sent them reversed.
    pub fn new(a: f64, b: f64) -> Self {
        if a <= b {
            Self { min: a, max: b }
        } else {
            Self { min: b, max: a }
        }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// A named preset value (e.g. `"warm"` for a color temperature).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    pub value: Value,
}

/// One controllable or observable action on a device.
///
/// Immutable once fetched; replaced only when the catalog is rebuilt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub name: String,
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub presets: Vec<Preset>,
    /// Allowed values for `Enum` actions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Value>,
    pub settable: bool,
}

impl ActionDescriptor {
    pub fn from_meta(name: &str, meta: &ActionMeta) -> Self {
        let bounds = match (meta.min, meta.max) {
            (Some(min), Some(max)) => Some(Bounds::new(min, max)),
            _ => None,
        };
        Self {
            name: name.to_owned(),
            kind: ActionKind::classify(meta),
            bounds,
            presets: meta
                .presets
                .iter()
                .map(|p| Preset {
                    name: p.name.clone(),
                    value: p.value.clone(),
                })
                .collect(),
            values: meta.values.clone(),
            settable: meta.settable.unwrap_or(true),
        }
    }

    /// Clamp a numeric input into this action's bounds, if it has any.
    pub fn clamp(&self, value: f64) -> f64 {
        self.bounds.map_or(value, |b| b.clamp(value))
    }
}

/// A single capability flag, for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum Capability {
    OnOff,
    Brightness,
    Color,
    ColorTemp,
    Volume,
    Battery,
}

/// Explicit capability flags, computed once from a device's action set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    pub on_off: bool,
    pub brightness: bool,
    pub color: bool,
    pub color_temp: bool,
    pub volume: bool,
    pub battery: bool,
}

impl Capabilities {
    pub fn from_actions(actions: &[ActionDescriptor]) -> Self {
        let mut caps = Self::default();
        for action in actions {
            match action.name.as_str() {
                "state" | "on" | "power" => caps.on_off = true,
                "brightness" => caps.brightness = true,
                "color" | "color_rgb" | "color_xy" | "color_hs" | "hue" => caps.color = true,
                "color_temp" | "color_temperature" => caps.color_temp = true,
                "volume" => caps.volume = true,
                "battery" => caps.battery = true,
                _ => {}
            }
        }
        caps
    }

    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::OnOff => self.on_off,
            Capability::Brightness => self.brightness,
            Capability::Color => self.color,
            Capability::ColorTemp => self.color_temp,
            Capability::Volume => self.volume,
            Capability::Battery => self.battery,
        }
    }
}

/// A known device: catalog metadata plus its last known state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    /// Sorted by action name.
    #[serde(default)]
    pub actions: Vec<ActionDescriptor>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub current_state: ThingState,
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Read from an expired cache entry; a refresh is advisable.
    #[serde(skip)]
    pub stale: bool,
}

impl Device {
    /// Classify a device from its `/meta` body.
    pub fn from_meta(name: &str, meta: &ThingMeta) -> Self {
        // BTreeMap iteration keeps actions sorted by name.
        let actions: Vec<ActionDescriptor> = meta
            .actions
            .iter()
            .map(|(action, m)| ActionDescriptor::from_meta(action, m))
            .collect();
        let capabilities = Capabilities::from_actions(&actions);
        Self {
            name: name.to_owned(),
            device_type: DeviceType::from_declared(meta.thing_type.as_deref()),
            actions,
            current_state: ThingState::new(),
            capabilities,
            stale: false,
        }
    }

    /// A device whose metadata could not be understood.
    pub fn unknown(name: &str) -> Self {
        Self::from_meta(name, &ThingMeta::default())
    }

    pub fn action(&self, name: &str) -> Option<&ActionDescriptor> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Merge a partial state into `current_state`, key by key.
    pub fn merge_state(&mut self, partial: &ThingState) {
        for (key, value) in partial {
            self.current_state.insert(key.clone(), value.clone());
        }
    }

    /// Last known battery level, if the device reports one as a number
    /// (or a numeric string).
    pub fn battery_level(&self) -> Option<f64> {
        match self.current_state.get("battery")? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}
