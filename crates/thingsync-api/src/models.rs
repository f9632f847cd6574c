// Wire models for the things service.
//
// The server is loosely typed: fields may be missing, renamed between
// server versions, or `null`. Every struct here defaults generously so a
// partially-filled body still deserializes.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A thing's state as returned by `/get/{name}` or carried in stream
/// pushes: a flat JSON object of action name to value.
pub type ThingState = serde_json::Map<String, Value>;

/// Body of `GET /meta/{name}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThingMeta {
    /// Declared device type (`"light"`, `"switch"`, ...). Older servers
    /// call it `thing_type`.
    #[serde(rename = "type", alias = "thing_type", default)]
    pub thing_type: Option<String>,

    /// Actions keyed by name. Accepts either a JSON object keyed by action
    /// name or a list of objects carrying a `name` field.
    #[serde(default, deserialize_with = "actions_map_or_list")]
    pub actions: BTreeMap<String, ActionMeta>,
}

/// One action in a `/meta` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionMeta {
    /// `"binary"`, `"numeric"`, `"enum"`, or anything else (opaque).
    #[serde(default, alias = "type")]
    pub kind: Option<String>,

    #[serde(default, alias = "value_min")]
    pub min: Option<f64>,

    #[serde(default, alias = "value_max")]
    pub max: Option<f64>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub presets: Vec<PresetMeta>,

    /// Allowed values for enum actions.
    #[serde(default, deserialize_with = "null_as_default")]
    pub values: Vec<Value>,

    /// Whether the action accepts writes. Missing means settable.
    #[serde(default)]
    pub settable: Option<bool>,
}

/// A named preset value (e.g. `"warm"` for a color temperature).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetMeta {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

/// Body of `GET /get_known_things_hash`: a string or a bare number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub(crate) enum RemoteHash {
    Text(String),
    Number(serde_json::Number),
}

impl RemoteHash {
    pub(crate) fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ActionsRepr {
    Map(BTreeMap<String, ActionMeta>),
    List(Vec<NamedActionMeta>),
}

#[derive(Deserialize)]
struct NamedActionMeta {
    name: String,
    #[serde(flatten)]
    meta: ActionMeta,
}

fn actions_map_or_list<'de, D>(deserializer: D) -> Result<BTreeMap<String, ActionMeta>, D::Error>
where
    D: Deserializer<'de>,
{
    let repr = Option::<ActionsRepr>::deserialize(deserializer)?;
    Ok(match repr {
        None => BTreeMap::new(),
        Some(ActionsRepr::Map(map)) => map,
        Some(ActionsRepr::List(list)) => list
            .into_iter()
            .map(|named| (named.name, named.meta))
            .collect(),
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
