//! `server.properties` access and the typed settings view over it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

pub const PROPERTIES_FILE: &str = "server.properties";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Bool,
    Int,
    Text,
}

/// Managed settings: field name, property key, value kind.
const SETTINGS_FIELDS: &[(&str, &str, FieldKind)] = &[
    ("motd", "motd", FieldKind::Text),
    ("max_players", "max-players", FieldKind::Int),
    ("difficulty", "difficulty", FieldKind::Text),
    ("gamemode", "gamemode", FieldKind::Text),
    ("view_distance", "view-distance", FieldKind::Int),
    ("simulation_distance", "simulation-distance", FieldKind::Int),
    ("online_mode", "online-mode", FieldKind::Bool),
    ("whitelist", "white-list", FieldKind::Bool),
    ("pvp", "pvp", FieldKind::Bool),
    ("hardcore", "hardcore", FieldKind::Bool),
    ("allow_nether", "allow-nether", FieldKind::Bool),
    ("allow_end", "allow-end", FieldKind::Bool),
    ("allow_flight", "allow-flight", FieldKind::Bool),
    ("spawn_protection", "spawn-protection", FieldKind::Int),
    ("level_seed", "level-seed", FieldKind::Text),
    ("level_type", "level-type", FieldKind::Text),
    ("spawn_animals", "spawn-animals", FieldKind::Bool),
    ("spawn_monsters", "spawn-monsters", FieldKind::Bool),
    ("spawn_npcs", "spawn-npcs", FieldKind::Bool),
    ("op_permission_level", "op-permission-level", FieldKind::Int),
    ("player_idle_timeout", "player-idle-timeout", FieldKind::Int),
    ("max_tick_time", "max-tick-time", FieldKind::Int),
    (
        "entity_broadcast_range_percentage",
        "entity-broadcast-range-percentage",
        FieldKind::Int,
    ),
    ("server_port", "server-port", FieldKind::Int),
    ("server_ip", "server-ip", FieldKind::Text),
    ("broadcast_console_to_ops", "broadcast-console-to-ops", FieldKind::Bool),
    ("broadcast_rcon_to_ops", "broadcast-rcon-to-ops", FieldKind::Bool),
    ("enable_query", "enable-query", FieldKind::Bool),
    ("query_port", "query.port", FieldKind::Int),
    ("resource_pack", "resource-pack", FieldKind::Text),
    ("resource_pack_sha1", "resource-pack-sha1", FieldKind::Text),
    ("enable_command_block", "enable-command-block", FieldKind::Bool),
];

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ServerSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_players: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gamemode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_distance: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_distance: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvp: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardcore: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_nether: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_end: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_flight: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_protection: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level_seed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_animals: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_monsters: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_npcs: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_permission_level: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_idle_timeout: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tick_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_broadcast_range_percentage: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_port: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast_console_to_ops: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast_rcon_to_ops: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_query: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_port: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_pack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_pack_sha1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_command_block: Option<bool>,
}

impl ServerSettings {
    /// Builds the typed view from raw properties. Values that fail to coerce
    /// (e.g. a non-numeric `max-players`) are left unset.
    pub fn from_properties(properties: &BTreeMap<String, String>) -> Self {
        let mut payload = Map::new();
        for (field, key, kind) in SETTINGS_FIELDS {
            let Some(raw) = properties.get(*key) else {
                continue;
            };
            let value = match kind {
                FieldKind::Bool => Value::Bool(raw.eq_ignore_ascii_case("true")),
                FieldKind::Int => match raw.trim().parse::<i64>() {
                    Ok(n) => Value::from(n),
                    Err(_) => continue,
                },
                FieldKind::Text => Value::String(raw.clone()),
            };
            payload.insert((*field).to_string(), value);
        }
        serde_json::from_value(Value::Object(payload)).unwrap_or_default()
    }

    /// Property key/value pairs for every field that is set.
    pub fn to_properties(&self) -> BTreeMap<String, String> {
        let mut updates = BTreeMap::new();
        let Ok(Value::Object(payload)) = serde_json::to_value(self) else {
            return updates;
        };
        for (field, key, _) in SETTINGS_FIELDS {
            let rendered = match payload.get(*field) {
                Some(Value::Bool(b)) => b.to_string(),
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::String(s)) => s.clone(),
                _ => continue,
            };
            updates.insert((*key).to_string(), rendered);
        }
        updates
    }

    pub fn is_empty(&self) -> bool {
        self == &ServerSettings::default()
    }
}

/// Reads `server.properties` from `dir`. A missing file reads as empty.
///
/// Comments, blank lines and lines without `=` are ignored; keys and values
/// are trimmed.
pub fn read_properties(dir: &Path) -> io::Result<BTreeMap<String, String>> {
    let path = dir.join(PROPERTIES_FILE);
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let content = fs::read_to_string(&path)?;
    Ok(parse_properties(&content))
}

pub fn parse_properties(content: &str) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    for line in content.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = stripped.split_once('=') {
            properties.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    properties
}

/// Applies `updates` to `server.properties` in `dir`, creating it if needed.
///
/// Existing keys are rewritten in place, every other line is kept verbatim
/// and in order, and keys not yet present are appended at the end.
pub fn write_properties(dir: &Path, updates: &BTreeMap<String, String>) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let path = dir.join(PROPERTIES_FILE);
    let existing = if path.exists() {
        fs::read_to_string(&path)?
    } else {
        String::new()
    };
    fs::write(&path, merge_properties(&existing, updates))
}

pub fn merge_properties(existing: &str, updates: &BTreeMap<String, String>) -> String {
    let mut remaining = updates.clone();
    let mut output = String::with_capacity(existing.len() + 64);

    for line in existing.split_inclusive('\n') {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') || !line.contains('=') {
            output.push_str(line);
            continue;
        }
        let key = line.split('=').next().unwrap_or_default().trim();
        match remaining.remove(key) {
            Some(value) => {
                output.push_str(key);
                output.push('=');
                output.push_str(&value);
                output.push('\n');
            }
            None => output.push_str(line),
        }
    }

    if !output.is_empty() && !output.ends_with('\n') {
        output.push('\n');
    }
    for (key, value) in remaining {
        output.push_str(&key);
        output.push('=');
        output.push_str(&value);
        output.push('\n');
    }
    output
}
