//! Runtime configuration, loaded from `<data_dir>/config.json` and
//! deep-merged field-wise over built-in defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlConfig {
    pub diary_days: i64,
    pub insight_days: i64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            diary_days: 30,
            insight_days: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokensConfig {
    pub l0_budget: usize,
    pub l1_budget: usize,
    pub checkpoint_budget: usize,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            l0_budget: 200,
            l1_budget: 500,
            checkpoint_budget: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompoundingConfig {
    pub diary_threshold: usize,
    pub insight_threshold: usize,
}

impl Default for CompoundingConfig {
    fn default() -> Self {
        Self {
            diary_threshold: 5,
            insight_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub data_dir: Option<String>,
    pub ttl: TtlConfig,
    pub tokens: TokensConfig,
    pub compounding: CompoundingConfig,
}

impl Config {
    /// Load `<data_dir>/config.json` if present and deep-merge it over
    /// defaults. A missing file is not an error.
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join("config.json");
        let overlay = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Value>(&contents) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "ignoring malformed config.json");
                    return Self::default();
                }
            },
            Err(_) => return Self::default(),
        };

        let mut base = serde_json::to_value(Self::default()).expect("Config is serializable");
        merge_json(&mut base, &overlay);
        serde_json::from_value(base).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "config.json did not match expected shape, using defaults");
            Self::default()
        })
    }
}

/// Recursively merge `overlay` onto `base`, field-wise. Objects are merged
/// key by key rather than replaced wholesale; any other value type in
/// `overlay` replaces the corresponding value in `base`.
pub fn merge_json(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => merge_json(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}
