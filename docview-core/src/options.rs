//! String-keyed application options with typed defaults.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// Read by the viewer and the session controller.
    Viewer,
    /// Forwarded to the document engine on every open.
    Api,
}

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("unknown option `{0}`")]
    Unknown(String),
    #[error("option `{name}` expects a {expected} value")]
    TypeMismatch { name: String, expected: &'static str },
    #[error("failed to read options file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse options file")]
    Parse(#[from] toml::de::Error),
}

struct OptionDefault {
    kind: OptionKind,
    default: Value,
}

static DEFAULTS: Lazy<BTreeMap<&'static str, OptionDefault>> = Lazy::new(|| {
    use OptionKind::{Api, Viewer};

    let entries: [(&'static str, OptionKind, Value); 18] = [
        ("default_zoom_value", Viewer, Value::from("")),
        ("sidebar_view_on_load", Viewer, Value::from(-1)),
        ("scroll_mode_on_load", Viewer, Value::from(-1)),
        ("spread_mode_on_load", Viewer, Value::from(-1)),
        ("view_on_load", Viewer, Value::from(-1)),
        ("disable_page_labels", Viewer, Value::from(false)),
        ("enable_permissions", Viewer, Value::from(false)),
        ("enable_scripting", Viewer, Value::from(false)),
        ("render_interactive_forms", Viewer, Value::from(true)),
        ("renderer", Viewer, Value::from("canvas")),
        ("history_cache_size", Viewer, Value::from(20)),
        ("force_pages_loaded_timeout_ms", Viewer, Value::from(10_000)),
        ("idle_callback_delay_ms", Viewer, Value::from(1_000)),
        ("disable_range", Api, Value::from(false)),
        ("disable_stream", Api, Value::from(false)),
        ("disable_auto_fetch", Api, Value::from(false)),
        ("range_chunk_size", Api, Value::from(65_536)),
        ("max_image_size", Api, Value::from(-1)),
    ];
    entries
        .into_iter()
        .map(|(name, kind, default)| (name, OptionDefault { kind, default }))
        .collect()
});

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "table",
        Value::Null => "null",
    }
}

/// Option values layered over the built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    overrides: Map<String, Value>,
}

impl AppOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.overrides
            .get(name)
            .or_else(|| DEFAULTS.get(name).map(|entry| &entry.default))
    }

    pub fn get_bool(&self, name: &str) -> bool {
        self.get(name).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn get_i64(&self, name: &str) -> i64 {
        self.get(name).and_then(Value::as_i64).unwrap_or(-1)
    }

    pub fn get_str(&self, name: &str) -> &str {
        self.get(name).and_then(Value::as_str).unwrap_or("")
    }

    /// Every option of `kind`, with overrides applied.
    pub fn get_all(&self, kind: OptionKind) -> Map<String, Value> {
        DEFAULTS
            .iter()
            .filter(|(_, entry)| entry.kind == kind)
            .filter_map(|(name, _)| {
                self.get(name)
                    .map(|value| ((*name).to_owned(), value.clone()))
            })
            .collect()
    }

    pub fn set(&mut self, name: &str, value: Value) -> Result<(), OptionsError> {
        let entry = DEFAULTS
            .get(name)
            .ok_or_else(|| OptionsError::Unknown(name.to_owned()))?;
        let expected = type_name(&entry.default);
        if type_name(&value) != expected {
            return Err(OptionsError::TypeMismatch {
                name: name.to_owned(),
                expected,
            });
        }
        self.overrides.insert(name.to_owned(), value);
        Ok(())
    }

    pub fn from_toml_str(source: &str) -> Result<Self, OptionsError> {
        let table: toml::Table = toml::from_str(source)?;
        let mut options = Self::new();
        for (name, value) in table {
            let value = match value {
                toml::Value::Boolean(b) => Value::from(b),
                toml::Value::Integer(i) => Value::from(i),
                toml::Value::Float(f) => Value::from(f),
                toml::Value::String(s) => Value::from(s),
                _ => {
                    return Err(OptionsError::TypeMismatch {
                        name,
                        expected: "scalar",
                    })
                }
            };
            options.set(&name, value)?;
        }
        Ok(options)
    }

    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, OptionsError> {
        if !path.exists() {
            debug!(?path, "no options file, using defaults");
            return Ok(Self::new());
        }
        let source = fs::read_to_string(path).map_err(|source| OptionsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }
}
