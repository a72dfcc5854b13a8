//! Configuration du client ONVIF
//!
//! La configuration par défaut est intégrée au binaire, fusionnée avec un
//! fichier YAML optionnel puis surchargée par les variables d'environnement
//! `PMOONVIF__<CLE>` (ex: `PMOONVIF__USERNAME=admin`).

use std::{env, fs, io::ErrorKind, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use serde_yaml::{Mapping, Value};
use tracing::info;

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("pmoonvif.yaml");

const ENV_PREFIX: &str = "PMOONVIF__";

// Clés dont la valeur d'environnement est gardée telle quelle
const RAW_STRING_KEYS: &[&str] = &["username", "password"];

/// Configuration du client
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    #[serde(default, deserialize_with = "optional_string")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "optional_string")]
    pub password: Option<String>,
    /// Timeout global d'une requête HTTP, en secondes
    pub timeout_secs: u64,
    /// Trace les requêtes et réponses complètes (niveau debug)
    pub debug: bool,
}

impl ClientConfig {
    /// Charge la configuration par défaut, surchargée par l'environnement
    pub fn load() -> Result<Self> {
        Self::from_value(Self::default_value()?, env::vars())
    }

    /// Charge la configuration depuis un fichier YAML.
    ///
    /// Un fichier absent n'est pas une erreur : la configuration par défaut
    /// est alors utilisée.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_value(Self::file_value(path.as_ref())?, env::vars())
    }

    /// Parse une configuration YAML, sans tenir compte de l'environnement
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut value = Self::default_value()?;
        let external: Value = serde_yaml::from_str(yaml)?;
        merge_yaml(&mut value, &lower_keys_value(external));
        Self::from_value(value, std::iter::empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn default_value() -> Result<Value> {
        Ok(serde_yaml::from_str(DEFAULT_CONFIG)?)
    }

    /// Configuration par défaut fusionnée avec le fichier, s'il existe
    fn file_value(path: &Path) -> Result<Value> {
        let mut value = Self::default_value()?;

        match fs::read(path) {
            Ok(data) => {
                info!(config_file = %path.display(), "Loaded config file");
                let external: Value = serde_yaml::from_slice(&data)
                    .with_context(|| format!("Invalid YAML in {}", path.display()))?;
                merge_yaml(&mut value, &lower_keys_value(external));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(config_file = %path.display(), "Config file not found, using default embedded config");
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Cannot read {}", path.display()));
            }
        }

        Ok(value)
    }

    fn from_value(mut value: Value, vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        apply_env_overrides(&mut value, vars);
        serde_yaml::from_value(value).context("Invalid pmoonvif configuration")
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            timeout_secs: crate::DEFAULT_HTTP_TIMEOUT.as_secs(),
            debug: false,
        }
    }
}

fn apply_env_overrides(config: &mut Value, vars: impl IntoIterator<Item = (String, String)>) {
    let Value::Mapping(map) = config else {
        return;
    };

    for (key, value) in vars {
        if let Some(name) = key.strip_prefix(ENV_PREFIX) {
            let name = name.to_lowercase();
            let value = if RAW_STRING_KEYS.contains(&name.as_str()) {
                Value::String(value)
            } else {
                convert_env_value(&value)
            };
            map.insert(Value::String(name), value);
        }
    }
}

fn convert_env_value(value: &str) -> Value {
    if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
        return parsed;
    }
    Value::String(value.to_string())
}

/// Accepte `password: 12345` aussi bien que `password: "12345"`
fn optional_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string, got {:?}",
            other
        ))),
    }
}

fn lower_keys_value(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut new_map = Mapping::new();
            for (k, v) in map {
                match k {
                    Value::String(s) => new_map.insert(Value::String(s.to_lowercase()), v),
                    other => new_map.insert(other, v),
                };
            }
            Value::Mapping(new_map)
        }
        _ => value,
    }
}

fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}
