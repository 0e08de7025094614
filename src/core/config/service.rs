use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::error::ConfigError;
use super::paths::AppPaths;

const REDACT_PLACEHOLDER: &str = "****";

const SENSITIVE_PATTERNS: [&str; 8] = [
    "api_key",
    "secret",
    "password",
    "_token",
    "token_",
    "credential",
    "access_key",
    "bearer",
];

const SENSITIVE_WHITELIST: [&str; 3] = ["max_tokens", "total_tokens", "credentials"];

/// Environment variables recognised as overrides, and the config path each
/// one is written to.
const ENV_OVERRIDES: [(&str, &[&str]); 11] = [
    ("LLM_PROVIDER", &["generation", "provider"]),
    ("LLM_MODEL", &["generation", "model"]),
    ("LLM_ENVIRONMENT", &["generation", "environment"]),
    ("AZURE_OPENAI_API_VERSION", &["generation", "api_version"]),
    ("GEMINI_MODEL", &["generation", "gemini_model"]),
    ("EMBEDDING_PROVIDER", &["embedding", "provider"]),
    ("OPENAI_EMBEDDING_MODEL", &["embedding", "openai_model"]),
    ("GEMINI_EMBEDDING_MODEL", &["embedding", "gemini_model"]),
    ("AZURE_OPENAI_KEY", &["credentials", "azure_openai_api_key"]),
    ("GOOGLE_API_KEY", &["credentials", "google_api_key"]),
    ("PORT", &["server", "port"]),
];

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    pub fn config_path(&self) -> PathBuf {
        if let Ok(path) = env::var("VIZGEN_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        let user_config = self.paths.user_data_dir.join("config.yml");
        if user_config.exists() {
            return user_config;
        }

        self.paths.project_root.join("config.yml")
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.paths.secrets_path.clone()
    }

    /// Loads `config.yml`, then `secrets.yaml`, then the environment overlay,
    /// each layer overriding the previous one.
    pub fn load_config(&self) -> Result<Value, ConfigError> {
        let public_config = load_yaml_file(&self.config_path())?;
        let secrets_config = load_yaml_file(&self.secrets_path())?;
        let merged = deep_merge(&public_config, &secrets_config);
        Ok(deep_merge(&merged, &env_overlay(|key| env::var(key).ok())))
    }

    pub fn redact_sensitive_values(&self, value: &Value) -> Value {
        redact_sensitive_values(value)
    }
}

fn load_yaml_file(path: &Path) -> Result<Value, ConfigError> {
    if !path.exists() {
        return Ok(Value::Object(Map::new()));
    }

    let read_error = |message: String| ConfigError::Read {
        path: path.display().to_string(),
        message,
    };

    let contents = fs::read_to_string(path).map_err(|e| read_error(e.to_string()))?;
    if contents.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    match serde_yaml::from_str::<Value>(&contents).map_err(|e| read_error(e.to_string()))? {
        value @ Value::Object(_) => Ok(value),
        Value::Null => Ok(Value::Object(Map::new())),
        _ => Err(read_error("top level must be a mapping".to_string())),
    }
}

fn env_overlay<F>(lookup: F) -> Value
where
    F: Fn(&str) -> Option<String>,
{
    let mut root = Map::new();
    for (key, path) in ENV_OVERRIDES {
        let Some(raw) = lookup(key) else {
            continue;
        };
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let value = if key == "PORT" {
            raw.parse::<u64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(raw.to_string()))
        } else {
            Value::String(raw.to_string())
        };
        insert_path(&mut root, path, value);
    }
    Value::Object(root)
}

fn insert_path(root: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };

    let mut cursor = root;
    for segment in parents {
        let entry = cursor
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        cursor = next;
    }
    cursor.insert(last.to_string(), value);
}

fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in override_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}

fn redact_sensitive_values(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = Map::new();
            for (key, val) in map {
                if is_sensitive_key(key) && !val.is_null() && !val.is_object() {
                    redacted.insert(key.clone(), Value::String(REDACT_PLACEHOLDER.to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive_values(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_values).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    if SENSITIVE_WHITELIST
        .iter()
        .any(|allowed| *allowed == key_lower)
    {
        return false;
    }
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| key_lower.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_merge_merges_objects_and_overrides_scalars() {
        let base = json!({
            "generation": { "provider": "openai", "max_retries": 3 },
            "retrieval": { "top_k": 25 }
        });
        let override_value = json!({
            "generation": { "provider": "gemini" },
            "credentials": { "google_api_key": "g" }
        });

        let merged = deep_merge(&base, &override_value);

        assert_eq!(
            merged,
            json!({
                "generation": { "provider": "gemini", "max_retries": 3 },
                "retrieval": { "top_k": 25 },
                "credentials": { "google_api_key": "g" }
            })
        );
    }

    #[test]
    fn env_overlay_maps_known_variables_to_config_paths() {
        let overlay = env_overlay(|key| match key {
            "LLM_PROVIDER" => Some("gemini".to_string()),
            "AZURE_OPENAI_KEY" => Some("azure-secret".to_string()),
            "PORT" => Some("9100".to_string()),
            "LLM_MODEL" => Some("   ".to_string()),
            _ => None,
        });

        assert_eq!(
            overlay,
            json!({
                "generation": { "provider": "gemini" },
                "credentials": { "azure_openai_api_key": "azure-secret" },
                "server": { "port": 9100 }
            })
        );
    }

    #[test]
    fn redact_sensitive_values_replaces_secrets_only() {
        let input = json!({
            "credentials": {
                "azure_openai_api_key": "secret",
                "google_api_key": null
            },
            "generation": { "max_tokens": 4096, "model": "gpt-4o-mini-global" }
        });

        let redacted = redact_sensitive_values(&input);

        assert_eq!(
            redacted,
            json!({
                "credentials": {
                    "azure_openai_api_key": "****",
                    "google_api_key": null
                },
                "generation": { "max_tokens": 4096, "model": "gpt-4o-mini-global" }
            })
        );
    }

    #[test]
    fn load_yaml_file_rejects_non_mapping_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(&path, "- just\n- a list\n").unwrap();

        assert!(matches!(load_yaml_file(&path), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn load_yaml_file_treats_missing_file_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let value = load_yaml_file(&dir.path().join("absent.yml")).unwrap();
        assert_eq!(value, json!({}));
    }
}
