use serde_json::{Map, Value};

use super::error::ConfigError;

const EMBEDDING_PROVIDERS: [&str; 3] = ["local", "openai", "gemini"];
const LLM_PROVIDERS: [&str; 2] = ["openai", "gemini"];

pub fn validate_config(config: &Value) -> Result<(), ConfigError> {
    let root = config
        .as_object()
        .ok_or_else(|| ConfigError::type_mismatch("root", "object"))?;

    if let Some(data) = expect_optional_object(root, "data")? {
        for key in ["dir", "examples_file", "schema_file", "rules_file"] {
            validate_non_empty_string_field(data, &format!("data.{}", key), key)?;
        }
    }

    if let Some(index) = expect_optional_object(root, "index")? {
        validate_non_empty_string_field(index, "index.path", "path")?;
        validate_bool_field(index, "index.rebuild", "rebuild")?;
    }

    if let Some(retrieval) = expect_optional_object(root, "retrieval")? {
        validate_u64_field(retrieval, "retrieval.top_k", "top_k", 1, 500)?;
        validate_bool_field(retrieval, "retrieval.dedupe_by_config", "dedupe_by_config")?;
    }

    if let Some(embedding) = expect_optional_object(root, "embedding")? {
        validate_choice_field(
            embedding,
            "embedding.provider",
            "provider",
            &EMBEDDING_PROVIDERS,
        )?;
        for key in ["model", "openai_model", "gemini_model", "endpoint", "base_url", "api_version"] {
            validate_non_empty_string_field(embedding, &format!("embedding.{}", key), key)?;
        }
        validate_optional_string_field(embedding, "embedding.query_instruction", "query_instruction")?;
        validate_u64_field(embedding, "embedding.dimensions", "dimensions", 1, 65_536)?;
        validate_u64_field(embedding, "embedding.timeout_secs", "timeout_secs", 1, 3_600)?;
        validate_u64_field(embedding, "embedding.batch_size", "batch_size", 1, 2_048)?;
    }

    if let Some(generation) = expect_optional_object(root, "generation")? {
        validate_choice_field(generation, "generation.provider", "provider", &LLM_PROVIDERS)?;
        for key in [
            "model",
            "gemini_model",
            "model_version",
            "environment",
            "api_version",
            "directory_url",
            "base_url",
        ] {
            validate_non_empty_string_field(generation, &format!("generation.{}", key), key)?;
        }
        validate_string_array_field(generation, "generation.endpoints", "endpoints")?;
        validate_bool_field(
            generation,
            "generation.refresh_directory_per_call",
            "refresh_directory_per_call",
        )?;
        validate_u64_field(generation, "generation.max_retries", "max_retries", 1, 50)?;
        validate_u64_field(generation, "generation.max_tokens", "max_tokens", 1, 1_000_000)?;
        validate_u64_field(generation, "generation.timeout_secs", "timeout_secs", 1, 3_600)?;
        validate_u64_field(
            generation,
            "generation.retry_backoff_ms",
            "retry_backoff_ms",
            0,
            60_000,
        )?;
    }

    if let Some(credentials) = expect_optional_object(root, "credentials")? {
        validate_optional_string_field(
            credentials,
            "credentials.azure_openai_api_key",
            "azure_openai_api_key",
        )?;
        validate_optional_string_field(credentials, "credentials.google_api_key", "google_api_key")?;
    }

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_non_empty_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 0, 65_535)?;
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, ConfigError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(ConfigError::type_mismatch(key, "object")),
    }
}

fn validate_bool_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_bool().is_some() {
        return Ok(());
    }
    Err(ConfigError::type_mismatch(path, "boolean"))
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(ConfigError::type_mismatch(path, "integer"));
    };
    if number < min || number > max {
        return Err(ConfigError::invalid(
            path,
            format!("must be between {} and {}", min, max),
        ));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ConfigError> {
    match section.get(key) {
        None | Some(Value::Null) | Some(Value::String(_)) => Ok(()),
        Some(_) => Err(ConfigError::type_mismatch(path, "string")),
    }
}

fn validate_non_empty_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(text) = value.as_str() else {
        return Err(ConfigError::type_mismatch(path, "string"));
    };
    if text.trim().is_empty() {
        return Err(ConfigError::invalid(path, "value cannot be empty"));
    }
    Ok(())
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(ConfigError::type_mismatch(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(ConfigError::type_mismatch(
                &format!("{}[{}]", path, index),
                "string",
            ));
        };
        if text.trim().is_empty() {
            return Err(ConfigError::invalid(
                format!("{}[{}]", path, index),
                "value cannot be empty",
            ));
        }
    }
    Ok(())
}

fn validate_choice_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    choices: &[&str],
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(text) = value.as_str() else {
        return Err(ConfigError::type_mismatch(path, "string"));
    };
    let normalized = text.trim().to_lowercase();
    if choices.iter().any(|choice| *choice == normalized) {
        return Ok(());
    }
    Err(ConfigError::invalid(
        path,
        format!("expected one of {}", choices.join(", ")),
    ))
}
