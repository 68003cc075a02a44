//! `tutorchat set` / `tutorchat unset`

use std::fmt;

use crate::core::builtin_models::ModelCatalog;
use crate::core::config::Config;

/// Errors that can occur when modifying configuration settings.
#[derive(Debug, PartialEq, Eq)]
pub enum SettingError {
    UnknownKey(String),
    UnknownModel(String),
    UnknownProvider(String),
    InvalidBoolean(String),
    InvalidNumber { key: &'static str, input: String },
    MissingArgs {
        hint: &'static str,
        example: &'static str,
    },
}

impl fmt::Display for SettingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingError::UnknownKey(key) => write!(f, "❌ Unknown config key: {key}"),
            SettingError::UnknownModel(model) => write!(
                f,
                "❌ Unknown model: {model}. Run 'tutorchat models' to list available models."
            ),
            SettingError::UnknownProvider(provider) => {
                write!(f, "❌ Unknown provider: {provider}. Known providers: glm, doubao")
            }
            SettingError::InvalidBoolean(input) => write!(
                f,
                "❌ Invalid boolean value: {input}\n   Use 'on' or 'off' (also accepts true/false, yes/no)"
            ),
            SettingError::InvalidNumber { key, input } => {
                write!(f, "❌ {key} expects a whole number, got: {input}")
            }
            SettingError::MissingArgs { hint, example } => {
                write!(f, "⚠️  {hint}\nExample: {example}")
            }
        }
    }
}

impl std::error::Error for SettingError {}

fn parse_bool(input: &str) -> Result<bool, SettingError> {
    match input.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        _ => Err(SettingError::InvalidBoolean(input.to_string())),
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, input: &str) -> Result<T, SettingError> {
    input.parse().map_err(|_| SettingError::InvalidNumber {
        key,
        input: input.to_string(),
    })
}

fn known_provider(catalog: &ModelCatalog, input: &str) -> Result<String, SettingError> {
    catalog
        .find_provider(input)
        .map(|provider| provider.id.clone())
        .ok_or_else(|| SettingError::UnknownProvider(input.to_string()))
}

/// Apply `key = values` to `config`. Returns the confirmation line to print.
pub fn set_value(
    config: &mut Config,
    catalog: &ModelCatalog,
    key: &str,
    values: &[String],
) -> Result<String, SettingError> {
    let joined = values.join(" ");
    let missing = |hint, example| SettingError::MissingArgs { hint, example };

    match key {
        "default-model" => {
            if joined.is_empty() {
                return Err(missing(
                    "Specify the model to use by default:",
                    "tutorchat set default-model glm-4-flash",
                ));
            }
            let model = catalog
                .resolve(&joined)
                .map_err(|_| SettingError::UnknownModel(joined.clone()))?;
            config.default_model = Some(model.to_string());
            Ok(format!("✅ Set default-model to: {model}"))
        }
        "deep-thinking" => {
            let enabled = parse_bool(&joined)?;
            config.deep_thinking = Some(enabled);
            Ok(format!(
                "✅ Set deep-thinking to: {}",
                if enabled { "on" } else { "off" }
            ))
        }
        "max-retries" => {
            let retries: u32 = parse_number("max-retries", &joined)?;
            config.max_retries = Some(retries);
            Ok(format!("✅ Set max-retries to: {retries}"))
        }
        "render-interval-ms" => {
            let interval: u64 = parse_number("render-interval-ms", &joined)?;
            config.render_interval_ms = Some(interval);
            Ok(format!("✅ Set render-interval-ms to: {interval}"))
        }
        "connect-timeout-secs" => {
            let secs: u64 = parse_number("connect-timeout-secs", &joined)?;
            config.connect_timeout_secs = Some(secs);
            Ok(format!("✅ Set connect-timeout-secs to: {secs}"))
        }
        "data-dir" => {
            if joined.is_empty() {
                return Err(missing(
                    "Specify the directory for saved conversations:",
                    "tutorchat set data-dir ~/tutorchat",
                ));
            }
            config.data_dir = Some(joined.clone().into());
            Ok(format!("✅ Set data-dir to: {joined}"))
        }
        "api-key" | "base-url" => {
            let (provider, value) = match values {
                [provider, value, ..] => (provider, value),
                _ if key == "api-key" => {
                    return Err(missing(
                        "Specify the provider and the key:",
                        "tutorchat set api-key glm <key>",
                    ))
                }
                _ => {
                    return Err(missing(
                        "Specify the provider and the URL:",
                        "tutorchat set base-url doubao http://localhost:8080/api/v3",
                    ))
                }
            };
            let provider = known_provider(catalog, provider)?;
            let settings = config.provider_mut(&provider);
            if key == "api-key" {
                settings.api_key = Some(value.clone());
                Ok(format!("✅ Set api-key for provider '{provider}'"))
            } else {
                settings.base_url = Some(value.clone());
                Ok(format!("✅ Set base-url for provider '{provider}' to: {value}"))
            }
        }
        _ => Err(SettingError::UnknownKey(key.to_string())),
    }
}

pub fn unset_value(
    config: &mut Config,
    catalog: &ModelCatalog,
    key: &str,
    value: Option<&str>,
) -> Result<String, SettingError> {
    match key {
        "default-model" => config.default_model = None,
        "deep-thinking" => config.deep_thinking = None,
        "max-retries" => config.max_retries = None,
        "render-interval-ms" => config.render_interval_ms = None,
        "connect-timeout-secs" => config.connect_timeout_secs = None,
        "data-dir" => config.data_dir = None,
        "api-key" | "base-url" => {
            let provider = value.ok_or(SettingError::MissingArgs {
                hint: "Specify the provider:",
                example: "tutorchat unset api-key glm",
            })?;
            let provider = known_provider(catalog, provider)?;
            let settings = config.provider_mut(&provider);
            if key == "api-key" {
                settings.api_key = None;
            } else {
                settings.base_url = None;
            }
            if settings.api_key.is_none() && settings.base_url.is_none() {
                config.providers.remove(&provider);
            }
            return Ok(format!("✅ Unset {key} for provider: {provider}"));
        }
        _ => return Err(SettingError::UnknownKey(key.to_string())),
    }
    Ok(format!("✅ Unset {key}"))
}
