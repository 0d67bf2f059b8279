//! Configuration and environment variable validation.
//!
//! Validation runs once at startup: every registered
//! [`EnvVarSpec`] is checked, problems are *collected* rather than
//! reported one at a time, and [`ConfigValidator::validate_all`] raises a
//! single multi-line [`ConfigValidationError`] so operators see the whole
//! damage at once. Warnings (e.g. a provider selected without its API key)
//! are logged but do not fail startup.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;

/// Specification for one environment variable.
pub struct EnvVarSpec {
    pub name: &'static str,
    pub required: bool,
    pub default: Option<&'static str>,
    /// Custom predicate; a `false` return marks the value invalid.
    pub validator: Option<fn(&str) -> bool>,
    pub description: &'static str,
    /// Sensitive values are masked in logs.
    pub sensitive: bool,
}

impl EnvVarSpec {
    /// Spec with no default, validator, or sensitivity.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            required: false,
            default: None,
            validator: None,
            description: "",
            sensitive: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_validator(mut self, validator: fn(&str) -> bool) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}

/// Raised when configuration validation fails; carries every collected
/// problem.
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub errors: Vec<String>,
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Environment validation failed:")?;
        for err in &self.errors {
            writeln!(f, "  - {}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigValidationError {}

/// Collects env-var checks and raises them as one error.
#[derive(Default)]
pub struct ConfigValidator {
    errors: Vec<String>,
    warnings: Vec<String>,
    validated_vars: HashMap<String, String>,
}

impl ConfigValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning surfaced during validation.
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Check one environment variable against its spec.
    pub fn add_env_var(&mut self, spec: EnvVarSpec) {
        let value = std::env::var(spec.name)
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| spec.default.map(String::from));

        let value = match value {
            Some(value) => value,
            None => {
                if spec.required {
                    self.errors.push(format!(
                        "Required environment variable '{}' is not set",
                        spec.name
                    ));
                } else if !spec.description.is_empty() {
                    debug!(
                        "Optional env var '{}' not set: {}",
                        spec.name, spec.description
                    );
                }
                return;
            }
        };

        if let Some(validator) = spec.validator {
            if !validator(&value) {
                self.errors.push(format!(
                    "Environment variable '{}' has invalid value",
                    spec.name
                ));
                return;
            }
        }

        let display_value = if spec.sensitive { "***" } else { value.as_str() };
        info!("Validated env var '{}': {}", spec.name, display_value);
        self.validated_vars.insert(spec.name.to_string(), value);
    }

    /// Raise every collected error at once, or return the validated map.
    pub fn validate_all(self) -> Result<HashMap<String, String>, ConfigValidationError> {
        if !self.errors.is_empty() {
            return Err(ConfigValidationError { errors: self.errors });
        }
        for warning in &self.warnings {
            warn!("{}", warning);
        }
        info!(
            "Environment validation successful: {} variables validated",
            self.validated_vars.len()
        );
        Ok(self.validated_vars)
    }

    /// Errors collected so far (for tests).
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Warnings collected so far.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

fn is_http_url(v: &str) -> bool {
    v.starts_with("http://") || v.starts_with("https://")
}

fn is_bool_flag(v: &str) -> bool {
    matches!(
        v.to_ascii_lowercase().as_str(),
        "true" | "false" | "1" | "0" | "yes" | "no"
    )
}

fn is_fernet_key(v: &str) -> bool {
    v.len() == 44 && v.ends_with('=')
}

fn is_known_provider(v: &str) -> bool {
    matches!(v, "openai" | "anthropic" | "xai" | "openai_compat" | "local")
}

fn is_positive_sol_cap(v: &str) -> bool {
    v.parse::<f64>().map(|x| x > 0.0 && x <= 100.0).unwrap_or(false)
}

/// Create the validator for SAM framework configuration.
pub fn create_sam_config_validator() -> ConfigValidator {
    let mut validator = ConfigValidator::new();

    validator.add_env_var(
        EnvVarSpec::new("SAM_FERNET_KEY")
            .required()
            .with_validator(is_fernet_key)
            .with_description("Encryption key for secure wallet storage")
            .sensitive(),
    );

    validator.add_env_var(
        EnvVarSpec::new("LLM_PROVIDER")
            .with_default("openai")
            .with_validator(is_known_provider)
            .with_description("LLM provider to use for AI operations"),
    );

    validator.add_env_var(
        EnvVarSpec::new("SAM_SOLANA_RPC_URL")
            .with_default("https://api.mainnet-beta.solana.com")
            .with_validator(is_http_url)
            .with_description("Solana RPC endpoint URL"),
    );

    validator.add_env_var(
        EnvVarSpec::new("RATE_LIMITING_ENABLED")
            .with_default("true")
            .with_validator(is_bool_flag)
            .with_description("Enable/disable rate limiting for API calls"),
    );

    validator.add_env_var(
        EnvVarSpec::new("MAX_TRANSACTION_SOL")
            .with_default("1.0")
            .with_validator(is_positive_sol_cap)
            .with_description("Maximum SOL amount per transaction"),
    );

    validator.add_env_var(
        EnvVarSpec::new("BRAVE_API_KEY")
            .with_validator(|v| v.len() > 10)
            .with_description("Brave Search API key for web search functionality")
            .sensitive(),
    );

    // Conditional requirements: the selected provider should have its key.
    let provider = std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
    let missing = |name: &str| std::env::var(name).map(|v| v.is_empty()).unwrap_or(true);
    match provider.as_str() {
        "openai" | "openai_compat" if missing("OPENAI_API_KEY") => {
            validator.add_warning(format!(
                "LLM_PROVIDER is '{}' but OPENAI_API_KEY is not set",
                provider
            ));
        }
        "anthropic" if missing("ANTHROPIC_API_KEY") => {
            validator.add_warning("LLM_PROVIDER is 'anthropic' but ANTHROPIC_API_KEY is not set");
        }
        "xai" if missing("XAI_API_KEY") => {
            validator.add_warning("LLM_PROVIDER is 'xai' but XAI_API_KEY is not set");
        }
        _ => {}
    }

    validator
}

/// A validated numeric configuration value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValidatedNumber {
    Integer(i64),
    Float(f64),
}

/// Validate known numeric values against their expected ranges.
pub fn validate_numeric_ranges(
    values: &HashMap<String, String>,
) -> Result<HashMap<String, ValidatedNumber>, ConfigValidationError> {
    enum Kind {
        Int,
        Float,
    }
    let ranges: [(&str, f64, f64, Kind); 5] = [
        ("MAX_TRANSACTION_SOL", 0.001, 100.0, Kind::Float),
        ("DEFAULT_SLIPPAGE", 1.0, 50.0, Kind::Int),
        ("MAX_RETRIES", 1.0, 10.0, Kind::Int),
        ("TIMEOUT_SECONDS", 5.0, 300.0, Kind::Int),
        ("POOL_SIZE", 1.0, 20.0, Kind::Int),
    ];

    let mut validated = HashMap::new();
    for (name, min, max, kind) in ranges {
        let Some(raw) = values.get(name) else { continue };
        let parsed = match kind {
            Kind::Int => raw
                .parse::<i64>()
                .map(ValidatedNumber::Integer)
                .map_err(|e| e.to_string()),
            Kind::Float => raw
                .parse::<f64>()
                .map(ValidatedNumber::Float)
                .map_err(|e| e.to_string()),
        };
        let value = parsed.map_err(|e| ConfigValidationError {
            errors: vec![format!("Invalid numeric value for '{}': {}", name, e)],
        })?;
        let as_float = match value {
            ValidatedNumber::Integer(v) => v as f64,
            ValidatedNumber::Float(v) => v,
        };
        if as_float < min || as_float > max {
            return Err(ConfigValidationError {
                errors: vec![format!(
                    "{} must be between {} and {}, got {}",
                    name, min, max, as_float
                )],
            });
        }
        debug!("Validated numeric value '{}': {}", name, as_float);
        validated.insert(name.to_string(), value);
    }

    Ok(validated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fernet_key_format() {
        assert!(is_fernet_key(&format!("{}=", "a".repeat(43))));
        assert!(!is_fernet_key("short="));
        assert!(!is_fernet_key(&"a".repeat(44)));
    }

    #[test]
    fn test_errors_are_collected_not_raised_eagerly() {
        let mut v = ConfigValidator::new();
        v.add_env_var(EnvVarSpec::new("SAM_TEST_SURELY_UNSET_A").required());
        v.add_env_var(EnvVarSpec::new("SAM_TEST_SURELY_UNSET_B").required());
        assert_eq!(v.errors().len(), 2);

        let err = v.validate_all().unwrap_err();
        assert_eq!(err.errors.len(), 2);
        let rendered = err.to_string();
        assert!(rendered.contains("SAM_TEST_SURELY_UNSET_A"));
        assert!(rendered.contains("SAM_TEST_SURELY_UNSET_B"));
    }

    #[test]
    fn test_default_applies_when_unset() {
        let mut v = ConfigValidator::new();
        v.add_env_var(
            EnvVarSpec::new("SAM_TEST_DEFAULTED")
                .with_default("fallback")
                .with_validator(|s| s == "fallback"),
        );
        let vars = v.validate_all().unwrap();
        assert_eq!(vars.get("SAM_TEST_DEFAULTED").map(String::as_str), Some("fallback"));
    }

    #[test]
    fn test_numeric_ranges() {
        let mut values = HashMap::new();
        values.insert("DEFAULT_SLIPPAGE".to_string(), "5".to_string());
        values.insert("MAX_TRANSACTION_SOL".to_string(), "0.5".to_string());
        let validated = validate_numeric_ranges(&values).unwrap();
        assert_eq!(
            validated.get("DEFAULT_SLIPPAGE"),
            Some(&ValidatedNumber::Integer(5))
        );
        assert_eq!(
            validated.get("MAX_TRANSACTION_SOL"),
            Some(&ValidatedNumber::Float(0.5))
        );
    }

    #[test]
    fn test_numeric_out_of_range() {
        let mut values = HashMap::new();
        values.insert("DEFAULT_SLIPPAGE".to_string(), "90".to_string());
        assert!(validate_numeric_ranges(&values).is_err());

        values.insert("DEFAULT_SLIPPAGE".to_string(), "nope".to_string());
        assert!(validate_numeric_ranges(&values).is_err());
    }
}
