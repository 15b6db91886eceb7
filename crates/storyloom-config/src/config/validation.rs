use storyloom_utils::ConfigError;

use super::Config;

/// Provider names the backend factory can build.
pub const KNOWN_PROVIDERS: &[&str] = &["openrouter"];

const MAX_REVISION_CEILING: u32 = 20;

fn invalid(key: &str, value: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.into(),
    }
}

impl Config {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(threshold) = self.generation.quality_threshold
            && threshold > 100
        {
            return Err(invalid(
                "quality_threshold",
                format!("{threshold} exceeds maximum of 100"),
            ));
        }

        if let Some(attempts) = self.generation.extraction_attempts
            && !(1..=10).contains(&attempts)
        {
            return Err(invalid(
                "extraction_attempts",
                format!("{attempts} must be between 1 and 10"),
            ));
        }

        if self.generation.max_chapters == Some(0) {
            return Err(invalid("max_chapters", "must be at least 1"));
        }

        for (min_key, min, max_key, max) in [
            (
                "outline_min",
                self.revisions.outline_min,
                "outline_max",
                self.revisions.outline_max,
            ),
            (
                "chapter_min",
                self.revisions.chapter_min,
                "chapter_max",
                self.revisions.chapter_max,
            ),
        ] {
            let (min, max) = (min.unwrap_or(0), max.unwrap_or(0));
            if max > MAX_REVISION_CEILING {
                return Err(invalid(
                    max_key,
                    format!("{max} exceeds maximum limit of {MAX_REVISION_CEILING}"),
                ));
            }
            if min > max {
                return Err(invalid(
                    min_key,
                    format!("{min} is greater than {max_key} ({max})"),
                ));
            }
        }

        if let Some(timeout) = self.llm.timeout_secs {
            if timeout < 5 {
                return Err(invalid("llm_timeout_secs", "must be at least 5 seconds"));
            }
            if timeout > 7200 {
                return Err(invalid(
                    "llm_timeout_secs",
                    "exceeds maximum limit of 7200 seconds (2 hours)",
                ));
            }
        }

        let provider = self.provider();
        if !KNOWN_PROVIDERS.contains(&provider) {
            return Err(invalid(
                "llm_provider",
                format!(
                    "unknown provider '{provider}'; supported: {}",
                    KNOWN_PROVIDERS.join(", ")
                ),
            ));
        }

        if let Some(temperature) = self.llm.openrouter.as_ref().and_then(|o| o.temperature)
            && !(0.0..=2.0).contains(&temperature)
        {
            return Err(invalid(
                "llm_temperature",
                format!("{temperature} must be between 0.0 and 2.0"),
            ));
        }

        Ok(())
    }
}
