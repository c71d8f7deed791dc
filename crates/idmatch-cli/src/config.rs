use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use idmatch_core::VerificationConfig;

/// CLI configuration: an optional TOML file, then `IDMATCH_*` overrides.
pub struct Config {
    /// File the base configuration was read from, if any.
    pub source: Option<PathBuf>,
    pub verification: VerificationConfig,
}

impl Config {
    /// Load from `IDMATCH_CONFIG` (TOML) and `IDMATCH_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = lookup("IDMATCH_CONFIG").map(PathBuf::from);
        let mut verification = match &source {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                toml::from_str(&text)
                    .with_context(|| format!("failed to parse config {}", path.display()))?
            }
            None => VerificationConfig::default(),
        };

        let v = &mut verification;
        v.required_frames_per_challenge =
            env_or(&lookup, "IDMATCH_REQUIRED_FRAMES", v.required_frames_per_challenge);
        v.match_tolerance = env_or(&lookup, "IDMATCH_MATCH_TOLERANCE", v.match_tolerance);
        v.pass_threshold = env_or(&lookup, "IDMATCH_PASS_THRESHOLD", v.pass_threshold);
        v.max_consecutive_frame_failures = env_or(
            &lookup,
            "IDMATCH_MAX_FRAME_FAILURES",
            v.max_consecutive_frame_failures,
        );
        v.multi_face_policy = env_or(&lookup, "IDMATCH_MULTI_FACE_POLICY", v.multi_face_policy);
        v.scorer = env_or(&lookup, "IDMATCH_SCORER", v.scorer);

        verification
            .validate()
            .context("invalid verification configuration")?;

        Ok(Self {
            source,
            verification,
        })
    }
}

/// Parse `key` if set; keep `default` (with a warning) when the value is unparsable.
fn env_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            default
        }
    }
}
