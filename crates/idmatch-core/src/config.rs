use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::challenge::Challenge;
use crate::decision::DEFAULT_PASS_THRESHOLD;

/// Qualifying frames needed to complete one challenge.
pub const DEFAULT_REQUIRED_FRAMES: u32 = 30;
/// Maximum embedding distance counted as a match.
pub const DEFAULT_MATCH_TOLERANCE: f32 = 0.6;
/// Consecutive failed frames after which a running session is aborted.
pub const DEFAULT_MAX_CONSECUTIVE_FRAME_FAILURES: u32 = 3;

pub const DEFAULT_CHALLENGES: [&str; 6] = [
    "Look straight at the camera",
    "Turn your head left slowly",
    "Turn your head right slowly",
    "Tilt your head up slightly",
    "Tilt your head down slightly",
    "Look straight again",
];

/// How a frame containing more than one face is scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiFacePolicy {
    /// The frame matches if any of its faces matches the reference.
    #[default]
    AnyMatch,
    /// The frame counts as detected but never as matched.
    RejectAmbiguous,
}

/// Embedding comparison used by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorerKind {
    #[default]
    Euclidean,
    Cosine,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("challenge list is empty")]
    EmptyChallengeList,
    #[error("challenge {index} has an empty instruction")]
    EmptyInstruction { index: usize },
    #[error("required frames per challenge must be at least 1")]
    ZeroRequiredFrames,
    #[error("match tolerance must be a positive finite number (got {0})")]
    InvalidTolerance(f32),
    #[error("pass threshold must be within [0, 1) (got {0})")]
    InvalidPassThreshold(f64),
    #[error("unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

/// Tunables for one verification session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub required_frames_per_challenge: u32,
    /// Lower is stricter.
    pub match_tolerance: f32,
    /// A session passes when its match ratio is strictly greater than this.
    pub pass_threshold: f64,
    /// Instructions, in the order the subject must perform them.
    pub challenges: Vec<String>,
    pub multi_face_policy: MultiFacePolicy,
    /// 0 keeps the session running through any number of failed frames.
    pub max_consecutive_frame_failures: u32,
    pub scorer: ScorerKind,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            required_frames_per_challenge: DEFAULT_REQUIRED_FRAMES,
            match_tolerance: DEFAULT_MATCH_TOLERANCE,
            pass_threshold: DEFAULT_PASS_THRESHOLD,
            challenges: DEFAULT_CHALLENGES.iter().map(|s| s.to_string()).collect(),
            multi_face_policy: MultiFacePolicy::default(),
            max_consecutive_frame_failures: DEFAULT_MAX_CONSECUTIVE_FRAME_FAILURES,
            scorer: ScorerKind::default(),
        }
    }
}

impl VerificationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.challenges.is_empty() {
            return Err(ConfigError::EmptyChallengeList);
        }
        if let Some(index) = self.challenges.iter().position(|c| c.trim().is_empty()) {
            return Err(ConfigError::EmptyInstruction { index });
        }
        if self.required_frames_per_challenge == 0 {
            return Err(ConfigError::ZeroRequiredFrames);
        }
        if !self.match_tolerance.is_finite() || self.match_tolerance <= 0.0 {
            return Err(ConfigError::InvalidTolerance(self.match_tolerance));
        }
        if !(0.0..1.0).contains(&self.pass_threshold) {
            return Err(ConfigError::InvalidPassThreshold(self.pass_threshold));
        }
        Ok(())
    }

    /// Challenges in order, each with the configured frame threshold.
    pub fn challenge_list(&self) -> Vec<Challenge> {
        self.challenges
            .iter()
            .map(|instruction| Challenge::new(instruction.clone(), self.required_frames_per_challenge))
            .collect()
    }
}

impl FromStr for MultiFacePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any_match" | "any" => Ok(Self::AnyMatch),
            "reject_ambiguous" | "reject" => Ok(Self::RejectAmbiguous),
            other => Err(ConfigError::UnknownVariant {
                kind: "multi-face policy",
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for ScorerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(Self::Euclidean),
            "cosine" => Ok(Self::Cosine),
            other => Err(ConfigError::UnknownVariant {
                kind: "scorer",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ScorerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Euclidean => f.write_str("euclidean"),
            Self::Cosine => f.write_str("cosine"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = VerificationConfig::default();
        config.validate().unwrap();
        assert_eq!(config.challenges.len(), 6);
        assert_eq!(config.required_frames_per_challenge, 30);
        assert!((config.match_tolerance - 0.6).abs() < f32::EPSILON);
        assert!((config.pass_threshold - 0.70).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rejects_empty_challenges() {
        let config = VerificationConfig {
            challenges: vec![],
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyChallengeList));
    }

    #[test]
    fn test_rejects_blank_instruction() {
        let config = VerificationConfig {
            challenges: vec!["Look up".into(), "  ".into()],
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::EmptyInstruction { index: 1 })
        );
    }

    #[test]
    fn test_rejects_zero_frames() {
        let config = VerificationConfig {
            required_frames_per_challenge: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroRequiredFrames));
    }

    #[test]
    fn test_rejects_bad_tolerance() {
        for tolerance in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            let config = VerificationConfig {
                match_tolerance: tolerance,
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidTolerance(_))
            ));
        }
    }

    #[test]
    fn test_rejects_bad_pass_threshold() {
        for threshold in [1.0, 1.5, -0.1, f64::NAN] {
            let config = VerificationConfig {
                pass_threshold: threshold,
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidPassThreshold(_))
            ));
        }
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: VerificationConfig = toml::from_str(
            r#"
            required_frames_per_challenge = 10
            multi_face_policy = "reject_ambiguous"
            challenges = ["Look straight", "Blink"]
            "#,
        )
        .unwrap();
        assert_eq!(config.required_frames_per_challenge, 10);
        assert_eq!(config.multi_face_policy, MultiFacePolicy::RejectAmbiguous);
        assert_eq!(config.challenges.len(), 2);
        assert_eq!(config.scorer, ScorerKind::Euclidean);
        assert_eq!(config.max_consecutive_frame_failures, 3);
    }

    #[test]
    fn test_challenge_list_uses_frame_threshold() {
        let config = VerificationConfig {
            required_frames_per_challenge: 5,
            ..Default::default()
        };
        let list = config.challenge_list();
        assert_eq!(list.len(), 6);
        assert!(list.iter().all(|c| c.required_frames == 5));
        assert_eq!(list[1].instruction, "Turn your head left slowly");
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!("cosine".parse::<ScorerKind>().unwrap(), ScorerKind::Cosine);
        assert_eq!(
            "Reject_Ambiguous".parse::<MultiFacePolicy>().unwrap(),
            MultiFacePolicy::RejectAmbiguous
        );
        assert!("manhattan".parse::<ScorerKind>().is_err());
    }
}
