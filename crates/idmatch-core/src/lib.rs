//! idmatch-core: document-to-live face verification with head-pose challenges.
//!
//! A reference embedding is extracted from the front of an identity document,
//! then live frames are scored against it while the subject works through an
//! ordered list of pose challenges. Face detection, embedding extraction and
//! camera access are external collaborators behind the traits in
//! [`provider`] and [`capture`].

pub mod annotate;
pub mod capture;
pub mod challenge;
pub mod config;
pub mod decision;
pub mod provider;
pub mod reference;
pub mod session;
pub mod types;

pub use annotate::FrameAnnotator;
pub use capture::{Camera, CameraError, CameraGuard, FrameReadError, FrameSource};
pub use challenge::{Advance, Challenge, ChallengeProgress, ChallengeSequencer};
pub use config::{ConfigError, MultiFacePolicy, ScorerKind, VerificationConfig};
pub use decision::{Decision, SessionStats, DEFAULT_PASS_THRESHOLD};
pub use provider::{
    scorer_for, CosineScorer, EmbeddingProvider, EuclideanScorer, MatchScore, MatchScorer,
    ProviderError,
};
pub use reference::{extract_reference, ReferenceError, ReferenceFace};
pub use session::{
    FaceReport, FrameReport, Progress, SessionError, SessionState, VerificationSession,
};
pub use types::{BoundingBox, DetectedFace, Embedding, Frame};
