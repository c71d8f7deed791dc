//! Collaborator seams: face detection/embedding and embedding comparison.
//!
//! Neither trait is implemented against a real model in this crate. Callers
//! inject their own detector; the two scorers below cover the common
//! distance conventions (dlib-style Euclidean and ArcFace-style cosine).

use thiserror::Error;

use crate::config::ScorerKind;
use crate::types::{DetectedFace, Embedding, Frame};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Detects faces in a frame and computes one embedding per detected face.
pub trait EmbeddingProvider: Send {
    /// Returns faces in detector order. An empty vector means no face.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, ProviderError>;
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<P> {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, ProviderError> {
        (**self).detect(frame)
    }
}

/// Distance between two embeddings and the resulting match decision.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct MatchScore {
    pub distance: f32,
    pub matched: bool,
}

impl MatchScore {
    fn incomparable() -> Self {
        Self {
            distance: f32::INFINITY,
            matched: false,
        }
    }
}

/// Decides whether a candidate embedding belongs to the reference face.
///
/// `tolerance` is a maximum distance: lower values are stricter.
pub trait MatchScorer: Send {
    fn score(&self, reference: &Embedding, candidate: &Embedding, tolerance: f32) -> MatchScore;
}

impl<S: MatchScorer + ?Sized> MatchScorer for Box<S> {
    fn score(&self, reference: &Embedding, candidate: &Embedding, tolerance: f32) -> MatchScore {
        (**self).score(reference, candidate, tolerance)
    }
}

/// L2 distance; a match when `distance <= tolerance`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanScorer;

impl MatchScorer for EuclideanScorer {
    fn score(&self, reference: &Embedding, candidate: &Embedding, tolerance: f32) -> MatchScore {
        if reference.dim() != candidate.dim() || reference.dim() == 0 {
            return MatchScore::incomparable();
        }
        let distance = reference
            .values()
            .iter()
            .zip(candidate.values())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt();
        MatchScore {
            distance,
            matched: distance <= tolerance,
        }
    }
}

/// Cosine distance (`1 - cos θ`, range 0..=2); a match when `distance <= tolerance`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineScorer;

impl MatchScorer for CosineScorer {
    fn score(&self, reference: &Embedding, candidate: &Embedding, tolerance: f32) -> MatchScore {
        if reference.dim() != candidate.dim() || reference.dim() == 0 {
            return MatchScore::incomparable();
        }
        let mut dot = 0.0f32;
        let mut norm_r = 0.0f32;
        let mut norm_c = 0.0f32;
        for (r, c) in reference.values().iter().zip(candidate.values()) {
            dot += r * c;
            norm_r += r * r;
            norm_c += c * c;
        }
        let denom = norm_r.sqrt() * norm_c.sqrt();
        if denom == 0.0 {
            return MatchScore::incomparable();
        }
        let distance = 1.0 - dot / denom;
        MatchScore {
            distance,
            matched: distance <= tolerance,
        }
    }
}

/// Build the scorer selected in configuration.
pub fn scorer_for(kind: ScorerKind) -> Box<dyn MatchScorer> {
    match kind {
        ScorerKind::Euclidean => Box::new(EuclideanScorer),
        ScorerKind::Cosine => Box::new(CosineScorer),
    }
}
