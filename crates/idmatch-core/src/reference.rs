use serde::Serialize;
use thiserror::Error;

use crate::provider::{EmbeddingProvider, ProviderError};
use crate::types::{BoundingBox, Embedding, Frame};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReferenceError {
    #[error("no face detected in document image")]
    NoFaceDetected,
    #[error("detector error: {0}")]
    Provider(#[from] ProviderError),
    #[error("invalid reference embedding (empty or NaN/Inf)")]
    InvalidEmbedding,
}

/// Embedding taken from the front of the identity document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceFace {
    pub embedding: Embedding,
    pub bbox: BoundingBox,
    pub confidence: f32,
    /// Number of faces the detector reported on the document.
    pub faces_in_document: usize,
}

/// Extract the reference face from a document image.
///
/// The first face in detector order is used; faces are not re-ranked by
/// size or confidence. There is no retry: on failure the caller has to
/// supply a new image.
pub fn extract_reference<P>(provider: &mut P, document: &Frame) -> Result<ReferenceFace, ReferenceError>
where
    P: EmbeddingProvider + ?Sized,
{
    let faces = provider.detect(document)?;
    let faces_in_document = faces.len();
    let Some(face) = faces.into_iter().next() else {
        tracing::warn!(
            width = document.width,
            height = document.height,
            "reference: no face detected in document"
        );
        return Err(ReferenceError::NoFaceDetected);
    };

    if face.embedding.dim() == 0 || !face.embedding.is_finite() {
        return Err(ReferenceError::InvalidEmbedding);
    }

    if faces_in_document > 1 {
        tracing::info!(
            faces = faces_in_document,
            "reference: several faces on document, using the first"
        );
    }
    tracing::info!(
        confidence = face.confidence,
        dim = face.embedding.dim(),
        "reference: face extracted"
    );

    Ok(ReferenceFace {
        embedding: face.embedding,
        bbox: face.bbox,
        confidence: face.confidence,
        faces_in_document,
    })
}
