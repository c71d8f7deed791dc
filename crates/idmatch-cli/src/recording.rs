//! Recorded detections: replays a captured verification without a camera
//! or a face model.
//!
//! A recording lists the detector output for the document image and for
//! each live frame in capture order. Frames that failed to read are kept as
//! `read_error` entries so the failure handling replays too.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use idmatch_core::{
    BoundingBox, Camera, CameraError, DetectedFace, Embedding, EmbeddingProvider, Frame,
    FrameReadError, FrameSource, ProviderError,
};
use serde::Deserialize;

fn default_canvas() -> [u32; 2] {
    [640, 480]
}

fn default_confidence() -> f32 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordedFace {
    /// `[x, y, width, height]` in pixels.
    pub bbox: [f32; 4],
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    pub embedding: Vec<f32>,
}

impl RecordedFace {
    fn to_detected(&self) -> DetectedFace {
        let [x, y, width, height] = self.bbox;
        DetectedFace {
            bbox: BoundingBox::new(x, y, width, height),
            confidence: self.confidence,
            embedding: Embedding::new(self.embedding.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordedFrame {
    #[serde(default)]
    pub faces: Vec<RecordedFace>,
    /// The frame could not be read; `faces` is ignored.
    pub read_error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Recording {
    /// Frame size `[width, height]`.
    #[serde(default = "default_canvas")]
    pub canvas: [u32; 2],
    pub document: Vec<RecordedFace>,
    pub frames: Vec<RecordedFrame>,
}

impl Recording {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read recording {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid recording {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Blank document frame (sequence 0) at the recording's canvas size.
    pub fn document_frame(&self) -> Frame {
        Frame::blank(self.canvas[0], self.canvas[1], 0)
    }

    /// Detector answering from the recording by frame sequence number.
    pub fn provider(&self) -> RecordedProvider {
        let mut detections = HashMap::with_capacity(self.frames.len() + 1);
        detections.insert(
            0,
            self.document.iter().map(RecordedFace::to_detected).collect(),
        );
        for (i, frame) in self.frames.iter().enumerate() {
            if frame.read_error.is_none() {
                detections.insert(
                    i as u64 + 1,
                    frame.faces.iter().map(RecordedFace::to_detected).collect(),
                );
            }
        }
        RecordedProvider { detections }
    }

    /// Camera yielding one blank canvas per recorded frame, optionally paced.
    pub fn camera(&self, interval: Option<Duration>) -> ReplayCamera {
        ReplayCamera {
            read_errors: Arc::new(self.frames.iter().map(|f| f.read_error.clone()).collect()),
            canvas: self.canvas,
            interval,
        }
    }
}

pub struct RecordedProvider {
    detections: HashMap<u64, Vec<DetectedFace>>,
}

impl EmbeddingProvider for RecordedProvider {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, ProviderError> {
        Ok(self
            .detections
            .get(&frame.sequence)
            .cloned()
            .unwrap_or_default())
    }
}

pub struct ReplayCamera {
    read_errors: Arc<Vec<Option<String>>>,
    canvas: [u32; 2],
    interval: Option<Duration>,
}

impl Camera for ReplayCamera {
    fn open(&mut self) -> Result<Box<dyn FrameSource>, CameraError> {
        if self.canvas[0] == 0 || self.canvas[1] == 0 {
            return Err(CameraError::Unavailable(format!(
                "invalid canvas {}x{}",
                self.canvas[0], self.canvas[1]
            )));
        }
        Ok(Box::new(ReplaySource {
            read_errors: self.read_errors.clone(),
            canvas: self.canvas,
            interval: self.interval,
            cursor: 0,
        }))
    }
}

struct ReplaySource {
    read_errors: Arc<Vec<Option<String>>>,
    canvas: [u32; 2],
    interval: Option<Duration>,
    cursor: usize,
}

impl FrameSource for ReplaySource {
    fn read_frame(&mut self) -> Result<Frame, FrameReadError> {
        let Some(entry) = self.read_errors.get(self.cursor) else {
            return Err(FrameReadError::EndOfStream);
        };
        if let Some(interval) = self.interval {
            std::thread::sleep(interval);
        }
        self.cursor += 1;
        match entry {
            Some(reason) => Err(FrameReadError::Device(reason.clone())),
            None => Ok(Frame::blank(self.canvas[0], self.canvas[1], self.cursor as u64)),
        }
    }

    fn release(&mut self) {
        tracing::debug!(frames = self.cursor, "replay source released");
    }
}
