//! The verification state machine.
//!
//! ```text
//! Idle ──start──▶ Running ──last challenge done──▶ Completed (Decision)
//!                    │
//!                    ├──stop──────────────────────▶ Stopped
//!                    └──too many failed frames────▶ Aborted
//!                       or source ended
//! ```
//!
//! A session is driven one frame at a time by its owner. It never sleeps,
//! never touches the camera and never draws; callers read [`Progress`]
//! snapshots for display. A stop request takes effect between frames, since
//! `ingest` runs to completion once called.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::challenge::{Advance, ChallengeSequencer};
use crate::config::{ConfigError, MultiFacePolicy, VerificationConfig};
use crate::decision::{Decision, SessionStats};
use crate::provider::{EmbeddingProvider, MatchScorer};
use crate::reference::ReferenceFace;
use crate::types::{BoundingBox, Frame};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("no reference face registered; extract one from the document first")]
    NotRegistered,
    #[error("a verification session is already running")]
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Completed,
    Stopped,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Aborted)
    }
}

/// Score of one face within a frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceReport {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub distance: f32,
    pub matched: bool,
}

/// What happened to the most recently ingested frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FrameReport {
    pub sequence: u64,
    pub faces: Vec<FaceReport>,
    /// Whether the frame counted toward `matched_frames`.
    pub matched: bool,
    /// Set when the frame could not be read or analysed.
    pub failure: Option<String>,
}

/// Read-only view of a session, produced after every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub session_id: Option<Uuid>,
    pub state: SessionState,
    /// Current instruction while running.
    pub instruction: Option<String>,
    pub challenge_index: usize,
    pub total_challenges: usize,
    pub step_frames: u32,
    pub required_frames: u32,
    /// 0..=100.
    pub percent: f32,
    pub stats: SessionStats,
    pub frame: Option<FrameReport>,
    pub decision: Option<Decision>,
    pub abort_reason: Option<String>,
}

impl Progress {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

pub struct VerificationSession<P, S> {
    config: VerificationConfig,
    provider: P,
    scorer: S,
    sequencer: ChallengeSequencer,
    reference: Option<ReferenceFace>,
    stats: SessionStats,
    state: SessionState,
    session_id: Option<Uuid>,
    decision: Option<Decision>,
    abort_reason: Option<String>,
}

impl<P: EmbeddingProvider, S: MatchScorer> VerificationSession<P, S> {
    pub fn new(config: VerificationConfig, provider: P, scorer: S) -> Result<Self, ConfigError> {
        config.validate()?;
        let sequencer = ChallengeSequencer::new(config.challenge_list());
        Ok(Self {
            config,
            provider,
            scorer,
            sequencer,
            reference: None,
            stats: SessionStats::default(),
            state: SessionState::Idle,
            session_id: None,
            decision: None,
            abort_reason: None,
        })
    }

    /// Begin a new attempt against `reference`.
    ///
    /// Any finished session is discarded. Fails without changing state when
    /// no reference is given or a session is already running.
    pub fn start(&mut self, reference: Option<&ReferenceFace>) -> Result<Progress, SessionError> {
        if self.state == SessionState::Running {
            return Err(SessionError::AlreadyRunning);
        }
        let Some(reference) = reference else {
            tracing::warn!("session start refused: no reference face");
            return Err(SessionError::NotRegistered);
        };

        let session_id = Uuid::new_v4();
        self.reference = Some(reference.clone());
        self.stats = SessionStats::default();
        self.sequencer.reset();
        self.decision = None;
        self.abort_reason = None;
        self.session_id = Some(session_id);
        self.state = SessionState::Running;

        tracing::info!(
            session = %session_id,
            challenges = self.sequencer.len(),
            required_frames = self.config.required_frames_per_challenge,
            tolerance = self.config.match_tolerance,
            "session started"
        );
        Ok(self.snapshot(None))
    }

    /// Analyse one live frame. A no-op unless the session is running.
    pub fn ingest(&mut self, frame: &Frame) -> Progress {
        if self.state != SessionState::Running {
            return self.snapshot(None);
        }
        self.stats.frames_seen += 1;

        let faces = match self.provider.detect(frame) {
            Ok(faces) => faces,
            Err(e) => return self.fail_frame(frame.sequence, e.to_string()),
        };
        self.stats.consecutive_failures = 0;

        if faces.is_empty() {
            let report = FrameReport {
                sequence: frame.sequence,
                ..Default::default()
            };
            return self.snapshot(Some(report));
        }

        let Some(reference) = self.reference.as_ref() else {
            return self.snapshot(None);
        };
        let tolerance = self.config.match_tolerance;
        let reports: Vec<FaceReport> = faces
            .iter()
            .map(|face| {
                let score = self
                    .scorer
                    .score(&reference.embedding, &face.embedding, tolerance);
                FaceReport {
                    bbox: face.bbox,
                    confidence: face.confidence,
                    distance: score.distance,
                    matched: score.matched,
                }
            })
            .collect();

        let ambiguous = reports.len() > 1;
        let any_match = reports.iter().any(|r| r.matched);
        let frame_matched = match self.config.multi_face_policy {
            MultiFacePolicy::AnyMatch => any_match,
            MultiFacePolicy::RejectAmbiguous => any_match && !ambiguous,
        };

        self.stats.detected_frames += 1;
        if ambiguous {
            self.stats.ambiguous_frames += 1;
        }
        if frame_matched {
            self.stats.matched_frames += 1;
        }
        debug_assert!(self.stats.detected_frames >= self.stats.matched_frames);

        tracing::trace!(
            sequence = frame.sequence,
            faces = reports.len(),
            matched = frame_matched,
            "frame scored"
        );

        match self.sequencer.advance() {
            Advance::ChallengeCompleted { index } => {
                tracing::info!(
                    challenge = index,
                    next = self.sequencer.current().map(|c| c.instruction.as_str()),
                    "challenge completed"
                );
            }
            Advance::Exhausted => self.complete(),
            Advance::Stepped | Advance::AlreadyExhausted => {}
        }

        let report = FrameReport {
            sequence: frame.sequence,
            faces: reports,
            matched: frame_matched,
            failure: None,
        };
        self.snapshot(Some(report))
    }

    /// Record a frame that could not be read. Treated as a frame without a
    /// face; enough of them in a row abort the session.
    pub fn record_frame_failure(&mut self, sequence: u64, reason: &str) -> Progress {
        if self.state != SessionState::Running {
            return self.snapshot(None);
        }
        self.stats.frames_seen += 1;
        self.fail_frame(sequence, reason.to_string())
    }

    /// End a running session without a decision. Accumulated stats remain
    /// readable. A no-op in any other state.
    pub fn stop(&mut self) -> Progress {
        if self.state == SessionState::Running {
            self.state = SessionState::Stopped;
            tracing::info!(
                session = ?self.session_id,
                detected = self.stats.detected_frames,
                matched = self.stats.matched_frames,
                "session stopped"
            );
        }
        self.snapshot(None)
    }

    /// End a running session because the frame source cannot continue.
    /// No decision is made. A no-op in any other state.
    pub fn abort(&mut self, reason: &str) -> Progress {
        if self.state == SessionState::Running {
            self.mark_aborted(reason.to_string());
        }
        self.snapshot(None)
    }

    pub fn progress(&self) -> Progress {
        self.snapshot(None)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn decision(&self) -> Option<&Decision> {
        self.decision.as_ref()
    }

    /// The detector, for extracting a reference face from a document.
    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    fn fail_frame(&mut self, sequence: u64, reason: String) -> Progress {
        self.stats.failed_frames += 1;
        self.stats.consecutive_failures += 1;
        let limit = self.config.max_consecutive_frame_failures;

        tracing::warn!(
            sequence,
            consecutive = self.stats.consecutive_failures,
            limit,
            reason = %reason,
            "frame failed"
        );

        if limit > 0 && self.stats.consecutive_failures >= limit {
            self.mark_aborted(format!(
                "{} consecutive frame failures, last: {reason}",
                self.stats.consecutive_failures
            ));
        }

        let report = FrameReport {
            sequence,
            failure: Some(reason),
            ..Default::default()
        };
        self.snapshot(Some(report))
    }

    fn mark_aborted(&mut self, reason: String) {
        tracing::error!(session = ?self.session_id, reason = %reason, "session aborted");
        self.state = SessionState::Aborted;
        self.abort_reason = Some(reason);
    }

    fn complete(&mut self) {
        let Some(session_id) = self.session_id else {
            return;
        };
        let decision = Decision::from_stats(session_id, self.stats, self.config.pass_threshold);
        tracing::info!(
            session = %session_id,
            ratio = decision.ratio,
            passed = decision.passed,
            matched = decision.matched_frames,
            detected = decision.detected_frames,
            "session completed"
        );
        self.state = SessionState::Completed;
        self.decision = Some(decision);
    }

    fn snapshot(&self, frame: Option<FrameReport>) -> Progress {
        let progress = self.sequencer.progress();
        let (instruction, required_frames) = match self.sequencer.current() {
            Some(c) => (Some(c.instruction.clone()), c.required_frames),
            None => (None, 0),
        };
        let percent = match self.state {
            SessionState::Idle => 0.0,
            SessionState::Completed => 100.0,
            _ => self.sequencer.percent(),
        };
        Progress {
            session_id: self.session_id,
            state: self.state,
            instruction: instruction.filter(|_| self.state == SessionState::Running),
            challenge_index: progress.index,
            total_challenges: self.sequencer.len(),
            step_frames: progress.step_frames,
            required_frames,
            percent,
            stats: self.stats,
            frame,
            decision: self.decision.clone(),
            abort_reason: self.abort_reason.clone(),
        }
    }
}
