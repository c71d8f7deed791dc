//! Ordered head-pose challenges and progress through them.
//!
//! Completion is purely frame-count based: each qualifying frame (one with a
//! detected face) counts toward the current challenge regardless of the pose
//! actually shown. The instruction is directive only; the pose itself is not
//! checked against the frame content.

use serde::Serialize;

/// One step of the liveness sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Challenge {
    pub instruction: String,
    /// Qualifying frames needed to complete this step.
    pub required_frames: u32,
}

impl Challenge {
    pub fn new(instruction: impl Into<String>, required_frames: u32) -> Self {
        Self {
            instruction: instruction.into(),
            required_frames,
        }
    }
}

/// Position within the challenge list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ChallengeProgress {
    /// 0-based; equals the challenge count once all are done.
    pub index: usize,
    /// Qualifying frames counted toward the current challenge.
    pub step_frames: u32,
}

/// Outcome of a single [`ChallengeSequencer::advance`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Counted a frame; the current challenge is still open.
    Stepped,
    /// The challenge at `index` is done and the next one is now current.
    ChallengeCompleted { index: usize },
    /// The last challenge just completed.
    Exhausted,
    /// Nothing left to advance.
    AlreadyExhausted,
}

#[derive(Debug, Clone)]
pub struct ChallengeSequencer {
    challenges: Vec<Challenge>,
    progress: ChallengeProgress,
}

impl ChallengeSequencer {
    pub fn new(challenges: Vec<Challenge>) -> Self {
        Self {
            challenges,
            progress: ChallengeProgress::default(),
        }
    }

    /// The challenge the subject should perform now, or `None` once exhausted.
    pub fn current(&self) -> Option<&Challenge> {
        self.challenges.get(self.progress.index)
    }

    /// Count one qualifying frame toward the current challenge.
    ///
    /// This is the only place a challenge is marked complete. The index moves
    /// forward by at most one per call and never moves back.
    pub fn advance(&mut self) -> Advance {
        let Some(challenge) = self.challenges.get(self.progress.index) else {
            return Advance::AlreadyExhausted;
        };
        let required = challenge.required_frames.max(1);

        self.progress.step_frames += 1;
        if self.progress.step_frames < required {
            return Advance::Stepped;
        }

        let completed = self.progress.index;
        self.progress.step_frames = 0;
        self.progress.index += 1;

        if self.is_exhausted() {
            Advance::Exhausted
        } else {
            Advance::ChallengeCompleted { index: completed }
        }
    }

    pub fn progress(&self) -> ChallengeProgress {
        self.progress
    }

    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }

    pub fn is_exhausted(&self) -> bool {
        self.progress.index >= self.challenges.len()
    }

    /// Overall completion in percent:
    /// `(index + step_frames / required_frames) / total * 100`, capped at 100.
    pub fn percent(&self) -> f32 {
        let total = self.challenges.len();
        if total == 0 || self.is_exhausted() {
            return 100.0;
        }
        let step = match self.current() {
            Some(c) => self.progress.step_frames as f32 / c.required_frames.max(1) as f32,
            None => 0.0,
        };
        ((self.progress.index as f32 + step) / total as f32 * 100.0).min(100.0)
    }

    pub fn reset(&mut self) {
        self.progress = ChallengeProgress::default();
    }
}
