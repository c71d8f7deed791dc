use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Match ratio a session must strictly exceed to pass.
pub const DEFAULT_PASS_THRESHOLD: f64 = 0.70;

/// Running frame counts for one session.
///
/// All counters only grow while the session runs, except
/// `consecutive_failures`, which resets on every successful frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SessionStats {
    /// Every frame handed to the session, including failed reads.
    pub frames_seen: u64,
    /// Frames with at least one detected face. Counted once per frame.
    pub detected_frames: u64,
    /// Detected frames in which the reference face matched.
    pub matched_frames: u64,
    /// Frames with more than one detected face.
    pub ambiguous_frames: u64,
    /// Frames lost to read or detector failures.
    pub failed_frames: u64,
    pub consecutive_failures: u32,
}

impl SessionStats {
    /// `matched / detected`, or 0 when no face was ever detected.
    pub fn match_ratio(&self) -> f64 {
        if self.detected_frames == 0 {
            return 0.0;
        }
        self.matched_frames as f64 / self.detected_frames as f64
    }
}

/// Final verdict of a completed session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub session_id: Uuid,
    pub ratio: f64,
    pub passed: bool,
    pub matched_frames: u64,
    pub detected_frames: u64,
    pub stats: SessionStats,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn from_stats(session_id: Uuid, stats: SessionStats, pass_threshold: f64) -> Self {
        let ratio = stats.match_ratio();
        Self {
            session_id,
            ratio,
            passed: ratio > pass_threshold,
            matched_frames: stats.matched_frames,
            detected_frames: stats.detected_frames,
            stats,
            decided_at: Utc::now(),
        }
    }

    /// Match ratio as a percentage, for display.
    pub fn match_percent(&self) -> f64 {
        self.ratio * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(detected: u64, matched: u64) -> SessionStats {
        SessionStats {
            frames_seen: detected,
            detected_frames: detected,
            matched_frames: matched,
            ..Default::default()
        }
    }

    #[test]
    fn test_zero_detected_never_passes() {
        let d = Decision::from_stats(Uuid::new_v4(), stats(0, 0), DEFAULT_PASS_THRESHOLD);
        assert_eq!(d.ratio, 0.0);
        assert!(!d.passed);
    }

    #[test]
    fn test_threshold_is_strict() {
        let d = Decision::from_stats(Uuid::new_v4(), stats(100, 70), DEFAULT_PASS_THRESHOLD);
        assert_eq!(d.ratio, 0.7);
        assert!(!d.passed);

        let d = Decision::from_stats(Uuid::new_v4(), stats(100, 71), DEFAULT_PASS_THRESHOLD);
        assert!(d.passed);
    }

    #[test]
    fn test_ratio_from_counts() {
        let d = Decision::from_stats(Uuid::new_v4(), stats(80, 60), DEFAULT_PASS_THRESHOLD);
        assert_eq!(d.ratio, 0.75);
        assert!(d.passed);
        assert_eq!(d.matched_frames, 60);
        assert_eq!(d.detected_frames, 80);
        assert_eq!(d.match_percent(), 75.0);
    }

    #[test]
    fn test_ratio_bounds() {
        for (detected, matched) in [(1, 0), (1, 1), (3, 2), (180, 180), (7, 0)] {
            let ratio = stats(detected, matched).match_ratio();
            assert!((0.0..=1.0).contains(&ratio));
        }
    }
}
