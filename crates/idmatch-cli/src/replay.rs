//! `idmatch replay`: drive a full verification from a recording.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use idmatch_core::{
    scorer_for, Decision, Frame, FrameAnnotator, Progress, SessionState, SessionStats,
    VerificationConfig,
};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::engine::spawn_engine;
use crate::recording::Recording;

pub struct ReplayArgs {
    pub recording: PathBuf,
    pub document: Option<PathBuf>,
    pub fps: Option<f32>,
    pub snapshots: Option<PathBuf>,
}

/// Final report printed to stdout.
#[derive(Serialize)]
struct Outcome<'a> {
    session_id: Uuid,
    state: SessionState,
    passed: bool,
    decision: Option<&'a Decision>,
    stats: SessionStats,
    abort_reason: Option<&'a str>,
}

pub async fn run(config: &VerificationConfig, args: ReplayArgs) -> Result<ExitCode> {
    let recording = Recording::load(&args.recording)?;
    let canvas = recording.canvas;

    let document = match &args.document {
        Some(path) => Frame::open(path, 0)
            .with_context(|| format!("failed to load document image {}", path.display()))?,
        None => recording.document_frame(),
    };

    let interval = frame_interval(args.fps)?;

    let handle = spawn_engine(
        config.clone(),
        recording.provider(),
        scorer_for(config.scorer),
        Box::new(recording.camera(interval)),
    )?;

    let reference = handle
        .register_document(document)
        .await
        .context("could not extract a face from the document")?;
    tracing::info!(
        confidence = reference.confidence,
        faces = reference.faces_in_document,
        "document face registered"
    );

    if let Some(dir) = &args.snapshots {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let started = handle.start().await?;
    let id = started
        .session_id
        .context("engine started a session without an id")?;

    let reporter = spawn_reporter(handle.subscribe(), id, args.snapshots.clone(), canvas);

    let finished = tokio::select! {
        done = handle.wait_finished(id) => done?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, stopping session");
            handle.stop();
            handle.wait_finished(id).await?
        }
    };
    reporter.abort();
    handle.shutdown().await;

    print_outcome(&finished)?;

    Ok(match (&finished.state, &finished.decision) {
        (SessionState::Completed, Some(decision)) if decision.passed => ExitCode::SUCCESS,
        (SessionState::Completed, _) => ExitCode::from(1),
        _ => ExitCode::from(2),
    })
}

/// Delay between replayed frames for `--fps`. Zero or negative rates replay
/// unpaced.
fn frame_interval(fps: Option<f32>) -> Result<Option<Duration>> {
    match fps {
        Some(fps) if fps > 0.0 => Duration::try_from_secs_f32(1.0 / fps)
            .map(Some)
            .with_context(|| format!("--fps {fps} is too small to pace frames")),
        _ => Ok(None),
    }
}

fn print_outcome(progress: &Progress) -> Result<()> {
    let session_id = progress
        .session_id
        .context("finished session has no id")?;
    let decision = progress.decision.as_ref();

    match (progress.state, decision) {
        (SessionState::Completed, Some(d)) if d.passed => {
            tracing::info!(match_rate = %format!("{:.1}%", d.match_percent()), "verification passed")
        }
        (SessionState::Completed, Some(d)) => {
            tracing::warn!(match_rate = %format!("{:.1}%", d.match_percent()), "verification failed")
        }
        (state, _) => tracing::warn!(?state, reason = ?progress.abort_reason, "verification ended without a decision"),
    }

    let outcome = Outcome {
        session_id,
        state: progress.state,
        passed: decision.is_some_and(|d| d.passed),
        decision,
        stats: progress.stats,
        abort_reason: progress.abort_reason.as_deref(),
    };
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

/// Log each challenge change and, if asked, save an annotated frame for it.
fn spawn_reporter(
    mut rx: watch::Receiver<Progress>,
    id: Uuid,
    snapshots: Option<PathBuf>,
    canvas: [u32; 2],
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let annotator = FrameAnnotator::default();
        let mut last_challenge = None;
        while rx.changed().await.is_ok() {
            let progress = rx.borrow_and_update().clone();
            if progress.session_id != Some(id) {
                continue;
            }
            if last_challenge == Some(progress.challenge_index) && !progress.is_terminal() {
                continue;
            }
            last_challenge = Some(progress.challenge_index);

            tracing::info!(
                step = progress.challenge_index + 1,
                total = progress.total_challenges,
                instruction = progress.instruction.as_deref().unwrap_or("-"),
                percent = %format!("{:.1}", progress.percent),
                detected = progress.stats.detected_frames,
                matched = progress.stats.matched_frames,
                "progress"
            );

            if let Some(dir) = &snapshots {
                if let Err(e) = write_snapshot(dir, &annotator, &progress, canvas) {
                    tracing::warn!(error = %e, "snapshot not written");
                }
            }
        }
    })
}

fn write_snapshot(
    dir: &Path,
    annotator: &FrameAnnotator,
    progress: &Progress,
    canvas: [u32; 2],
) -> Result<()> {
    let sequence = progress
        .frame
        .as_ref()
        .map(|f| f.sequence)
        .unwrap_or(progress.stats.frames_seen);
    let frame = Frame::blank(canvas[0], canvas[1], sequence);
    let image = annotator
        .annotate(&frame, progress)
        .context("frame buffer does not match canvas")?;
    let path = dir.join(format!("snapshot-{sequence:05}.png"));
    image
        .save(&path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_interval() {
        assert_eq!(frame_interval(None).unwrap(), None);
        assert_eq!(frame_interval(Some(0.0)).unwrap(), None);
        assert_eq!(frame_interval(Some(-5.0)).unwrap(), None);
        assert_eq!(
            frame_interval(Some(4.0)).unwrap(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_frame_interval_rejects_tiny_rate() {
        assert!(frame_interval(Some(1e-39)).is_err());
        assert!(frame_interval(Some(f32::NAN)).unwrap().is_none());
    }
}
