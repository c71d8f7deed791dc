//! Camera seam and scoped ownership of an open frame source.

use thiserror::Error;

use crate::types::Frame;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameReadError {
    #[error("frame read timed out")]
    Timeout,
    #[error("frame source exhausted")]
    EndOfStream,
    #[error("frame read failed: {0}")]
    Device(String),
}

/// An open, exclusively owned stream of frames.
pub trait FrameSource: Send {
    /// Block until the next frame is available. Any pacing belongs here.
    fn read_frame(&mut self) -> Result<Frame, FrameReadError>;

    /// Give the device back. Called exactly once, by [`CameraGuard`].
    fn release(&mut self) {}
}

/// Opens a [`FrameSource`] on demand.
pub trait Camera: Send {
    fn open(&mut self) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// Holds an open frame source and releases it when dropped, so every exit
/// path out of a running session gives the camera back.
pub struct CameraGuard {
    source: Box<dyn FrameSource>,
}

impl CameraGuard {
    pub fn acquire<C: Camera + ?Sized>(camera: &mut C) -> Result<Self, CameraError> {
        let source = camera.open()?;
        tracing::debug!("camera acquired");
        Ok(Self { source })
    }

    pub fn read_frame(&mut self) -> Result<Frame, FrameReadError> {
        self.source.read_frame()
    }
}

impl Drop for CameraGuard {
    fn drop(&mut self) {
        self.source.release();
        tracing::debug!("camera released");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    struct CountingSource {
        released: Arc<AtomicUsize>,
    }

    impl FrameSource for CountingSource {
        fn read_frame(&mut self) -> Result<Frame, FrameReadError> {
            Ok(Frame::blank(2, 2, 1))
        }

        fn release(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeCamera {
        available: bool,
        released: Arc<AtomicUsize>,
    }

    impl Camera for FakeCamera {
        fn open(&mut self) -> Result<Box<dyn FrameSource>, CameraError> {
            if !self.available {
                return Err(CameraError::Unavailable("no device".into()));
            }
            Ok(Box::new(CountingSource {
                released: self.released.clone(),
            }))
        }
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut camera = FakeCamera {
            available: true,
            released: released.clone(),
        };
        {
            let mut guard = CameraGuard::acquire(&mut camera).unwrap();
            assert!(guard.read_frame().is_ok());
            assert_eq!(released.load(Ordering::SeqCst), 0);
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unavailable_camera() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut camera = FakeCamera {
            available: false,
            released: released.clone(),
        };
        let err = CameraGuard::acquire(&mut camera).err().unwrap();
        assert_eq!(err, CameraError::Unavailable("no device".into()));
        assert_eq!(released.load(Ordering::SeqCst), 0);
    }
}
