//! Video acquisition.
//!
//! A `DeviceProvider` is asked once for a live feed. On success the feed is
//! bound as the capture surface; on failure the source stays unbound for the
//! rest of the session and the rest of the pipeline simply sees no video.

pub mod camera;
pub mod pattern;

use image::RgbImage;
use thiserror::Error;

pub use camera::CameraDevice;
pub use pattern::TestPattern;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera access denied or device unavailable: {0}")]
    Device(String),
    #[error("camera stream stopped")]
    Stopped,
    #[error("camera support was not compiled in (enable the `camera` feature)")]
    Unsupported,
}

/// A live, continuously updating raster stream.
///
/// There is no "new frame" callback: whatever `current_frame` returns is the
/// latest frame at the time of the call.
pub trait VideoSource {
    /// Intrinsic size as reported by the device. `(0, 0)` until the device
    /// has finished negotiating a format.
    fn intrinsic_size(&self) -> (u32, u32);

    fn current_frame(&mut self) -> Result<RgbImage, CaptureError>;

    /// Stop the underlying device track. Must be idempotent.
    fn stop(&mut self);
}

/// Something that can hand out a video-only live feed.
pub trait DeviceProvider {
    fn open(&self) -> Result<Box<dyn VideoSource>, CaptureError>;
}

/// Owns the bound feed. Dropping it stops the track unless
/// `set_release_on_drop(false)` was called.
pub struct CaptureSource {
    surface: Option<Box<dyn VideoSource>>,
    released: bool,
    release_on_drop: bool,
}

impl CaptureSource {
    /// Single acquisition attempt. Failures are logged, never retried.
    pub fn acquire(provider: &dyn DeviceProvider) -> Self {
        match provider.open() {
            Ok(surface) => {
                let (w, h) = surface.intrinsic_size();
                tracing::info!(width = w, height = h, "Camera feed bound");
                Self {
                    surface: Some(surface),
                    released: false,
                    release_on_drop: true,
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Error accessing camera, continuing without a feed");
                Self::unbound()
            }
        }
    }

    pub fn unbound() -> Self {
        Self {
            surface: None,
            released: false,
            release_on_drop: true,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.surface.is_some()
    }

    /// Whether `release` has run on this source
    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn surface_mut(&mut self) -> Option<&mut (dyn VideoSource + 'static)> {
        self.surface.as_deref_mut()
    }

    /// Stop the device track and unbind the surface.
    pub fn release(&mut self) {
        if let Some(mut surface) = self.surface.take() {
            surface.stop();
            tracing::info!("Camera track stopped");
        }
        self.released = true;
    }

    pub fn set_release_on_drop(&mut self, release: bool) {
        self.release_on_drop = release;
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        if self.release_on_drop {
            self.release();
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Solid-colour source whose reported size and stop state are observable
    /// from the test after the source has been boxed.
    pub struct FakeSource {
        pub size: Rc<Cell<(u32, u32)>>,
        pub frame_size: (u32, u32),
        pub stopped: Rc<Cell<bool>>,
        pub fail_frames: Rc<Cell<u32>>,
    }

    impl FakeSource {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                size: Rc::new(Cell::new((width, height))),
                frame_size: (width, height),
                stopped: Rc::new(Cell::new(false)),
                fail_frames: Rc::new(Cell::new(0)),
            }
        }
    }

    impl VideoSource for FakeSource {
        fn intrinsic_size(&self) -> (u32, u32) {
            self.size.get()
        }

        fn current_frame(&mut self) -> Result<RgbImage, CaptureError> {
            if self.stopped.get() {
                return Err(CaptureError::Stopped);
            }
            if self.fail_frames.get() > 0 {
                self.fail_frames.set(self.fail_frames.get() - 1);
                return Err(CaptureError::Device("frame timeout".into()));
            }
            let (w, h) = self.frame_size;
            Ok(RgbImage::from_pixel(w, h, image::Rgb([200, 40, 40])))
        }

        fn stop(&mut self) {
            self.stopped.set(true);
        }
    }

    /// Hands out one prepared source, then fails like a busy device.
    pub struct FakeProvider {
        pub source: Cell<Option<FakeSource>>,
    }

    impl FakeProvider {
        pub fn new(source: FakeSource) -> Self {
            Self {
                source: Cell::new(Some(source)),
            }
        }

        pub fn denied() -> Self {
            Self {
                source: Cell::new(None),
            }
        }
    }

    impl DeviceProvider for FakeProvider {
        fn open(&self) -> Result<Box<dyn VideoSource>, CaptureError> {
            match self.source.take() {
                Some(source) => Ok(Box::new(source)),
                None => Err(CaptureError::Device("NotAllowedError: permission denied".into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeProvider, FakeSource};
    use super::*;

    #[test]
    fn test_acquire_binds_surface() {
        let provider = FakeProvider::new(FakeSource::new(320, 240));
        let mut capture = CaptureSource::acquire(&provider);

        assert!(capture.is_bound());
        let surface = capture.surface_mut().unwrap();
        assert_eq!(surface.intrinsic_size(), (320, 240));
        assert_eq!(surface.current_frame().unwrap().dimensions(), (320, 240));
    }

    #[test]
    fn test_acquire_failure_leaves_source_unbound() {
        let mut capture = CaptureSource::acquire(&FakeProvider::denied());

        assert!(!capture.is_bound());
        assert!(capture.surface_mut().is_none());
        assert!(!capture.is_released());
    }

    #[test]
    fn test_release_stops_track_once() {
        let source = FakeSource::new(320, 240);
        let stopped = source.stopped.clone();
        let mut capture = CaptureSource::acquire(&FakeProvider::new(source));

        capture.release();
        assert!(stopped.get());
        assert!(!capture.is_bound());
        assert!(capture.is_released());

        // Second release is a no-op
        capture.release();
        assert!(capture.is_released());
    }

    #[test]
    fn test_drop_stops_track() {
        let source = FakeSource::new(320, 240);
        let stopped = source.stopped.clone();
        let capture = CaptureSource::acquire(&FakeProvider::new(source));

        drop(capture);
        assert!(stopped.get());
    }

    #[test]
    fn test_drop_can_leave_track_running() {
        let source = FakeSource::new(320, 240);
        let stopped = source.stopped.clone();
        let mut capture = CaptureSource::acquire(&FakeProvider::new(source));
        capture.set_release_on_drop(false);

        drop(capture);
        assert!(!stopped.get());
    }

    #[cfg(not(feature = "camera"))]
    #[test]
    fn test_unsupported_camera_is_an_acquisition_failure() {
        let capture = CaptureSource::acquire(&CameraDevice::new(0));
        assert!(!capture.is_bound());
    }
}
