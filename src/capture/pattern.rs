use image::{Rgb, RgbImage};

use super::{CaptureError, DeviceProvider, VideoSource};

/// Synthetic moving-gradient feed, for running without a camera.
#[derive(Debug, Clone, Copy)]
pub struct TestPattern {
    width: u32,
    height: u32,
}

impl TestPattern {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl DeviceProvider for TestPattern {
    fn open(&self) -> Result<Box<dyn VideoSource>, CaptureError> {
        Ok(Box::new(PatternFeed {
            width: self.width,
            height: self.height,
            phase: 0,
            stopped: false,
        }))
    }
}

struct PatternFeed {
    width: u32,
    height: u32,
    phase: u32,
    stopped: bool,
}

impl VideoSource for PatternFeed {
    fn intrinsic_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn current_frame(&mut self) -> Result<RgbImage, CaptureError> {
        if self.stopped {
            return Err(CaptureError::Stopped);
        }
        let phase = self.phase;
        // A vertical bar sweeps across so every frame differs from the last
        let bar = phase.wrapping_mul(8) % self.width.max(1);
        self.phase = self.phase.wrapping_add(1);

        Ok(RgbImage::from_fn(self.width, self.height, |x, y| {
            if x.abs_diff(bar) < 8 {
                Rgb([255, 255, 255])
            } else {
                Rgb([(x % 256) as u8, (y % 256) as u8, (phase % 256) as u8])
            }
        }))
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_moves_between_frames() {
        let mut feed = TestPattern::new(64, 48).open().unwrap();
        assert_eq!(feed.intrinsic_size(), (64, 48));

        let a = feed.current_frame().unwrap();
        let b = feed.current_frame().unwrap();
        assert_eq!(a.dimensions(), (64, 48));
        assert_ne!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn test_long_running_phase_wraps() {
        let mut feed = PatternFeed {
            width: 64,
            height: 48,
            phase: u32::MAX - 1,
            stopped: false,
        };
        for _ in 0..3 {
            assert_eq!(feed.current_frame().unwrap().dimensions(), (64, 48));
        }
        assert_eq!(feed.phase, 1);
    }

    #[test]
    fn test_stopped_pattern_yields_no_frames() {
        let mut feed = TestPattern::new(64, 48).open().unwrap();
        feed.stop();
        assert!(matches!(feed.current_frame(), Err(CaptureError::Stopped)));
    }
}
