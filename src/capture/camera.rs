//! Hardware camera capture via nokhwa.

use super::{CaptureError, DeviceProvider, VideoSource};

/// Default camera device, picked by index
pub struct CameraDevice {
    index: u32,
}

impl CameraDevice {
    pub fn new(index: u32) -> Self {
        Self { index }
    }
}

#[cfg(feature = "camera")]
mod imp {
    use super::*;
    use image::RgbImage;
    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
    use nokhwa::Camera;

    pub struct CameraFeed {
        camera: Camera,
        streaming: bool,
    }

    impl DeviceProvider for CameraDevice {
        fn open(&self) -> Result<Box<dyn VideoSource>, CaptureError> {
            tracing::info!(device = self.index, "Requesting camera access");

            let index = CameraIndex::Index(self.index);
            let requested =
                RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);

            let mut camera =
                Camera::new(index, requested).map_err(|e| CaptureError::Device(e.to_string()))?;
            camera
                .open_stream()
                .map_err(|e| CaptureError::Device(e.to_string()))?;

            Ok(Box::new(CameraFeed {
                camera,
                streaming: true,
            }))
        }
    }

    impl VideoSource for CameraFeed {
        fn intrinsic_size(&self) -> (u32, u32) {
            if !self.streaming {
                return (0, 0);
            }
            let resolution = self.camera.resolution();
            (resolution.width(), resolution.height())
        }

        fn current_frame(&mut self) -> Result<RgbImage, CaptureError> {
            if !self.streaming {
                return Err(CaptureError::Stopped);
            }
            let buffer = self
                .camera
                .frame()
                .map_err(|e| CaptureError::Device(e.to_string()))?;
            let decoded = buffer
                .decode_image::<RgbFormat>()
                .map_err(|e| CaptureError::Device(e.to_string()))?;

            // Rebuild from raw pixels so we don't depend on nokhwa's `image` version
            let (w, h) = (decoded.width(), decoded.height());
            RgbImage::from_raw(w, h, decoded.into_raw())
                .ok_or_else(|| CaptureError::Device("decoded frame has wrong length".into()))
        }

        fn stop(&mut self) {
            if self.streaming {
                self.streaming = false;
                if let Err(e) = self.camera.stop_stream() {
                    tracing::warn!(error = %e, "Failed to stop camera stream");
                }
            }
        }
    }
}

#[cfg(not(feature = "camera"))]
impl DeviceProvider for CameraDevice {
    fn open(&self) -> Result<Box<dyn VideoSource>, CaptureError> {
        tracing::debug!(device = self.index, "Camera requested but capture backend is disabled");
        Err(CaptureError::Unsupported)
    }
}
