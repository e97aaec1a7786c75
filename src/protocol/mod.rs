/// Endpoint of the analysis service's frame stream
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8000/ws/stream";

/// The only inbound message the service sends: motion was seen in a recent frame
pub const MOTION_SIGNAL: &str = "motion_detected";

/// Every outbound frame is one text message starting with this prefix
pub const JPEG_DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// Inbound text payload, decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Motion,
    /// Anything else. Not an error, just ignored.
    Unrecognized,
}

impl Signal {
    /// Exact match against the sentinel: no trimming, no case folding.
    pub fn classify(payload: &str, sentinel: &str) -> Self {
        if payload == sentinel {
            Signal::Motion
        } else {
            Signal::Unrecognized
        }
    }
}
