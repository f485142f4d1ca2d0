use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Where a camera's frames come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CameraSource {
    /// `rtsp://` or `rtsps://` stream.
    Rtsp(String),
    /// V4L2 device node, e.g. `/dev/video0`.
    Device(String),
    /// Synthetic `videotestsrc` feed.
    Test,
}

/// Pipeline tuning shared by every source kind.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub rtsp_latency_ms: u32,
    pub max_buffers: u32,
    pub test_width: u32,
    pub test_height: u32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            rtsp_latency_ms: 100,
            max_buffers: 2,
            test_width: 640,
            test_height: 480,
        }
    }
}

impl CameraSource {
    /// gst-launch description ending in an RGB `appsink` named `sink`.
    pub fn pipeline_description(&self, options: &PipelineOptions) -> String {
        let head = match self {
            CameraSource::Rtsp(url) => format!(
                "rtspsrc location=\"{url}\" latency={} drop-on-latency=true ! decodebin",
                options.rtsp_latency_ms
            ),
            CameraSource::Device(device) => format!("v4l2src device={device}"),
            CameraSource::Test => format!(
                "videotestsrc pattern=ball is-live=true ! \
                 video/x-raw,width={},height={},framerate=30/1",
                options.test_width, options.test_height
            ),
        };

        format!(
            "{head} ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=sink max-buffers={} drop=true sync=false",
            options.max_buffers
        )
    }
}

impl FromStr for CameraSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        // quotes and whitespace would break out of the launch description
        if s.chars().any(|c| c == '"' || c == '!' || c.is_whitespace()) {
            anyhow::bail!("Invalid camera source: {s:?}");
        }

        if s == "test" {
            Ok(CameraSource::Test)
        } else if s.starts_with("rtsp://") || s.starts_with("rtsps://") {
            Ok(CameraSource::Rtsp(s.to_string()))
        } else if s.starts_with("/dev/video") {
            Ok(CameraSource::Device(s.to_string()))
        } else {
            anyhow::bail!("Unsupported camera source {s:?}, expected \"test\", /dev/videoN or rtsp://...")
        }
    }
}

impl TryFrom<String> for CameraSource {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CameraSource> for String {
    fn from(source: CameraSource) -> Self {
        source.to_string()
    }
}

impl fmt::Display for CameraSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraSource::Rtsp(url) => f.write_str(url),
            CameraSource::Device(device) => f.write_str(device),
            CameraSource::Test => f.write_str("test"),
        }
    }
}
