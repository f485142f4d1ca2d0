use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use gstreamed_common::source::CameraSource;
use serde::Deserialize;
use zone_monitor::CameraId;

use crate::Args;

pub const DEFAULT_CONFIG_FILE: &str = "zone_server.toml";
const ENV_PREFIX: &str = "ZONE_SERVER";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CameraSettings {
    pub id: CameraId,
    pub source: CameraSource,
    /// Runs detection and the zone state machine on this camera.
    #[serde(default)]
    pub monitored: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub model_path: PathBuf,
    pub cuda: bool,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub input_size: u32,
    pub class_names: Vec<String>,
    pub jpeg_quality: u8,
    pub stream_interval_ms: u64,
    pub font_path: Option<PathBuf>,
    pub stats_interval_frames: u64,
    pub cameras: Vec<CameraSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            model_path: PathBuf::from("_models/car_yolov8.onnx"),
            cuda: false,
            confidence_threshold: inference_common::detection::DEFAULT_CONFIDENCE_THRESHOLD,
            nms_threshold: 0.45,
            input_size: 640,
            class_names: inference_common::vehicle_classes::NAMES
                .iter()
                .map(|name| name.to_string())
                .collect(),
            jpeg_quality: zone_monitor::ingest::DEFAULT_JPEG_QUALITY,
            stream_interval_ms: 33,
            font_path: None,
            stats_interval_frames: zone_monitor::ingest::DEFAULT_STATS_INTERVAL,
            cameras: vec![
                CameraSettings {
                    id: CameraId(1),
                    source: CameraSource::Test,
                    monitored: true,
                },
                CameraSettings {
                    id: CameraId(2),
                    source: CameraSource::Test,
                    monitored: false,
                },
            ],
        }
    }
}

impl Settings {
    /// Defaults, then the TOML file, then `ZONE_SERVER__*` environment
    /// variables. An explicitly given file must exist; the default one is
    /// optional.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let builder = config::Config::builder().add_source(file).add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> anyhow::Result<Self> {
        builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Command line flags take precedence over every other source.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = &args.host {
            self.host = host.clone();
        }
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(model) = &args.model {
            self.model_path = model.clone();
        }
        if args.cuda {
            self.cuda = true;
        }
        if let Some(threshold) = args.conf_threshold {
            self.confidence_threshold = threshold;
        }
        if let Some(threshold) = args.nms_threshold {
            self.nms_threshold = threshold;
        }
        if let Some(font) = &args.font {
            self.font_path = Some(font.clone());
        }
        for (id, source) in [(1, &args.camera1), (2, &args.camera2)] {
            let Some(source) = source else { continue };
            match self.cameras.iter_mut().find(|c| c.id == CameraId(id)) {
                Some(camera) => camera.source = source.clone(),
                None => self.cameras.push(CameraSettings {
                    id: CameraId(id),
                    source: source.clone(),
                    monitored: false,
                }),
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("nms_threshold", self.nms_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{name} must be within [0, 1], got {value}");
            }
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            anyhow::bail!("jpeg_quality must be within 1..=100, got {}", self.jpeg_quality);
        }
        if self.input_size == 0 {
            anyhow::bail!("input_size must be positive");
        }
        if self.cameras.is_empty() {
            anyhow::bail!("No cameras configured");
        }

        let mut ids = HashSet::new();
        for camera in &self.cameras {
            if !ids.insert(camera.id) {
                anyhow::bail!("Camera {} configured more than once", camera.id);
            }
        }
        let monitored = self.cameras.iter().filter(|c| c.monitored).count();
        if monitored > 1 {
            anyhow::bail!("At most one camera can be monitored, {monitored} are");
        }

        Ok(())
    }

    pub fn monitored_camera(&self) -> Option<CameraId> {
        self.cameras.iter().find(|c| c.monitored).map(|c| c.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(toml: &str) -> anyhow::Result<Settings> {
        Settings::from_builder(
            config::Config::builder().add_source(File::from_str(toml, FileFormat::Toml)),
        )
    }

    #[test]
    fn test_defaults() {
        let settings = from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.port, 5000);
        assert_eq!(settings.confidence_threshold, 0.7);
        assert_eq!(settings.monitored_camera(), Some(CameraId(1)));
        settings.validate().unwrap();
    }

    #[test]
    fn test_file_overrides_defaults() {
        let settings = from_toml(
            r#"
            port = 8080
            confidence_threshold = 0.5
            class_names = ["car", "truck"]

            [[cameras]]
            id = 1
            source = "rtsp://10.0.0.5/stream"
            monitored = true

            [[cameras]]
            id = 2
            source = "/dev/video1"
            "#,
        )
        .unwrap();

        assert_eq!(settings.port, 8080);
        assert_eq!(settings.confidence_threshold, 0.5);
        assert_eq!(settings.class_names, vec!["car", "truck"]);
        assert_eq!(settings.host, "0.0.0.0");
        assert_eq!(
            settings.cameras[0].source,
            CameraSource::Rtsp("rtsp://10.0.0.5/stream".to_string())
        );
        assert!(!settings.cameras[1].monitored);
        settings.validate().unwrap();
    }

    #[test]
    fn test_invalid_source_rejected() {
        let result = from_toml(
            r#"
            [[cameras]]
            id = 1
            source = "ftp://nowhere"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_thresholds() {
        let settings = Settings {
            confidence_threshold: 1.5,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());

        let settings = Settings {
            jpeg_quality: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_cameras() {
        let mut settings = Settings::default();
        settings.cameras[1].id = CameraId(1);
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.cameras[1].monitored = true;
        assert!(settings.validate().is_err());

        let settings = Settings {
            cameras: Vec::new(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut settings = Settings::default();
        let args = Args {
            config: None,
            host: None,
            port: Some(9000),
            model: Some(PathBuf::from("m.onnx")),
            cuda: true,
            conf_threshold: Some(0.3),
            nms_threshold: None,
            font: None,
            camera1: Some(CameraSource::Device("/dev/video0".to_string())),
            camera2: None,
        };
        settings.apply_args(&args);

        assert_eq!(settings.port, 9000);
        assert_eq!(settings.model_path, PathBuf::from("m.onnx"));
        assert!(settings.cuda);
        assert_eq!(settings.confidence_threshold, 0.3);
        assert_eq!(
            settings.cameras[0].source,
            CameraSource::Device("/dev/video0".to_string())
        );
        assert_eq!(settings.cameras[1].source, CameraSource::Test);
    }
}
