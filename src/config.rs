//! Configuration layer (C10): defaults, optional config file, environment
//! variables, and (at the CLI layer) explicit flags, in that increasing
//! order of precedence, the same `from_file` -> `apply_env` -> `validate`
//! three-stage shape used elsewhere in this crate's config handling,
//! narrowed from daemon configuration to anonymize/restore job
//! configuration.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::obfuscate::ObfuscationStyle;

const DEFAULT_MODEL: &str = "yolov8n.onnx";
const DEFAULT_DEVICE: &str = "auto";
const DEFAULT_STYLE: &str = "blur";
const DEFAULT_CLASSES: &[&str] = &["person", "car", "truck", "bus", "motorcycle", "motorbike"];
const DEFAULT_WORKERS: usize = 1;
const DEFAULT_RESTORE_SUFFIX: &str = "restored";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreference {
    Auto,
    Cuda,
    Cpu,
}

impl DevicePreference {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cuda" => Ok(Self::Cuda),
            "cpu" => Ok(Self::Cpu),
            other => Err(anyhow!(
                "unsupported device '{other}'; expected 'auto', 'cuda', or 'cpu'"
            )),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct AnonymizeConfigFile {
    model: Option<String>,
    device: Option<String>,
    style: Option<String>,
    classes: Option<Vec<String>>,
    workers: Option<usize>,
    disable_detector: Option<bool>,
    embed_pack: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct RestoreConfigFile {
    output_suffix: Option<String>,
}

/// Resolved defaults for the `anonymize` CLI; explicit flags always win over
/// anything resolved here (the CLI binary only consults a field when the
/// corresponding flag was omitted).
#[derive(Debug, Clone)]
pub struct AnonymizeConfig {
    pub model: String,
    pub device: DevicePreference,
    pub style: ObfuscationStyle,
    pub classes: Vec<String>,
    pub workers: usize,
    pub disable_detector: bool,
    pub embed_pack: bool,
}

impl AnonymizeConfig {
    /// Loads defaults, then a `RVA_CONFIG` file if set, then `RVA_*` env
    /// overrides.
    pub fn load() -> Result<Self> {
        let file_cfg = match std::env::var("RVA_CONFIG").ok() {
            Some(path) => read_config_file(Path::new(&path))?,
            None => AnonymizeConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AnonymizeConfigFile) -> Result<Self> {
        let style = ObfuscationStyle::parse(file.style.as_deref().unwrap_or(DEFAULT_STYLE))
            .map_err(|e| anyhow!("{e}"))?;
        Ok(Self {
            model: file.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            device: DevicePreference::parse(file.device.as_deref().unwrap_or(DEFAULT_DEVICE))?,
            style,
            classes: file
                .classes
                .unwrap_or_else(|| DEFAULT_CLASSES.iter().map(|s| s.to_string()).collect()),
            workers: file.workers.unwrap_or(DEFAULT_WORKERS),
            disable_detector: file.disable_detector.unwrap_or(false),
            embed_pack: file.embed_pack.unwrap_or(false),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(model) = std::env::var("RVA_MODEL") {
            if !model.trim().is_empty() {
                self.model = model;
            }
        }
        if let Ok(device) = std::env::var("RVA_DEVICE") {
            if !device.trim().is_empty() {
                self.device = DevicePreference::parse(&device)?;
            }
        }
        if let Ok(style) = std::env::var("RVA_STYLE") {
            if !style.trim().is_empty() {
                self.style = ObfuscationStyle::parse(&style).map_err(|e| anyhow!("{e}"))?;
            }
        }
        if let Ok(classes) = std::env::var("RVA_CLASSES") {
            let parsed = split_whitespace(&classes);
            if !parsed.is_empty() {
                self.classes = parsed;
            }
        }
        if let Ok(workers) = std::env::var("RVA_WORKERS") {
            self.workers = workers
                .parse()
                .map_err(|_| anyhow!("RVA_WORKERS must be a positive integer"))?;
        }
        if let Ok(flag) = std::env::var("RVA_DISABLE_DETECTOR") {
            self.disable_detector = parse_bool(&flag)?;
        }
        if let Ok(flag) = std::env::var("RVA_EMBED_PACK") {
            self.embed_pack = parse_bool(&flag)?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.workers == 0 {
            return Err(anyhow!("workers must be at least 1"));
        }
        Ok(())
    }
}

/// Resolved defaults for the `restore` CLI.
#[derive(Debug, Clone)]
pub struct RestoreConfig {
    /// Suffix inserted into the default output filename when `--output` is
    /// omitted (`<video-stem>_<suffix>.mp4`), matching the original
    /// companion's `restored_video.mp4` convention.
    pub output_suffix: String,
}

impl RestoreConfig {
    pub fn load() -> Result<Self> {
        let file_cfg = match std::env::var("RVA_CONFIG").ok() {
            Some(path) => read_config_file::<RestoreConfigFile>(Path::new(&path))?,
            None => RestoreConfigFile::default(),
        };
        let mut cfg = Self {
            output_suffix: file_cfg
                .output_suffix
                .unwrap_or_else(|| DEFAULT_RESTORE_SUFFIX.to_string()),
        };
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(suffix) = std::env::var("RVA_RESTORE_OUTPUT_SUFFIX") {
            if !suffix.trim().is_empty() {
                self.output_suffix = suffix;
            }
        }
        Ok(())
    }

    /// Derives `restored_video.mp4`-style default output path beside
    /// `anonymized_video`.
    pub fn default_output_path(&self, anonymized_video: &Path) -> PathBuf {
        let stem = anonymized_video
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("video");
        anonymized_video.with_file_name(format!("{stem}_{}.mp4", self.output_suffix))
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("expected a boolean, got '{other}'")),
    }
}

fn split_whitespace(value: &str) -> Vec<String> {
    value
        .split_whitespace()
        .map(|entry| entry.to_string())
        .collect()
}

fn read_config_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;

    let cfg = if path.extension().map(|e| e == "toml").unwrap_or(false) {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid TOML config file {}: {}", path.display(), e))?
    } else if path.extension().map(|e| e == "json").unwrap_or(false) {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid JSON config file {}: {}", path.display(), e))?
    } else {
        match serde_json::from_str(&raw) {
            Ok(cfg) => cfg,
            Err(json_err) => match toml::from_str(&raw) {
                Ok(cfg) => cfg,
                Err(toml_err) => {
                    return Err(anyhow!(
                        "invalid config file {} (tried JSON and TOML): json error: {}; toml error: {}",
                        path.display(),
                        json_err,
                        toml_err
                    ));
                }
            },
        }
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_spec_classes() {
        let cfg = AnonymizeConfig::from_file(AnonymizeConfigFile::default()).unwrap();
        assert_eq!(
            cfg.classes,
            vec!["person", "car", "truck", "bus", "motorcycle", "motorbike"]
        );
        assert_eq!(cfg.workers, 1);
        assert!(!cfg.disable_detector);
        assert_eq!(cfg.device, DevicePreference::Auto);
        assert_eq!(cfg.style, ObfuscationStyle::Blur);
    }

    #[test]
    fn reads_toml_config_by_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "model = \"yolov8s.onnx\"\nstyle = \"mosaic\"\nworkers = 2\n").unwrap();
        let file: AnonymizeConfigFile = read_config_file(&path).unwrap();
        let cfg = AnonymizeConfig::from_file(file).unwrap();
        assert_eq!(cfg.model, "yolov8s.onnx");
        assert_eq!(cfg.style, ObfuscationStyle::Mosaic);
        assert_eq!(cfg.workers, 2);
    }

    #[test]
    fn reads_json_config_by_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"device":"cpu","disable_detector":true}"#).unwrap();
        let file: AnonymizeConfigFile = read_config_file(&path).unwrap();
        let cfg = AnonymizeConfig::from_file(file).unwrap();
        assert_eq!(cfg.device, DevicePreference::Cpu);
        assert!(cfg.disable_detector);
    }

    #[test]
    fn rejects_zero_workers() {
        let mut cfg = AnonymizeConfig::from_file(AnonymizeConfigFile::default()).unwrap();
        cfg.workers = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn restore_default_output_path_uses_suffix() {
        let cfg = RestoreConfig {
            output_suffix: "restored".to_string(),
        };
        let out = cfg.default_output_path(Path::new("/tmp/anon.mp4"));
        assert_eq!(out, PathBuf::from("/tmp/anon_restored.mp4"));
    }
}
