use facekit_core::ModelPaths;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Resolved CLI configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Model file names, relative to `model_dir` unless absolute.
    pub yunet_model: String,
    pub retinaface_model: String,
    pub sface_model: String,
    pub arcface_model: String,
    /// ONNX Runtime intra-op threads per model.
    pub intra_threads: usize,
    /// Divisor applied by the single-face multiscale search.
    pub scale_factor: f64,
}

/// The optional TOML layer; every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    model_dir: Option<PathBuf>,
    yunet_model: Option<String>,
    retinaface_model: Option<String>,
    sface_model: Option<String>,
    arcface_model: Option<String>,
    intra_threads: Option<usize>,
    scale_factor: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: facekit_core::default_model_dir(),
            yunet_model: facekit_core::YUNET_MODEL_FILE.to_string(),
            retinaface_model: facekit_core::RETINAFACE_MODEL_FILE.to_string(),
            sface_model: facekit_core::SFACE_MODEL_FILE.to_string(),
            arcface_model: facekit_core::ARCFACE_MODEL_FILE.to_string(),
            intra_threads: 2,
            scale_factor: facekit_core::detector::DEFAULT_SCALE_FACTOR,
        }
    }
}

impl Config {
    /// Defaults, then the TOML file (`path` or `FACEKIT_CONFIG`), then
    /// `FACEKIT_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok();
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| env("FACEKIT_CONFIG").map(PathBuf::from));

        let mut config = Self::default();
        if let Some(file) = file {
            let text = std::fs::read_to_string(&file).map_err(|source| ConfigError::Read {
                path: file.clone(),
                source,
            })?;
            config.apply_toml(&text, &file)?;
            tracing::debug!(path = %file.display(), "loaded config file");
        }
        config.apply_env(env);
        config.validate()?;
        Ok(config)
    }

    fn apply_toml(&mut self, text: &str, path: &Path) -> Result<(), ConfigError> {
        let file: FileConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.yunet_model {
            self.yunet_model = v;
        }
        if let Some(v) = file.retinaface_model {
            self.retinaface_model = v;
        }
        if let Some(v) = file.sface_model {
            self.sface_model = v;
        }
        if let Some(v) = file.arcface_model {
            self.arcface_model = v;
        }
        if let Some(v) = file.intra_threads {
            self.intra_threads = v;
        }
        if let Some(v) = file.scale_factor {
            self.scale_factor = v;
        }
        Ok(())
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("FACEKIT_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        for (key, slot) in [
            ("FACEKIT_YUNET_MODEL", &mut self.yunet_model),
            ("FACEKIT_RETINAFACE_MODEL", &mut self.retinaface_model),
            ("FACEKIT_SFACE_MODEL", &mut self.sface_model),
            ("FACEKIT_ARCFACE_MODEL", &mut self.arcface_model),
        ] {
            if let Some(v) = env(key) {
                *slot = v;
            }
        }
        self.intra_threads = env_parse(&env, "FACEKIT_INTRA_THREADS", self.intra_threads);
        self.scale_factor = env_parse(&env, "FACEKIT_SCALE_FACTOR", self.scale_factor);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.intra_threads == 0 {
            return Err(ConfigError::Invalid("intra_threads must be at least 1".into()));
        }
        if !self.scale_factor.is_finite() || self.scale_factor <= 1.0 {
            return Err(ConfigError::Invalid(format!(
                "scale_factor must be greater than 1, got {}",
                self.scale_factor
            )));
        }
        Ok(())
    }

    /// Full path of every model file.
    pub fn model_paths(&self) -> ModelPaths {
        let resolve = |name: &str| self.model_dir.join(name);
        ModelPaths {
            yunet: resolve(&self.yunet_model),
            retinaface: resolve(&self.retinaface_model),
            sface: resolve(&self.sface_model),
            arcface: resolve(&self.arcface_model),
        }
    }
}

/// Parse `key` if set, keeping `default` (with a warning) when it does not parse.
fn env_parse<T: std::str::FromStr + Copy>(env: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match env(key) {
        None => default,
        Some(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparsable environment value");
            default
        }),
    }
}
