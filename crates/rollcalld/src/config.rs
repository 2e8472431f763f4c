use chrono::NaiveTime;
use rollcall_core::QualityConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which D-Bus bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    Session,
    System,
}

impl FromStr for BusKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Ok(BusKind::Session),
            "system" => Ok(BusKind::System),
            other => Err(ConfigError::Invalid(format!(
                "bus must be \"session\" or \"system\", got {other:?}"
            ))),
        }
    }
}

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file named by
/// `ROLLCALL_CONFIG`, then `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Root directory for archived enrollment and attendance images.
    pub image_dir: PathBuf,
    /// Feature extractor command line; the image path is appended.
    pub extractor_command: String,
    /// Embedding length the extractor produces.
    pub embedding_dim: usize,
    /// Minimum confidence (1 - distance) for a positive match.
    pub recognition_threshold: f32,
    /// Upper bound on stored embeddings per employee.
    pub max_faces_per_employee: usize,
    /// Fewest photos an enrollment request may carry.
    pub min_enroll_photos: usize,
    /// Start of the working day, local time.
    pub work_start: NaiveTime,
    /// Grace period after `work_start` before a check-in counts as late.
    pub late_threshold_minutes: u32,
    pub bus: BusKind,
    pub quality: QualityConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            db_path: data_dir.join("rollcall.db"),
            image_dir: data_dir.join("images"),
            extractor_command: "rollcall-extract".to_string(),
            embedding_dim: 128,
            recognition_threshold: 0.6,
            max_faces_per_employee: 5,
            min_enroll_photos: 3,
            work_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            late_threshold_minutes: 15,
            bus: BusKind::Session,
            quality: QualityConfig::default(),
        }
    }
}

impl Config {
    /// Load from `ROLLCALL_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("ROLLCALL_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loading config file");
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `ROLLCALL_*` overrides read through `lookup`. Unparsable values
    /// are an error rather than silently ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_IMAGE_DIR") {
            self.image_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_EXTRACTOR_CMD") {
            self.extractor_command = v;
        }
        env_parse(&lookup, "ROLLCALL_EMBEDDING_DIM", &mut self.embedding_dim)?;
        env_parse(&lookup, "ROLLCALL_RECOGNITION_THRESHOLD", &mut self.recognition_threshold)?;
        env_parse(&lookup, "ROLLCALL_MAX_FACES_PER_EMPLOYEE", &mut self.max_faces_per_employee)?;
        env_parse(&lookup, "ROLLCALL_MIN_ENROLL_PHOTOS", &mut self.min_enroll_photos)?;
        env_parse(&lookup, "ROLLCALL_LATE_THRESHOLD_MINUTES", &mut self.late_threshold_minutes)?;
        if let Some(v) = lookup("ROLLCALL_WORK_START") {
            self.work_start = parse_time(&v)?;
        }
        if let Some(v) = lookup("ROLLCALL_BUS") {
            self.bus = v.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.recognition_threshold) {
            return Err(ConfigError::Invalid(format!(
                "recognition_threshold must be within [0, 1], got {}",
                self.recognition_threshold
            )));
        }
        if self.embedding_dim == 0 {
            return Err(ConfigError::Invalid("embedding_dim must be positive".into()));
        }
        if self.max_faces_per_employee == 0 {
            return Err(ConfigError::Invalid("max_faces_per_employee must be positive".into()));
        }
        if self.min_enroll_photos == 0 || self.min_enroll_photos > self.max_faces_per_employee {
            return Err(ConfigError::Invalid(format!(
                "min_enroll_photos must be within 1..={}, got {}",
                self.max_faces_per_employee, self.min_enroll_photos
            )));
        }
        if self.extractor_command.trim().is_empty() {
            return Err(ConfigError::Invalid("extractor_command is empty".into()));
        }
        Ok(())
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_parse<T, F>(lookup: &F, key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("{key}={raw:?}: {e}")))?;
    }
    Ok(())
}

/// Accepts `HH:MM:SS` or `HH:MM`.
fn parse_time(raw: &str) -> Result<NaiveTime, ConfigError> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|e| ConfigError::Invalid(format!("work_start {raw:?}: {e}")))
}
