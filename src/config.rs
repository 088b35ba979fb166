use crate::error::{ClipforgeError, Result};
use std::path::PathBuf;

/// ffmpeg-side (encoder) configuration.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub binary_path: String,
    pub timeout_secs: u64,
    pub default_quality: Quality,
    pub preset: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            timeout_secs: 3600,
            default_quality: Quality::Medium,
            preset: "medium".to_string(),
        }
    }
}

/// Project quality tier, mapped to a CRF value by the command builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Low,
    Medium,
    High,
}

impl std::str::FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Quality::Low),
            "medium" => Ok(Quality::Medium),
            "high" => Ok(Quality::High),
            other => Err(format!("unknown quality tier: {other}")),
        }
    }
}

impl Quality {
    /// CRF value used by the command builder (§4.5 step 8).
    pub fn crf(&self) -> u32 {
        match self {
            Quality::High => 18,
            Quality::Medium | Quality::Low => 23,
        }
    }
}

/// Transcriber daemon configuration.
#[derive(Debug, Clone)]
pub struct TranscriberConfig {
    pub interpreter_path: String,
    pub script_path: String,
    pub model: String,
    pub idle_timeout_secs: u64,
    pub startup_timeout_secs: u64,
    pub restart_max_attempts: u32,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            interpreter_path: "python3".to_string(),
            script_path: "transcriber_daemon.py".to_string(),
            model: "base".to_string(),
            idle_timeout_secs: 300,
            startup_timeout_secs: 30,
            restart_max_attempts: 5,
        }
    }
}

/// Artifact and temp-file storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub retention_days: u64,
    /// How often the background sweep checks `output_dir` for expired artifacts (§4.8).
    pub sweep_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./storage/output"),
            temp_dir: PathBuf::from("./storage/temp"),
            retention_days: 7,
            sweep_interval_secs: 3600,
        }
    }
}

/// Job queue & worker pool configuration.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub workers: usize,
    pub queue_size: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_size: 100,
        }
    }
}

/// Security / URL validator configuration.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    /// Empty means "any host" (§4.1 rule 6, §6 env table).
    pub domain_allowlist: Vec<String>,
}

/// Top-level configuration, loaded once at process start from environment variables
/// prefixed `CLIPFORGE_`.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_bind: String,
    pub encoder: EncoderConfig,
    pub transcriber: TranscriberConfig,
    pub storage: StorageConfig,
    pub job: JobConfig,
    pub security: SecurityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8080".to_string(),
            encoder: EncoderConfig::default(),
            transcriber: TranscriberConfig::default(),
            storage: StorageConfig::default(),
            job: JobConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl Config {
    /// Loads config from defaults, then overrides with `CLIPFORGE_*` environment variables.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("CLIPFORGE_SERVER_BIND") {
            config.server_bind = v;
        }
        if let Ok(v) = std::env::var("CLIPFORGE_FFMPEG_PATH") {
            config.encoder.binary_path = v;
        }
        if let Ok(v) = std::env::var("CLIPFORGE_FFMPEG_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                config.encoder.timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("CLIPFORGE_DEFAULT_QUALITY") {
            if let Ok(q) = v.parse() {
                config.encoder.default_quality = q;
            }
        }
        if let Ok(v) = std::env::var("CLIPFORGE_FFMPEG_PRESET") {
            config.encoder.preset = v;
        }
        if let Ok(v) = std::env::var("CLIPFORGE_TRANSCRIBER_PYTHON") {
            config.transcriber.interpreter_path = v;
        }
        if let Ok(v) = std::env::var("CLIPFORGE_TRANSCRIBER_SCRIPT") {
            config.transcriber.script_path = v;
        }
        if let Ok(v) = std::env::var("CLIPFORGE_TRANSCRIBER_MODEL") {
            config.transcriber.model = v;
        }
        if let Ok(v) = std::env::var("CLIPFORGE_TRANSCRIBER_IDLE_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                config.transcriber.idle_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("CLIPFORGE_TRANSCRIBER_RESTART_MAX") {
            if let Ok(n) = v.parse() {
                config.transcriber.restart_max_attempts = n;
            }
        }
        if let Ok(v) = std::env::var("CLIPFORGE_STORAGE_OUTPUT_DIR") {
            config.storage.output_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CLIPFORGE_STORAGE_TEMP_DIR") {
            config.storage.temp_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CLIPFORGE_STORAGE_RETENTION_DAYS") {
            if let Ok(n) = v.parse() {
                config.storage.retention_days = n;
            }
        }
        if let Ok(v) = std::env::var("CLIPFORGE_STORAGE_SWEEP_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                config.storage.sweep_interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("CLIPFORGE_JOB_WORKERS") {
            if let Ok(n) = v.parse() {
                config.job.workers = n;
            }
        }
        if let Ok(v) = std::env::var("CLIPFORGE_JOB_QUEUE_SIZE") {
            if let Ok(n) = v.parse() {
                config.job.queue_size = n;
            }
        }
        if let Ok(v) = std::env::var("CLIPFORGE_SECURITY_DOMAIN_ALLOWLIST") {
            config.security.domain_allowlist = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        Ok(config)
    }

    /// Rejects nonsensical configuration before the queue starts accepting jobs.
    pub fn validate(&self) -> Result<()> {
        if self.job.workers == 0 {
            return Err(ClipforgeError::Internal(
                "job.workers must be greater than 0".to_string(),
            ));
        }
        if self.job.queue_size == 0 {
            return Err(ClipforgeError::Internal(
                "job.queue_size must be greater than 0".to_string(),
            ));
        }
        if self.encoder.timeout_secs == 0 {
            return Err(ClipforgeError::Internal(
                "encoder.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.transcriber.idle_timeout_secs == 0 {
            return Err(ClipforgeError::Internal(
                "transcriber.idle_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.storage.sweep_interval_secs == 0 {
            return Err(ClipforgeError::Internal(
                "storage.sweep_interval_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
