//! 執行設定
//!
//! JSON 檔案，所有欄位皆可省略（採預設值）。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::service::ppo::{ClipSchedule, PpoConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    // 連線
    pub host: String,
    /// worker i 連到 `base_port + i`
    pub base_port: u16,
    pub workers: usize,
    pub read_timeout_secs: u64,

    // rollout / GAE
    pub n_steps: usize,
    pub gamma: f32,
    pub gae_lambda: f32,

    // PPO
    pub batch_size: usize,
    pub n_epochs: usize,
    pub learning_rate: f32,
    pub clip_range: ClipSchedule,
    pub ent_coef: f32,
    pub vf_coef: f32,
    pub max_grad_norm: f32,
    pub total_steps: u64,

    // checkpoint / 輸出
    pub checkpoint_path: PathBuf,
    /// 每填滿幾次 buffer 重新載入 checkpoint
    pub reload_interval: usize,
    pub metrics_dir: PathBuf,
    pub metrics_every: usize,
    pub records_path: PathBuf,

    // 回合控制
    pub end_of_episode_commands: Vec<String>,
    /// 沒有任何合法動作時送出的指令（不記錄 transition）
    pub idle_command: String,
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            base_port: 9999,
            workers: 4,
            read_timeout_secs: 10,
            n_steps: 2048,
            gamma: 0.97,
            gae_lambda: 0.95,
            batch_size: 64,
            n_epochs: 10,
            learning_rate: 3e-4,
            clip_range: ClipSchedule::Linear { start: 0.3 },
            ent_coef: 0.03,
            vf_coef: 0.5,
            max_grad_norm: 0.5,
            total_steps: 100_000,
            checkpoint_path: PathBuf::from("checkpoints/policy.json"),
            reload_interval: 100,
            metrics_dir: PathBuf::from("metrics"),
            metrics_every: 10,
            records_path: PathBuf::from("records.json"),
            end_of_episode_commands: vec!["PROCEED".to_string(), "PROCEED".to_string()],
            idle_command: "STATE".to_string(),
            seed: 0,
        }
    }
}

impl Config {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// 有路徑就讀檔，否則用預設值
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason| Err(ConfigError::Invalid { field, reason });
        if self.workers == 0 {
            return invalid("workers", "must be at least 1");
        }
        if self.n_steps == 0 {
            return invalid("n_steps", "must be at least 1");
        }
        if self.batch_size == 0 {
            return invalid("batch_size", "must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return invalid("gamma", "must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.gae_lambda) {
            return invalid("gae_lambda", "must be within [0, 1]");
        }
        if self.learning_rate <= 0.0 {
            return invalid("learning_rate", "must be positive");
        }
        if self.reload_interval == 0 {
            return invalid("reload_interval", "must be at least 1");
        }
        if usize::from(self.base_port) + self.workers > usize::from(u16::MAX) + 1 {
            return invalid("base_port", "worker ports exceed 65535");
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// worker `id` 連線的埠
    pub fn worker_port(&self, id: usize) -> u16 {
        self.base_port.saturating_add(id as u16)
    }

    pub fn ppo(&self) -> PpoConfig {
        PpoConfig {
            n_epochs: self.n_epochs,
            batch_size: self.batch_size,
            clip_range: self.clip_range,
            ent_coef: self.ent_coef,
            vf_coef: self.vf_coef,
            max_grad_norm: self.max_grad_norm,
        }
    }

    pub fn metrics_path(&self, worker: usize) -> PathBuf {
        self.metrics_dir.join(format!("worker_{}.json", worker))
    }
}
