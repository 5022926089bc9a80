//! Slay the Spire 強化學習環境
//!
//! - `game`: 動作 catalog、狀態視圖、詞彙表、獎勵
//! - `service`: 觀察編碼、動作遮罩、rollout buffer、PPO、worker / trainer
//! - `config`: 執行設定

pub mod config;
pub mod error;
pub mod game;
pub mod service;

pub use config::Config;
pub use error::{Error, Result};
