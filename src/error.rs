//! crate 層級錯誤

use thiserror::Error;

use crate::config::ConfigError;
use crate::service::bridge::BridgeError;
use crate::service::buffer::BufferError;
use crate::service::policy::PolicyError;
use crate::service::ppo::UpdateError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;
