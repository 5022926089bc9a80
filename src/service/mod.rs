//! 服務層模組
//!
//! 觀察編碼、合法動作遮罩、rollout buffer、PPO 更新，
//! 以及連到遊戲的 socket、中繼程序與 worker / trainer 執行期。

pub mod tensor;
pub mod observation;
pub mod action_mask;
pub mod buffer;
pub mod policy;
pub mod ppo;
pub mod bridge;
pub mod relay;
pub mod records;
pub mod worker;
pub mod trainer;

pub use tensor::{observation_size, Category, Observation, ShapeError, Tensor};
pub use observation::ObservationEncoder;
pub use action_mask::{action_mask, ActionHistory};
pub use buffer::{BufferError, BufferPhase, RolloutBatch, RolloutBuffer, Transition};
pub use policy::{ActorCritic, LinearPolicy, PolicyError};
pub use ppo::{update, ClipSchedule, PpoConfig, UpdateError, UpdateStats};
pub use bridge::{Bridge, BridgeError};
pub use records::{EpisodeMetrics, MemoryRecorder, MetricsSink, RunRecorder};
pub use worker::{Worker, WorkerMessage, WorkerSettings};
pub use trainer::{Trainer, TrainerSettings, TrainingSummary};

#[cfg(test)]
mod integration_tests;
