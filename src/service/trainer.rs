//! 中央 trainer
//!
//! 從所有 worker 收 rollout buffer。必須每個仍在執行的 worker 都交出一個
//! buffer 才進行一輪更新（lock-step）；一輪內依 worker 順序逐一更新，
//! 之後存 checkpoint，步數前進 `n_steps × buffer 數`。
//!
//! clip range 依 `1 - step / total_steps` 排程。

use std::collections::VecDeque;
use std::path::PathBuf;

use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::config::Config;
use crate::error::Result;

use super::buffer::RolloutBuffer;
use super::policy::ActorCritic;
use super::ppo::{update, PpoConfig, UpdateStats};
use super::worker::WorkerMessage;

#[derive(Clone, Debug)]
pub struct TrainerSettings {
    pub workers: usize,
    pub n_steps: usize,
    pub total_steps: u64,
    pub checkpoint_path: PathBuf,
    pub ppo: PpoConfig,
}

impl TrainerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.workers,
            n_steps: config.n_steps,
            total_steps: config.total_steps,
            checkpoint_path: config.checkpoint_path.clone(),
            ppo: config.ppo(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrainingSummary {
    pub rounds: usize,
    pub updates: usize,
    pub steps: u64,
    /// 是否達到 `total_steps`（否則為所有 worker 都已結束）
    pub completed: bool,
    pub last_stats: Option<UpdateStats>,
}

/// 剩餘進度，1 → 0
pub fn progress_remaining(step: u64, total_steps: u64) -> f32 {
    if total_steps == 0 {
        return 0.0;
    }
    (1.0 - step as f64 / total_steps as f64).clamp(0.0, 1.0) as f32
}

/// 每個 worker 一條佇列，全部仍在執行的 worker 都有資料時湊成一輪
#[derive(Debug)]
struct RoundCollector {
    queues: Vec<VecDeque<RolloutBuffer>>,
    active: Vec<bool>,
}

impl RoundCollector {
    fn new(workers: usize) -> Self {
        Self {
            queues: (0..workers).map(|_| VecDeque::new()).collect(),
            active: vec![true; workers],
        }
    }

    fn push(&mut self, worker: usize, buffer: RolloutBuffer) {
        match self.queues.get_mut(worker) {
            Some(queue) => queue.push_back(buffer),
            None => warn!("rollout from unknown worker {}", worker),
        }
    }

    fn retire(&mut self, worker: usize) {
        if let Some(active) = self.active.get_mut(worker) {
            *active = false;
        }
        if let Some(queue) = self.queues.get_mut(worker) {
            queue.clear();
        }
    }

    fn any_active(&self) -> bool {
        self.active.iter().any(|&a| a)
    }

    /// 湊齊時依 worker 順序取出一輪
    fn take_round(&mut self) -> Option<Vec<RolloutBuffer>> {
        if !self.any_active() {
            return None;
        }
        let ready = self
            .queues
            .iter()
            .zip(&self.active)
            .all(|(q, &active)| !active || !q.is_empty());
        if !ready {
            return None;
        }
        Some(
            self.queues
                .iter_mut()
                .zip(&self.active)
                .filter(|(_, &active)| active)
                .filter_map(|(q, _)| q.pop_front())
                .collect(),
        )
    }
}

pub struct Trainer<P> {
    settings: TrainerSettings,
    policy: P,
}

impl<P> Trainer<P>
where
    P: ActorCritic + 'static,
{
    pub fn new(settings: TrainerSettings, policy: P) -> Self {
        Self { settings, policy }
    }

    /// 一輪更新：依序以每個 buffer 更新 policy
    fn train_round(
        policy: &mut P,
        settings: &TrainerSettings,
        round: &[RolloutBuffer],
        progress: f32,
    ) -> (usize, Option<UpdateStats>) {
        let mut updates = 0;
        let mut last = None;
        for buffer in round {
            match update(policy, buffer, &settings.ppo, progress) {
                Ok(stats) => {
                    info!(
                        "update: policy {:.4} value {:.4} entropy {:.4} kl {:.4} clip {:.2}",
                        stats.policy_loss,
                        stats.value_loss,
                        stats.entropy_loss,
                        stats.approx_kl,
                        stats.clip_fraction
                    );
                    updates += 1;
                    last = Some(stats);
                }
                Err(e) => error!("update skipped: {}", e),
            }
        }
        if let Err(e) = policy.save(&settings.checkpoint_path) {
            error!("cannot save checkpoint {}: {}", settings.checkpoint_path.display(), e);
        }
        (updates, last)
    }

    /// 接收 rollout 直到達到 `total_steps` 或所有 worker 都結束
    pub async fn run(self, rx: mpsc::Receiver<WorkerMessage>) -> Result<TrainingSummary> {
        let Trainer {
            settings,
            mut policy,
        } = self;
        let mut stream = ReceiverStream::new(rx);
        let mut collector = RoundCollector::new(settings.workers);
        let mut summary = TrainingSummary::default();

        while summary.steps < settings.total_steps {
            let round = match collector.take_round() {
                Some(round) => round,
                None => {
                    if !collector.any_active() {
                        warn!("all workers exited before training finished");
                        return Ok(summary);
                    }
                    match stream.next().await {
                        Some(WorkerMessage::Rollout { worker_id, buffer }) => {
                            collector.push(worker_id, buffer);
                        }
                        Some(WorkerMessage::Exited { worker_id, error }) => {
                            match error {
                                Some(e) => warn!("worker {} exited: {}", worker_id, e),
                                None => info!("worker {} exited", worker_id),
                            }
                            collector.retire(worker_id);
                        }
                        None => {
                            warn!("worker channel closed");
                            return Ok(summary);
                        }
                    }
                    continue;
                }
            };

            let progress = progress_remaining(summary.steps, settings.total_steps);
            let count = round.len() as u64;
            let task_settings = settings.clone();
            let (returned, updates, last) = tokio::task::spawn_blocking(move || {
                let mut policy = policy;
                let (updates, last) = Self::train_round(&mut policy, &task_settings, &round, progress);
                (policy, updates, last)
            })
            .await?;
            policy = returned;

            summary.rounds += 1;
            summary.updates += updates;
            summary.steps += settings.n_steps as u64 * count;
            if last.is_some() {
                summary.last_stats = last;
            }
            info!(
                "round {}: {} buffers, step {}/{}",
                summary.rounds, count, summary.steps, settings.total_steps
            );
        }

        summary.completed = true;
        Ok(summary)
    }
}

// ============================================================================
// 單元測試
// ============================================================================
