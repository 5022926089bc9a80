//! 環境 worker
//!
//! 每個 worker 擁有一條遊戲連線、一個 policy 副本與一個 rollout buffer。
//! buffer 填滿後完成 GAE，整個交給 trainer（所有權轉移），自己換一個空的
//! buffer 繼續收集。每填滿 `reload_interval` 次就從磁碟重新載入 checkpoint。
//!
//! 每一步：
//! 1. 更新 `ActionHistory`，編碼觀察，計算合法動作 mask
//! 2. policy 取樣動作，送出指令，讀取下一份狀態
//! 3. 計算獎勵與是否結束，寫入 buffer

use std::mem;
use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::game::{compute_reward, ActionCatalog, Command, GameMessage, SCREEN_BOSS_REWARD};

use super::action_mask::{action_mask, ActionHistory};
use super::bridge::{Bridge, BridgeError};
use super::buffer::{RolloutBuffer, Transition};
use super::observation::ObservationEncoder;
use super::policy::ActorCritic;
use super::records::{
    card_pick_from, outcome_from, EpisodeMetrics, GameId, MetricsSink, RunRecorder,
};

/// worker → trainer
#[derive(Debug)]
pub enum WorkerMessage {
    /// 已完成 GAE 的 buffer
    Rollout {
        worker_id: usize,
        buffer: RolloutBuffer,
    },
    /// worker 迴圈結束；`error` 為 None 表示 trainer 已不再接收
    Exited {
        worker_id: usize,
        error: Option<String>,
    },
}

#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub id: usize,
    pub n_steps: usize,
    pub gamma: f32,
    pub gae_lambda: f32,
    pub reload_interval: usize,
    pub checkpoint_path: PathBuf,
    pub end_of_episode_commands: Vec<String>,
    pub idle_command: String,
    pub seed: u64,
    pub metrics: MetricsSink,
}

impl WorkerSettings {
    pub fn from_config(config: &Config, id: usize) -> Self {
        Self {
            id,
            n_steps: config.n_steps,
            gamma: config.gamma,
            gae_lambda: config.gae_lambda,
            reload_interval: config.reload_interval.max(1),
            checkpoint_path: config.checkpoint_path.clone(),
            end_of_episode_commands: config.end_of_episode_commands.clone(),
            idle_command: config.idle_command.clone(),
            seed: config.seed.wrapping_add(id as u64),
            metrics: MetricsSink::new(config.metrics_path(id), config.metrics_every),
        }
    }
}

/// 單局的累計
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EpisodeResult {
    pub reward: f32,
    pub length: usize,
}

pub struct Worker<S, P> {
    settings: WorkerSettings,
    bridge: Bridge<S>,
    policy: P,
    catalog: Arc<ActionCatalog>,
    encoder: ObservationEncoder,
    recorder: Arc<dyn RunRecorder>,
    tx: mpsc::Sender<WorkerMessage>,
    rng: StdRng,
    buffer: RolloutBuffer,
    history: ActionHistory,
    metrics: EpisodeMetrics,
    fills: usize,
    game_id: Option<GameId>,
    /// 下一筆 transition 是否為新 episode 的第一步
    episode_start: bool,
}

impl<S, P> Worker<S, P>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    P: ActorCritic + Clone + 'static,
{
    pub fn new(
        settings: WorkerSettings,
        bridge: Bridge<S>,
        policy: P,
        catalog: Arc<ActionCatalog>,
        encoder: ObservationEncoder,
        recorder: Arc<dyn RunRecorder>,
        tx: mpsc::Sender<WorkerMessage>,
    ) -> Self {
        let buffer = RolloutBuffer::new(
            settings.n_steps,
            catalog.len(),
            settings.gamma,
            settings.gae_lambda,
        );
        Self {
            rng: StdRng::seed_from_u64(settings.seed),
            settings,
            bridge,
            policy,
            catalog,
            encoder,
            recorder,
            tx,
            buffer,
            history: ActionHistory::new(),
            metrics: EpisodeMetrics::new(),
            fills: 0,
            game_id: None,
            episode_start: true,
        }
    }

    pub fn id(&self) -> usize {
        self.settings.id
    }

    /// 在背景執行，結束時送出 `WorkerMessage::Exited`
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let id = self.id();
            let tx = self.tx.clone();
            let error = match self.run().await {
                Ok(()) => None,
                Err(e) => {
                    error!("worker {}: stopped: {}", id, e);
                    Some(e.to_string())
                }
            };
            let _ = tx.send(WorkerMessage::Exited { worker_id: id, error }).await;
        })
    }

    /// episode 迴圈；trainer 停止接收時回傳 `Ok`，連線中斷時回傳錯誤
    pub async fn run(mut self) -> Result<()> {
        let mut msg = self.receive().await?;
        let mut episode = 0usize;
        loop {
            let (result, last) = match self.play_episode(msg).await? {
                Some(done) => done,
                None => return Ok(()),
            };

            let avg = self.metrics.record(result.reward, result.length);
            info!(
                "worker {}: episode {} reward {:.1} length {} (avg10 {:.1})",
                self.id(),
                episode,
                result.reward,
                result.length,
                avg
            );
            if let Err(e) = self.settings.metrics.maybe_write(episode, &self.metrics).await {
                warn!("worker {}: cannot write metrics: {}", self.id(), e);
            }
            episode += 1;

            msg = self.end_of_episode(last).await?;
        }
    }

    /// 跑完一局；回傳該局結果與最後的遊戲狀態
    ///
    /// trainer 已關閉時回傳 `None`。
    async fn play_episode(
        &mut self,
        mut msg: GameMessage,
    ) -> Result<Option<(EpisodeResult, GameMessage)>> {
        let mut result = EpisodeResult::default();
        self.history.reset();

        loop {
            self.history.observe(&msg);
            let observation = self.encoder.encode(&msg);
            let mask = action_mask(&msg, &self.catalog, &self.history);

            if !mask.iter().any(|&legal| legal) {
                let idle = self.settings.idle_command.clone();
                msg = self.exchange(&idle).await?;
                continue;
            }

            let step = self.policy.act(&observation, &mask, &mut self.rng)?;
            let catalog = Arc::clone(&self.catalog);
            let action = &catalog[step.action];
            self.track_before_send(&msg, step.action);

            let next = self.exchange(&action.to_command()).await?;
            self.history.record(step.action);

            let reward = compute_reward(&msg, &next, Some(action));
            let done = next.is_game_over();
            if next.game().screen_type() == SCREEN_BOSS_REWARD
                && msg.game().screen_type() != SCREEN_BOSS_REWARD
            {
                if let Some(game) = self.game_id {
                    self.recorder.boss_defeated(game);
                }
            }

            self.buffer.add(Transition {
                observation,
                action: step.action,
                reward,
                done: self.episode_start,
                value: step.value,
                log_prob: step.log_prob,
                mask,
            })?;
            self.episode_start = false;
            result.reward += reward;
            result.length += 1;

            if self.buffer.is_full() && !self.hand_off(&next, done).await? {
                return Ok(None);
            }

            msg = next;
            if done {
                self.episode_start = true;
                return Ok(Some((result, msg)));
            }
        }
    }

    /// 開局與選卡紀錄
    fn track_before_send(&mut self, msg: &GameMessage, index: usize) {
        let action = &self.catalog[index];
        match action.command {
            Command::Start => {
                let class = action.player_class.unwrap_or_default();
                self.game_id = Some(self.recorder.game_started(class));
            }
            Command::Choose => {
                if let (Some(game), Some(pick)) = (self.game_id, card_pick_from(msg, action)) {
                    self.recorder.card_picked(game, pick);
                }
            }
            _ => {}
        }
    }

    /// 完成 GAE 並把 buffer 交給 trainer；trainer 已關閉時回傳 false
    async fn hand_off(&mut self, next: &GameMessage, done: bool) -> Result<bool> {
        let last_value = self.policy.predict_value(&self.encoder.encode(next))?;
        self.buffer.compute_returns_and_advantage(last_value, done)?;

        let empty = self.buffer.empty_like();
        let buffer = mem::replace(&mut self.buffer, empty);
        let sent = self
            .tx
            .send(WorkerMessage::Rollout {
                worker_id: self.id(),
                buffer,
            })
            .await;
        if sent.is_err() {
            info!("worker {}: trainer closed, stopping", self.id());
            return Ok(false);
        }

        self.fills += 1;
        info!("worker {}: rollout {} sent", self.id(), self.fills);
        if self.fills % self.settings.reload_interval == 0 {
            self.reload().await;
        }
        Ok(true)
    }

    /// 讀檔在 blocking 執行緒上進行，成功才替換目前的參數；沒有 checkpoint 時不動
    async fn reload(&mut self) {
        let path = self.settings.checkpoint_path.clone();
        let mut next = self.policy.clone();
        let task_path = path.clone();
        let loaded = tokio::task::spawn_blocking(move || {
            if !task_path.exists() {
                return Ok(None);
            }
            next.load_from(&task_path).map(|()| Some(next))
        })
        .await;
        match loaded {
            Ok(Ok(Some(policy))) => {
                self.policy = policy;
                info!("worker {}: reloaded model weights", self.id());
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!("worker {}: cannot reload {}: {}", self.id(), path.display(), e),
            Err(e) => warn!("worker {}: reload task failed: {}", self.id(), e),
        }
    }

    /// 記錄結果，送出結束畫面的指令，回傳之後的狀態
    async fn end_of_episode(&mut self, last: GameMessage) -> Result<GameMessage> {
        if let Some(game) = self.game_id.take() {
            self.recorder.game_over(game, &outcome_from(&last));
        }
        let mut msg = last;
        for command in self.settings.end_of_episode_commands.clone() {
            match self.bridge.exchange(&command).await {
                Ok(next) => msg = next,
                Err(e) if !e.is_fatal() => {
                    warn!("worker {}: bad state after '{}': {}", self.id(), command, e);
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(msg)
    }

    async fn exchange(&mut self, command: &str) -> Result<GameMessage> {
        self.bridge.send(command).await?;
        self.receive().await
    }

    /// 讀取狀態；無法解析的文件跳過
    async fn receive(&mut self) -> Result<GameMessage> {
        loop {
            match self.bridge.receive().await {
                Ok(msg) => return Ok(msg),
                Err(e @ BridgeError::Json(_)) => {
                    warn!("worker {}: {}", self.id(), e);
                }
                Err(e) => return Err(Error::from(e)),
            }
        }
    }

    pub fn metrics(&self) -> &EpisodeMetrics {
        &self.metrics
    }
}

// ============================================================================
// 單元測試
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Vocabulary;
    use crate::service::policy::LinearPolicy;
    use crate::service::records::MemoryRecorder;
    use crate::service::tensor::{observation_size, Observation};
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn settings(dir: &std::path::Path, n_steps: usize) -> WorkerSettings {
        WorkerSettings {
            id: 0,
            n_steps,
            gamma: 0.99,
            gae_lambda: 0.95,
            reload_interval: 1,
            checkpoint_path: dir.join("policy.json"),
            end_of_episode_commands: vec!["PROCEED".into(), "PROCEED".into()],
            idle_command: "STATE".into(),
            seed: 1,
            metrics: MetricsSink::new(dir.join("metrics.json"), 1),
        }
    }

    fn map_state(floor: i64) -> String {
        json!({
            "in_game": true,
            "available_commands": ["proceed"],
            "game_state": {"screen_type": "MAP", "floor": floor, "current_hp": 50, "max_hp": 80}
        })
        .to_string()
    }

    fn game_over() -> String {
        json!({
            "in_game": true,
            "available_commands": ["proceed"],
            "game_state": {"screen_type": "GAME_OVER", "floor": 3, "screen_state": {"victory": false}}
        })
        .to_string()
    }

    /// 依腳本回應每一條指令，腳本用完即斷線；回傳收到的指令
    async fn fake_game(mut game: DuplexStream, script: Vec<String>) -> Vec<String> {
        let mut commands = Vec::new();
        let mut buf = [0u8; 256];
        let mut replies = script.into_iter();
        if let Some(first) = replies.next() {
            game.write_all(first.as_bytes()).await.unwrap();
        }
        for reply in replies {
            let n = game.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            commands.push(String::from_utf8_lossy(&buf[..n]).to_string());
            game.write_all(reply.as_bytes()).await.unwrap();
        }
        // 讀完最後一條指令再斷線
        let n = game.read(&mut buf).await.unwrap_or(0);
        if n > 0 {
            commands.push(String::from_utf8_lossy(&buf[..n]).to_string());
        }
        commands
    }

    fn worker(
        dir: &std::path::Path,
        n_steps: usize,
        stream: DuplexStream,
        tx: mpsc::Sender<WorkerMessage>,
    ) -> Worker<DuplexStream, LinearPolicy> {
        let catalog = Arc::new(ActionCatalog::build());
        Worker::new(
            settings(dir, n_steps),
            Bridge::new(stream, Duration::from_secs(1)),
            LinearPolicy::new(observation_size(), catalog.len(), 1e-3),
            catalog,
            ObservationEncoder::new(Vocabulary::shared()),
            Arc::new(MemoryRecorder::new()),
            tx,
        )
    }

    #[tokio::test]
    async fn test_worker_hands_off_full_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let (ours, theirs) = duplex(1 << 16);
        let script = vec![map_state(1), map_state(2), map_state(3), game_over(), map_state(1), map_state(1)];
        let game = tokio::spawn(fake_game(theirs, script));

        let (tx, mut rx) = mpsc::channel(8);
        let handle = worker(dir.path(), 2, ours, tx).spawn();

        let mut rollouts = 0;
        let mut exit_error = None;
        while let Some(message) = rx.recv().await {
            match message {
                WorkerMessage::Rollout { worker_id, buffer } => {
                    assert_eq!(worker_id, 0);
                    assert_eq!(buffer.len(), 2);
                    assert!(buffer.get(2).is_ok());
                    rollouts += 1;
                }
                WorkerMessage::Exited { error, .. } => {
                    exit_error = error;
                    break;
                }
            }
        }
        handle.await.unwrap();
        let commands = game.await.unwrap();

        // 三步 PROCEED 到 GAME_OVER，再兩條結束指令，之後斷線
        assert_eq!(rollouts, 1);
        assert!(commands.iter().all(|c| c == "PROCEED"));
        assert!(exit_error.is_some());
    }

    #[tokio::test]
    async fn test_worker_idles_without_legal_action() {
        let dir = tempfile::tempdir().unwrap();
        let (ours, theirs) = duplex(1 << 16);
        let waiting = json!({"in_game": true, "available_commands": ["wait"], "game_state": {"screen_type": "NONE"}}).to_string();
        let game = tokio::spawn(fake_game(theirs, vec![waiting.clone(), waiting]));

        let (tx, mut rx) = mpsc::channel(8);
        let handle = worker(dir.path(), 4, ours, tx).spawn();
        while let Some(message) = rx.recv().await {
            if matches!(message, WorkerMessage::Exited { .. }) {
                break;
            }
        }
        handle.await.unwrap();
        let commands = game.await.unwrap();
        assert_eq!(commands, vec!["STATE", "STATE"]);
    }

    #[tokio::test]
    async fn test_reload_replaces_weights_from_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let (ours, _theirs) = duplex(1 << 16);
        let (tx, _rx) = mpsc::channel(1);
        let mut w = worker(dir.path(), 1, ours, tx);

        // 沒有 checkpoint 時保持原參數
        w.reload().await;
        assert_eq!(w.policy.predict_value(&Observation::zeros()).unwrap(), 0.0);

        let mut saved = serde_json::to_value(&w.policy).unwrap();
        let params = saved["params"].as_array_mut().unwrap();
        let last = params.len() - 1;
        params[last] = json!(2.0);
        std::fs::write(dir.path().join("policy.json"), saved.to_string()).unwrap();

        w.reload().await;
        assert_eq!(w.policy.predict_value(&Observation::zeros()).unwrap(), 2.0);
    }

    #[tokio::test]
    async fn test_reload_keeps_weights_on_shape_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let (ours, _theirs) = duplex(1 << 16);
        let (tx, _rx) = mpsc::channel(1);
        let mut w = worker(dir.path(), 1, ours, tx);

        LinearPolicy::new(3, 2, 1e-3).save(&dir.path().join("policy.json")).unwrap();
        w.reload().await;
        assert_eq!(w.policy.parameter_count(), LinearPolicy::new(observation_size(), w.catalog.len(), 1e-3).parameter_count());
    }

    #[tokio::test]
    async fn test_worker_stops_when_trainer_closes() {
        let dir = tempfile::tempdir().unwrap();
        let (ours, theirs) = duplex(1 << 16);
        let script = vec![map_state(1), map_state(2), map_state(3), map_state(4)];
        let _game = tokio::spawn(fake_game(theirs, script));

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let result = worker(dir.path(), 1, ours, tx).run().await;
        assert!(result.is_ok());
    }
}
