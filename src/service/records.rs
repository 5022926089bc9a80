//! 對局紀錄與訓練指標
//!
//! - [`RunRecorder`]：持久層介面，只在固定的生命週期點被呼叫
//!   （開局、選卡、擊敗 Boss、遊戲結束）
//! - [`MemoryRecorder`]：以 `DashMap` 實作，多個 worker 可同時寫入
//! - [`EpisodeMetrics`] / [`MetricsSink`]：每局獎勵與長度序列，定期輸出 JSON

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use log::{debug, info};
use serde::Serialize;

use crate::game::{Action, Command, GameMessage, SCREEN_CARD_REWARD};

pub type GameId = u64;

/// 不計入卡牌表現的起始牌
const STARTER_CARDS: &[&str] = &["Strike", "Defend"];

// ============================================================================
// 紀錄資料
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CardPick {
    pub card_id: String,
    pub card_name: String,
    pub other_options: Vec<String>,
    pub agent_class: String,
}

/// 牌組中的一張卡 (id, name)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeckCard {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GameOutcome {
    pub floor: i64,
    pub victory: bool,
    pub deck: Vec<DeckCard>,
}

/// 在 `CARD_REWARD` 畫面執行 `CHOOSE i` 時取出選卡資訊
pub fn card_pick_from(msg: &GameMessage, action: &Action) -> Option<CardPick> {
    if action.command != Command::Choose {
        return None;
    }
    let game = msg.game();
    if game.screen_type() != SCREEN_CARD_REWARD {
        return None;
    }
    let chosen = action.slot?;
    let cards: Vec<_> = game.screen_state().items("cards").collect();
    let card = cards.get(chosen)?;
    Some(CardPick {
        card_id: card.str("id").to_string(),
        card_name: card.str("name").to_string(),
        other_options: cards
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != chosen)
            .map(|(_, c)| c.str("name").to_string())
            .collect(),
        agent_class: game.player_class().to_string(),
    })
}

/// 遊戲結束畫面的結果
pub fn outcome_from(msg: &GameMessage) -> GameOutcome {
    let game = msg.game();
    GameOutcome {
        floor: game.node().int("floor"),
        victory: game.screen_state().flag("victory"),
        deck: game
            .node()
            .items("deck")
            .map(|c| DeckCard {
                id: c.str("id").to_string(),
                name: c.str("name").to_string(),
            })
            .collect(),
    }
}

/// 持久層
pub trait RunRecorder: Send + Sync {
    /// 新開一局，回傳該局 id
    fn game_started(&self, agent_class: &str) -> GameId;

    fn card_picked(&self, game: GameId, pick: CardPick);

    fn boss_defeated(&self, game: GameId);

    fn game_over(&self, game: GameId, outcome: &GameOutcome);
}

// ============================================================================
// MemoryRecorder
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GameRecord {
    pub agent_class: String,
    pub floors_reached: i64,
    pub bosses_defeated: u32,
    pub win: bool,
    pub finished: bool,
    pub card_picks: Vec<CardPick>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CardPerformance {
    pub card_name: String,
    pub times_picked: u32,
    pub games_featured_in: u32,
    pub average_floor_reached: f64,
    /// 0.0 ~ 1.0
    pub win_rate: f64,
}

impl CardPerformance {
    fn update(&mut self, copies: u32, floor: i64, won: bool) {
        self.times_picked += copies;
        self.games_featured_in += 1;
        let n = self.games_featured_in as f64;
        self.average_floor_reached += (floor as f64 - self.average_floor_reached) / n;
        let w = if won { 1.0 } else { 0.0 };
        self.win_rate += (w - self.win_rate) / n;
    }
}

#[derive(Debug, Serialize)]
pub struct RecordSnapshot {
    pub games: BTreeMap<GameId, GameRecord>,
    pub card_performance: BTreeMap<String, CardPerformance>,
}

#[derive(Debug, Default)]
pub struct MemoryRecorder {
    next_id: AtomicU64,
    games: DashMap<GameId, GameRecord>,
    cards: DashMap<String, CardPerformance>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn game(&self, id: GameId) -> Option<GameRecord> {
        self.games.get(&id).map(|g| g.clone())
    }

    pub fn card(&self, card_id: &str) -> Option<CardPerformance> {
        self.cards.get(card_id).map(|c| c.clone())
    }

    pub fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot {
            games: self
                .games
                .iter()
                .map(|e| (*e.key(), e.value().clone()))
                .collect(),
            card_performance: self
                .cards
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        }
    }

    pub fn save_json(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(&self.snapshot())?;
        std::fs::write(path, json)
    }
}

impl RunRecorder for MemoryRecorder {
    fn game_started(&self, agent_class: &str) -> GameId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.games.insert(
            id,
            GameRecord {
                agent_class: agent_class.to_string(),
                ..GameRecord::default()
            },
        );
        info!("game {} started as {}", id, agent_class);
        id
    }

    fn card_picked(&self, game: GameId, pick: CardPick) {
        debug!("game {}: picked {} over {:?}", game, pick.card_name, pick.other_options);
        if let Some(mut record) = self.games.get_mut(&game) {
            record.card_picks.push(pick);
        }
    }

    fn boss_defeated(&self, game: GameId) {
        if let Some(mut record) = self.games.get_mut(&game) {
            record.bosses_defeated += 1;
        }
    }

    fn game_over(&self, game: GameId, outcome: &GameOutcome) {
        if let Some(mut record) = self.games.get_mut(&game) {
            record.floors_reached = outcome.floor;
            record.win = outcome.victory;
            record.finished = true;
        }

        let mut copies: BTreeMap<&str, (&str, u32)> = BTreeMap::new();
        for card in &outcome.deck {
            if STARTER_CARDS.contains(&card.name.as_str()) {
                continue;
            }
            copies.entry(card.id.as_str()).or_insert((card.name.as_str(), 0)).1 += 1;
        }
        for (id, (name, count)) in copies {
            self.cards
                .entry(id.to_string())
                .or_insert_with(|| CardPerformance {
                    card_name: name.to_string(),
                    ..CardPerformance::default()
                })
                .update(count, outcome.floor, outcome.victory);
        }
        info!("game {} over at floor {} (victory: {})", game, outcome.floor, outcome.victory);
    }
}

// ============================================================================
// 訓練指標
// ============================================================================

const ROLLING_WINDOW: usize = 10;

#[derive(Clone, Debug, Default, Serialize)]
pub struct EpisodeMetrics {
    pub rewards: Vec<f32>,
    pub lengths: Vec<usize>,
    /// 每局結束時最近 10 局的平均獎勵
    pub rolling_average: Vec<f32>,
    pub highest_reward: Option<f32>,
    #[serde(skip)]
    recent: VecDeque<f32>,
}

impl EpisodeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn episodes(&self) -> usize {
        self.rewards.len()
    }

    /// 記錄一局，回傳目前的滾動平均
    pub fn record(&mut self, reward: f32, length: usize) -> f32 {
        self.rewards.push(reward);
        self.lengths.push(length);
        if self.recent.len() == ROLLING_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(reward);
        let avg = self.recent.iter().sum::<f32>() / self.recent.len() as f32;
        self.rolling_average.push(avg);
        self.highest_reward = Some(self.highest_reward.map_or(reward, |h| h.max(reward)));
        avg
    }
}

/// 每 `every` 局把指標寫成 JSON
#[derive(Clone, Debug)]
pub struct MetricsSink {
    path: PathBuf,
    every: usize,
}

impl MetricsSink {
    pub fn new(path: impl Into<PathBuf>, every: usize) -> Self {
        Self {
            path: path.into(),
            every: every.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 第 0、every、2·every… 局（0 起算）結束後輸出
    pub fn is_due(&self, episode: usize) -> bool {
        episode % self.every == 0
    }

    pub async fn write(&self, metrics: &EpisodeMetrics) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let json = serde_json::to_vec_pretty(metrics)?;
        tokio::fs::write(&self.path, json).await?;
        info!("performance metrics saved to {}", self.path.display());
        Ok(())
    }

    pub async fn maybe_write(&self, episode: usize, metrics: &EpisodeMetrics) -> io::Result<bool> {
        if !self.is_due(episode) {
            return Ok(false);
        }
        self.write(metrics).await?;
        Ok(true)
    }
}

// ============================================================================
// 單元測試
// ============================================================================
