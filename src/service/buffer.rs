//! Trajectory buffer
//!
//! 固定容量的 rollout 儲存，每個 worker 一份，填滿後以 message passing 交給
//! trainer。生命週期：
//!
//! ```text
//! Empty → Filling (add × n) → Full → Finalized → Empty (reset)
//! ```
//!
//! `Full` 之後呼叫 `add` 回傳錯誤；`compute_returns_and_advantage` 需要
//! `Full`；`get` 需要 `Finalized`。

use thiserror::Error;

use super::tensor::{Category, Observation, CATEGORY_COUNT};

#[derive(Debug, Error, PartialEq)]
pub enum BufferError {
    #[error("buffer is full ({capacity} transitions)")]
    Full { capacity: usize },

    #[error("buffer is not full ({len}/{capacity})")]
    NotFull { len: usize, capacity: usize },

    #[error("advantages have not been computed")]
    NotFinalized,

    #[error("action mask length {got} does not match action space {expected}")]
    MaskLength { expected: usize, got: usize },

    #[error("batch size must be positive")]
    ZeroBatchSize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferPhase {
    Empty,
    Filling,
    Full,
    Finalized,
}

/// 一步轉移
#[derive(Clone, Debug)]
pub struct Transition {
    pub observation: Observation,
    pub action: usize,
    pub reward: f32,
    /// 此步是否開啟新的 episode（前一步已結束）；GAE 以 `dones[t + 1]`
    /// 切斷第 t 步的 bootstrap
    pub done: bool,
    pub value: f32,
    pub log_prob: f32,
    /// 收集時使用的合法 mask
    pub mask: Vec<bool>,
}

/// Rollout buffer
#[derive(Clone, Debug)]
pub struct RolloutBuffer {
    capacity: usize,
    action_dim: usize,
    gamma: f32,
    gae_lambda: f32,

    observations: Vec<Vec<f32>>,
    actions: Vec<usize>,
    rewards: Vec<f32>,
    dones: Vec<f32>,
    values: Vec<f32>,
    log_probs: Vec<f32>,
    masks: Vec<bool>,
    advantages: Vec<f32>,
    returns: Vec<f32>,

    pos: usize,
    phase: BufferPhase,
}

impl RolloutBuffer {
    pub fn new(capacity: usize, action_dim: usize, gamma: f32, gae_lambda: f32) -> Self {
        Self {
            capacity,
            action_dim,
            gamma,
            gae_lambda,
            observations: Category::ALL
                .iter()
                .map(|c| vec![0.0; capacity * c.size()])
                .collect(),
            actions: vec![0; capacity],
            rewards: vec![0.0; capacity],
            dones: vec![0.0; capacity],
            values: vec![0.0; capacity],
            log_probs: vec![0.0; capacity],
            masks: vec![false; capacity * action_dim],
            advantages: vec![0.0; capacity],
            returns: vec![0.0; capacity],
            pos: 0,
            phase: BufferPhase::Empty,
        }
    }

    /// 相同設定的空 buffer
    pub fn empty_like(&self) -> Self {
        Self::new(self.capacity, self.action_dim, self.gamma, self.gae_lambda)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn action_dim(&self) -> usize {
        self.action_dim
    }

    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    pub fn is_full(&self) -> bool {
        matches!(self.phase, BufferPhase::Full | BufferPhase::Finalized)
    }

    pub fn phase(&self) -> BufferPhase {
        self.phase
    }

    /// 清零所有陣列並把寫入位置歸零
    pub fn reset(&mut self) {
        for obs in &mut self.observations {
            obs.iter_mut().for_each(|x| *x = 0.0);
        }
        self.actions.iter_mut().for_each(|x| *x = 0);
        for v in [
            &mut self.rewards,
            &mut self.dones,
            &mut self.values,
            &mut self.log_probs,
            &mut self.advantages,
            &mut self.returns,
        ] {
            v.iter_mut().for_each(|x| *x = 0.0);
        }
        self.masks.iter_mut().for_each(|x| *x = false);
        self.pos = 0;
        self.phase = BufferPhase::Empty;
    }

    pub fn add(&mut self, transition: Transition) -> Result<(), BufferError> {
        if self.is_full() || self.pos >= self.capacity {
            return Err(BufferError::Full {
                capacity: self.capacity,
            });
        }
        if transition.mask.len() != self.action_dim {
            return Err(BufferError::MaskLength {
                expected: self.action_dim,
                got: transition.mask.len(),
            });
        }

        let i = self.pos;
        for (cat, tensor) in transition.observation.iter() {
            let size = cat.size();
            self.observations[cat as usize][i * size..(i + 1) * size]
                .copy_from_slice(&tensor.data);
        }
        self.actions[i] = transition.action;
        self.rewards[i] = transition.reward;
        self.dones[i] = if transition.done { 1.0 } else { 0.0 };
        self.values[i] = transition.value;
        self.log_probs[i] = transition.log_prob;
        self.masks[i * self.action_dim..(i + 1) * self.action_dim]
            .copy_from_slice(&transition.mask);

        self.pos += 1;
        self.phase = if self.pos == self.capacity {
            BufferPhase::Full
        } else {
            BufferPhase::Filling
        };
        Ok(())
    }

    /// GAE(λ) 與 discounted return，單次反向掃描
    ///
    /// `last_value` 是最後一步之後狀態的 value 估計，`last_done` 表示
    /// 最後一步之後 episode 是否已結束。
    pub fn compute_returns_and_advantage(
        &mut self,
        last_value: f32,
        last_done: bool,
    ) -> Result<(), BufferError> {
        if self.phase != BufferPhase::Full {
            return Err(BufferError::NotFull {
                len: self.pos,
                capacity: self.capacity,
            });
        }

        let mut last_gae = 0.0;
        for step in (0..self.capacity).rev() {
            let (next_non_terminal, next_value) = if step == self.capacity - 1 {
                (if last_done { 0.0 } else { 1.0 }, last_value)
            } else {
                (1.0 - self.dones[step + 1], self.values[step + 1])
            };
            let delta =
                self.rewards[step] + self.gamma * next_value * next_non_terminal - self.values[step];
            last_gae = delta + self.gamma * self.gae_lambda * next_non_terminal * last_gae;
            self.advantages[step] = last_gae;
        }
        for step in 0..self.capacity {
            self.returns[step] = self.advantages[step] + self.values[step];
        }

        self.phase = BufferPhase::Finalized;
        Ok(())
    }

    /// 依 buffer 順序切出連續 minibatch，最後一批可以不滿
    pub fn get(&self, batch_size: usize) -> Result<Batches<'_>, BufferError> {
        if self.phase != BufferPhase::Finalized {
            return Err(BufferError::NotFinalized);
        }
        if batch_size == 0 {
            return Err(BufferError::ZeroBatchSize);
        }
        Ok(Batches {
            buffer: self,
            batch_size,
            start: 0,
        })
    }

    pub fn advantages(&self) -> &[f32] {
        &self.advantages[..self.pos]
    }

    pub fn returns(&self) -> &[f32] {
        &self.returns[..self.pos]
    }

    pub fn rewards(&self) -> &[f32] {
        &self.rewards[..self.pos]
    }

    fn batch(&self, start: usize, end: usize) -> RolloutBatch<'_> {
        let observations = std::array::from_fn(|k| {
            let size = Category::ALL[k].size();
            &self.observations[k][start * size..end * size]
        });
        RolloutBatch {
            start,
            action_dim: self.action_dim,
            observations,
            actions: &self.actions[start..end],
            rewards: &self.rewards[start..end],
            dones: &self.dones[start..end],
            values: &self.values[start..end],
            log_probs: &self.log_probs[start..end],
            advantages: &self.advantages[start..end],
            returns: &self.returns[start..end],
            masks: &self.masks[start * self.action_dim..end * self.action_dim],
        }
    }
}

/// minibatch 迭代器
pub struct Batches<'a> {
    buffer: &'a RolloutBuffer,
    batch_size: usize,
    start: usize,
}

impl<'a> Iterator for Batches<'a> {
    type Item = RolloutBatch<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.start >= self.buffer.pos {
            return None;
        }
        let end = (self.start + self.batch_size).min(self.buffer.pos);
        let batch = self.buffer.batch(self.start, end);
        self.start = end;
        Some(batch)
    }
}

/// 借用 buffer 的一個 minibatch，所有欄位 index 對齊
#[derive(Clone, Copy, Debug)]
pub struct RolloutBatch<'a> {
    /// 在 buffer 中的起始位置
    pub start: usize,
    action_dim: usize,
    observations: [&'a [f32]; CATEGORY_COUNT],
    pub actions: &'a [usize],
    pub rewards: &'a [f32],
    pub dones: &'a [f32],
    pub values: &'a [f32],
    pub log_probs: &'a [f32],
    pub advantages: &'a [f32],
    pub returns: &'a [f32],
    masks: &'a [bool],
}

impl<'a> RolloutBatch<'a> {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// 某類別的整批資料（len × size）
    pub fn observation(&self, category: Category) -> &'a [f32] {
        self.observations[category as usize]
    }

    /// 第 i 筆樣本依 `Category::ALL` 順序串接的觀察
    pub fn flat_observation(&self, i: usize) -> Vec<f32> {
        let mut out = Vec::new();
        for cat in Category::ALL {
            let size = cat.size();
            out.extend_from_slice(&self.observation(cat)[i * size..(i + 1) * size]);
        }
        out
    }

    pub fn mask(&self, i: usize) -> &'a [bool] {
        &self.masks[i * self.action_dim..(i + 1) * self.action_dim]
    }
}

// ============================================================================
// 單元測試
// ============================================================================
