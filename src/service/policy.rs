//! Policy / value 函數
//!
//! 訓練迴圈只依賴 [`ActorCritic`] 介面：取樣動作、估計 value、在當前參數下
//! 重新評估一個 minibatch，以及依每筆樣本的損失梯度更新參數。
//!
//! [`LinearPolicy`] 是內建的參考實作：
//! - 輸入特徵先做 symlog 壓縮（token 與 HP 的量級差很多）
//! - actor：線性 logits + masked softmax
//! - critic：線性 value
//! - 解析梯度、全域 norm 裁剪、Adam
//! - JSON checkpoint（先寫暫存檔再 rename）

use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::buffer::RolloutBatch;
use super::tensor::Observation;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: usize, got: usize },

    #[error("no legal action in mask")]
    NoLegalAction,

    #[error("non-finite value in {0}")]
    NonFinite(&'static str),

    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// 一次取樣的結果
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PolicyStep {
    pub action: usize,
    pub log_prob: f32,
    pub value: f32,
}

/// 在當前參數下重新評估 minibatch 的結果
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Evaluation {
    pub log_probs: Vec<f32>,
    pub values: Vec<f32>,
    pub entropy: Vec<f32>,
}

/// 損失對單筆樣本的 log π(a|s)、V(s)、H(π(·|s)) 的偏導數
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SampleGrad {
    pub log_prob: f32,
    pub value: f32,
    pub entropy: f32,
}

/// 不透明的 actor-critic
pub trait ActorCritic: Send {
    fn obs_dim(&self) -> usize;
    fn action_dim(&self) -> usize;

    /// 在 mask 限制下取樣一個動作
    fn act(&self, obs: &Observation, mask: &[bool], rng: &mut StdRng)
        -> Result<PolicyStep, PolicyError>;

    fn predict_value(&self, obs: &Observation) -> Result<f32, PolicyError>;

    fn evaluate_actions(&self, batch: &RolloutBatch<'_>) -> Result<Evaluation, PolicyError>;

    /// 反向傳播 `grads` 並套用一步更新，回傳裁剪前的梯度 norm
    fn step(
        &mut self,
        batch: &RolloutBatch<'_>,
        grads: &[SampleGrad],
        max_grad_norm: f32,
    ) -> Result<f32, PolicyError>;

    fn save(&self, path: &Path) -> Result<(), PolicyError>;

    /// 從 checkpoint 載入參數，形狀必須相同
    fn load_from(&mut self, path: &Path) -> Result<(), PolicyError>;
}

// ============================================================================
// 數值輔助
// ============================================================================

fn symlog(x: f32) -> f32 {
    x.signum() * x.abs().ln_1p()
}

/// masked log-softmax；非法動作機率為 0，log 機率為 `-inf`
pub fn masked_log_softmax(logits: &[f32], mask: &[bool]) -> Option<(Vec<f32>, Vec<f32>)> {
    let max = logits
        .iter()
        .zip(mask)
        .filter(|(_, &m)| m)
        .map(|(&l, _)| l)
        .fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return None;
    }
    let sum: f32 = logits
        .iter()
        .zip(mask)
        .filter(|(_, &m)| m)
        .map(|(&l, _)| (l - max).exp())
        .sum();
    let log_sum = sum.ln();

    let mut log_probs = vec![f32::NEG_INFINITY; logits.len()];
    let mut probs = vec![0.0; logits.len()];
    for (k, (&l, &m)) in logits.iter().zip(mask).enumerate() {
        if m {
            log_probs[k] = l - max - log_sum;
            probs[k] = log_probs[k].exp();
        }
    }
    Some((log_probs, probs))
}

fn entropy(probs: &[f32], log_probs: &[f32]) -> f32 {
    probs
        .iter()
        .zip(log_probs)
        .filter(|(&p, _)| p > 0.0)
        .map(|(&p, &lp)| -p * lp)
        .sum()
}

/// 依機率取樣；浮點誤差落空時取最後一個正機率
pub fn sample_categorical(probs: &[f32], rng: &mut StdRng) -> usize {
    let r: f32 = rng.gen_range(0.0..1.0);
    let mut cumulative = 0.0;
    for (i, &p) in probs.iter().enumerate() {
        cumulative += p;
        if p > 0.0 && r < cumulative {
            return i;
        }
    }
    probs.iter().rposition(|&p| p > 0.0).unwrap_or(0)
}

// ============================================================================
// LinearPolicy
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    t: u64,
    m: Vec<f32>,
    v: Vec<f32>,
}

impl Adam {
    fn new(lr: f32, n: usize) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            t: 0,
            m: vec![0.0; n],
            v: vec![0.0; n],
        }
    }

    fn update(&mut self, params: &mut [f32], grads: &[f32]) {
        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);
        for i in 0..params.len() {
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * grads[i];
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * grads[i] * grads[i];
            let m_hat = self.m[i] / bc1;
            let v_hat = self.v[i] / bc2;
            params[i] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
        }
    }
}

/// 線性 actor-critic
///
/// 參數以單一向量保存：`[actor_w (A×D) | actor_b (A) | critic_w (D) | critic_b]`。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinearPolicy {
    obs_dim: usize,
    action_dim: usize,
    params: Vec<f32>,
    optimizer: Adam,
}

struct Forward {
    log_probs: Vec<f32>,
    probs: Vec<f32>,
    value: f32,
}

impl LinearPolicy {
    /// 參數全 0：初始為合法動作上的均勻分佈，value 為 0
    pub fn new(obs_dim: usize, action_dim: usize, learning_rate: f32) -> Self {
        let n = action_dim * obs_dim + action_dim + obs_dim + 1;
        Self {
            obs_dim,
            action_dim,
            params: vec![0.0; n],
            optimizer: Adam::new(learning_rate, n),
        }
    }

    /// 有 checkpoint 就載入，否則回傳全新的 policy
    pub fn load_or_new(
        path: &Path,
        obs_dim: usize,
        action_dim: usize,
        learning_rate: f32,
    ) -> Result<Self, PolicyError> {
        let mut policy = Self::new(obs_dim, action_dim, learning_rate);
        if path.exists() {
            policy.load_from(path)?;
        }
        Ok(policy)
    }

    pub fn parameter_count(&self) -> usize {
        self.params.len()
    }

    fn actor_b_offset(&self) -> usize {
        self.action_dim * self.obs_dim
    }

    fn critic_w_offset(&self) -> usize {
        self.actor_b_offset() + self.action_dim
    }

    fn critic_b_offset(&self) -> usize {
        self.critic_w_offset() + self.obs_dim
    }

    fn features(&self, raw: &[f32]) -> Result<Vec<f32>, PolicyError> {
        if raw.len() != self.obs_dim {
            return Err(PolicyError::ShapeMismatch {
                expected: self.obs_dim,
                got: raw.len(),
            });
        }
        Ok(raw.iter().map(|&x| symlog(x)).collect())
    }

    fn check_mask(&self, mask: &[bool]) -> Result<(), PolicyError> {
        if mask.len() != self.action_dim {
            return Err(PolicyError::ShapeMismatch {
                expected: self.action_dim,
                got: mask.len(),
            });
        }
        Ok(())
    }

    fn value_of(&self, x: &[f32]) -> f32 {
        let w = &self.params[self.critic_w_offset()..self.critic_b_offset()];
        let dot: f32 = w.iter().zip(x).map(|(a, b)| a * b).sum();
        dot + self.params[self.critic_b_offset()]
    }

    fn forward(&self, x: &[f32], mask: &[bool]) -> Result<Forward, PolicyError> {
        let d = self.obs_dim;
        let b0 = self.actor_b_offset();
        let logits: Vec<f32> = (0..self.action_dim)
            .map(|k| {
                if !mask[k] {
                    return 0.0;
                }
                let row = &self.params[k * d..(k + 1) * d];
                row.iter().zip(x).map(|(a, b)| a * b).sum::<f32>() + self.params[b0 + k]
            })
            .collect();
        let (log_probs, probs) =
            masked_log_softmax(&logits, mask).ok_or(PolicyError::NoLegalAction)?;
        Ok(Forward {
            log_probs,
            probs,
            value: self.value_of(x),
        })
    }

    /// 單筆樣本對參數的梯度累加進 `acc`
    fn accumulate(&self, acc: &mut [f32], x: &[f32], mask: &[bool], action: usize, g: SampleGrad)
        -> Result<(), PolicyError>
    {
        let fwd = self.forward(x, mask)?;
        let h = entropy(&fwd.probs, &fwd.log_probs);
        let d = self.obs_dim;
        let b0 = self.actor_b_offset();

        for k in 0..self.action_dim {
            if !mask[k] {
                continue;
            }
            let p = fwd.probs[k];
            let onehot = if k == action { 1.0 } else { 0.0 };
            let dlogit = g.log_prob * (onehot - p) - g.entropy * p * (fwd.log_probs[k] + h);
            if dlogit == 0.0 {
                continue;
            }
            for (a, &xi) in acc[k * d..(k + 1) * d].iter_mut().zip(x) {
                *a += dlogit * xi;
            }
            acc[b0 + k] += dlogit;
        }

        let cw = self.critic_w_offset();
        for (a, &xi) in acc[cw..cw + d].iter_mut().zip(x) {
            *a += g.value * xi;
        }
        acc[self.critic_b_offset()] += g.value;
        Ok(())
    }
}

/// 全域 L2 norm 裁剪，回傳裁剪前的 norm
pub fn clip_grad_norm(grads: &mut [f32], max_norm: f32) -> f32 {
    let norm = grads.iter().map(|g| g * g).sum::<f32>().sqrt();
    if max_norm > 0.0 && norm > max_norm {
        let scale = max_norm / (norm + 1e-6);
        grads.iter_mut().for_each(|g| *g *= scale);
    }
    norm
}

impl ActorCritic for LinearPolicy {
    fn obs_dim(&self) -> usize {
        self.obs_dim
    }

    fn action_dim(&self) -> usize {
        self.action_dim
    }

    fn act(
        &self,
        obs: &Observation,
        mask: &[bool],
        rng: &mut StdRng,
    ) -> Result<PolicyStep, PolicyError> {
        self.check_mask(mask)?;
        let x = self.features(&obs.flatten())?;
        let fwd = self.forward(&x, mask)?;
        let action = sample_categorical(&fwd.probs, rng);
        Ok(PolicyStep {
            action,
            log_prob: fwd.log_probs[action],
            value: fwd.value,
        })
    }

    fn predict_value(&self, obs: &Observation) -> Result<f32, PolicyError> {
        let x = self.features(&obs.flatten())?;
        Ok(self.value_of(&x))
    }

    fn evaluate_actions(&self, batch: &RolloutBatch<'_>) -> Result<Evaluation, PolicyError> {
        let rows: Vec<(f32, f32, f32)> = (0..batch.len())
            .into_par_iter()
            .map(|i| -> Result<(f32, f32, f32), PolicyError> {
                let mask = batch.mask(i);
                self.check_mask(mask)?;
                let x = self.features(&batch.flat_observation(i))?;
                let fwd = self.forward(&x, mask)?;
                let action = batch.actions[i];
                let log_prob = fwd.log_probs.get(action).copied().unwrap_or(f32::NEG_INFINITY);
                Ok((log_prob, fwd.value, entropy(&fwd.probs, &fwd.log_probs)))
            })
            .collect::<Result<_, _>>()?;

        let mut out = Evaluation::default();
        for (lp, v, h) in rows {
            out.log_probs.push(lp);
            out.values.push(v);
            out.entropy.push(h);
        }
        Ok(out)
    }

    fn step(
        &mut self,
        batch: &RolloutBatch<'_>,
        grads: &[SampleGrad],
        max_grad_norm: f32,
    ) -> Result<f32, PolicyError> {
        if grads.len() != batch.len() {
            return Err(PolicyError::ShapeMismatch {
                expected: batch.len(),
                got: grads.len(),
            });
        }
        let n = self.params.len();
        let this = &*self;
        let mut total = (0..batch.len())
            .into_par_iter()
            .try_fold(
                || vec![0.0f32; n],
                |mut acc, i| {
                    let x = this.features(&batch.flat_observation(i))?;
                    this.accumulate(&mut acc, &x, batch.mask(i), batch.actions[i], grads[i])?;
                    Ok::<_, PolicyError>(acc)
                },
            )
            .try_reduce(
                || vec![0.0f32; n],
                |mut a, b| {
                    a.iter_mut().zip(&b).for_each(|(x, y)| *x += y);
                    Ok(a)
                },
            )?;

        if total.iter().any(|g| !g.is_finite()) {
            return Err(PolicyError::NonFinite("gradient"));
        }
        let norm = clip_grad_norm(&mut total, max_grad_norm);
        self.optimizer.update(&mut self.params, &total);
        Ok(norm)
    }

    fn save(&self, path: &Path) -> Result<(), PolicyError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn load_from(&mut self, path: &Path) -> Result<(), PolicyError> {
        let loaded: LinearPolicy = serde_json::from_slice(&fs::read(path)?)?;
        if loaded.obs_dim != self.obs_dim {
            return Err(PolicyError::ShapeMismatch {
                expected: self.obs_dim,
                got: loaded.obs_dim,
            });
        }
        if loaded.action_dim != self.action_dim {
            return Err(PolicyError::ShapeMismatch {
                expected: self.action_dim,
                got: loaded.action_dim,
            });
        }
        *self = loaded;
        Ok(())
    }
}

// ============================================================================
// 單元測試
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::buffer::{RolloutBuffer, Transition};
    use crate::service::tensor::observation_size;
    use rand::SeedableRng;

    const ACTIONS: usize = 6;

    fn policy() -> LinearPolicy {
        LinearPolicy::new(observation_size(), ACTIONS, 0.01)
    }

    fn buffer_with(actions: &[usize], mask: &[bool]) -> RolloutBuffer {
        let mut buffer = RolloutBuffer::new(actions.len(), ACTIONS, 0.99, 0.95);
        for &a in actions {
            buffer
                .add(Transition {
                    observation: Observation::zeros(),
                    action: a,
                    reward: 1.0,
                    done: false,
                    value: 0.0,
                    log_prob: -(3.0f32).ln(),
                    mask: mask.to_vec(),
                })
                .unwrap();
        }
        buffer.compute_returns_and_advantage(0.0, false).unwrap();
        buffer
    }

    #[test]
    fn test_masked_log_softmax_uniform() {
        let (lp, p) = masked_log_softmax(&[0.0; 4], &[true, false, true, false]).unwrap();
        assert!((p[0] - 0.5).abs() < 1e-6);
        assert_eq!(p[1], 0.0);
        assert_eq!(lp[1], f32::NEG_INFINITY);
        assert!((lp[2] - 0.5f32.ln()).abs() < 1e-6);
        assert!(masked_log_softmax(&[0.0; 2], &[false, false]).is_none());
    }

    #[test]
    fn test_act_respects_mask() {
        let p = policy();
        let mut rng = StdRng::seed_from_u64(7);
        let mask = [false, true, false, false, true, false];
        for _ in 0..50 {
            let step = p.act(&Observation::zeros(), &mask, &mut rng).unwrap();
            assert!(mask[step.action]);
            assert!((step.log_prob - 0.5f32.ln()).abs() < 1e-6);
        }
    }

    #[test]
    fn test_act_without_legal_action() {
        let p = policy();
        let mut rng = StdRng::seed_from_u64(7);
        assert!(matches!(
            p.act(&Observation::zeros(), &[false; ACTIONS], &mut rng),
            Err(PolicyError::NoLegalAction)
        ));
        assert!(matches!(
            p.act(&Observation::zeros(), &[true; 3], &mut rng),
            Err(PolicyError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_evaluate_actions() {
        let p = policy();
        let mask = [true, true, true, false, false, false];
        let buffer = buffer_with(&[0, 2], &mask);
        let batch = buffer.get(2).unwrap().next().unwrap();
        let eval = p.evaluate_actions(&batch).unwrap();
        assert_eq!(eval.log_probs.len(), 2);
        for lp in &eval.log_probs {
            assert!((lp + (3.0f32).ln()).abs() < 1e-5);
        }
        for h in &eval.entropy {
            assert!((h - (3.0f32).ln()).abs() < 1e-5);
        }
        assert_eq!(eval.values, vec![0.0, 0.0]);
    }

    #[test]
    fn test_step_increases_chosen_log_prob() {
        let mut p = policy();
        let mask = [true, true, true, false, false, false];
        let buffer = buffer_with(&[1, 1, 1, 1], &mask);
        let batch = buffer.get(4).unwrap().next().unwrap();
        let before = p.evaluate_actions(&batch).unwrap().log_probs[0];
        // 最小化 -log π(a) 等同提高 π(a)
        let grads = vec![SampleGrad { log_prob: -0.25, value: 0.0, entropy: 0.0 }; 4];
        for _ in 0..5 {
            p.step(&batch, &grads, 0.5).unwrap();
        }
        let after = p.evaluate_actions(&batch).unwrap().log_probs[0];
        assert!(after > before);
    }

    #[test]
    fn test_step_moves_value_toward_target() {
        let mut p = policy();
        let mask = [true; ACTIONS];
        let buffer = buffer_with(&[0, 0], &mask);
        let batch = buffer.get(2).unwrap().next().unwrap();
        // d/dv (v - 1)^2 在 v=0 為 -2
        let grads = vec![SampleGrad { log_prob: 0.0, value: -1.0, entropy: 0.0 }; 2];
        p.step(&batch, &grads, 0.5).unwrap();
        let v = p.predict_value(&Observation::zeros()).unwrap();
        assert!(v > 0.0);
    }

    #[test]
    fn test_clip_grad_norm() {
        let mut g = vec![3.0, 4.0];
        let norm = clip_grad_norm(&mut g, 1.0);
        assert!((norm - 5.0).abs() < 1e-6);
        let clipped = (g[0] * g[0] + g[1] * g[1]).sqrt();
        assert!((clipped - 1.0).abs() < 1e-4);

        let mut g = vec![0.3, 0.4];
        clip_grad_norm(&mut g, 1.0);
        assert_eq!(g, vec![0.3, 0.4]);
    }

    #[test]
    fn test_checkpoint_roundtrip_and_shape_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");

        let mut p = policy();
        let buffer = buffer_with(&[0, 0], &[true; ACTIONS]);
        let batch = buffer.get(2).unwrap().next().unwrap();
        let grads = vec![SampleGrad { log_prob: 0.0, value: -1.0, entropy: 0.0 }; 2];
        p.step(&batch, &grads, 0.5).unwrap();
        p.save(&path).unwrap();
        assert!(!path.with_extension("tmp").exists());

        let mut q = policy();
        q.load_from(&path).unwrap();
        let obs = Observation::zeros();
        assert_eq!(q.predict_value(&obs).unwrap(), p.predict_value(&obs).unwrap());

        let mut wrong = LinearPolicy::new(observation_size(), ACTIONS + 1, 0.01);
        assert!(matches!(
            wrong.load_from(&path),
            Err(PolicyError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_load_or_new_without_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let p = LinearPolicy::load_or_new(&dir.path().join("missing.json"), 10, 3, 0.01).unwrap();
        assert_eq!(p.parameter_count(), 3 * 10 + 3 + 10 + 1);
    }
}
