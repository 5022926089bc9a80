//! PPO 更新迴圈
//!
//! 每次有 buffer 填滿並完成 GAE 後呼叫 [`update`]：對整個 buffer 跑
//! `n_epochs` 輪，每個 minibatch 以當前 policy 重新評估，計算 clipped
//! surrogate + value MSE + entropy 的總損失，交給 policy 反向傳播。
//!
//! 單一 minibatch 失敗（shape 錯誤、非有限損失）只記錄並跳過，不中斷整輪。

use log::{error, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::buffer::{BufferError, RolloutBatch, RolloutBuffer};
use super::policy::{ActorCritic, Evaluation, PolicyError, SampleGrad};

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("buffer not ready: {0}")]
    Buffer(#[from] BufferError),

    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("non-finite loss")]
    NonFiniteLoss,

    #[error("evaluation length {got} does not match batch length {expected}")]
    EvaluationLength { expected: usize, got: usize },
}

// ============================================================================
// Clip range 排程
// ============================================================================

/// clip range ε 隨訓練剩餘進度 (1 → 0) 變化
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schedule", rename_all = "snake_case")]
pub enum ClipSchedule {
    Constant { value: f32 },
    /// `start × progress_remaining`
    Linear { start: f32 },
}

impl ClipSchedule {
    pub fn value(&self, progress_remaining: f32) -> f32 {
        let progress = progress_remaining.clamp(0.0, 1.0);
        match *self {
            ClipSchedule::Constant { value } => value,
            ClipSchedule::Linear { start } => start * progress,
        }
    }
}

impl Default for ClipSchedule {
    fn default() -> Self {
        ClipSchedule::Linear { start: 0.3 }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PpoConfig {
    pub n_epochs: usize,
    pub batch_size: usize,
    pub clip_range: ClipSchedule,
    pub ent_coef: f32,
    pub vf_coef: f32,
    pub max_grad_norm: f32,
}

impl Default for PpoConfig {
    fn default() -> Self {
        Self {
            n_epochs: 10,
            batch_size: 64,
            clip_range: ClipSchedule::default(),
            ent_coef: 0.03,
            vf_coef: 0.5,
            max_grad_norm: 0.5,
        }
    }
}

// ============================================================================
// Minibatch 損失
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MinibatchLoss {
    pub policy_loss: f32,
    pub value_loss: f32,
    /// 負的平均 entropy
    pub entropy_loss: f32,
    pub total: f32,
    pub approx_kl: f32,
    pub clip_fraction: f32,
}

/// 計算一個 minibatch 的損失與對每筆樣本 (log π, V, H) 的梯度
pub fn minibatch_loss(
    batch: &RolloutBatch<'_>,
    eval: &Evaluation,
    clip_range: f32,
    ent_coef: f32,
    vf_coef: f32,
) -> Result<(MinibatchLoss, Vec<SampleGrad>), UpdateError> {
    let n = batch.len();
    for got in [eval.log_probs.len(), eval.values.len(), eval.entropy.len()] {
        if got != n {
            return Err(UpdateError::EvaluationLength { expected: n, got });
        }
    }
    if n == 0 {
        return Ok((MinibatchLoss::default(), Vec::new()));
    }
    let inv_n = 1.0 / n as f32;

    let mut loss = MinibatchLoss::default();
    let mut grads = Vec::with_capacity(n);
    let mut clipped = 0usize;

    for i in 0..n {
        let adv = batch.advantages[i];
        let log_ratio = eval.log_probs[i] - batch.log_probs[i];
        let ratio = log_ratio.exp();
        let surr1 = ratio * adv;
        let surr2 = ratio.clamp(1.0 - clip_range, 1.0 + clip_range) * adv;
        loss.policy_loss -= surr1.min(surr2) * inv_n;
        if (ratio - 1.0).abs() > clip_range {
            clipped += 1;
        }
        // 採 clip 分支時對 ratio 無梯度
        let d_log_prob = if surr1 <= surr2 { -adv * ratio * inv_n } else { 0.0 };

        let value_err = eval.values[i] - batch.returns[i];
        loss.value_loss += value_err * value_err * inv_n;

        loss.entropy_loss -= eval.entropy[i] * inv_n;
        loss.approx_kl += ((ratio - 1.0) - log_ratio) * inv_n;

        grads.push(SampleGrad {
            log_prob: d_log_prob,
            value: vf_coef * 2.0 * value_err * inv_n,
            entropy: -ent_coef * inv_n,
        });
    }

    loss.clip_fraction = clipped as f32 * inv_n;
    loss.total = loss.policy_loss + ent_coef * loss.entropy_loss + vf_coef * loss.value_loss;
    if !loss.total.is_finite() {
        return Err(UpdateError::NonFiniteLoss);
    }
    Ok((loss, grads))
}

// ============================================================================
// 更新迴圈
// ============================================================================

/// 一次 [`update`] 的彙總
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateStats {
    pub clip_range: f32,
    pub minibatches: usize,
    pub skipped: usize,
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy_loss: f32,
    pub approx_kl: f32,
    pub clip_fraction: f32,
    pub grad_norm: f32,
}

impl UpdateStats {
    fn accumulate(&mut self, loss: &MinibatchLoss, grad_norm: f32) {
        self.minibatches += 1;
        self.policy_loss += loss.policy_loss;
        self.value_loss += loss.value_loss;
        self.entropy_loss += loss.entropy_loss;
        self.approx_kl += loss.approx_kl;
        self.clip_fraction += loss.clip_fraction;
        self.grad_norm += grad_norm;
    }

    fn finish(&mut self) {
        if self.minibatches == 0 {
            return;
        }
        let k = self.minibatches as f32;
        self.policy_loss /= k;
        self.value_loss /= k;
        self.entropy_loss /= k;
        self.approx_kl /= k;
        self.clip_fraction /= k;
        self.grad_norm /= k;
    }
}

fn train_minibatch<P: ActorCritic + ?Sized>(
    policy: &mut P,
    batch: &RolloutBatch<'_>,
    config: &PpoConfig,
    clip_range: f32,
) -> Result<(MinibatchLoss, f32), UpdateError> {
    let eval = policy.evaluate_actions(batch)?;
    let (loss, grads) = minibatch_loss(batch, &eval, clip_range, config.ent_coef, config.vf_coef)?;
    let grad_norm = policy.step(batch, &grads, config.max_grad_norm)?;
    Ok((loss, grad_norm))
}

/// 以一個已完成 GAE 的 buffer 更新 policy
///
/// buffer 未 finalize 時回傳錯誤；個別 minibatch 的錯誤只記錄。
pub fn update<P: ActorCritic + ?Sized>(
    policy: &mut P,
    buffer: &RolloutBuffer,
    config: &PpoConfig,
    progress_remaining: f32,
) -> Result<UpdateStats, UpdateError> {
    let clip_range = config.clip_range.value(progress_remaining);
    let mut stats = UpdateStats {
        clip_range,
        ..UpdateStats::default()
    };

    for epoch in 0..config.n_epochs {
        for batch in buffer.get(config.batch_size)? {
            match train_minibatch(policy, &batch, config, clip_range) {
                Ok((loss, grad_norm)) => stats.accumulate(&loss, grad_norm),
                Err(e) => {
                    error!("minibatch at {} skipped: {}", batch.start, e);
                    stats.skipped += 1;
                }
            }
        }
        info!("Model Updated (epoch {}/{})", epoch + 1, config.n_epochs);
    }

    stats.finish();
    Ok(stats)
}

// ============================================================================
// 單元測試
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::buffer::Transition;
    use crate::service::policy::LinearPolicy;
    use crate::service::tensor::{observation_size, Observation};

    const ACTIONS: usize = 4;

    fn finalized(rewards: &[f32], log_prob: f32) -> RolloutBuffer {
        let mut buffer = RolloutBuffer::new(rewards.len(), ACTIONS, 0.99, 0.95);
        for (i, &r) in rewards.iter().enumerate() {
            buffer
                .add(Transition {
                    observation: Observation::zeros(),
                    action: i % 2,
                    reward: r,
                    done: false,
                    value: 0.0,
                    log_prob,
                    mask: vec![true, true, false, false],
                })
                .unwrap();
        }
        buffer.compute_returns_and_advantage(0.0, false).unwrap();
        buffer
    }

    fn eval_for(n: usize, log_prob: f32, value: f32, entropy: f32) -> Evaluation {
        Evaluation {
            log_probs: vec![log_prob; n],
            values: vec![value; n],
            entropy: vec![entropy; n],
        }
    }

    #[test]
    fn test_clip_schedule() {
        let linear = ClipSchedule::Linear { start: 0.3 };
        assert!((linear.value(1.0) - 0.3).abs() < 1e-6);
        assert!((linear.value(0.5) - 0.15).abs() < 1e-6);
        assert_eq!(linear.value(-1.0), 0.0);
        assert_eq!(ClipSchedule::Constant { value: 0.2 }.value(0.1), 0.2);
    }

    #[test]
    fn test_clip_schedule_deserialize() {
        let s: ClipSchedule =
            serde_json::from_str(r#"{"schedule":"linear","start":0.25}"#).unwrap();
        assert_eq!(s, ClipSchedule::Linear { start: 0.25 });
    }

    #[test]
    fn test_loss_at_unit_ratio() {
        let lp = 0.5f32.ln();
        let buffer = finalized(&[1.0, 0.0], lp);
        let batch = buffer.get(2).unwrap().next().unwrap();
        let eval = eval_for(2, lp, 0.0, 0.5);
        let (loss, grads) = minibatch_loss(&batch, &eval, 0.2, 0.03, 0.5).unwrap();

        let adv = buffer.advantages();
        let expected_policy = -(adv[0] + adv[1]) / 2.0;
        assert!((loss.policy_loss - expected_policy).abs() < 1e-6);
        assert!((loss.entropy_loss + 0.5).abs() < 1e-6);
        assert_eq!(loss.clip_fraction, 0.0);
        assert!(loss.approx_kl.abs() < 1e-6);

        let ret = buffer.returns();
        let expected_value = (ret[0] * ret[0] + ret[1] * ret[1]) / 2.0;
        assert!((loss.value_loss - expected_value).abs() < 1e-5);
        assert!((grads[0].log_prob + adv[0] / 2.0).abs() < 1e-6);
        assert!((grads[0].entropy + 0.015).abs() < 1e-6);
    }

    #[test]
    fn test_clipped_branch_has_no_policy_gradient() {
        let buffer = finalized(&[1.0, 1.0], 0.0);
        let batch = buffer.get(2).unwrap().next().unwrap();
        // ratio = e^1 遠大於 1 + ε，且優勢為正 → 取 clip 分支
        let eval = eval_for(2, 1.0, 0.0, 0.0);
        let (loss, grads) = minibatch_loss(&batch, &eval, 0.2, 0.0, 0.5).unwrap();
        assert_eq!(loss.clip_fraction, 1.0);
        assert!(grads.iter().all(|g| g.log_prob == 0.0));
    }

    #[test]
    fn test_non_finite_loss_rejected() {
        let buffer = finalized(&[1.0, 1.0], 0.0);
        let batch = buffer.get(2).unwrap().next().unwrap();
        let eval = eval_for(2, 0.0, f32::NAN, 0.0);
        assert!(matches!(
            minibatch_loss(&batch, &eval, 0.2, 0.0, 0.5),
            Err(UpdateError::NonFiniteLoss)
        ));
    }

    #[test]
    fn test_evaluation_length_checked() {
        let buffer = finalized(&[1.0, 1.0], 0.0);
        let batch = buffer.get(2).unwrap().next().unwrap();
        let eval = eval_for(1, 0.0, 0.0, 0.0);
        assert!(matches!(
            minibatch_loss(&batch, &eval, 0.2, 0.0, 0.5),
            Err(UpdateError::EvaluationLength { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn test_update_requires_finalized_buffer() {
        let mut policy = LinearPolicy::new(observation_size(), ACTIONS, 1e-3);
        let buffer = RolloutBuffer::new(4, ACTIONS, 0.99, 0.95);
        assert!(matches!(
            update(&mut policy, &buffer, &PpoConfig::default(), 1.0),
            Err(UpdateError::Buffer(_))
        ));
    }

    #[test]
    fn test_update_runs_every_epoch() {
        let mut policy = LinearPolicy::new(observation_size(), ACTIONS, 1e-3);
        let buffer = finalized(&[1.0, 0.0, 2.0, 0.0], 0.5f32.ln());
        let config = PpoConfig {
            n_epochs: 3,
            batch_size: 2,
            ..PpoConfig::default()
        };
        let stats = update(&mut policy, &buffer, &config, 0.5).unwrap();
        assert_eq!(stats.minibatches, 6);
        assert_eq!(stats.skipped, 0);
        assert!((stats.clip_range - 0.15).abs() < 1e-6);
        assert!(stats.value_loss > 0.0);
    }

    #[test]
    fn test_update_skips_failing_minibatches() {
        // policy 的動作維度與 mask 不符，每個 minibatch 都會失敗
        let mut policy = LinearPolicy::new(observation_size(), ACTIONS + 1, 1e-3);
        let buffer = finalized(&[1.0, 0.0, 2.0, 0.0], 0.0);
        let config = PpoConfig {
            n_epochs: 2,
            batch_size: 2,
            ..PpoConfig::default()
        };
        let stats = update(&mut policy, &buffer, &config, 1.0).unwrap();
        assert_eq!(stats.minibatches, 0);
        assert_eq!(stats.skipped, 4);
    }
}
