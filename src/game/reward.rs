//! 獎勵計算系統
//!
//! 由 (前一狀態, 當前狀態, 已執行動作) 計算塑形獎勵。所有項目彼此獨立、
//! 線性相加，不做裁剪，也不保留任何隱藏狀態。
//!
//! ## 獎勵表
//!
//! | 項目                 | 條件                                   | 數值                 |
//! |----------------------|----------------------------------------|----------------------|
//! | 怪物受傷             | 同位置怪物 current_hp 下降             | +1 / 每點 HP         |
//! | 怪物死亡             | 上一步存活，這一步 hp ≤ 0 或 is_gone   | +20                  |
//! | 戰鬥結束             | screen_type NONE → COMBAT_REWARD       | +40                  |
//! | 玩家受傷             | current_hp 下降                        | -3 / 每點 HP         |
//! | 爬樓                 | floor 增加                             | +10                  |
//! | 使用藥水             | 動作為 `POTION Use`                    | +10                  |
//! | 丟棄藥水             | 動作為 `POTION Discard`                | -20                  |
//! | 取得遺物             | relics 數量增加                        | +50                  |
//! | 金幣增加             | gold 增加                              | +diff / 10           |
//! | 金幣減少             | gold 減少                              | diff × 0.05（負值）  |
//! | 牌組成長             | deck 變長，依最後一張卡的稀有度        | 3 / 4.3 / 10         |
//! | 移除詛咒             | 詛咒卡數量減少                         | +15                  |
//!
//! ## 設計原則
//!
//! - **存活優先**：玩家受傷的權重高於造成傷害
//! - **可解釋性**：每一項以 [`RewardBreakdown`] 欄位追蹤

use super::actions::Action;
use super::constants::{
    RARITY_COMMON, RARITY_RARE, RARITY_UNCOMMON, SCREEN_COMBAT_REWARD, SCREEN_NONE,
};
use super::state::{GameMessage, Node};

pub const MONSTER_DAMAGE_PER_HP: f32 = 1.0;
pub const MONSTER_DEATH_BONUS: f32 = 20.0;
pub const COMBAT_END_BONUS: f32 = 40.0;
pub const PLAYER_DAMAGE_PER_HP: f32 = 3.0;
pub const FLOOR_BONUS: f32 = 10.0;
pub const POTION_USE_BONUS: f32 = 10.0;
pub const POTION_DISCARD_PENALTY: f32 = 20.0;
pub const RELIC_BONUS: f32 = 50.0;
pub const GOLD_GAIN_DIVISOR: f32 = 10.0;
pub const GOLD_LOSS_SCALE: f32 = 0.05;
pub const COMMON_CARD_BONUS: f32 = 3.0;
pub const UNCOMMON_CARD_BONUS: f32 = 4.3;
pub const RARE_CARD_BONUS: f32 = 10.0;
pub const CURSE_REMOVAL_BONUS: f32 = 15.0;

/// 各獎勵項目的分解
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RewardBreakdown {
    pub monster_damage: f32,
    pub monster_death: f32,
    pub combat_end: f32,
    pub player_damage: f32,
    pub floor: f32,
    pub potion: f32,
    pub relic: f32,
    pub gold: f32,
    pub deck_growth: f32,
    pub curse_removal: f32,
}

impl RewardBreakdown {
    pub fn total(&self) -> f32 {
        self.monster_damage
            + self.monster_death
            + self.combat_end
            + self.player_damage
            + self.floor
            + self.potion
            + self.relic
            + self.gold
            + self.deck_growth
            + self.curse_removal
    }
}

/// 計算一步轉移的獎勵
///
/// 任一狀態缺少 `game_state` 時返回全 0。
pub fn compute_reward(prev: &GameMessage, curr: &GameMessage, action: Option<&Action>) -> f32 {
    reward_breakdown(prev, curr, action).total()
}

/// 計算獎勵並保留各項目明細
pub fn reward_breakdown(
    prev: &GameMessage,
    curr: &GameMessage,
    action: Option<&Action>,
) -> RewardBreakdown {
    let mut out = RewardBreakdown::default();

    let prev_game = prev.game();
    let curr_game = curr.game();
    if !prev_game.is_present() || !curr_game.is_present() {
        return out;
    }

    // ========================================================================
    // 戰鬥
    // ========================================================================
    if let (Some(prev_combat), Some(curr_combat)) = (prev_game.combat(), curr_game.combat()) {
        for (p, c) in prev_combat.monsters().iter().zip(curr_combat.monsters()) {
            let (p, c) = (Node::new(p), Node::new(c));
            let (prev_hp, curr_hp) = (p.num("current_hp"), c.num("current_hp"));
            if curr_hp < prev_hp {
                out.monster_damage += (prev_hp - curr_hp) * MONSTER_DAMAGE_PER_HP;
            }
            // 只對上一步仍存活的怪物給一次
            let was_alive = prev_hp > 0.0 && !p.flag("is_gone");
            let is_dead = curr_hp <= 0.0 || c.flag("is_gone");
            if was_alive && is_dead {
                out.monster_death += MONSTER_DEATH_BONUS;
            }
        }
    }

    if prev_game.screen_type() == SCREEN_NONE && curr_game.screen_type() == SCREEN_COMBAT_REWARD {
        out.combat_end = COMBAT_END_BONUS;
    }

    let hp_lost = prev_game.current_hp() - curr_game.current_hp();
    if hp_lost > 0.0 {
        out.player_damage = -hp_lost * PLAYER_DAMAGE_PER_HP;
    }

    // ========================================================================
    // 進度與資源
    // ========================================================================
    if curr_game.floor() > prev_game.floor() {
        out.floor = FLOOR_BONUS;
    }

    if let Some(action) = action {
        if action.is_potion_use() {
            out.potion = POTION_USE_BONUS;
        } else if action.is_potion_discard() {
            out.potion = -POTION_DISCARD_PENALTY;
        }
    }

    if curr_game.relics().len() > prev_game.relics().len() {
        out.relic = RELIC_BONUS;
    }

    out.gold = gold_reward(curr_game.gold() - prev_game.gold());

    // ========================================================================
    // 牌組
    // ========================================================================
    let (prev_deck, curr_deck) = (prev_game.deck(), curr_game.deck());
    if curr_deck.len() > prev_deck.len() {
        let rarity = curr_deck.last().map(|c| Node::new(c).str("rarity")).unwrap_or("");
        out.deck_growth = card_rarity_reward(rarity);
    }

    if curr_game.curse_count() < prev_game.curse_count() {
        out.curse_removal = CURSE_REMOVAL_BONUS;
    }

    out
}

/// 金幣變化：增加時 diff/10，減少時 diff×0.05
pub fn gold_reward(diff: f32) -> f32 {
    if diff > 0.0 {
        diff / GOLD_GAIN_DIVISOR
    } else if diff < 0.0 {
        diff * GOLD_LOSS_SCALE
    } else {
        0.0
    }
}

/// 新卡稀有度獎勵；缺少稀有度視為 COMMON，其餘稀有度不給分
pub fn card_rarity_reward(rarity: &str) -> f32 {
    let rarity = if rarity.is_empty() { RARITY_COMMON } else { rarity };
    if rarity.eq_ignore_ascii_case(RARITY_COMMON) {
        COMMON_CARD_BONUS
    } else if rarity.eq_ignore_ascii_case(RARITY_UNCOMMON) {
        UNCOMMON_CARD_BONUS
    } else if rarity.eq_ignore_ascii_case(RARITY_RARE) {
        RARE_CARD_BONUS
    } else {
        0.0
    }
}

// ============================================================================
// 單元測試
// ============================================================================
