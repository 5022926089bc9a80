//! 常量定義
//!
//! 所有 observation 形狀與 action catalog 邊界都集中在此。
//!
//! **相容性約定**：action catalog 的順序與大小由下列邊界決定，已訓練的
//! policy 輸出維度與 catalog index 一一對應。修改任何 catalog 邊界都會讓
//! 既有 checkpoint 失效，必須視為不相容變更。

// ============================================================================
// Action catalog 邊界
// ============================================================================

pub const PLAYER_CLASSES: &[&str] = &["IRONCLAD", "SILENT"];
pub const POTION_SLOTS: usize = 5;       // 藥水欄位
pub const POTION_TARGETS: usize = 5;     // 藥水可指定目標數
pub const PLAY_CARD_SLOTS: usize = 9;    // PLAY 1..=9
pub const PLAY_TARGETS: usize = 5;       // 出牌可指定目標數
pub const CHOICE_COUNT: usize = 20;      // CHOOSE 0..20

// START(2) + POTION 帶目標(2*5*5) + POTION 無目標(2*5)
// + PLAY 帶目標(9*5) + PLAY 無目標(9) + 固定指令(5) + CHOOSE(20)
pub const FIXED_COMMAND_COUNT: usize = 5;
pub const ACTION_COUNT: usize = PLAYER_CLASSES.len()
    + 2 * POTION_SLOTS * POTION_TARGETS
    + 2 * POTION_SLOTS
    + PLAY_CARD_SLOTS * PLAY_TARGETS
    + PLAY_CARD_SLOTS
    + FIXED_COMMAND_COUNT
    + CHOICE_COUNT; // 141

// ============================================================================
// Observation 形狀
// ============================================================================

pub const MAX_POWERS: usize = 20;

// player: current_hp, max_hp, block, energy + powers
pub const PLAYER_STATS: usize = 4;
pub const PLAYER_FEATURES: usize = PLAYER_STATS + MAX_POWERS; // 24

pub const MAX_HAND_SIZE: usize = 10;
pub const CARD_FEATURES: usize = 8;

pub const MAX_MONSTERS: usize = 5;
pub const MONSTER_BASE_FEATURES: usize = 10;
pub const MONSTER_FEATURES: usize = MONSTER_BASE_FEATURES + MAX_POWERS; // 30

pub const MAX_DECK_SIZE: usize = 100;

pub const MAX_POTIONS: usize = POTION_SLOTS;
pub const POTION_FEATURES: usize = 4;

pub const MAX_MAP_NODES: usize = 100;
pub const MAP_NODE_FEATURES: usize = 4;

pub const MAX_RELICS: usize = 30;
pub const RELIC_FEATURES: usize = 2;

pub const SCREEN_FEATURES: usize = 50;
pub const EXTRA_INFO_FEATURES: usize = 5;

// ============================================================================
// 畫面 (screen) 子結構上限
// ============================================================================

pub const SHOP_MAX_CARDS: usize = 6;
pub const SHOP_MAX_POTIONS: usize = 3;
pub const SHOP_MAX_RELICS: usize = 3;
pub const REST_MAX_OPTIONS: usize = 3;
pub const MAP_MAX_NEXT_NODES: usize = 3;
pub const HAND_SELECT_MAX_CARDS: usize = 10;
pub const EVENT_MAX_OPTIONS: usize = 5;
pub const COMBAT_REWARD_MAX: usize = 5;
pub const CARD_REWARD_MAX_CARDS: usize = 3;
pub const BOSS_REWARD_MAX_RELICS: usize = 3;
pub const GRID_MAX_CARDS: usize = 39;
pub const GRID_MAX_SELECTED: usize = 5;
pub const DEFAULT_SCREEN_FEATURES: usize = 5;

// ============================================================================
// 卡牌費用哨兵值
// ============================================================================

pub const COST_UNKNOWN: f32 = -1.0; // 無費用資訊
pub const COST_X: f32 = -2.0;       // X 費用

// ============================================================================
// 畫面類型字串
// ============================================================================

pub const SCREEN_NONE: &str = "NONE";
pub const SCREEN_COMBAT_REWARD: &str = "COMBAT_REWARD";
pub const SCREEN_CARD_REWARD: &str = "CARD_REWARD";
pub const SCREEN_BOSS_REWARD: &str = "BOSS_REWARD";
pub const SCREEN_GAME_OVER: &str = "GAME_OVER";

// ============================================================================
// 卡牌稀有度
// ============================================================================

pub const RARITY_COMMON: &str = "COMMON";
pub const RARITY_UNCOMMON: &str = "UNCOMMON";
pub const RARITY_RARE: &str = "RARE";
pub const CARD_TYPE_CURSE: &str = "CURSE";
