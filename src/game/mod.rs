//! 遊戲核心模組
//!
//! 與外部遊戲進程無關的純函數與定義：
//! - `constants`: 容量、catalog 邊界、畫面與稀有度字串
//! - `vocab`: 封閉詞彙表（卡牌、怪物、遺物、藥水…）
//! - `state`: 對外部 JSON 狀態的寬鬆唯讀視圖
//! - `actions`: 指令、動作與固定順序的 `ActionCatalog`
//! - `reward`: 狀態差分獎勵

pub mod constants;
pub mod vocab;
pub mod state;
pub mod actions;
pub mod reward;

pub use constants::*;
pub use vocab::{Vocab, Vocabulary, UNKNOWN_TOKEN};
pub use state::{card_cost, CombatView, GameMessage, GameView, Node};
pub use actions::{Action, ActionCatalog, Command, PotionOp};
pub use reward::{compute_reward, reward_breakdown, RewardBreakdown};
