//! Action catalog
//!
//! 遊戲可能接受的每一個 (指令, 欄位, 目標) 組合都被列舉成固定順序的清單，
//! policy 的輸出維度與清單 index 一一對應。
//!
//! 列舉順序：
//!
//! | 區段                              | 數量       |
//! |-----------------------------------|------------|
//! | `START {class} 0`                 | 2          |
//! | `POTION {Use,Discard} slot target`| 2 × 5 × 5  |
//! | `POTION {Use,Discard} slot`       | 2 × 5      |
//! | `PLAY card target` (card 1..=9)   | 9 × 5      |
//! | `PLAY card`                       | 9          |
//! | `END PROCEED RETURN CONFIRM LEAVE`| 5          |
//! | `CHOOSE i`                        | 20         |
//!
//! 修改任何邊界都會讓已訓練的 policy 失效。

use std::fmt;

use super::constants::{
    CHOICE_COUNT, PLAYER_CLASSES, PLAY_CARD_SLOTS, PLAY_TARGETS, POTION_SLOTS, POTION_TARGETS,
};

/// 頂層指令
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    Start,
    Potion,
    Play,
    End,
    Proceed,
    Return,
    Confirm,
    Leave,
    Choose,
}

impl Command {
    /// 指令的字串形式（大寫）
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Start => "START",
            Command::Potion => "POTION",
            Command::Play => "PLAY",
            Command::End => "END",
            Command::Proceed => "PROCEED",
            Command::Return => "RETURN",
            Command::Confirm => "CONFIRM",
            Command::Leave => "LEAVE",
            Command::Choose => "CHOOSE",
        }
    }
}

/// 藥水操作
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PotionOp {
    Use,
    Discard,
}

impl PotionOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            PotionOp::Use => "Use",
            PotionOp::Discard => "Discard",
        }
    }
}

/// 單一 catalog 項目
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Action {
    pub index: usize,
    pub command: Command,
    /// 藥水欄位、手牌位置（1-based）或選項 index
    pub slot: Option<usize>,
    pub target: Option<usize>,
    pub potion_op: Option<PotionOp>,
    pub player_class: Option<&'static str>,
}

impl Action {
    fn new(index: usize, command: Command) -> Self {
        Self {
            index,
            command,
            slot: None,
            target: None,
            potion_op: None,
            player_class: None,
        }
    }

    /// 送往遊戲的指令字串
    pub fn to_command(&self) -> String {
        let mut parts: Vec<String> = vec![self.command.as_str().to_string()];
        match self.command {
            Command::Start => {
                parts.push(self.player_class.unwrap_or_default().to_string());
                parts.push("0".to_string());
            }
            Command::Potion => {
                parts.push(self.potion_op.unwrap_or(PotionOp::Use).as_str().to_string());
            }
            _ => {}
        }
        if let Some(slot) = self.slot {
            parts.push(slot.to_string());
        }
        if let Some(target) = self.target {
            parts.push(target.to_string());
        }
        parts.join(" ")
    }

    pub fn is_potion_use(&self) -> bool {
        self.potion_op == Some(PotionOp::Use)
    }

    pub fn is_potion_discard(&self) -> bool {
        self.potion_op == Some(PotionOp::Discard)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_command())
    }
}

/// 不可變的有序 action 清單
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionCatalog {
    actions: Vec<Action>,
}

impl ActionCatalog {
    /// 建構 catalog；每次呼叫結果完全相同
    pub fn build() -> Self {
        let mut actions = Vec::new();
        let mut push = |mut action: Action| {
            action.index = actions.len();
            actions.push(action);
        };

        for class in PLAYER_CLASSES {
            let mut a = Action::new(0, Command::Start);
            a.player_class = Some(*class);
            push(a);
        }

        for op in [PotionOp::Use, PotionOp::Discard] {
            for slot in 0..POTION_SLOTS {
                for target in 0..POTION_TARGETS {
                    let mut a = Action::new(0, Command::Potion);
                    a.potion_op = Some(op);
                    a.slot = Some(slot);
                    a.target = Some(target);
                    push(a);
                }
            }
        }
        for op in [PotionOp::Use, PotionOp::Discard] {
            for slot in 0..POTION_SLOTS {
                let mut a = Action::new(0, Command::Potion);
                a.potion_op = Some(op);
                a.slot = Some(slot);
                push(a);
            }
        }

        for card in 1..=PLAY_CARD_SLOTS {
            for target in 0..PLAY_TARGETS {
                let mut a = Action::new(0, Command::Play);
                a.slot = Some(card);
                a.target = Some(target);
                push(a);
            }
        }
        for card in 1..=PLAY_CARD_SLOTS {
            let mut a = Action::new(0, Command::Play);
            a.slot = Some(card);
            push(a);
        }

        for command in [
            Command::End,
            Command::Proceed,
            Command::Return,
            Command::Confirm,
            Command::Leave,
        ] {
            push(Action::new(0, command));
        }

        for choice in 0..CHOICE_COUNT {
            let mut a = Action::new(0, Command::Choose);
            a.slot = Some(choice);
            push(a);
        }

        Self { actions }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Action> {
        self.actions.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Action> {
        self.actions.iter()
    }

    /// 由指令字串反查 index（大小寫不敏感）
    pub fn index_of(&self, command: &str) -> Option<usize> {
        let wanted = command.trim();
        self.actions
            .iter()
            .find(|a| a.to_command().eq_ignore_ascii_case(wanted))
            .map(|a| a.index)
    }
}

impl std::ops::Index<usize> for ActionCatalog {
    type Output = Action;

    fn index(&self, index: usize) -> &Action {
        &self.actions[index]
    }
}

impl<'a> IntoIterator for &'a ActionCatalog {
    type Item = &'a Action;
    type IntoIter = std::slice::Iter<'a, Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.iter()
    }
}

// ============================================================================
// 單元測試
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::ACTION_COUNT;

    #[test]
    fn test_catalog_is_deterministic() {
        let a = ActionCatalog::build();
        let b = ActionCatalog::build();
        assert_eq!(a.len(), b.len());
        assert_eq!(a, b);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.to_command(), y.to_command());
        }
    }

    #[test]
    fn test_catalog_size() {
        let catalog = ActionCatalog::build();
        assert_eq!(catalog.len(), ACTION_COUNT);
        assert_eq!(catalog.len(), 141);
    }

    #[test]
    fn test_indices_match_positions() {
        let catalog = ActionCatalog::build();
        for (i, action) in catalog.iter().enumerate() {
            assert_eq!(action.index, i);
        }
    }

    #[test]
    fn test_section_order() {
        let catalog = ActionCatalog::build();
        assert_eq!(catalog[0].to_command(), "START IRONCLAD 0");
        assert_eq!(catalog[1].to_command(), "START SILENT 0");
        assert_eq!(catalog[2].to_command(), "POTION Use 0 0");
        assert_eq!(catalog[27].to_command(), "POTION Discard 0 0");
        assert_eq!(catalog[52].to_command(), "POTION Use 0");
        assert_eq!(catalog[62].to_command(), "PLAY 1 0");
        assert_eq!(catalog[107].to_command(), "PLAY 1");
        assert_eq!(catalog[116].to_command(), "END");
        assert_eq!(catalog[120].to_command(), "LEAVE");
        assert_eq!(catalog[121].to_command(), "CHOOSE 0");
        assert_eq!(catalog[140].to_command(), "CHOOSE 19");
    }

    #[test]
    fn test_index_of() {
        let catalog = ActionCatalog::build();
        assert_eq!(catalog.index_of("proceed"), Some(117));
        assert_eq!(catalog.index_of("PLAY 3 1"), Some(62 + 2 * 5 + 1));
        assert_eq!(catalog.index_of("PLAY 10"), None);
    }
}
