//! Action Mask 構建
//!
//! `action_mask(state, catalog, history)` 回傳與 catalog 等長的布林向量，
//! `true` 表示合法。由下列獨立 filter 依序套用（邏輯 AND，任一 filter
//! 判為不合法即確定）：
//!
//! 1. 指令可用性：頂層指令必須出現在 `available_commands`
//! 2. 開局：沒有進行中的遊戲時只允許 START
//! 3. 藥水：欄位、use/discard 權限、目標需求、目標存活
//! 4. 選項：CHOOSE index 必須在 choice_list 範圍內
//! 5. 歷史：PROCEED / CHOOSE / RETURN 之後禁止 RETURN；LEAVE 之後禁止 CHOOSE
//! 6. 戰鬥：手牌位置、可出牌、目標需求、目標存活；本回合尚未行動且有可出
//!    的牌時禁止 END
//!
//! 缺少任何子系統只會收窄合法集合，向量長度永遠等於 catalog 長度。

use crate::game::actions::{Action, ActionCatalog, Command};
use crate::game::state::{GameMessage, Node};

// ============================================================================
// 動作歷史
// ============================================================================

/// 明確傳入 legality 的動作歷史
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionHistory {
    /// 上一個送出的 catalog index
    pub previous: Option<usize>,
    /// 本回合已執行的動作數
    pub actions_this_turn: usize,
    turn: Option<i64>,
}

impl ActionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 收到新狀態時呼叫；戰鬥回合改變或離開戰鬥時重置回合計數
    pub fn observe(&mut self, msg: &GameMessage) {
        let turn = msg.game().combat().map(|c| c.turn());
        if turn != self.turn {
            self.actions_this_turn = 0;
            self.turn = turn;
        }
    }

    /// 送出動作後呼叫
    pub fn record(&mut self, index: usize) {
        self.previous = Some(index);
        self.actions_this_turn += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn previous_command(&self, catalog: &ActionCatalog) -> Option<Command> {
        self.previous
            .and_then(|i| catalog.get(i))
            .map(|a| a.command)
    }
}

// ============================================================================
// Mask
// ============================================================================

/// 從遊戲狀態構建合法動作 mask
pub fn action_mask(msg: &GameMessage, catalog: &ActionCatalog, history: &ActionHistory) -> Vec<bool> {
    let mut mask = vec![true; catalog.len()];

    command_filter(msg, catalog, &mut mask);
    if !msg.in_game() {
        bootstrap_filter(catalog, &mut mask);
        return mask;
    }
    potion_filter(msg, catalog, &mut mask);
    choice_filter(msg, catalog, &mut mask);
    history_filter(catalog, history, &mut mask);
    combat_filter(msg, catalog, history, &mut mask);

    mask
}

fn disable_where<F>(catalog: &ActionCatalog, mask: &mut [bool], mut pred: F)
where
    F: FnMut(&Action) -> bool,
{
    for action in catalog {
        if pred(action) {
            mask[action.index] = false;
        }
    }
}

fn command_filter(msg: &GameMessage, catalog: &ActionCatalog, mask: &mut [bool]) {
    disable_where(catalog, mask, |a| !msg.has_command(a.command.as_str()));
}

fn bootstrap_filter(catalog: &ActionCatalog, mask: &mut [bool]) {
    disable_where(catalog, mask, |a| a.command != Command::Start);
}

fn potion_filter(msg: &GameMessage, catalog: &ActionCatalog, mask: &mut [bool]) {
    let game = msg.game();
    let potions = game.potions();
    let combat = game.combat();

    disable_where(catalog, mask, |a| {
        if a.command != Command::Potion {
            return false;
        }
        let Some(potion) = a.slot.and_then(|s| potions.get(s)).map(Node::new) else {
            return true;
        };
        if a.is_potion_use() && !potion.flag("can_use") {
            return true;
        }
        if a.is_potion_discard() && !potion.flag("can_discard") {
            return true;
        }
        match (potion.flag("requires_target"), a.target) {
            (true, None) | (false, Some(_)) => true,
            (true, Some(t)) => !combat.map(|c| c.is_live_target(t)).unwrap_or(false),
            (false, None) => false,
        }
    });
}

fn choice_filter(msg: &GameMessage, catalog: &ActionCatalog, mask: &mut [bool]) {
    let choices = msg.game().choice_list().len();
    disable_where(catalog, mask, |a| {
        a.command == Command::Choose && a.slot.map(|i| i >= choices).unwrap_or(true)
    });
}

fn history_filter(catalog: &ActionCatalog, history: &ActionHistory, mask: &mut [bool]) {
    match history.previous_command(catalog) {
        Some(Command::Proceed | Command::Choose | Command::Return) => {
            disable_where(catalog, mask, |a| a.command == Command::Return);
        }
        Some(Command::Leave) => {
            disable_where(catalog, mask, |a| a.command == Command::Choose);
        }
        _ => {}
    }
}

fn combat_filter(
    msg: &GameMessage,
    catalog: &ActionCatalog,
    history: &ActionHistory,
    mask: &mut [bool],
) {
    let Some(combat) = msg.game().combat() else {
        disable_where(catalog, mask, |a| a.command == Command::Play);
        return;
    };

    let hand = combat.hand();
    let has_playable = hand.iter().any(|c| Node::new(c).flag("is_playable"));
    if has_playable && history.actions_this_turn == 0 {
        disable_where(catalog, mask, |a| a.command == Command::End);
    }

    disable_where(catalog, mask, |a| {
        if a.command != Command::Play {
            return false;
        }
        // PLAY 的手牌位置是 1-based
        let Some(card) = a
            .slot
            .and_then(|s| s.checked_sub(1))
            .and_then(|i| hand.get(i))
            .map(Node::new)
        else {
            return true;
        };
        if !card.flag("is_playable") {
            return true;
        }
        match (card.flag("has_target"), a.target) {
            (true, None) | (false, Some(_)) => true,
            (true, Some(t)) => !combat.is_live_target(t),
            (false, None) => false,
        }
    });
}

// ============================================================================
// 單元測試
// ============================================================================
