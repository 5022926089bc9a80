//! 遊戲狀態視圖
//!
//! 外部遊戲進程送來的是一份異質、可能不完整的 JSON 文件。這裡只提供唯讀、
//! 寬鬆的存取：缺少或型別不符的欄位一律回傳預設值（0 / false / 空），
//! 絕不失敗。encoder、legality 與 reward 都透過這層讀取狀態。

use serde_json::Value;

static NULL: Value = Value::Null;

// ============================================================================
// 通用節點存取
// ============================================================================

/// JSON 節點的寬鬆存取器
#[derive(Clone, Copy, Debug)]
pub struct Node<'a>(&'a Value);

impl<'a> Node<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self(value)
    }

    pub fn raw(&self) -> &'a Value {
        self.0
    }

    pub fn is_present(&self) -> bool {
        !self.0.is_null()
    }

    /// 是否為非空物件
    pub fn is_non_empty_object(&self) -> bool {
        self.0.as_object().map(|m| !m.is_empty()).unwrap_or(false)
    }

    pub fn get(&self, key: &str) -> Node<'a> {
        Node(self.0.get(key).unwrap_or(&NULL))
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.get(key).map(|v| !v.is_null()).unwrap_or(false)
    }

    /// 數值欄位；bool 轉為 0/1，數字字串會被解析
    pub fn num_or(&self, key: &str, default: f32) -> f32 {
        to_f32(self.0.get(key)).unwrap_or(default)
    }

    pub fn num(&self, key: &str) -> f32 {
        self.num_or(key, 0.0)
    }

    pub fn int(&self, key: &str) -> i64 {
        self.num(key) as i64
    }

    /// 布林欄位；數字非 0 視為 true
    pub fn flag(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map(|x| x != 0.0).unwrap_or(false),
            _ => false,
        }
    }

    pub fn flag_f32(&self, key: &str) -> f32 {
        if self.flag(key) {
            1.0
        } else {
            0.0
        }
    }

    pub fn str(&self, key: &str) -> &'a str {
        self.0.get(key).and_then(Value::as_str).unwrap_or("")
    }

    pub fn list(&self, key: &str) -> &'a [Value] {
        self.0
            .get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn items(&self, key: &str) -> impl Iterator<Item = Node<'a>> + 'a {
        self.list(key).iter().map(Node)
    }

    /// 節點本身作為字串（power 有時是純字串）
    pub fn as_str(&self) -> Option<&'a str> {
        self.0.as_str()
    }
}

fn to_f32(value: Option<&Value>) -> Option<f32> {
    match value? {
        Value::Number(n) => n.as_f64().map(|x| x as f32),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f32>().ok(),
        _ => None,
    }
}

// ============================================================================
// 遊戲訊息
// ============================================================================

/// 外部進程送來的一份完整狀態訊息
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GameMessage {
    raw: Value,
}

impl GameMessage {
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text).map(Self::new)
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn root(&self) -> Node<'_> {
        Node(&self.raw)
    }

    /// 目前可用的頂層指令（原樣保留大小寫）
    pub fn available_commands(&self) -> impl Iterator<Item = &str> {
        self.root()
            .list("available_commands")
            .iter()
            .filter_map(Value::as_str)
    }

    pub fn has_command(&self, command: &str) -> bool {
        self.available_commands()
            .any(|c| c.eq_ignore_ascii_case(command))
    }

    /// 是否存在進行中的遊戲
    ///
    /// `in_game` 明確為 false，或 `game_state` 缺失/為空時視為無遊戲。
    pub fn in_game(&self) -> bool {
        let root = self.root();
        if root.has("in_game") && !root.flag("in_game") {
            return false;
        }
        root.get("game_state").is_non_empty_object()
    }

    pub fn game(&self) -> GameView<'_> {
        GameView(self.root().get("game_state"))
    }

    pub fn is_game_over(&self) -> bool {
        self.game().screen_type() == crate::game::constants::SCREEN_GAME_OVER
    }
}

impl From<Value> for GameMessage {
    fn from(raw: Value) -> Self {
        Self::new(raw)
    }
}

/// `game_state` 區段
#[derive(Clone, Copy, Debug)]
pub struct GameView<'a>(Node<'a>);

impl<'a> GameView<'a> {
    pub fn node(&self) -> Node<'a> {
        self.0
    }

    pub fn is_present(&self) -> bool {
        self.0.is_non_empty_object()
    }

    /// 畫面類型；缺省為 `NONE`
    pub fn screen_type(&self) -> &'a str {
        match self.0.str("screen_type") {
            "" => crate::game::constants::SCREEN_NONE,
            s => s,
        }
    }

    pub fn screen_state(&self) -> Node<'a> {
        self.0.get("screen_state")
    }

    pub fn floor(&self) -> f32 {
        self.0.num("floor")
    }

    pub fn gold(&self) -> f32 {
        self.0.num("gold")
    }

    pub fn ascension_level(&self) -> f32 {
        self.0.num("ascension_level")
    }

    pub fn current_hp(&self) -> f32 {
        self.0.num("current_hp")
    }

    pub fn max_hp(&self) -> f32 {
        self.0.num_or("max_hp", 1.0)
    }

    pub fn player_class(&self) -> &'a str {
        self.0.str("class")
    }

    pub fn deck(&self) -> &'a [Value] {
        self.0.list("deck")
    }

    pub fn relics(&self) -> &'a [Value] {
        self.0.list("relics")
    }

    pub fn potions(&self) -> &'a [Value] {
        self.0.list("potions")
    }

    pub fn map(&self) -> &'a [Value] {
        self.0.list("map")
    }

    pub fn choice_list(&self) -> &'a [Value] {
        self.0.list("choice_list")
    }

    /// 戰鬥區段；不在戰鬥中時為 `None`
    pub fn combat(&self) -> Option<CombatView<'a>> {
        let combat = self.0.get("combat_state");
        combat.is_non_empty_object().then_some(CombatView(combat))
    }

    /// 牌組中詛咒卡的數量（rarity 或 type 為 CURSE）
    pub fn curse_count(&self) -> usize {
        use crate::game::constants::CARD_TYPE_CURSE;

        self.deck()
            .iter()
            .map(Node::new)
            .filter(|c| {
                c.str("rarity").eq_ignore_ascii_case(CARD_TYPE_CURSE)
                    || c.str("type").eq_ignore_ascii_case(CARD_TYPE_CURSE)
            })
            .count()
    }
}

/// `combat_state` 區段
#[derive(Clone, Copy, Debug)]
pub struct CombatView<'a>(Node<'a>);

impl<'a> CombatView<'a> {
    pub fn node(&self) -> Node<'a> {
        self.0
    }

    pub fn player(&self) -> Node<'a> {
        self.0.get("player")
    }

    pub fn hand(&self) -> &'a [Value] {
        self.0.list("hand")
    }

    pub fn monsters(&self) -> &'a [Value] {
        self.0.list("monsters")
    }

    pub fn turn(&self) -> i64 {
        self.0.int("turn")
    }

    /// 目標 index 是否指向一隻仍存活的怪物
    pub fn is_live_target(&self, target: usize) -> bool {
        self.monsters()
            .get(target)
            .map(|m| !Node::new(m).flag("is_gone"))
            .unwrap_or(false)
    }
}

// ============================================================================
// 卡牌輔助
// ============================================================================

/// 卡牌費用：缺少為 -1，X 費用為 -2，其餘為字面值
pub fn card_cost(card: Node<'_>) -> f32 {
    use crate::game::constants::{COST_UNKNOWN, COST_X};

    match card.raw().get("cost") {
        None | Some(Value::Null) => COST_UNKNOWN,
        Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("x") => COST_X,
        Some(other) => to_f32(Some(other)).unwrap_or(COST_UNKNOWN),
    }
}

// ============================================================================
// 單元測試
// ============================================================================
