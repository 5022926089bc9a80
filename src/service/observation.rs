//! Observation 構建
//!
//! 把異質、長度可變的遊戲狀態映射為每個類別固定形狀的 tensor：
//! - player: HP、格擋、能量 + power token
//! - hand / deck: 卡牌特徵
//! - monsters: 怪物數值、意圖、id + power token
//! - potions / relics / map: 實體特徵
//! - screen: 依畫面類型切換的子編碼，補齊到 50
//! - extra_info: 牌組大小、樓層、金幣、進階等級、畫面類型
//!
//! 實體依外部狀態給出的順序排列（不重新排序），超出上限截斷，不足補 0。
//! 缺少的容器（例如不在戰鬥中）輸出全 0 tensor。任何欄位缺失都不會失敗。

use std::sync::Arc;

use log::error;
use serde_json::Value;

use super::tensor::{Category, Observation, Tensor};
use crate::game::state::{card_cost, GameMessage, GameView, Node};
use crate::game::vocab::Vocabulary;
use crate::game::{
    BOSS_REWARD_MAX_RELICS, CARD_FEATURES, CARD_REWARD_MAX_CARDS, COMBAT_REWARD_MAX,
    DEFAULT_SCREEN_FEATURES, EVENT_MAX_OPTIONS, EXTRA_INFO_FEATURES, GRID_MAX_CARDS,
    GRID_MAX_SELECTED, HAND_SELECT_MAX_CARDS, MAP_MAX_NEXT_NODES, MAP_NODE_FEATURES,
    MAX_DECK_SIZE, MAX_HAND_SIZE, MAX_MAP_NODES, MAX_MONSTERS, MAX_POTIONS, MAX_POWERS,
    MAX_RELICS, MONSTER_FEATURES, PLAYER_FEATURES, POTION_FEATURES, RELIC_FEATURES,
    REST_MAX_OPTIONS, SCREEN_FEATURES, SHOP_MAX_CARDS, SHOP_MAX_POTIONS, SHOP_MAX_RELICS,
};

/// 觀察編碼器
///
/// 只持有共享的詞表；`encode` 是狀態的純函數。
#[derive(Clone, Debug)]
pub struct ObservationEncoder {
    vocab: Arc<Vocabulary>,
}

impl ObservationEncoder {
    pub fn new(vocab: Arc<Vocabulary>) -> Self {
        Self { vocab }
    }

    pub fn vocab(&self) -> &Arc<Vocabulary> {
        &self.vocab
    }

    /// 編碼完整觀察；缺少 `game_state` 時為全 0
    pub fn encode(&self, msg: &GameMessage) -> Observation {
        let mut obs = Observation::zeros();
        let game = msg.game();
        if !game.is_present() {
            return obs;
        }

        let encoded = [
            (Category::Player, self.encode_player(game)),
            (Category::Hand, self.encode_hand(game)),
            (Category::Monsters, self.encode_monsters(game)),
            (Category::Deck, self.encode_deck(game)),
            (Category::Potions, self.encode_potions(game)),
            (Category::Map, self.encode_map(game)),
            (Category::Relics, self.encode_relics(game)),
            (Category::Screen, self.encode_screen(game)),
            (Category::ExtraInfo, self.encode_extra_info(game)),
        ];
        for (category, tensor) in encoded {
            // 形狀錯誤時該類別保持全 0
            if let Err(e) = obs.set(category, tensor) {
                error!("{}", e);
            }
        }
        obs
    }

    // ========================================================================
    // 玩家 (24)
    // ========================================================================

    pub fn encode_player(&self, game: GameView<'_>) -> Tensor {
        let mut data = vec![game.current_hp(), game.max_hp(), 0.0, 0.0];
        match game.combat() {
            Some(combat) => {
                let player = combat.player();
                data[2] = player.num("block");
                data[3] = player.num("energy");
                data.extend(self.power_tokens(player.list("powers")));
            }
            None => data.extend(std::iter::repeat(0.0).take(MAX_POWERS)),
        }
        Tensor::from_vec(data, PLAYER_FEATURES)
    }

    // ========================================================================
    // 手牌 (10 × 8)
    // ========================================================================

    pub fn encode_hand(&self, game: GameView<'_>) -> Tensor {
        let hand = game.combat().map(|c| c.hand()).unwrap_or(&[]);
        Tensor::from_rows(
            hand.iter().map(|c| self.card_row(Node::new(c))),
            MAX_HAND_SIZE,
            CARD_FEATURES,
        )
    }

    // ========================================================================
    // 怪物 (5 × 30)
    // ========================================================================

    pub fn encode_monsters(&self, game: GameView<'_>) -> Tensor {
        let monsters = game.combat().map(|c| c.monsters()).unwrap_or(&[]);
        Tensor::from_rows(
            monsters.iter().map(|m| self.monster_row(Node::new(m))),
            MAX_MONSTERS,
            MONSTER_FEATURES,
        )
    }

    fn monster_row(&self, m: Node<'_>) -> Vec<f32> {
        let mut row = vec![
            m.flag_f32("is_gone"),
            m.num("move_hits"),
            m.num("move_base_damage"),
            m.flag_f32("half_dead"),
            m.num("move_adjusted_damage"),
            m.num("max_hp"),
            m.num("current_hp"),
            m.num("block"),
            self.vocab.intents.token_f32(m.str("intent")),
            self.vocab.monsters.token_f32(m.str("id")),
        ];
        row.extend(self.power_tokens(m.list("powers")));
        row
    }

    // ========================================================================
    // 牌組 (100 × 8)
    // ========================================================================

    pub fn encode_deck(&self, game: GameView<'_>) -> Tensor {
        Tensor::from_rows(
            game.deck().iter().map(|c| self.deck_card_row(Node::new(c))),
            MAX_DECK_SIZE,
            CARD_FEATURES,
        )
    }

    fn deck_card_row(&self, card: Node<'_>) -> Vec<f32> {
        vec![
            card.flag_f32("exhausts"),
            card_cost(card),
            self.card_token(card),
            self.vocab.card_types.token_f32(card.str("type")),
            self.vocab.card_rarities.token_f32(card.str("rarity")),
            card.flag_f32("ethereal"),
            upgraded(card),
            card.flag_f32("has_target"),
        ]
    }

    // ========================================================================
    // 藥水 (5 × 4) / 遺物 (30 × 2) / 地圖 (100 × 4)
    // ========================================================================

    pub fn encode_potions(&self, game: GameView<'_>) -> Tensor {
        Tensor::from_rows(
            game.potions().iter().map(|p| {
                let p = Node::new(p);
                vec![
                    self.vocab.potions.token_f32(p.str("id")),
                    p.flag_f32("requires_target"),
                    p.flag_f32("can_use"),
                    p.flag_f32("can_discard"),
                ]
            }),
            MAX_POTIONS,
            POTION_FEATURES,
        )
    }

    pub fn encode_relics(&self, game: GameView<'_>) -> Tensor {
        Tensor::from_rows(
            game.relics().iter().map(|r| {
                let r = Node::new(r);
                vec![self.vocab.relics.token_f32(r.str("name")), r.num_or("counter", -1.0)]
            }),
            MAX_RELICS,
            RELIC_FEATURES,
        )
    }

    pub fn encode_map(&self, game: GameView<'_>) -> Tensor {
        Tensor::from_rows(
            game.map().iter().map(|n| {
                let n = Node::new(n);
                vec![
                    self.vocab.map_symbols.token_f32(n.str("symbol")),
                    n.num("x"),
                    n.num("y"),
                    n.list("children").len() as f32,
                ]
            }),
            MAX_MAP_NODES,
            MAP_NODE_FEATURES,
        )
    }

    // ========================================================================
    // 額外資訊 (5)
    // ========================================================================

    pub fn encode_extra_info(&self, game: GameView<'_>) -> Tensor {
        Tensor::from_vec(
            vec![
                game.deck().len() as f32,
                game.floor(),
                game.gold(),
                game.ascension_level(),
                self.vocab.screen_types.token_f32(game.screen_type()),
            ],
            EXTRA_INFO_FEATURES,
        )
    }

    // ========================================================================
    // 畫面 (50)
    // ========================================================================

    /// 依畫面類型選擇子編碼，第一個元素永遠是畫面類型 token
    pub fn encode_screen(&self, game: GameView<'_>) -> Tensor {
        let screen_type = game.screen_type();
        let state = game.screen_state();
        let token = self.vocab.screen_types.token_f32(screen_type);

        let mut data = vec![token];
        match screen_type {
            "SHOP_SCREEN" => self.shop_screen(state, &mut data),
            "REST" => self.rest_screen(state, &mut data),
            "MAP" => self.map_screen(state, &mut data),
            "HAND_SELECT" => self.hand_select_screen(state, &mut data),
            "EVENT" => self.event_screen(state, &mut data),
            "CHEST" => data.push(state.flag_f32("chest_open")),
            "COMBAT_REWARD" => self.combat_reward_screen(state, &mut data),
            "CARD_REWARD" => self.card_reward_screen(state, &mut data),
            "BOSS_REWARD" => self.boss_reward_screen(state, &mut data),
            "GRID" => self.grid_screen(state, &mut data),
            _ => data.extend(std::iter::repeat(0.0).take(DEFAULT_SCREEN_FEATURES)),
        }
        Tensor::from_vec(data, SCREEN_FEATURES)
    }

    fn shop_screen(&self, state: Node<'_>, data: &mut Vec<f32>) {
        data.push(state.num("purge_cost"));
        data.push(state.flag_f32("purge_available"));
        push_rows(
            data,
            state.list("cards").iter().map(|c| {
                let c = Node::new(c);
                vec![c.num("cost"), c.num("price"), self.card_token(c)]
            }),
            SHOP_MAX_CARDS,
            3,
            0.0,
        );
        push_rows(
            data,
            state.list("potions").iter().map(|p| {
                let p = Node::new(p);
                vec![p.num("price"), self.vocab.potions.token_f32(p.str("id"))]
            }),
            SHOP_MAX_POTIONS,
            2,
            0.0,
        );
        // 遺物空位的 counter 也是 -1
        let relics = state.list("relics");
        for i in 0..SHOP_MAX_RELICS {
            match relics.get(i).map(Node::new) {
                Some(r) => data.extend([
                    r.num("price"),
                    self.relic_token(r),
                    r.num_or("counter", -1.0),
                ]),
                None => data.extend([0.0, 0.0, -1.0]),
            }
        }
    }

    fn rest_screen(&self, state: Node<'_>, data: &mut Vec<f32>) {
        data.push(state.flag_f32("has_rested"));
        let options: Vec<f32> = state
            .list("rest_options")
            .iter()
            .map(|o| self.vocab.rest_options.token_f32(o.as_str().unwrap_or("")))
            .collect();
        push_padded(data, options, REST_MAX_OPTIONS);
    }

    fn map_screen(&self, state: Node<'_>, data: &mut Vec<f32>) {
        data.push(state.flag_f32("first_node_chosen"));
        let current = state.get("current_node");
        data.push(self.vocab.map_symbols.token_f32(match current.str("symbol") {
            "" => "?",
            s => s,
        }));
        data.push(current.num("x"));
        data.push(current.num("y"));
        data.push(state.flag_f32("boss_available"));
        push_rows(
            data,
            state.list("next_nodes").iter().map(|n| {
                let n = Node::new(n);
                vec![self.vocab.map_symbols.token_f32(n.str("symbol")), n.num("x"), n.num("y")]
            }),
            MAP_MAX_NEXT_NODES,
            3,
            0.0,
        );
    }

    fn hand_select_screen(&self, state: Node<'_>, data: &mut Vec<f32>) {
        data.push(state.num("max_cards"));
        data.push(state.flag_f32("can_pick_zero"));
        push_rows(
            data,
            state.list("selected").iter().map(|c| self.card_row(Node::new(c))),
            HAND_SELECT_MAX_CARDS,
            CARD_FEATURES,
            0.0,
        );
        push_rows(
            data,
            state.list("hand").iter().map(|c| self.card_row(Node::new(c))),
            HAND_SELECT_MAX_CARDS,
            CARD_FEATURES,
            0.0,
        );
    }

    fn event_screen(&self, state: Node<'_>, data: &mut Vec<f32>) {
        data.push(self.vocab.events.token_f32(state.str("event_id")));
        push_rows(
            data,
            state.list("options").iter().map(|o| {
                let o = Node::new(o);
                vec![o.num("choice_index"), o.flag_f32("disabled")]
            }),
            EVENT_MAX_OPTIONS,
            2,
            0.0,
        );
    }

    fn combat_reward_screen(&self, state: Node<'_>, data: &mut Vec<f32>) {
        let rewards: Vec<f32> = state
            .list("rewards")
            .iter()
            .map(|r| self.vocab.reward_types.token_f32(Node::new(r).str("reward_type")))
            .collect();
        push_padded(data, rewards, COMBAT_REWARD_MAX);
    }

    fn card_reward_screen(&self, state: Node<'_>, data: &mut Vec<f32>) {
        data.push(state.flag_f32("bowl_available"));
        data.push(state.flag_f32("skip_available"));
        push_rows(
            data,
            state.list("cards").iter().map(|c| self.card_row(Node::new(c))),
            CARD_REWARD_MAX_CARDS,
            CARD_FEATURES,
            0.0,
        );
    }

    fn boss_reward_screen(&self, state: Node<'_>, data: &mut Vec<f32>) {
        push_rows(
            data,
            state.list("relics").iter().map(|r| {
                let r = Node::new(r);
                vec![self.relic_token(r), r.num_or("counter", -1.0)]
            }),
            BOSS_REWARD_MAX_RELICS,
            2,
            0.0,
        );
    }

    fn grid_screen(&self, state: Node<'_>, data: &mut Vec<f32>) {
        data.extend([
            state.flag_f32("for_transform"),
            state.flag_f32("confirm_up"),
            state.flag_f32("any_number"),
            state.flag_f32("for_upgrade"),
            state.num("num_cards"),
            state.flag_f32("for_purge"),
        ]);
        push_rows(
            data,
            state.list("cards").iter().map(|c| self.card_row(Node::new(c))),
            GRID_MAX_CARDS,
            CARD_FEATURES,
            0.0,
        );
        push_rows(
            data,
            state.list("selected_cards").iter().map(|c| self.card_row(Node::new(c))),
            GRID_MAX_SELECTED,
            CARD_FEATURES,
            0.0,
        );
    }

    // ========================================================================
    // 共用
    // ========================================================================

    /// 手牌格式：exhausts, is_playable, cost, name, type, rarity, ethereal, upgraded
    fn card_row(&self, card: Node<'_>) -> Vec<f32> {
        vec![
            card.flag_f32("exhausts"),
            card.flag_f32("is_playable"),
            card_cost(card),
            self.card_token(card),
            self.vocab.card_types.token_f32(card.str("type")),
            self.vocab.card_rarities.token_f32(card.str("rarity")),
            card.flag_f32("ethereal"),
            upgraded(card),
        ]
    }

    fn card_token(&self, card: Node<'_>) -> f32 {
        self.vocab.cards.token_f32(name_or_id(card))
    }

    fn relic_token(&self, relic: Node<'_>) -> f32 {
        self.vocab.relics.token_f32(name_or_id(relic))
    }

    /// power 可能是字串或帶 `name` 的物件
    fn power_tokens(&self, powers: &[Value]) -> Vec<f32> {
        let mut out: Vec<f32> = powers
            .iter()
            .take(MAX_POWERS)
            .map(|p| {
                let p = Node::new(p);
                match p.as_str() {
                    Some(s) => self.vocab.powers.token_f32(s),
                    None => self.vocab.powers.token_f32(name_or_id(p)),
                }
            })
            .collect();
        out.resize(MAX_POWERS, 0.0);
        out
    }
}

fn name_or_id<'a>(node: Node<'a>) -> &'a str {
    match node.str("name") {
        "" => node.str("id"),
        name => name,
    }
}

fn upgraded(card: Node<'_>) -> f32 {
    if card.num("upgrades") > 0.0 {
        1.0
    } else {
        0.0
    }
}

fn push_padded(data: &mut Vec<f32>, mut values: Vec<f32>, len: usize) {
    values.resize(len, 0.0);
    data.extend(values);
}

fn push_rows<I>(data: &mut Vec<f32>, rows: I, max_rows: usize, cols: usize, fill: f32)
where
    I: IntoIterator<Item = Vec<f32>>,
{
    let mut written = 0;
    for mut row in rows.into_iter().take(max_rows) {
        row.resize(cols, fill);
        data.extend(row);
        written += 1;
    }
    data.extend(std::iter::repeat(fill).take((max_rows - written) * cols));
}

// ============================================================================
// 單元測試
// ============================================================================
