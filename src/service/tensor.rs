//! Tensor 與觀察類別
//!
//! 每個語意類別都有固定形狀；`Observation` 永遠包含全部九個類別。

use thiserror::Error;

use crate::game::{
    CARD_FEATURES, EXTRA_INFO_FEATURES, MAP_NODE_FEATURES, MAX_DECK_SIZE, MAX_HAND_SIZE,
    MAX_MAP_NODES, MAX_MONSTERS, MAX_POTIONS, MAX_RELICS, MONSTER_FEATURES, PLAYER_FEATURES,
    POTION_FEATURES, RELIC_FEATURES, SCREEN_FEATURES,
};

/// 放入 `Observation` 的 tensor 形狀與類別不符
#[derive(Debug, Error, PartialEq)]
#[error("{category} tensor has shape {got:?} ({len} values), expected {expected:?}")]
pub struct ShapeError {
    pub category: &'static str,
    pub expected: Vec<usize>,
    pub got: Vec<usize>,
    pub len: usize,
}

/// 平坦資料 + 形狀
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tensor {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
}

impl Tensor {
    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            data: vec![0.0; shape.iter().product()],
            shape: shape.to_vec(),
        }
    }

    /// 由逐列資料建構；超過 `max_rows` 的列被截斷，不足補 0，
    /// 每列也會被截斷或補齊到 `cols`
    pub fn from_rows<I>(rows: I, max_rows: usize, cols: usize) -> Self
    where
        I: IntoIterator<Item = Vec<f32>>,
    {
        let mut data = Vec::with_capacity(max_rows * cols);
        for mut row in rows.into_iter().take(max_rows) {
            row.resize(cols, 0.0);
            data.extend_from_slice(&row);
        }
        data.resize(max_rows * cols, 0.0);
        Self {
            data,
            shape: vec![max_rows, cols],
        }
    }

    /// 一維向量，截斷或補 0 到 `len`
    pub fn from_vec(mut data: Vec<f32>, len: usize) -> Self {
        data.resize(len, 0.0);
        Self {
            data,
            shape: vec![len],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// 觀察類別
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Player,
    Hand,
    Monsters,
    Deck,
    Potions,
    Map,
    Relics,
    Screen,
    ExtraInfo,
}

pub const CATEGORY_COUNT: usize = 9;

impl Category {
    pub const ALL: [Category; CATEGORY_COUNT] = [
        Category::Player,
        Category::Hand,
        Category::Monsters,
        Category::Deck,
        Category::Potions,
        Category::Map,
        Category::Relics,
        Category::Screen,
        Category::ExtraInfo,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Category::Player => "player",
            Category::Hand => "hand",
            Category::Monsters => "monsters",
            Category::Deck => "deck",
            Category::Potions => "potions",
            Category::Map => "map",
            Category::Relics => "relics",
            Category::Screen => "screen",
            Category::ExtraInfo => "extra_info",
        }
    }

    pub fn shape(&self) -> &'static [usize] {
        match self {
            Category::Player => &[PLAYER_FEATURES],
            Category::Hand => &[MAX_HAND_SIZE, CARD_FEATURES],
            Category::Monsters => &[MAX_MONSTERS, MONSTER_FEATURES],
            Category::Deck => &[MAX_DECK_SIZE, CARD_FEATURES],
            Category::Potions => &[MAX_POTIONS, POTION_FEATURES],
            Category::Map => &[MAX_MAP_NODES, MAP_NODE_FEATURES],
            Category::Relics => &[MAX_RELICS, RELIC_FEATURES],
            Category::Screen => &[SCREEN_FEATURES],
            Category::ExtraInfo => &[EXTRA_INFO_FEATURES],
        }
    }

    /// 平坦化後的元素數
    pub fn size(&self) -> usize {
        self.shape().iter().product()
    }

    fn position(&self) -> usize {
        *self as usize
    }
}

/// 全部類別平坦化後的總元素數
pub fn observation_size() -> usize {
    Category::ALL.iter().map(Category::size).sum()
}

/// 一步的完整觀察
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    tensors: Vec<Tensor>,
}

impl Observation {
    /// 全 0 觀察（無遊戲時使用）
    pub fn zeros() -> Self {
        Self {
            tensors: Category::ALL.iter().map(|c| Tensor::zeros(c.shape())).collect(),
        }
    }

    pub fn get(&self, category: Category) -> &Tensor {
        &self.tensors[category.position()]
    }

    /// 形狀或資料長度不符時回傳錯誤，原本的 tensor 保持不變
    pub fn set(&mut self, category: Category, tensor: Tensor) -> Result<(), ShapeError> {
        if tensor.shape != category.shape() || tensor.len() != category.size() {
            return Err(ShapeError {
                category: category.name(),
                expected: category.shape().to_vec(),
                got: tensor.shape,
                len: tensor.data.len(),
            });
        }
        self.tensors[category.position()] = tensor;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, &Tensor)> {
        Category::ALL.iter().copied().zip(self.tensors.iter())
    }

    /// 依 `Category::ALL` 順序串接
    pub fn flatten(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(observation_size());
        for tensor in &self.tensors {
            out.extend_from_slice(&tensor.data);
        }
        out
    }
}

impl Default for Observation {
    fn default() -> Self {
        Self::zeros()
    }
}
