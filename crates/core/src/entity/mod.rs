use std::{
    fmt,
    ops::{Index, IndexMut},
};

use serde::{Deserialize, Serialize};

use crate::DuetError;

/// Identifies one of the two speakers. Serialised as the integers `1` and `2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum EntityId {
    One,
    Two,
}

impl EntityId {
    pub const ALL: [EntityId; 2] = [EntityId::One, EntityId::Two];

    /// Zero-based slot used by [`EntityPair`].
    pub fn index(self) -> usize {
        match self {
            Self::One => 0,
            Self::Two => 1,
        }
    }

    /// Wire number (`1` or `2`).
    pub fn number(self) -> u8 {
        self.index() as u8 + 1
    }
}

impl TryFrom<u8> for EntityId {
    type Error = DuetError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(DuetError::transport(format!("unknown entity `{other}`"))),
        }
    }
}

impl From<EntityId> for u8 {
    fn from(value: EntityId) -> Self {
        value.number()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity {}", self.number())
    }
}

/// Two values indexed by [`EntityId`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityPair<T>([T; 2]);

impl<T> EntityPair<T> {
    pub fn new(first: T, second: T) -> Self {
        Self([first, second])
    }

    pub fn get(&self, entity: EntityId) -> &T {
        &self.0[entity.index()]
    }

    pub fn get_mut(&mut self, entity: EntityId) -> &mut T {
        &mut self.0[entity.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &T)> {
        EntityId::ALL.into_iter().zip(self.0.iter())
    }

    pub fn map<U>(self, mut f: impl FnMut(EntityId, T) -> U) -> EntityPair<U> {
        let [first, second] = self.0;
        EntityPair([f(EntityId::One, first), f(EntityId::Two, second)])
    }

    pub fn try_map<U, E>(
        self,
        mut f: impl FnMut(EntityId, T) -> Result<U, E>,
    ) -> Result<EntityPair<U>, E> {
        let [first, second] = self.0;
        Ok(EntityPair([f(EntityId::One, first)?, f(EntityId::Two, second)?]))
    }
}

impl<T> Index<EntityId> for EntityPair<T> {
    type Output = T;

    fn index(&self, entity: EntityId) -> &T {
        self.get(entity)
    }
}

impl<T> IndexMut<EntityId> for EntityPair<T> {
    fn index_mut(&mut self, entity: EntityId) -> &mut T {
        self.get_mut(entity)
    }
}
