//! Collision and sensor events, and the per-step pair diffing that
//! produces them.

use std::collections::BTreeMap;

use glam::Vec3;

use super::collider::ColliderHandle;
use super::contact::{ContactManifold, ContactPoint};

/// Contact data handed to collision callbacks and events.
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionInfo {
    pub collider_a: ColliderHandle,
    pub collider_b: ColliderHandle,
    /// Normal from A to B.
    pub normal: Vec3,
    /// Manifold points at the time of the event. Empty on exit.
    pub points: Vec<ContactPoint>,
}

impl CollisionInfo {
    pub fn from_manifold(manifold: &ContactManifold) -> Self {
        let (collider_a, collider_b) = manifold.colliders();
        Self {
            collider_a,
            collider_b,
            normal: manifold.normal(),
            points: manifold
                .contacts()
                .iter()
                .map(|c| ContactPoint {
                    position_a: c.position_a,
                    position_b: c.position_b,
                    depth: c.depth,
                })
                .collect(),
        }
    }

    /// The collider on the other side of the pair.
    pub fn other(&self, collider: ColliderHandle) -> ColliderHandle {
        if collider == self.collider_a {
            self.collider_b
        } else {
            self.collider_a
        }
    }

    pub fn max_depth(&self) -> f32 {
        self.points.iter().map(|p| p.depth).fold(0.0, f32::max)
    }
}

/// Pair state transitions recorded during a step.
#[derive(Debug, Clone, PartialEq)]
pub enum PhysicsEvent {
    CollisionEnter(CollisionInfo),
    CollisionExit(CollisionInfo),
    SensorEnter {
        sensor: ColliderHandle,
        other: ColliderHandle,
    },
    SensorExit {
        sensor: ColliderHandle,
        other: ColliderHandle,
    },
}

/// Pairs active during one step, keyed by manifold key.
#[derive(Debug, Clone)]
pub struct PairSet<V> {
    pairs: BTreeMap<u64, V>,
}

impl<V> Default for PairSet<V> {
    fn default() -> Self {
        Self {
            pairs: BTreeMap::new(),
        }
    }
}

impl<V> PairSet<V> {
    pub fn insert(&mut self, key: u64, value: V) {
        self.pairs.insert(key, value);
    }

    pub fn contains(&self, key: u64) -> bool {
        self.pairs.contains_key(&key)
    }

    pub fn get(&self, key: u64) -> Option<&V> {
        self.pairs.get(&key)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &V)> {
        self.pairs.iter().map(|(k, v)| (*k, v))
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }

    /// Drop every pair that involves `collider`, returning them. Matches on
    /// the slot index, so call it before the collider's slot is freed.
    pub fn remove_collider(&mut self, collider: ColliderHandle) -> Vec<V> {
        let index = collider.index() as u64;
        let keys: Vec<u64> = self
            .pairs
            .keys()
            .copied()
            .filter(|k| k & u32::MAX as u64 == index || k >> 32 == index)
            .collect();
        keys.into_iter()
            .filter_map(|k| self.pairs.remove(&k))
            .collect()
    }

    /// Values of pairs present in `self` but not in `previous`.
    pub fn entered<'a>(&'a self, previous: &'a PairSet<V>) -> impl Iterator<Item = &'a V> {
        self.pairs
            .iter()
            .filter(|(k, _)| !previous.pairs.contains_key(k))
            .map(|(_, v)| v)
    }

    /// Values of pairs present in `previous` but not in `self`.
    pub fn exited<'a>(&'a self, previous: &'a PairSet<V>) -> impl Iterator<Item = &'a V> {
        previous
            .pairs
            .iter()
            .filter(|(k, _)| !self.pairs.contains_key(k))
            .map(|(_, v)| v)
    }
}
