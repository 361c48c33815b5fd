//! Collision filtering.
//!
//! The broadphase consults a [`CollisionFilter`] before a pair reaches the
//! narrowphase. [`LayerFilter`] is the built-in implementation: a symmetric
//! 32x32 matrix over collider layers.

use crate::error::{PhysicsError, PhysicsResult};

use super::collider::{Collider, LAYER_COUNT};

/// Pluggable pair predicate.
pub trait CollisionFilter {
    /// Whether `a` and `b` may generate contacts or sensor events.
    fn can_collide(&self, a: &Collider, b: &Collider) -> bool;

    /// Whether `collider` may collide with anything at all. Colliders that
    /// fail this are skipped before any tree traversal.
    fn can_collide_single(&self, _collider: &Collider) -> bool {
        true
    }
}

/// Layer collision matrix. Row `i` bit `j` set means layer `i` collides with
/// layer `j`; the matrix is kept symmetric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerFilter {
    rows: [u32; LAYER_COUNT as usize],
}

impl Default for LayerFilter {
    /// Every layer collides with every other layer except itself.
    fn default() -> Self {
        let mut rows = [u32::MAX; LAYER_COUNT as usize];
        for (i, row) in rows.iter_mut().enumerate() {
            *row &= !(1 << i);
        }
        Self { rows }
    }
}

impl LayerFilter {
    /// Every layer collides with every layer, including itself.
    pub fn all() -> Self {
        Self {
            rows: [u32::MAX; LAYER_COUNT as usize],
        }
    }

    /// No layer collides with anything.
    pub fn none() -> Self {
        Self {
            rows: [0; LAYER_COUNT as usize],
        }
    }

    /// Enable or disable collisions between layers `a` and `b`.
    pub fn set(&mut self, a: u32, b: u32, collide: bool) -> PhysicsResult<()> {
        for layer in [a, b] {
            if layer >= LAYER_COUNT {
                return Err(PhysicsError::InvalidLayer(layer));
            }
        }
        if collide {
            self.rows[a as usize] |= 1 << b;
            self.rows[b as usize] |= 1 << a;
        } else {
            self.rows[a as usize] &= !(1 << b);
            self.rows[b as usize] &= !(1 << a);
        }
        Ok(())
    }

    /// Out-of-range layers never collide.
    #[inline]
    pub fn layers_collide(&self, a: u32, b: u32) -> bool {
        if a >= LAYER_COUNT || b >= LAYER_COUNT {
            return false;
        }
        self.rows[a as usize] & (1 << b) != 0
    }

    /// Bitmask of layers that `layer` collides with.
    pub fn mask(&self, layer: u32) -> u32 {
        self.rows.get(layer as usize).copied().unwrap_or(0)
    }
}

impl CollisionFilter for LayerFilter {
    fn can_collide(&self, a: &Collider, b: &Collider) -> bool {
        self.layers_collide(a.layer(), b.layer())
    }

    fn can_collide_single(&self, collider: &Collider) -> bool {
        self.mask(collider.layer()) != 0
    }
}
