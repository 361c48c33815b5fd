//! Error types for physics operations.
//!
//! Only paths reachable from caller input return errors. Narrow-phase
//! failures are not errors: a pair that cannot produce a contact is skipped
//! for that step and retried on the next one.

use thiserror::Error;

/// Errors that can occur while building or mutating a physics world.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PhysicsError {
    /// Shape dimensions are zero, negative or not finite.
    #[error("Invalid collider shape: {reason}")]
    InvalidShape {
        /// What is wrong with the shape.
        reason: &'static str,
    },

    /// Material parameters are out of range.
    #[error("Invalid material: {reason}")]
    InvalidMaterial {
        /// What is wrong with the material.
        reason: &'static str,
    },

    /// A configuration value is out of range.
    #[error("Invalid physics configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: &'static str,
    },

    /// Collision layer index outside `0..32`.
    #[error("Invalid collision layer: {0} (must be below 32)")]
    InvalidLayer(u32),

    /// Ray direction is zero-length or not finite.
    #[error("Invalid ray: direction must be finite and non-zero")]
    InvalidRay,

    /// A fixed-capacity pool is full.
    #[error("{resource} capacity exceeded (limit={limit})")]
    CapacityExceeded {
        /// Which pool ran out.
        resource: &'static str,
        /// Configured capacity.
        limit: usize,
    },

    /// The collider handle does not refer to a live collider.
    #[error("Stale or unknown collider handle")]
    StaleColliderHandle,

    /// The body handle does not refer to a live rigid body.
    #[error("Stale or unknown rigid body handle")]
    StaleBodyHandle,
}

/// Result type for physics operations.
pub type PhysicsResult<T> = std::result::Result<T, PhysicsError>;
