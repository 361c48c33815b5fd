//! CPU rigid body simulation with a dynamic BVH broadphase, GJK/EPA
//! narrowphase and a sequential impulse solver.
//!
//! # Architecture
//!
//! [`PhysicsWorld::step`] runs one fixed tick:
//!
//! 1. Integrate gravity and applied forces into the velocity of awake bodies
//! 2. Broadphase: query the BVH for leaves that moved since the last step
//! 3. Narrowphase: GJK/EPA contacts, or a boolean overlap for sensors
//! 4. Contact solver: refresh persistent manifolds and merge new points
//! 5. Islands: solve each connected group, put resting groups to sleep
//! 6. Integrate positions and refresh the BVH for moved colliders
//! 7. Clear force accumulators
//! 8. Diff pairs against the previous step and fire enter/exit events
//!
//! [`PhysicsWorld::advance`] feeds wall-clock time through an accumulator
//! and runs as many fixed ticks as fit.

pub mod arena;
pub mod broadphase;
pub mod collider;
pub mod contact;
pub mod epa;
pub mod events;
pub mod filter;
pub mod island;
pub mod narrowphase;
mod query;
pub mod rigid_body;
pub mod shape;
pub mod solver;
pub mod transform;

use std::collections::HashSet;

use glam::{Quat, Vec3};
use tracing::{debug, trace, warn};

use crate::error::{PhysicsError, PhysicsResult};

use self::arena::Arena;
use self::broadphase::{BvhConfig, DynamicBvh};
use self::collider::{Collider, ColliderHandle};
use self::contact::{manifold_key, ContactInfo, ContactManifold};
use self::epa::Epa;
use self::events::{CollisionInfo, PairSet, PhysicsEvent};
use self::filter::{CollisionFilter, LayerFilter};
use self::island::{IslandBuilder, SleepSettings};
use self::narrowphase::{Gjk, NarrowPhase, PosedShape};
use self::rigid_body::{BodyHandle, RigidBody};
use self::solver::{ContactSolver, SolverSettings};

pub use self::query::RayHit;

/// A single `advance` running more steps than this is logged as lag.
const LAG_WARNING_STEPS: u32 = 8;

/// Configuration for the physics simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicsConfig {
    /// Gravity vector. Default: (0, -9.81, 0).
    pub gravity: Vec3,
    /// Fixed tick rate in Hz. Default: 50.
    pub frequency: f32,
    /// Maximum number of fixed steps per `advance`. Default: `None`
    /// (uncapped). When set, leftover time beyond the cap is dropped.
    pub max_substeps: Option<u32>,
    /// Number of constraint solver iterations. Default: 15.
    pub solver_iterations: usize,
    /// Baumgarte stabilization factor. Default: 0.2.
    pub baumgarte_factor: f32,
    /// Penetration tolerated before position correction kicks in. Default: 0.01.
    pub penetration_slop: f32,
    /// Approach speed below which restitution is ignored. Default: 0.5.
    pub restitution_slop: f32,
    /// Squared drift after which a cached contact point is dropped.
    /// Default: 0.0025.
    pub persistent_threshold_sq: f32,
    /// Fraction of the previous impulses applied up front. Default: 0.8.
    pub warm_start_ratio: f32,
    /// Default: 64.
    pub gjk_max_iterations: usize,
    /// Default: 1e-4.
    pub epa_grow_threshold: f32,
    /// Default: 64.
    pub epa_max_iterations: usize,
    /// Default: 0.1 m/s.
    pub linear_sleep_threshold: f32,
    /// Default: 0.1 rad/s.
    pub angular_sleep_threshold: f32,
    /// Seconds an island must rest before sleeping. Default: 0.5.
    pub time_to_sleep: f32,
    pub bvh: BvhConfig,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.81, 0.0),
            frequency: 50.0,
            max_substeps: None,
            solver_iterations: 15,
            baumgarte_factor: 0.2,
            penetration_slop: 0.01,
            restitution_slop: 0.5,
            persistent_threshold_sq: 0.0025,
            warm_start_ratio: 0.8,
            gjk_max_iterations: 64,
            epa_grow_threshold: 1e-4,
            epa_max_iterations: 64,
            linear_sleep_threshold: 0.1,
            angular_sleep_threshold: 0.1,
            time_to_sleep: 0.5,
            bvh: BvhConfig::default(),
        }
    }
}

impl PhysicsConfig {
    pub fn validate(&self) -> PhysicsResult<()> {
        let invalid = |reason| Err(PhysicsError::InvalidConfig { reason });
        if !self.gravity.is_finite() {
            return invalid("gravity must be finite");
        }
        if !self.frequency.is_finite() || self.frequency <= 0.0 {
            return invalid("frequency must be positive and finite");
        }
        if self.max_substeps == Some(0) {
            return invalid("max_substeps must be at least one when set");
        }
        if !(0.0..=1.0).contains(&self.baumgarte_factor) {
            return invalid("baumgarte_factor must be within 0..=1");
        }
        if !(0.0..=1.0).contains(&self.warm_start_ratio) {
            return invalid("warm_start_ratio must be within 0..=1");
        }
        for value in [
            self.penetration_slop,
            self.restitution_slop,
            self.linear_sleep_threshold,
            self.angular_sleep_threshold,
            self.time_to_sleep,
        ] {
            if !value.is_finite() || value < 0.0 {
                return invalid("slops and sleep thresholds must be non-negative and finite");
            }
        }
        if !self.persistent_threshold_sq.is_finite() || self.persistent_threshold_sq <= 0.0 {
            return invalid("persistent_threshold_sq must be positive and finite");
        }
        if !self.epa_grow_threshold.is_finite() || self.epa_grow_threshold <= 0.0 {
            return invalid("epa_grow_threshold must be positive and finite");
        }
        if self.gjk_max_iterations == 0 || self.epa_max_iterations == 0 {
            return invalid("GJK and EPA need at least one iteration");
        }
        self.bvh.validate()
    }

    /// Length of one fixed step in seconds.
    #[inline]
    pub fn fixed_dt(&self) -> f32 {
        1.0 / self.frequency
    }

    pub fn solver_settings(&self) -> SolverSettings {
        SolverSettings {
            baumgarte_factor: self.baumgarte_factor,
            penetration_slop: self.penetration_slop,
            restitution_slop: self.restitution_slop,
            warm_start_ratio: self.warm_start_ratio,
        }
    }

    pub fn sleep_settings(&self) -> SleepSettings {
        SleepSettings {
            linear_threshold: self.linear_sleep_threshold,
            angular_threshold: self.angular_sleep_threshold,
            time_to_sleep: self.time_to_sleep,
        }
    }

    pub fn narrowphase(&self) -> NarrowPhase {
        NarrowPhase::new(
            Gjk::new(self.gjk_max_iterations),
            Epa::new(self.epa_grow_threshold, self.epa_max_iterations),
        )
    }
}

/// The main physics world managing simulation state.
pub struct PhysicsWorld {
    config: PhysicsConfig,
    bodies: Arena<RigidBody>,
    colliders: Arena<Collider>,
    bvh: DynamicBvh,
    narrowphase: NarrowPhase,
    solver: ContactSolver,
    islands: IslandBuilder,
    filter: Box<dyn CollisionFilter>,
    accumulator: f32,
    paused: bool,
    step_count: u64,
    events: Vec<PhysicsEvent>,
    collisions: PairSet<CollisionInfo>,
    /// Sensor overlaps as `(sensor, other)`.
    sensors: PairSet<(ColliderHandle, ColliderHandle)>,
}

impl PhysicsWorld {
    /// Create a new physics world with the given configuration.
    pub fn new(config: PhysicsConfig) -> PhysicsResult<Self> {
        config.validate()?;
        debug!(
            frequency = config.frequency,
            iterations = config.solver_iterations,
            "physics world created"
        );
        Ok(Self {
            bodies: Arena::unbounded("rigid body"),
            colliders: Arena::unbounded("collider"),
            bvh: DynamicBvh::new(config.bvh),
            narrowphase: config.narrowphase(),
            solver: ContactSolver::new(config.solver_iterations, config.persistent_threshold_sq),
            islands: IslandBuilder::default(),
            filter: Box::new(LayerFilter::all()),
            accumulator: 0.0,
            paused: false,
            step_count: 0,
            events: Vec::new(),
            collisions: PairSet::default(),
            sensors: PairSet::default(),
            config,
        })
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    /// Replace the collision filter. Manifolds the new filter rejects are
    /// dropped and every collider is re-queried on the next step.
    pub fn set_filter(&mut self, filter: impl CollisionFilter + 'static) {
        self.filter = Box::new(filter);
        let rejected: Vec<u64> = self
            .solver
            .manifolds()
            .filter(|m| {
                let (a, b) = m.colliders();
                match (self.colliders.get(a), self.colliders.get(b)) {
                    (Some(ca), Some(cb)) => !self.filter.can_collide(ca, cb),
                    _ => true,
                }
            })
            .map(ContactManifold::key)
            .collect();
        for key in rejected {
            self.solver.remove(key, &mut self.colliders);
        }
        for (_, collider) in self.colliders.iter() {
            if let Some(leaf) = collider.leaf {
                self.bvh.mark_moving(leaf);
            }
        }
    }

    // ---- Time stepping ----

    /// Feed `delta_time` seconds of wall-clock time and run the fixed steps
    /// that fit. Events are cleared first and then collected across all
    /// steps run. Returns the number of steps.
    pub fn advance(&mut self, delta_time: f32) -> u32 {
        if self.paused || !delta_time.is_finite() || delta_time <= 0.0 {
            return 0;
        }
        self.events.clear();
        self.accumulator += delta_time;

        let fixed = self.config.fixed_dt();
        let mut steps = 0u32;
        while self.accumulator >= fixed {
            if self.config.max_substeps.is_some_and(|max| steps >= max) {
                warn!(
                    dropped = self.accumulator,
                    "substep cap reached, dropping accumulated time"
                );
                self.accumulator = 0.0;
                break;
            }
            self.step();
            self.accumulator -= fixed;
            steps += 1;
        }

        if steps > LAG_WARNING_STEPS {
            warn!(steps, "physics is falling behind real time");
        }
        steps
    }

    /// Run exactly one fixed step. Events are appended to [`Self::events`].
    pub fn step(&mut self) {
        let dt = self.config.fixed_dt();

        // 1. Forces
        let gravity = self.config.gravity;
        for (_, body) in self.bodies.iter_mut() {
            if !body.is_asleep() {
                body.integrate_forces(gravity, dt);
            }
        }

        // 2. Broadphase
        let moving: HashSet<ColliderHandle> = self
            .bvh
            .moving_leaves()
            .iter()
            .filter_map(|leaf| self.bvh.node(*leaf).and_then(|n| n.collider()))
            .collect();
        let pairs = self.bvh.detect(&self.colliders, self.filter.as_ref());

        // 3. Narrowphase
        let mut detected: Vec<(ColliderHandle, ColliderHandle, ContactInfo)> = Vec::new();
        let mut sensors = PairSet::default();
        for &(a, b) in &pairs {
            let (Some(ca), Some(cb)) = (self.colliders.get(a), self.colliders.get(b)) else {
                continue;
            };
            if !self.pair_is_active(ca, cb) {
                continue;
            }
            let (pa, pb) = (PosedShape::from(ca), PosedShape::from(cb));
            if ca.is_sensor() || cb.is_sensor() {
                if self.narrowphase.intersects(&pa, &pb) {
                    let pair = if ca.is_sensor() { (a, b) } else { (b, a) };
                    sensors.insert(manifold_key(a, b), pair);
                }
            } else if let Some(info) = self.narrowphase.detect(&pa, &pb) {
                detected.push((a, b, info));
            }
        }
        // Overlaps between colliders that did not move still hold.
        for (key, &(sensor, other)) in self.sensors.iter() {
            if !moving.contains(&sensor)
                && !moving.contains(&other)
                && self.colliders.contains(sensor)
                && self.colliders.contains(other)
            {
                sensors.insert(key, (sensor, other));
            }
        }

        // 4. Contact persistence
        let created = self.solver.step(&detected, &mut self.colliders);
        for key in &created {
            let Some(manifold) = self.solver.manifold(*key) else {
                continue;
            };
            let (a, b) = manifold.bodies();
            for handle in [a, b].into_iter().flatten() {
                if self.bodies.get_mut(handle).is_some_and(RigidBody::wake) {
                    debug!(body = ?handle, "body woken by new contact");
                }
            }
        }

        // 5. Islands
        let islands = self
            .islands
            .build(&mut self.bodies, &self.colliders, &self.solver);
        let solver_settings = self.config.solver_settings();
        let sleep_settings = self.config.sleep_settings();
        for island in &islands {
            island.solve(&mut self.solver, &mut self.bodies, &solver_settings, dt);
            island.update_sleep(&mut self.bodies, &sleep_settings, dt);
        }

        // 6. Positions
        for (_, body) in self.bodies.iter_mut() {
            if body.is_asleep() {
                continue;
            }
            body.integrate_position(dt);
            if body.synced_version == body.transform().version() {
                continue;
            }
            body.synced_version = body.transform().version();
            let displacement = body.linear_velocity * dt;
            for handle in &body.colliders {
                let Some(collider) = self.colliders.get_mut(*handle) else {
                    continue;
                };
                collider.sync_to_body(body.transform());
                if collider.refresh_bounds() {
                    if let Some(leaf) = collider.leaf {
                        self.bvh.update(leaf, collider.bounds(), displacement);
                    }
                }
            }
        }

        // 7. Forces
        for (_, body) in self.bodies.iter_mut() {
            body.clear_forces();
        }

        // 8. Events
        self.dispatch_events(sensors);

        self.step_count += 1;
        trace!(
            step = self.step_count,
            pairs = pairs.len(),
            contacts = detected.len(),
            manifolds = self.solver.len(),
            islands = islands.len(),
            "physics step"
        );
    }

    /// Whether a broadphase pair needs a narrowphase test this step.
    fn pair_is_active(&self, a: &Collider, b: &Collider) -> bool {
        let awake = |c: &Collider| {
            c.body()
                .and_then(|h| self.bodies.get(h))
                .is_some_and(|rb| !rb.is_asleep())
        };
        match (a.body(), b.body()) {
            // Static pairs only matter for sensor overlaps.
            (None, None) => a.is_sensor() || b.is_sensor(),
            (Some(x), Some(y)) if x == y => false,
            _ => awake(a) || awake(b),
        }
    }

    fn dispatch_events(&mut self, sensors: PairSet<(ColliderHandle, ColliderHandle)>) {
        let mut collisions = PairSet::default();
        for manifold in self.solver.manifolds() {
            collisions.insert(manifold.key(), CollisionInfo::from_manifold(manifold));
        }

        let entered: Vec<CollisionInfo> = collisions.entered(&self.collisions).cloned().collect();
        let exited: Vec<CollisionInfo> = collisions
            .exited(&self.collisions)
            .map(|info| CollisionInfo {
                points: Vec::new(),
                ..info.clone()
            })
            .collect();
        let sensor_entered: Vec<_> = sensors.entered(&self.sensors).copied().collect();
        let sensor_exited: Vec<_> = sensors.exited(&self.sensors).copied().collect();
        self.collisions = collisions;
        self.sensors = sensors;

        for info in entered {
            for handle in [info.collider_a, info.collider_b] {
                if let Some(collider) = self.colliders.get_mut(handle) {
                    collider.fire_collision_enter(&info);
                }
            }
            self.events.push(PhysicsEvent::CollisionEnter(info));
        }
        for info in exited {
            for handle in [info.collider_a, info.collider_b] {
                if let Some(collider) = self.colliders.get_mut(handle) {
                    collider.fire_collision_exit(&info);
                }
            }
            self.events.push(PhysicsEvent::CollisionExit(info));
        }
        for (sensor, other) in sensor_entered {
            if let Some(collider) = self.colliders.get_mut(sensor) {
                collider.fire_sensor_enter(sensor, other);
            }
            if let Some(collider) = self.colliders.get_mut(other) {
                collider.fire_sensor_enter(other, sensor);
            }
            self.events.push(PhysicsEvent::SensorEnter { sensor, other });
        }
        for (sensor, other) in sensor_exited {
            if let Some(collider) = self.colliders.get_mut(sensor) {
                collider.fire_sensor_exit(sensor, other);
            }
            if let Some(collider) = self.colliders.get_mut(other) {
                collider.fire_sensor_exit(other, sensor);
            }
            self.events.push(PhysicsEvent::SensorExit { sensor, other });
        }
    }

    pub fn pause(&mut self) {
        if !self.paused {
            debug!("physics paused");
        }
        self.paused = true;
    }

    pub fn resume(&mut self) {
        if self.paused {
            debug!("physics resumed");
        }
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Events recorded since the last `advance` began.
    pub fn events(&self) -> &[PhysicsEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<PhysicsEvent> {
        std::mem::take(&mut self.events)
    }

    // ---- Bodies ----

    /// Add a body. Its mass is unit until colliders are attached.
    pub fn add_body(&mut self, mut body: RigidBody) -> PhysicsResult<BodyHandle> {
        if !body.position().is_finite()
            || !body.linear_velocity.is_finite()
            || !body.angular_velocity.is_finite()
        {
            return Err(PhysicsError::InvalidConfig {
                reason: "body state must be finite",
            });
        }
        body.colliders.clear();
        body.recompute_mass(std::iter::empty());
        let handle = self.bodies.try_insert(body)?;
        debug!(body = ?handle, "body added");
        Ok(handle)
    }

    /// Remove a body and every collider attached to it. Bodies resting on it
    /// are woken.
    pub fn remove_body(&mut self, handle: BodyHandle) -> PhysicsResult<RigidBody> {
        if !self.bodies.contains(handle) {
            return Err(PhysicsError::StaleBodyHandle);
        }
        self.wake_island(handle);
        let attached = self.bodies[handle].colliders.clone();
        for collider in attached {
            self.detach_collider(collider)?;
        }
        let body = self
            .bodies
            .remove(handle)
            .ok_or(PhysicsError::StaleBodyHandle)?;
        debug!(body = ?handle, "body removed");
        Ok(body)
    }

    pub fn body(&self, handle: BodyHandle) -> Option<&RigidBody> {
        self.bodies.get(handle)
    }

    /// Mutable access wakes the body.
    pub fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut RigidBody> {
        let body = self.bodies.get_mut(handle)?;
        body.wake();
        Some(body)
    }

    pub fn bodies(&self) -> impl Iterator<Item = (BodyHandle, &RigidBody)> {
        self.bodies.iter()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Wake a body and every body connected to it through contacts.
    pub fn wake_island(&mut self, handle: BodyHandle) {
        let island =
            self.islands
                .wake_connected(handle, &mut self.bodies, &self.colliders, &self.solver);
        trace!(body = ?handle, bodies = island.bodies().len(), "island woken");
    }

    pub fn apply_force(&mut self, handle: BodyHandle, force: Vec3) -> PhysicsResult<()> {
        self.bodies
            .get_mut(handle)
            .ok_or(PhysicsError::StaleBodyHandle)?
            .add_force(force);
        self.wake_island(handle);
        Ok(())
    }

    pub fn apply_force_at_point(
        &mut self,
        handle: BodyHandle,
        force: Vec3,
        point: Vec3,
    ) -> PhysicsResult<()> {
        self.bodies
            .get_mut(handle)
            .ok_or(PhysicsError::StaleBodyHandle)?
            .add_force_at_point(force, point);
        self.wake_island(handle);
        Ok(())
    }

    pub fn apply_torque(&mut self, handle: BodyHandle, torque: Vec3) -> PhysicsResult<()> {
        self.bodies
            .get_mut(handle)
            .ok_or(PhysicsError::StaleBodyHandle)?
            .add_torque(torque);
        self.wake_island(handle);
        Ok(())
    }

    /// Instantaneous impulse at a world point.
    pub fn apply_impulse(
        &mut self,
        handle: BodyHandle,
        impulse: Vec3,
        point: Vec3,
    ) -> PhysicsResult<()> {
        if !self.bodies.contains(handle) {
            return Err(PhysicsError::StaleBodyHandle);
        }
        // Wake first: sleeping bodies have their velocity zeroed.
        self.wake_island(handle);
        self.bodies[handle].add_impulse(impulse, point);
        Ok(())
    }

    // ---- Colliders ----

    /// Add a collider, attached to `body` or static when `None`.
    pub fn add_collider(
        &mut self,
        mut collider: Collider,
        body: Option<BodyHandle>,
    ) -> PhysicsResult<ColliderHandle> {
        collider.validate()?;
        if let Some(b) = body {
            let rb = self.bodies.get(b).ok_or(PhysicsError::StaleBodyHandle)?;
            collider.sync_to_body(rb.transform());
        }
        collider.body = body;
        collider.leaf = None;
        collider.contacts.clear();
        collider.refresh_bounds();

        let bounds = collider.bounds();
        let handle = self.colliders.try_insert(collider)?;
        match self.bvh.insert(handle, bounds) {
            Ok(leaf) => self.colliders[handle].leaf = Some(leaf),
            Err(err) => {
                self.colliders.remove(handle);
                return Err(err);
            }
        }

        if let Some(b) = body {
            self.bodies[b].colliders.push(handle);
            self.recompute_mass(b);
            self.wake_island(b);
        }
        for other in self.overlapping_bodies(handle) {
            self.wake_island(other);
        }
        debug!(collider = ?handle, body = ?body, "collider added");
        Ok(handle)
    }

    /// Remove a collider, its BVH leaf and its manifolds. No exit events are
    /// reported for its pairs.
    pub fn remove_collider(&mut self, handle: ColliderHandle) -> PhysicsResult<Collider> {
        let body = self
            .colliders
            .get(handle)
            .ok_or(PhysicsError::StaleColliderHandle)?
            .body;
        if let Some(b) = body {
            self.wake_island(b);
        }
        let collider = self.detach_collider(handle)?;
        if let Some(b) = body {
            if let Some(rb) = self.bodies.get_mut(b) {
                rb.colliders.retain(|c| *c != handle);
            }
            self.recompute_mass(b);
        }
        Ok(collider)
    }

    fn detach_collider(&mut self, handle: ColliderHandle) -> PhysicsResult<Collider> {
        let collider = self
            .colliders
            .get(handle)
            .ok_or(PhysicsError::StaleColliderHandle)?;
        let keys = collider.contacts.clone();
        let leaf = collider.leaf;

        for key in keys {
            if let Some(manifold) = self.solver.remove(key, &mut self.colliders) {
                let (a, b) = manifold.bodies();
                for other in [a, b].into_iter().flatten() {
                    if let Some(rb) = self.bodies.get_mut(other) {
                        rb.wake();
                    }
                }
            }
        }
        if let Some(leaf) = leaf {
            self.bvh.remove(leaf);
        }
        self.collisions.remove_collider(handle);
        self.sensors.remove_collider(handle);

        let collider = self
            .colliders
            .remove(handle)
            .ok_or(PhysicsError::StaleColliderHandle)?;
        debug!(collider = ?handle, "collider removed");
        Ok(collider)
    }

    /// Move a collider. Static colliders take `position`/`rotation` as their
    /// world pose; attached colliders take it relative to their body.
    pub fn set_collider_pose(
        &mut self,
        handle: ColliderHandle,
        position: Vec3,
        rotation: Quat,
    ) -> PhysicsResult<()> {
        if !position.is_finite() || !rotation.is_finite() {
            return Err(PhysicsError::InvalidConfig {
                reason: "collider pose must be finite",
            });
        }
        let collider = self
            .colliders
            .get_mut(handle)
            .ok_or(PhysicsError::StaleColliderHandle)?;

        let body = collider.body;
        match body.and_then(|b| self.bodies.get(b)) {
            Some(rb) => {
                collider.set_local_pose(position, rotation);
                collider.sync_to_body(rb.transform());
            }
            None => collider.set_world_pose(position, rotation),
        }
        if collider.refresh_bounds() {
            if let Some(leaf) = collider.leaf {
                self.bvh.update(leaf, collider.bounds(), Vec3::ZERO);
            }
        }

        // Bodies touching the collider must react to the move.
        let mut touching: Vec<BodyHandle> = self.colliders[handle]
            .contacts
            .iter()
            .filter_map(|key| self.solver.manifold(*key))
            .flat_map(|m| {
                let (a, b) = m.bodies();
                [a, b]
            })
            .flatten()
            .collect();
        touching.extend(self.overlapping_bodies(handle));
        touching.sort();
        touching.dedup();

        if let Some(b) = body {
            self.recompute_mass(b);
            self.wake_island(b);
        }
        for other in touching {
            self.wake_island(other);
        }
        Ok(())
    }

    pub fn collider(&self, handle: ColliderHandle) -> Option<&Collider> {
        self.colliders.get(handle)
    }

    /// Mutable access, mainly for installing callbacks.
    pub fn collider_mut(&mut self, handle: ColliderHandle) -> Option<&mut Collider> {
        self.colliders.get_mut(handle)
    }

    pub fn colliders(&self) -> impl Iterator<Item = (ColliderHandle, &Collider)> {
        self.colliders.iter()
    }

    pub fn collider_count(&self) -> usize {
        self.colliders.len()
    }

    /// Bodies of other colliders whose bounds overlap `handle`'s and that the
    /// filter lets it collide with. Used to wake sleepers a static collider
    /// was placed onto.
    fn overlapping_bodies(&self, handle: ColliderHandle) -> Vec<BodyHandle> {
        let Some(collider) = self.colliders.get(handle) else {
            return Vec::new();
        };
        let bounds = collider.bounds();
        let mut found = Vec::new();
        self.bvh.query_aabb(&bounds, |other_handle| {
            let Some(other) = self.colliders.get(other_handle) else {
                return;
            };
            let Some(other_body) = other.body() else {
                return;
            };
            if Some(other_body) != collider.body()
                && other.bounds().overlaps(&bounds)
                && self.filter.can_collide(collider, other)
            {
                found.push(other_body);
            }
        });
        found.sort();
        found.dedup();
        found
    }

    fn recompute_mass(&mut self, handle: BodyHandle) {
        let Some(body) = self.bodies.get_mut(handle) else {
            return;
        };
        let attached = body.colliders.clone();
        let colliders = &self.colliders;
        body.recompute_mass(attached.iter().filter_map(|h| colliders.get(*h)));
    }

    // ---- Contacts ----

    pub fn manifold_count(&self) -> usize {
        self.solver.len()
    }

    /// The manifold between two colliders, if they are touching.
    pub fn contact_manifold(&self, a: ColliderHandle, b: ColliderHandle) -> Option<&ContactManifold> {
        self.solver
            .manifold(manifold_key(a, b))
            .filter(|m| {
                let (ma, mb) = m.colliders();
                (ma == a && mb == b) || (ma == b && mb == a)
            })
    }

    pub fn contact_manifolds(&self) -> impl Iterator<Item = &ContactManifold> {
        self.solver.manifolds()
    }

    pub fn bvh(&self) -> &DynamicBvh {
        &self.bvh
    }

    /// Remove every body and collider. Configuration and filter are kept.
    pub fn clear(&mut self) {
        self.bodies.clear();
        self.colliders.clear();
        self.bvh.clear();
        self.solver.clear();
        self.collisions.clear();
        self.sensors.clear();
        self.events.clear();
        self.accumulator = 0.0;
        debug!("physics world cleared");
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::geometry::Ray;
    use crate::physics::shape::ColliderShape;

    fn ground(world: &mut PhysicsWorld) -> ColliderHandle {
        world
            .add_collider(
                Collider::new(ColliderShape::Box {
                    half_extents: Vec3::new(10.0, 0.5, 10.0),
                })
                .with_position(Vec3::new(0.0, -0.5, 0.0)),
                None,
            )
            .unwrap()
    }

    fn dynamic_box(world: &mut PhysicsWorld, position: Vec3) -> (BodyHandle, ColliderHandle) {
        let body = world.add_body(RigidBody::new(position)).unwrap();
        let collider = world
            .add_collider(
                Collider::new(ColliderShape::Box {
                    half_extents: Vec3::splat(0.5),
                })
                .with_mass(1.0),
                Some(body),
            )
            .unwrap();
        (body, collider)
    }

    #[test]
    fn test_config_validation() {
        assert!(PhysicsConfig::default().validate().is_ok());
        let bad = PhysicsConfig {
            frequency: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            PhysicsWorld::new(bad),
            Err(PhysicsError::InvalidConfig { .. })
        ));
        let bad = PhysicsConfig {
            max_substeps: Some(0),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = PhysicsConfig {
            bvh: BvhConfig {
                margin: -1.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_physics_world_free_fall() {
        let mut world = PhysicsWorld::new(PhysicsConfig::default()).unwrap();
        let body = world
            .add_body(RigidBody::new(Vec3::new(0.0, 10.0, 0.0)))
            .unwrap();
        world
            .add_collider(Collider::new(ColliderShape::Sphere { radius: 0.5 }), Some(body))
            .unwrap();

        for _ in 0..50 {
            world.step();
        }
        let y = world.body(body).unwrap().position().y;
        assert!(y < 10.0, "Body should have fallen: y = {y}");
        assert_eq!(world.step_count(), 50);
    }

    #[test]
    fn test_box_on_ground_settles_and_sleeps() {
        let mut world = PhysicsWorld::new(PhysicsConfig::default()).unwrap();
        ground(&mut world);
        let (body, _) = dynamic_box(&mut world, Vec3::new(0.0, 5.0, 0.0));

        for _ in 0..600 {
            world.step();
        }

        let rb = world.body(body).unwrap();
        let slop = world.config().penetration_slop;
        let y = rb.position().y;
        assert!(
            y > 0.5 - slop - 0.01 && y < 0.5 + 0.01,
            "Box should rest on the ground: y = {y}"
        );
        assert!(rb.linear_velocity.y.abs() < 0.05, "vy = {}", rb.linear_velocity.y);
        assert!(rb.is_asleep(), "resting box should be asleep");
    }

    #[test]
    fn test_sleep_and_wake() {
        let mut world = PhysicsWorld::new(PhysicsConfig::default()).unwrap();
        ground(&mut world);
        let (body, _) = dynamic_box(&mut world, Vec3::new(0.0, 0.5, 0.0));

        let mut asleep_after = None;
        for i in 0..200 {
            world.step();
            if world.body(body).unwrap().is_asleep() {
                asleep_after = Some(i);
                break;
            }
        }
        assert!(asleep_after.is_some(), "box at rest never slept");
        let resting = world.body(body).unwrap().position();

        // Sleeping bodies stay put.
        for _ in 0..20 {
            world.step();
        }
        assert_eq!(world.body(body).unwrap().position(), resting);

        world.apply_force(body, Vec3::new(0.0, 50.0, 0.0)).unwrap();
        assert!(!world.body(body).unwrap().is_asleep());
        world.step();
        assert!(world.body(body).unwrap().position().y > resting.y);
    }

    #[test]
    fn test_sphere_raycast() -> anyhow::Result<()> {
        let mut world = PhysicsWorld::new(PhysicsConfig::default())?;
        let sphere =
            world.add_collider(Collider::new(ColliderShape::Sphere { radius: 1.0 }), None)?;

        let ray = Ray::new(Vec3::new(0.0, 10.0, 0.0), Vec3::NEG_Y)?;
        let hit = world
            .ray_cast(&ray, 100.0, u32::MAX, false)
            .ok_or_else(|| anyhow::anyhow!("ray should hit the sphere"))?;
        assert_eq!(hit.collider, sphere);
        assert!((hit.distance - 9.0).abs() < 1e-4, "t = {}", hit.distance);
        assert!((hit.point - Vec3::Y).length() < 1e-4);

        assert!(world.ray_cast(&ray, 5.0, u32::MAX, false).is_none());
        assert!(world.ray_cast(&ray, 100.0, 0, false).is_none());
        let away = Ray::new(Vec3::new(0.0, 10.0, 0.0), Vec3::Y)?;
        assert!(world.ray_cast(&away, 100.0, u32::MAX, false).is_none());
        Ok(())
    }

    #[test]
    fn test_sensor_reports_once_without_response() {
        let config = PhysicsConfig {
            gravity: Vec3::ZERO,
            ..Default::default()
        };
        let mut world = PhysicsWorld::new(config).unwrap();
        let sensor = world
            .add_collider(
                Collider::new(ColliderShape::Sphere { radius: 1.0 }).with_sensor(true),
                None,
            )
            .unwrap();

        let enters = Rc::new(Cell::new(0));
        let exits = Rc::new(Cell::new(0));
        {
            let enters = enters.clone();
            let exits = exits.clone();
            let collider = world.collider_mut(sensor).unwrap();
            collider.set_sensor_enter(move |_, _| enters.set(enters.get() + 1));
            collider.set_sensor_exit(move |_, _| exits.set(exits.get() + 1));
        }

        let body = world
            .add_body(
                RigidBody::new(Vec3::new(-3.0, 0.0, 0.0))
                    .with_linear_velocity(Vec3::new(5.0, 0.0, 0.0))
                    .with_damping(0.0, 0.0),
            )
            .unwrap();
        let ball = world
            .add_collider(Collider::new(ColliderShape::Sphere { radius: 0.5 }), Some(body))
            .unwrap();

        let mut event_enters = 0;
        let mut event_exits = 0;
        for _ in 0..100 {
            world.step();
            for event in world.drain_events() {
                match event {
                    PhysicsEvent::SensorEnter { sensor: s, other } => {
                        assert_eq!((s, other), (sensor, ball));
                        event_enters += 1;
                    }
                    PhysicsEvent::SensorExit { .. } => event_exits += 1,
                    _ => {}
                }
            }
            assert_eq!(world.manifold_count(), 0);
        }

        assert_eq!(enters.get(), 1);
        assert_eq!(exits.get(), 1);
        assert_eq!((event_enters, event_exits), (1, 1));
        let v = world.body(body).unwrap().linear_velocity;
        assert!((v - Vec3::new(5.0, 0.0, 0.0)).length() < 1e-5, "sensor pushed the ball: {v:?}");
    }

    #[test]
    fn test_collision_enter_event_and_callback() {
        let mut world = PhysicsWorld::new(PhysicsConfig::default()).unwrap();
        let floor = ground(&mut world);
        let (_, collider) = dynamic_box(&mut world, Vec3::new(0.0, 1.0, 0.0));

        let entered = Rc::new(Cell::new(0));
        {
            let entered = entered.clone();
            world
                .collider_mut(floor)
                .unwrap()
                .set_collision_enter(move |_| entered.set(entered.get() + 1));
        }

        let mut saw_event = false;
        for _ in 0..100 {
            world.step();
            saw_event |= world.drain_events().iter().any(|e| {
                matches!(e, PhysicsEvent::CollisionEnter(info)
                    if info.other(floor) == collider)
            });
        }
        assert!(saw_event);
        assert!(entered.get() >= 1);
        let manifold = world.contact_manifold(floor, collider).expect("box is resting");
        assert!(manifold.len() >= 3, "face contact expected, got {}", manifold.len());
    }

    #[test]
    fn test_advance_runs_fixed_steps() {
        let mut world = PhysicsWorld::new(PhysicsConfig::default()).unwrap();
        assert_eq!(world.advance(0.01), 0);
        assert_eq!(world.advance(0.01), 1);
        assert_eq!(world.advance(0.04), 2);
        assert_eq!(world.step_count(), 3);

        world.pause();
        assert!(world.is_paused());
        assert_eq!(world.advance(1.0), 0);
        world.resume();
        assert_eq!(world.advance(-1.0), 0);
        assert_eq!(world.advance(f32::NAN), 0);
    }

    #[test]
    fn test_substep_cap_drops_time() {
        let config = PhysicsConfig {
            max_substeps: Some(4),
            ..Default::default()
        };
        let mut world = PhysicsWorld::new(config).unwrap();
        assert_eq!(world.advance(1.0), 4);
        assert_eq!(world.advance(0.001), 0);

        let config = PhysicsConfig {
            frequency: 64.0,
            ..Default::default()
        };
        let mut uncapped = PhysicsWorld::new(config).unwrap();
        assert_eq!(uncapped.advance(0.5), 32);
    }

    #[test]
    fn test_remove_collider_cleans_up() {
        let mut world = PhysicsWorld::new(PhysicsConfig::default()).unwrap();
        let floor = ground(&mut world);
        let (body, collider) = dynamic_box(&mut world, Vec3::new(0.0, 0.45, 0.0));
        world.step();
        assert_eq!(world.manifold_count(), 1);

        world.remove_collider(floor).unwrap();
        assert_eq!(world.manifold_count(), 0);
        assert!(world.collider(collider).unwrap().contact_keys().is_empty());
        assert!(world.bvh().validate());
        assert_eq!(world.bvh().leaf_count(), 1);
        assert_eq!(
            world.remove_collider(floor).unwrap_err(),
            PhysicsError::StaleColliderHandle
        );

        world.remove_body(body).unwrap();
        assert_eq!(world.collider_count(), 0);
        assert!(world.bvh().is_empty());
        assert!(world.body(body).is_none());
    }

    #[test]
    fn test_add_collider_rejects_bad_input() {
        let mut world = PhysicsWorld::new(PhysicsConfig::default()).unwrap();
        let bad_shape = Collider::new(ColliderShape::Sphere { radius: -1.0 });
        assert!(matches!(
            world.add_collider(bad_shape, None),
            Err(PhysicsError::InvalidShape { .. })
        ));
        let bad_layer = Collider::new(ColliderShape::Sphere { radius: 1.0 }).with_layer(32);
        assert_eq!(
            world.add_collider(bad_layer, None).unwrap_err(),
            PhysicsError::InvalidLayer(32)
        );

        let body = world.add_body(RigidBody::new(Vec3::ZERO)).unwrap();
        world.remove_body(body).unwrap();
        assert_eq!(
            world
                .add_collider(Collider::new(ColliderShape::Sphere { radius: 1.0 }), Some(body))
                .unwrap_err(),
            PhysicsError::StaleBodyHandle
        );
        assert_eq!(
            world.apply_force(body, Vec3::X).unwrap_err(),
            PhysicsError::StaleBodyHandle
        );
    }

    #[test]
    fn test_bvh_capacity_is_reported() {
        let config = PhysicsConfig {
            bvh: BvhConfig {
                capacity: 3,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut world = PhysicsWorld::new(config).unwrap();
        let sphere = || Collider::new(ColliderShape::Sphere { radius: 1.0 });
        world.add_collider(sphere(), None).unwrap();
        world.add_collider(sphere(), None).unwrap();
        assert!(matches!(
            world.add_collider(sphere(), None),
            Err(PhysicsError::CapacityExceeded { .. })
        ));
        assert_eq!(world.collider_count(), 2);
    }

    #[test]
    fn test_layer_filter_blocks_contacts() {
        let mut world = PhysicsWorld::new(PhysicsConfig::default()).unwrap();
        let mut filter = LayerFilter::all();
        filter.set(0, 1, false).unwrap();
        world.set_filter(filter);

        world
            .add_collider(
                Collider::new(ColliderShape::Box {
                    half_extents: Vec3::new(10.0, 0.5, 10.0),
                })
                .with_position(Vec3::new(0.0, -0.5, 0.0))
                .with_layer(1),
                None,
            )
            .unwrap();
        let (body, _) = dynamic_box(&mut world, Vec3::new(0.0, 0.45, 0.0));
        for _ in 0..10 {
            world.step();
        }
        assert_eq!(world.manifold_count(), 0);
        assert!(world.body(body).unwrap().position().y < 0.4);
    }

    #[test]
    fn test_set_collider_pose_moves_static() {
        let mut world = PhysicsWorld::new(PhysicsConfig::default()).unwrap();
        let sphere = world
            .add_collider(Collider::new(ColliderShape::Sphere { radius: 1.0 }), None)
            .unwrap();
        world
            .set_collider_pose(sphere, Vec3::new(5.0, 0.0, 0.0), Quat::IDENTITY)
            .unwrap();
        assert!(world.collider(sphere).unwrap().bounds().contains_point(Vec3::new(5.5, 0.0, 0.0)));
        let ray = Ray::new(Vec3::new(5.0, 10.0, 0.0), Vec3::NEG_Y).unwrap();
        assert!(world.ray_cast(&ray, 100.0, u32::MAX, false).is_some());
        assert!(world.bvh().validate());
    }

    #[test]
    fn test_stacked_boxes_sleep_and_wake_together() {
        let mut world = PhysicsWorld::new(PhysicsConfig::default()).unwrap();
        ground(&mut world);
        let (bottom, _) = dynamic_box(&mut world, Vec3::new(0.0, 0.5, 0.0));
        let (top, _) = dynamic_box(&mut world, Vec3::new(0.0, 1.5, 0.0));

        let mut slept = false;
        for _ in 0..1500 {
            world.step();
            let (a, b) = (
                world.body(bottom).unwrap().is_asleep(),
                world.body(top).unwrap().is_asleep(),
            );
            assert_eq!(a, b, "stacked boxes must sleep as one island");
            if a {
                slept = true;
                break;
            }
        }
        assert!(slept, "resting stack never slept");
        let y = world.body(top).unwrap().position().y;
        assert!((y - 1.5).abs() < 0.05, "top box drifted: y = {y}");

        world.apply_force(bottom, Vec3::new(0.0, 5.0, 0.0)).unwrap();
        assert!(!world.body(bottom).unwrap().is_asleep());
        assert!(!world.body(top).unwrap().is_asleep());
    }

    #[test]
    fn test_static_moved_onto_sleeping_body_wakes_it() {
        let mut world = PhysicsWorld::new(PhysicsConfig::default()).unwrap();
        ground(&mut world);
        let (body, collider) = dynamic_box(&mut world, Vec3::new(0.0, 0.5, 0.0));
        let wall = world
            .add_collider(
                Collider::new(ColliderShape::Box {
                    half_extents: Vec3::splat(0.5),
                })
                .with_position(Vec3::new(5.0, 0.5, 0.0)),
                None,
            )
            .unwrap();

        for _ in 0..300 {
            world.step();
            if world.body(body).unwrap().is_asleep() {
                break;
            }
        }
        assert!(world.body(body).unwrap().is_asleep());

        world
            .set_collider_pose(wall, Vec3::new(0.6, 0.5, 0.0), Quat::IDENTITY)
            .unwrap();
        assert!(!world.body(body).unwrap().is_asleep());
        world.step();
        assert!(world.contact_manifold(wall, collider).is_some());
    }

    #[test]
    fn test_static_added_onto_sleeping_body_wakes_it() {
        let mut world = PhysicsWorld::new(PhysicsConfig::default()).unwrap();
        ground(&mut world);
        let (body, _) = dynamic_box(&mut world, Vec3::new(0.0, 0.5, 0.0));
        for _ in 0..300 {
            world.step();
            if world.body(body).unwrap().is_asleep() {
                break;
            }
        }
        assert!(world.body(body).unwrap().is_asleep());

        world
            .add_collider(
                Collider::new(ColliderShape::Sphere { radius: 0.5 })
                    .with_position(Vec3::new(0.0, 1.2, 0.0)),
                None,
            )
            .unwrap();
        assert!(!world.body(body).unwrap().is_asleep());
    }

    #[test]
    fn test_static_sensor_reports_static_collider() {
        let mut world = PhysicsWorld::new(PhysicsConfig::default()).unwrap();
        let sensor = world
            .add_collider(
                Collider::new(ColliderShape::Sphere { radius: 1.0 }).with_sensor(true),
                None,
            )
            .unwrap();
        let crate_box = world
            .add_collider(
                Collider::new(ColliderShape::Box {
                    half_extents: Vec3::splat(0.5),
                })
                .with_position(Vec3::new(5.0, 0.0, 0.0)),
                None,
            )
            .unwrap();
        world.step();
        assert!(world.drain_events().is_empty());

        world
            .set_collider_pose(crate_box, Vec3::new(0.5, 0.0, 0.0), Quat::IDENTITY)
            .unwrap();
        world.step();
        assert_eq!(
            world.drain_events(),
            vec![PhysicsEvent::SensorEnter {
                sensor,
                other: crate_box
            }]
        );

        // Nothing moves: the overlap holds without new events.
        world.step();
        assert!(world.drain_events().is_empty());

        world
            .set_collider_pose(crate_box, Vec3::new(5.0, 0.0, 0.0), Quat::IDENTITY)
            .unwrap();
        world.step();
        assert_eq!(
            world.drain_events(),
            vec![PhysicsEvent::SensorExit {
                sensor,
                other: crate_box
            }]
        );
        assert_eq!(world.manifold_count(), 0);
    }

    #[test]
    fn test_reused_collider_slot_starts_clean() {
        let mut world = PhysicsWorld::new(PhysicsConfig::default()).unwrap();
        let floor = ground(&mut world);
        let (_, resting) = dynamic_box(&mut world, Vec3::new(0.0, 0.45, 0.0));
        world.step();
        assert!(world.contact_manifold(floor, resting).is_some());
        world.drain_events();

        world.remove_collider(resting).unwrap();
        let far = world
            .add_collider(
                Collider::new(ColliderShape::Sphere { radius: 0.5 })
                    .with_position(Vec3::new(20.0, 5.0, 0.0)),
                None,
            )
            .unwrap();
        assert_eq!(far.index(), resting.index());
        assert_ne!(far, resting);

        for _ in 0..5 {
            world.step();
        }
        assert_eq!(world.manifold_count(), 0);
        assert!(world.contact_manifold(floor, far).is_none());
        assert!(world.drain_events().is_empty(), "stale pair leaked into events");
        assert!(world.collider(far).unwrap().contact_keys().is_empty());
    }

    #[test]
    fn test_clear() {
        let mut world = PhysicsWorld::new(PhysicsConfig::default()).unwrap();
        ground(&mut world);
        dynamic_box(&mut world, Vec3::new(0.0, 0.45, 0.0));
        world.step();
        world.clear();
        assert_eq!(world.body_count(), 0);
        assert_eq!(world.collider_count(), 0);
        assert_eq!(world.manifold_count(), 0);
        assert!(world.bvh().is_empty());
    }
}
