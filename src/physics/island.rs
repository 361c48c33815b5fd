//! Simulation islands: groups of bodies connected through contact
//! manifolds. Each island is solved and put to sleep as a unit.

use std::collections::HashSet;

use tracing::debug;

use super::arena::Arena;
use super::collider::Collider;
use super::rigid_body::{BodyHandle, RigidBody};
use super::solver::{ContactSolver, SolverSettings};

/// Sleep thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SleepSettings {
    /// Linear speed below which a body counts as resting (m/s).
    pub linear_threshold: f32,
    /// Angular speed below which a body counts as resting (rad/s).
    pub angular_threshold: f32,
    /// Seconds every body of an island must rest before it sleeps.
    pub time_to_sleep: f32,
}

impl Default for SleepSettings {
    fn default() -> Self {
        Self {
            linear_threshold: 0.1,
            angular_threshold: 0.1,
            time_to_sleep: 0.5,
        }
    }
}

/// One connected component of the contact graph.
#[derive(Debug, Clone, Default)]
pub struct Island {
    bodies: Vec<BodyHandle>,
    manifolds: Vec<u64>,
}

impl Island {
    pub fn bodies(&self) -> &[BodyHandle] {
        &self.bodies
    }

    /// Keys of the manifolds solved with this island.
    pub fn manifolds(&self) -> &[u64] {
        &self.manifolds
    }

    pub fn solve(
        &self,
        solver: &mut ContactSolver,
        bodies: &mut Arena<RigidBody>,
        settings: &SolverSettings,
        dt: f32,
    ) {
        solver.solve(&self.manifolds, bodies, settings, dt);
    }

    /// Advance rest timers. When every body has rested long enough the whole
    /// island sleeps. Returns `true` if it fell asleep.
    pub fn update_sleep(&self, bodies: &mut Arena<RigidBody>, sleep: &SleepSettings, dt: f32) -> bool {
        let mut min_rest = f32::MAX;
        for handle in &self.bodies {
            if let Some(body) = bodies.get_mut(*handle) {
                let rest = body.update_sleep_time(dt, sleep.linear_threshold, sleep.angular_threshold);
                min_rest = min_rest.min(rest);
            }
        }
        if min_rest < sleep.time_to_sleep {
            return false;
        }

        for handle in &self.bodies {
            if let Some(body) = bodies.get_mut(*handle) {
                body.sleep();
            }
        }
        debug!(bodies = self.bodies.len(), "island asleep");
        true
    }
}

/// Flood fill over body -> collider -> manifold -> body edges.
#[derive(Debug, Default)]
pub struct IslandBuilder {
    version: u64,
    stack: Vec<BodyHandle>,
    seen_manifolds: HashSet<u64>,
}

impl IslandBuilder {
    /// Partition every awake body into islands. Sleeping bodies reached from
    /// an awake one are woken and join its island.
    pub fn build(
        &mut self,
        bodies: &mut Arena<RigidBody>,
        colliders: &Arena<Collider>,
        solver: &ContactSolver,
    ) -> Vec<Island> {
        self.begin();
        let mut islands = Vec::new();
        for handle in bodies.handles() {
            let Some(body) = bodies.get(handle) else {
                continue;
            };
            if body.is_asleep() || body.island_version == self.version {
                continue;
            }
            islands.push(self.flood(handle, bodies, colliders, solver));
        }
        islands
    }

    /// The island containing `start`, waking every body in it.
    pub fn wake_connected(
        &mut self,
        start: BodyHandle,
        bodies: &mut Arena<RigidBody>,
        colliders: &Arena<Collider>,
        solver: &ContactSolver,
    ) -> Island {
        self.begin();
        if let Some(body) = bodies.get_mut(start) {
            body.wake();
        }
        self.flood(start, bodies, colliders, solver)
    }

    fn begin(&mut self) {
        self.version += 1;
        self.stack.clear();
        self.seen_manifolds.clear();
    }

    fn flood(
        &mut self,
        start: BodyHandle,
        bodies: &mut Arena<RigidBody>,
        colliders: &Arena<Collider>,
        solver: &ContactSolver,
    ) -> Island {
        let mut island = Island::default();
        let Some(body) = bodies.get_mut(start) else {
            return island;
        };
        body.island_version = self.version;
        self.stack.push(start);

        let mut neighbors = Vec::new();
        while let Some(current) = self.stack.pop() {
            island.bodies.push(current);

            neighbors.clear();
            if let Some(body) = bodies.get(current) {
                for collider in body.colliders.iter().filter_map(|h| colliders.get(*h)) {
                    for &key in collider.contact_keys() {
                        if !self.seen_manifolds.insert(key) {
                            continue;
                        }
                        let Some(manifold) = solver.manifold(key) else {
                            continue;
                        };
                        island.manifolds.push(key);
                        let (a, b) = manifold.bodies();
                        neighbors.extend([a, b].into_iter().flatten().filter(|h| *h != current));
                    }
                }
            }

            for &other in &neighbors {
                let Some(body) = bodies.get_mut(other) else {
                    continue;
                };
                if body.island_version == self.version {
                    continue;
                }
                body.island_version = self.version;
                // Awake neighbours keep their rest timer.
                if body.is_asleep() {
                    body.wake();
                    debug!(body = ?other, "body woken by island");
                }
                self.stack.push(other);
            }
        }
        island
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::collider::ColliderHandle;
    use crate::physics::contact::{ContactInfo, ContactPoint};
    use crate::physics::shape::ColliderShape;
    use glam::Vec3;

    struct Scene {
        bodies: Arena<RigidBody>,
        colliders: Arena<Collider>,
        solver: ContactSolver,
        handles: Vec<(BodyHandle, ColliderHandle)>,
    }

    impl Scene {
        fn new(count: usize) -> Self {
            let mut bodies = Arena::unbounded("rigid body");
            let mut colliders = Arena::unbounded("collider");
            let mut handles = Vec::new();
            for i in 0..count {
                let position = Vec3::new(i as f32 * 3.0, 0.0, 0.0);
                let body = bodies.try_insert(RigidBody::new(position)).unwrap();
                let collider = colliders
                    .try_insert(
                        Collider::new(ColliderShape::Sphere { radius: 1.0 }).with_position(position),
                    )
                    .unwrap();
                colliders.get_mut(collider).unwrap().body = Some(body);
                bodies.get_mut(body).unwrap().colliders.push(collider);
                handles.push((body, collider));
            }
            Self {
                bodies,
                colliders,
                solver: ContactSolver::default(),
                handles,
            }
        }

        fn touch(&mut self, i: usize, j: usize) {
            let info = ContactInfo {
                normal: Vec3::X,
                points: vec![ContactPoint {
                    position_a: Vec3::ZERO,
                    position_b: Vec3::ZERO,
                    depth: 0.0,
                }],
            };
            self.solver
                .add(self.handles[i].1, self.handles[j].1, &info, &mut self.colliders);
        }
    }

    #[test]
    fn test_connected_bodies_share_an_island() {
        let mut scene = Scene::new(4);
        scene.touch(0, 1);
        scene.touch(1, 2);

        let mut builder = IslandBuilder::default();
        let mut islands = builder.build(&mut scene.bodies, &scene.colliders, &scene.solver);
        islands.sort_by_key(|i| std::cmp::Reverse(i.bodies().len()));
        assert_eq!(islands.len(), 2);
        assert_eq!(islands[0].bodies().len(), 3);
        assert_eq!(islands[0].manifolds().len(), 2);
        assert_eq!(islands[1].bodies(), &[scene.handles[3].0]);
        assert!(islands[1].manifolds().is_empty());
    }

    #[test]
    fn test_island_sleeps_together() {
        let mut scene = Scene::new(2);
        scene.touch(0, 1);
        let settings = SleepSettings::default();
        let mut builder = IslandBuilder::default();

        // One body keeps moving, so neither may sleep.
        scene.bodies[scene.handles[1].0].linear_velocity = Vec3::X;
        for _ in 0..40 {
            let islands = builder.build(&mut scene.bodies, &scene.colliders, &scene.solver);
            assert_eq!(islands.len(), 1);
            assert!(!islands[0].update_sleep(&mut scene.bodies, &settings, 0.02));
        }

        scene.bodies[scene.handles[1].0].linear_velocity = Vec3::ZERO;
        let mut slept = false;
        for _ in 0..40 {
            for island in builder.build(&mut scene.bodies, &scene.colliders, &scene.solver) {
                slept |= island.update_sleep(&mut scene.bodies, &settings, 0.02);
            }
        }
        assert!(slept);
        assert!(scene.handles.iter().all(|(b, _)| scene.bodies[*b].is_asleep()));
        assert!(builder
            .build(&mut scene.bodies, &scene.colliders, &scene.solver)
            .is_empty());
    }

    #[test]
    fn test_build_keeps_neighbour_rest_time() {
        let mut scene = Scene::new(3);
        scene.touch(0, 1);
        scene.touch(1, 2);
        let settings = SleepSettings::default();
        let mut builder = IslandBuilder::default();

        for _ in 0..5 {
            for island in builder.build(&mut scene.bodies, &scene.colliders, &scene.solver) {
                island.update_sleep(&mut scene.bodies, &settings, 0.02);
            }
        }
        builder.build(&mut scene.bodies, &scene.colliders, &scene.solver);
        for (body, _) in &scene.handles {
            let rest = scene.bodies[*body].sleep_time();
            assert!((rest - 0.1).abs() < 1e-5, "rest timer was reset: {rest}");
        }
    }

    #[test]
    fn test_wake_connected_wakes_whole_island() {
        let mut scene = Scene::new(3);
        scene.touch(0, 1);
        for (body, _) in &scene.handles {
            scene.bodies.get_mut(*body).unwrap().sleep();
        }

        let mut builder = IslandBuilder::default();
        let island = builder.wake_connected(
            scene.handles[1].0,
            &mut scene.bodies,
            &scene.colliders,
            &scene.solver,
        );
        assert_eq!(island.bodies().len(), 2);
        assert!(!scene.bodies[scene.handles[0].0].is_asleep());
        assert!(!scene.bodies[scene.handles[1].0].is_asleep());
        assert!(scene.bodies[scene.handles[2].0].is_asleep());
    }

    #[test]
    fn test_awake_body_wakes_sleeping_neighbor() {
        let mut scene = Scene::new(2);
        scene.touch(0, 1);
        scene.bodies.get_mut(scene.handles[1].0).unwrap().sleep();

        let mut builder = IslandBuilder::default();
        let islands = builder.build(&mut scene.bodies, &scene.colliders, &scene.solver);
        assert_eq!(islands.len(), 1);
        assert_eq!(islands[0].bodies().len(), 2);
        assert!(!scene.bodies[scene.handles[1].0].is_asleep());
    }
}
