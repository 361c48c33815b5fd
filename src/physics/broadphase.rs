//! Broadphase collision detection with a dynamic AABB tree.
//!
//! Leaves hold "fat" AABBs: the collider's tight bounds grown by a margin so
//! that small motions do not touch the tree. A leaf is reinserted only when
//! its tight bounds escape the fat ones, and the reinsertion margin is
//! stretched along the body's displacement so fast bodies are predicted ahead.
//!
//! Insertion descends by surface-area cost and every ancestor is rebalanced
//! with AVL rotations, so sibling heights never differ by more than one.

use std::collections::VecDeque;

use glam::Vec3;

use crate::error::{PhysicsError, PhysicsResult};
use crate::geometry::{Aabb, Ray};

use super::arena::{Arena, Handle};
use super::collider::{Collider, ColliderHandle};
use super::filter::CollisionFilter;

/// Handle to a node of a [`DynamicBvh`].
pub type NodeHandle = Handle<BvhNode>;

/// Tuning for the dynamic BVH.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BvhConfig {
    /// Distance by which leaf AABBs are fattened. Default: 0.1.
    pub margin: f32,
    /// Scale applied to the per-step displacement when a leaf is reinserted.
    /// Default: 2.0.
    pub predict_multiplier: f32,
    /// Maximum number of nodes (leaves and internal). A tree with `n` leaves
    /// needs `2n - 1` nodes. Default: 65536.
    pub capacity: usize,
}

impl Default for BvhConfig {
    fn default() -> Self {
        Self {
            margin: 0.1,
            predict_multiplier: 2.0,
            capacity: 65536,
        }
    }
}

impl BvhConfig {
    pub fn validate(&self) -> PhysicsResult<()> {
        if !self.margin.is_finite() || self.margin < 0.0 {
            return Err(PhysicsError::InvalidConfig {
                reason: "BVH margin must be non-negative and finite",
            });
        }
        if !self.predict_multiplier.is_finite() || self.predict_multiplier < 0.0 {
            return Err(PhysicsError::InvalidConfig {
                reason: "BVH predict multiplier must be non-negative and finite",
            });
        }
        if self.capacity < 2 {
            return Err(PhysicsError::InvalidConfig {
                reason: "BVH capacity must hold at least two nodes",
            });
        }
        Ok(())
    }
}

/// A node of the tree. Leaves carry a collider; internal nodes carry the
/// union of their children's bounds.
#[derive(Debug, Clone)]
pub struct BvhNode {
    aabb: Aabb,
    parent: Option<NodeHandle>,
    left: Option<NodeHandle>,
    right: Option<NodeHandle>,
    /// 0 for leaves, 1 + max(child heights) otherwise.
    height: i32,
    collider: Option<ColliderHandle>,
    moving: bool,
    /// Detect pass that last used this leaf as a query. 0 means never.
    epoch: u32,
}

impl BvhNode {
    fn leaf(aabb: Aabb, collider: ColliderHandle) -> Self {
        Self {
            aabb,
            parent: None,
            left: None,
            right: None,
            height: 0,
            collider: Some(collider),
            moving: true,
            epoch: 0,
        }
    }

    fn internal() -> Self {
        Self {
            aabb: Aabb::INVALID,
            parent: None,
            left: None,
            right: None,
            height: 1,
            collider: None,
            moving: false,
            epoch: 0,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.left.is_none()
    }

    #[inline]
    pub fn aabb(&self) -> &Aabb {
        &self.aabb
    }

    #[inline]
    pub fn height(&self) -> i32 {
        self.height
    }

    #[inline]
    pub fn collider(&self) -> Option<ColliderHandle> {
        self.collider
    }

    pub fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }

    pub fn children(&self) -> Option<(NodeHandle, NodeHandle)> {
        Some((self.left?, self.right?))
    }
}

/// Which way the stackless traversal entered the current node.
#[derive(Clone, Copy)]
enum From {
    Parent,
    Left,
    Right,
}

/// Incremental AABB tree over colliders.
pub struct DynamicBvh {
    nodes: Arena<BvhNode>,
    root: Option<NodeHandle>,
    config: BvhConfig,
    moving: Vec<NodeHandle>,
    query_epoch: u32,
    leaf_count: usize,
}

impl DynamicBvh {
    pub fn new(config: BvhConfig) -> Self {
        Self {
            nodes: Arena::with_capacity("BVH node", config.capacity),
            root: None,
            config,
            moving: Vec::new(),
            query_epoch: 0,
            leaf_count: 0,
        }
    }

    pub fn config(&self) -> &BvhConfig {
        &self.config
    }

    #[inline]
    pub fn root(&self) -> Option<NodeHandle> {
        self.root
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&BvhNode> {
        self.nodes.get(handle)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Number of leaves (colliders) in the tree.
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Number of live nodes, leaves and internal.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Height of the root, or -1 for an empty tree.
    pub fn height(&self) -> i32 {
        self.root.map_or(-1, |root| self.nodes[root].height)
    }

    /// Fat bounds stored for `leaf`.
    pub fn fat_aabb(&self, leaf: NodeHandle) -> Option<Aabb> {
        self.nodes.get(leaf).map(|node| node.aabb)
    }

    /// Leaves flagged as moved since the last [`detect`](Self::detect).
    pub fn moving_leaves(&self) -> &[NodeHandle] {
        &self.moving
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
        self.moving.clear();
        self.leaf_count = 0;
    }

    /// Add a leaf for `collider` with tight bounds `tight`.
    pub fn insert(&mut self, collider: ColliderHandle, tight: Aabb) -> PhysicsResult<NodeHandle> {
        let needed = if self.root.is_some() { 2 } else { 1 };
        if self.nodes.remaining() < needed {
            return Err(PhysicsError::CapacityExceeded {
                resource: "BVH node",
                limit: self.nodes.capacity(),
            });
        }

        let fat = tight.expanded(self.config.margin);
        let leaf = self.nodes.try_insert(BvhNode::leaf(fat, collider))?;
        let spare = if self.root.is_some() {
            Some(self.nodes.try_insert(BvhNode::internal())?)
        } else {
            None
        };
        self.insert_leaf(leaf, spare);
        self.moving.push(leaf);
        self.leaf_count += 1;
        Ok(leaf)
    }

    /// Remove a leaf and its parent node. Returns the collider it held.
    pub fn remove(&mut self, leaf: NodeHandle) -> Option<ColliderHandle> {
        let node = self.nodes.get(leaf)?;
        debug_assert!(node.is_leaf(), "only leaves can be removed from the BVH");
        if !node.is_leaf() {
            return None;
        }

        if let Some(parent) = self.remove_leaf(leaf) {
            self.nodes.remove(parent);
        }
        self.leaf_count -= 1;
        self.nodes.remove(leaf).and_then(|node| node.collider)
    }

    /// Refresh a leaf after its collider moved.
    ///
    /// The leaf is always flagged as moving for the next detect pass. It is
    /// reinserted only when `tight` escapes the stored fat bounds, in which
    /// case the new fat bounds are also stretched along `displacement` and
    /// `true` is returned.
    pub fn update(&mut self, leaf: NodeHandle, tight: Aabb, displacement: Vec3) -> bool {
        let Some(node) = self.nodes.get(leaf) else {
            return false;
        };
        let contained = node.aabb.contains(&tight);
        self.mark_moving(leaf);
        if contained {
            return false;
        }

        let spare = self.remove_leaf(leaf);
        self.nodes[leaf].aabb = tight
            .expanded(self.config.margin)
            .extended(displacement * self.config.predict_multiplier);
        self.insert_leaf(leaf, spare);
        true
    }

    /// Flag a leaf so the next detect pass queries it.
    pub fn mark_moving(&mut self, leaf: NodeHandle) {
        if let Some(node) = self.nodes.get_mut(leaf) {
            if !node.moving {
                node.moving = true;
                self.moving.push(leaf);
            }
        }
    }

    /// Collect overlapping leaf pairs involving at least one moving leaf.
    ///
    /// Pairs are unordered and reported once, smaller handle first. Pairs
    /// whose colliders the filter rejects are skipped. All moving flags are
    /// cleared afterwards.
    pub fn detect(
        &mut self,
        colliders: &Arena<Collider>,
        filter: &dyn CollisionFilter,
    ) -> Vec<(ColliderHandle, ColliderHandle)> {
        self.query_epoch = self.query_epoch.wrapping_add(1);
        if self.query_epoch == 0 {
            // 0 marks unvisited leaves, so stale stamps must go on wrap.
            for (_, node) in self.nodes.iter_mut() {
                node.epoch = 0;
            }
            self.query_epoch = 1;
        }
        let epoch = self.query_epoch;

        let moving = std::mem::take(&mut self.moving);
        let mut pairs = Vec::new();
        for &leaf in &moving {
            let Some(node) = self.nodes.get_mut(leaf) else {
                continue;
            };
            node.moving = false;
            node.epoch = epoch;
            let (Some(handle), fat) = (node.collider, node.aabb) else {
                continue;
            };
            let Some(collider) = colliders.get(handle) else {
                continue;
            };
            if !filter.can_collide_single(collider) {
                continue;
            }

            self.traverse(&fat, |other_leaf, other| {
                if other_leaf == leaf || other.epoch == epoch {
                    return;
                }
                let Some(other_handle) = other.collider else {
                    return;
                };
                let Some(other_collider) = colliders.get(other_handle) else {
                    return;
                };
                if !filter.can_collide(collider, other_collider) {
                    return;
                }
                pairs.push(if handle < other_handle {
                    (handle, other_handle)
                } else {
                    (other_handle, handle)
                });
            });
        }

        // Reuse the allocation.
        self.moving = moving;
        self.moving.clear();

        tracing::trace!(pairs = pairs.len(), "BVH detect");
        pairs
    }

    /// Visit every leaf whose fat bounds overlap `aabb`.
    pub fn query_aabb(&self, aabb: &Aabb, mut callback: impl FnMut(ColliderHandle)) {
        self.traverse(aabb, |_, node| {
            if let Some(collider) = node.collider {
                callback(collider);
            }
        });
    }

    /// Nearest leaf hit along `ray`.
    ///
    /// Nodes are visited breadth first and pruned when the ray misses their
    /// bounds before the best distance found so far. `hit` receives a leaf's
    /// collider and the current best distance, and returns the exact hit
    /// distance or `None` to skip the leaf.
    pub fn ray_cast(
        &self,
        ray: &Ray,
        max_distance: f32,
        mut hit: impl FnMut(ColliderHandle, f32) -> Option<f32>,
    ) -> Option<(ColliderHandle, f32)> {
        let root = self.root?;
        let mut best = None;
        let mut limit = max_distance;

        let mut queue = VecDeque::new();
        queue.push_back(root);
        while let Some(handle) = queue.pop_front() {
            let node = &self.nodes[handle];
            if node.aabb.ray_intersect(ray, limit).is_none() {
                continue;
            }
            match (node.collider, node.children()) {
                (Some(collider), _) => {
                    if let Some(t) = hit(collider, limit) {
                        if t <= limit {
                            limit = t;
                            best = Some((collider, t));
                        }
                    }
                }
                (None, Some((left, right))) => {
                    queue.push_back(left);
                    queue.push_back(right);
                }
                (None, None) => {}
            }
        }
        best
    }

    /// Check the structural invariants: parent links, unions, heights, AVL
    /// balance and node count.
    pub fn validate(&self) -> bool {
        let Some(root) = self.root else {
            return self.nodes.is_empty() && self.leaf_count == 0;
        };
        if self.nodes[root].parent.is_some() {
            return false;
        }
        let mut leaves = 0;
        self.validate_node(root, &mut leaves).is_some()
            && leaves == self.leaf_count
            && self.nodes.len() == 2 * leaves - 1
    }

    fn validate_node(&self, handle: NodeHandle, leaves: &mut usize) -> Option<i32> {
        let node = self.nodes.get(handle)?;
        let Some((left, right)) = node.children() else {
            if node.height != 0 || node.collider.is_none() || node.right.is_some() {
                return None;
            }
            *leaves += 1;
            return Some(0);
        };

        if node.collider.is_some()
            || self.nodes.get(left)?.parent != Some(handle)
            || self.nodes.get(right)?.parent != Some(handle)
        {
            return None;
        }
        let hl = self.validate_node(left, leaves)?;
        let hr = self.validate_node(right, leaves)?;
        let union = self.nodes[left].aabb.union(&self.nodes[right].aabb);
        let balanced = (hl - hr).abs() <= 1;
        (node.height == 1 + hl.max(hr) && balanced && node.aabb == union).then_some(node.height)
    }

    /// Walk every node overlapping `query` using parent links instead of an
    /// explicit stack, calling `visit` on overlapping leaves.
    fn traverse(&self, query: &Aabb, mut visit: impl FnMut(NodeHandle, &BvhNode)) {
        let Some(mut handle) = self.root else {
            return;
        };
        let mut from = From::Parent;
        loop {
            let node = &self.nodes[handle];
            match from {
                From::Parent => {
                    if node.aabb.overlaps(query) {
                        if let Some(left) = node.left {
                            handle = left;
                            continue;
                        }
                        visit(handle, node);
                    }
                }
                From::Left => {
                    if let Some(right) = node.right {
                        handle = right;
                        from = From::Parent;
                        continue;
                    }
                }
                From::Right => {}
            }

            let Some(parent) = node.parent else {
                break;
            };
            from = if self.nodes[parent].left == Some(handle) {
                From::Left
            } else {
                From::Right
            };
            handle = parent;
        }
    }

    /// Attach `leaf` to the tree. `spare` is an unattached internal node,
    /// required whenever the tree is not empty.
    fn insert_leaf(&mut self, leaf: NodeHandle, spare: Option<NodeHandle>) {
        let Some(root) = self.root else {
            if let Some(spare) = spare {
                self.nodes.remove(spare);
            }
            self.nodes[leaf].parent = None;
            self.root = Some(leaf);
            return;
        };
        debug_assert!(spare.is_some(), "inserting into a non-empty BVH needs a spare node");
        let Some(new_parent) = spare else {
            return;
        };

        // Surface-area descent. A new parent may only be created above a
        // node of height <= 1, which keeps the new subtree balanced.
        let leaf_aabb = self.nodes[leaf].aabb;
        let mut sibling = root;
        while let Some((left, right)) = self.nodes[sibling].children() {
            let node = &self.nodes[sibling];
            let area = node.aabb.surface_area();
            let combined_area = node.aabb.union(&leaf_aabb).surface_area();

            let cost = 2.0 * combined_area;
            let inheritance = 2.0 * (combined_area - area);
            let cost_left = self.child_cost(left, &leaf_aabb, inheritance);
            let cost_right = self.child_cost(right, &leaf_aabb, inheritance);

            if node.height <= 1 && cost < cost_left && cost < cost_right {
                break;
            }
            sibling = if cost_left < cost_right { left } else { right };
        }

        let old_parent = self.nodes[sibling].parent;
        {
            let node = &mut self.nodes[new_parent];
            *node = BvhNode::internal();
            node.parent = old_parent;
            node.left = Some(sibling);
            node.right = Some(leaf);
        }
        self.replace_child(old_parent, sibling, new_parent);
        self.nodes[sibling].parent = Some(new_parent);
        self.nodes[leaf].parent = Some(new_parent);

        self.fix_upwards(new_parent);
    }

    fn child_cost(&self, child: NodeHandle, leaf_aabb: &Aabb, inheritance: f32) -> f32 {
        let node = &self.nodes[child];
        let combined = leaf_aabb.union(&node.aabb).surface_area();
        if node.is_leaf() {
            combined + inheritance
        } else {
            combined - node.aabb.surface_area() + inheritance
        }
    }

    /// Detach `leaf` from the tree and return its former parent, now
    /// unattached, or `None` if the leaf was the root.
    fn remove_leaf(&mut self, leaf: NodeHandle) -> Option<NodeHandle> {
        if self.root == Some(leaf) {
            self.root = None;
            return None;
        }
        let parent = self.nodes[leaf].parent?;
        let (left, right) = self.nodes[parent].children()?;
        let sibling = if left == leaf { right } else { left };
        let grand_parent = self.nodes[parent].parent;

        self.replace_child(grand_parent, parent, sibling);
        self.nodes[sibling].parent = grand_parent;
        if let Some(grand_parent) = grand_parent {
            self.fix_upwards(grand_parent);
        }

        self.nodes[leaf].parent = None;
        let node = &mut self.nodes[parent];
        node.parent = None;
        node.left = None;
        node.right = None;
        Some(parent)
    }

    /// Point `parent`'s link from `old` to `new`, or make `new` the root.
    fn replace_child(&mut self, parent: Option<NodeHandle>, old: NodeHandle, new: NodeHandle) {
        match parent {
            Some(parent) => {
                let node = &mut self.nodes[parent];
                if node.left == Some(old) {
                    node.left = Some(new);
                } else {
                    node.right = Some(new);
                }
            }
            None => self.root = Some(new),
        }
    }

    /// Recompute height and bounds of an internal node from its children.
    fn refresh(&mut self, handle: NodeHandle) {
        let Some((left, right)) = self.nodes[handle].children() else {
            return;
        };
        let (l, r) = (&self.nodes[left], &self.nodes[right]);
        let aabb = l.aabb.union(&r.aabb);
        let height = 1 + l.height.max(r.height);
        let node = &mut self.nodes[handle];
        node.aabb = aabb;
        node.height = height;
    }

    fn fix_upwards(&mut self, start: NodeHandle) {
        let mut current = Some(start);
        while let Some(handle) = current {
            self.refresh(handle);
            let handle = self.balance(handle);
            current = self.nodes[handle].parent;
        }
    }

    /// Rotate `a` if its children's heights differ by more than one.
    /// Returns the node now occupying `a`'s place.
    fn balance(&mut self, a: NodeHandle) -> NodeHandle {
        let Some((b, c)) = self.nodes[a].children() else {
            return a;
        };
        if self.nodes[a].height < 2 {
            return a;
        }
        let diff = self.nodes[c].height - self.nodes[b].height;
        if diff > 1 {
            self.rotate(a, c, false)
        } else if diff < -1 {
            self.rotate(a, b, true)
        } else {
            a
        }
    }

    /// Promote `up`, the taller child of `a`. `up` keeps its taller child and
    /// hands the shorter one to `a`.
    fn rotate(&mut self, a: NodeHandle, up: NodeHandle, up_is_left: bool) -> NodeHandle {
        let Some((f, g)) = self.nodes[up].children() else {
            return a;
        };
        let parent = self.nodes[a].parent;
        self.nodes[up].parent = parent;
        self.nodes[a].parent = Some(up);
        self.replace_child(parent, a, up);

        let (keep, give) = if self.nodes[f].height > self.nodes[g].height {
            (f, g)
        } else {
            (g, f)
        };
        if up_is_left {
            self.nodes[up].left = Some(keep);
            self.nodes[up].right = Some(a);
            self.nodes[a].left = Some(give);
        } else {
            self.nodes[up].left = Some(a);
            self.nodes[up].right = Some(keep);
            self.nodes[a].right = Some(give);
        }
        self.nodes[keep].parent = Some(up);
        self.nodes[give].parent = Some(a);

        self.refresh(a);
        self.refresh(up);
        up
    }
}
