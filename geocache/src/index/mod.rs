//! Mutable 2D spatial index.
//!
//! A region quadtree over the projected world. Each item is stored in the
//! deepest node whose bounds fully contain the item's envelope, so items that
//! straddle a split line stay at the shallower node. Items whose envelope falls
//! outside the world extent are kept at the root.
//!
//! Items are shared as `Arc<T>` and removal matches by pointer identity, which
//! lets both cache tables (tile index and entity index) use the same structure
//! without requiring `PartialEq` on their payloads.
//!
//! The index itself is not synchronized; the cache wraps each instance in its
//! own lock.

use std::sync::Arc;

use crate::coord::Envelope;

/// Number of items a node holds before it subdivides.
pub const DEFAULT_NODE_CAPACITY: usize = 16;

/// Maximum subdivision depth.
pub const DEFAULT_MAX_DEPTH: usize = 24;

struct Entry<T> {
    envelope: Envelope,
    item: Arc<T>,
}

struct Node<T> {
    bounds: Envelope,
    entries: Vec<Entry<T>>,
    children: Option<Box<[Node<T>; 4]>>,
    depth: usize,
}

impl<T> Node<T> {
    fn new(bounds: Envelope, depth: usize) -> Self {
        Self {
            bounds,
            entries: Vec::new(),
            children: None,
            depth,
        }
    }

    /// Index of the child quadrant fully containing `envelope`, if any.
    fn child_for(&self, envelope: &Envelope) -> Option<usize> {
        (0..4).find(|&i| self.bounds.quadrant(i).contains(envelope))
    }

    fn insert(&mut self, entry: Entry<T>, capacity: usize, max_depth: usize) {
        if let Some(children) = self.children.as_mut() {
            let slot = (0..4).find(|&i| children[i].bounds.contains(&entry.envelope));
            if let Some(i) = slot {
                children[i].insert(entry, capacity, max_depth);
                return;
            }
            self.entries.push(entry);
            return;
        }

        self.entries.push(entry);
        if self.entries.len() > capacity && self.depth < max_depth {
            self.split(capacity, max_depth);
        }
    }

    fn split(&mut self, capacity: usize, max_depth: usize) {
        let depth = self.depth + 1;
        let b = self.bounds;
        self.children = Some(Box::new([
            Node::new(b.quadrant(0), depth),
            Node::new(b.quadrant(1), depth),
            Node::new(b.quadrant(2), depth),
            Node::new(b.quadrant(3), depth),
        ]));

        let entries = std::mem::take(&mut self.entries);
        for entry in entries {
            match self.child_for(&entry.envelope) {
                Some(i) => {
                    if let Some(children) = self.children.as_mut() {
                        children[i].insert(entry, capacity, max_depth);
                    }
                }
                None => self.entries.push(entry),
            }
        }
    }

    fn remove(&mut self, envelope: &Envelope, item: &Arc<T>) -> bool {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| Arc::ptr_eq(&e.item, item))
        {
            self.entries.swap_remove(pos);
            return true;
        }
        match self.children.as_mut() {
            Some(children) => children
                .iter_mut()
                .filter(|c| c.bounds.contains(envelope))
                .any(|c| c.remove(envelope, item)),
            None => false,
        }
    }

    fn query(&self, envelope: &Envelope, out: &mut Vec<Arc<T>>) {
        out.extend(
            self.entries
                .iter()
                .filter(|e| e.envelope.intersects(envelope))
                .map(|e| Arc::clone(&e.item)),
        );
        if let Some(children) = self.children.as_ref() {
            for child in children.iter() {
                if child.bounds.intersects(envelope) {
                    child.query(envelope, out);
                }
            }
        }
    }

    fn query_pairs(&self, envelope: &Envelope, out: &mut Vec<(Envelope, Arc<T>)>) {
        out.extend(
            self.entries
                .iter()
                .filter(|e| e.envelope.intersects(envelope))
                .map(|e| (e.envelope, Arc::clone(&e.item))),
        );
        if let Some(children) = self.children.as_ref() {
            for child in children.iter() {
                if child.bounds.intersects(envelope) {
                    child.query_pairs(envelope, out);
                }
            }
        }
    }

    fn collect(&self, out: &mut Vec<(Envelope, Arc<T>)>) {
        out.extend(
            self.entries
                .iter()
                .map(|e| (e.envelope, Arc::clone(&e.item))),
        );
        if let Some(children) = self.children.as_ref() {
            for child in children.iter() {
                child.collect(out);
            }
        }
    }
}

/// Quadtree spatial index mapping envelopes to shared items.
pub struct SpatialIndex<T> {
    root: Node<T>,
    len: usize,
    capacity: usize,
    max_depth: usize,
}

impl<T> SpatialIndex<T> {
    /// Creates an empty index covering the projected world.
    pub fn new() -> Self {
        Self::with_bounds(Envelope::world())
    }

    /// Creates an empty index over custom bounds.
    pub fn with_bounds(bounds: Envelope) -> Self {
        Self {
            root: Node::new(bounds, 0),
            len: 0,
            capacity: DEFAULT_NODE_CAPACITY,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Sets the node capacity before subdivision.
    pub fn with_node_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Inserts `item` under `envelope`.
    pub fn insert(&mut self, envelope: Envelope, item: Arc<T>) {
        self.root.insert(
            Entry { envelope, item },
            self.capacity,
            self.max_depth,
        );
        self.len += 1;
    }

    /// Removes `item`, which must have been inserted under `envelope`.
    ///
    /// Returns `true` if the item was found.
    pub fn remove(&mut self, envelope: &Envelope, item: &Arc<T>) -> bool {
        let removed = self.root.remove(envelope, item);
        if removed {
            self.len -= 1;
        }
        removed
    }

    /// Items whose envelope intersects `envelope`.
    pub fn query(&self, envelope: &Envelope) -> Vec<Arc<T>> {
        let mut out = Vec::new();
        self.root.query(envelope, &mut out);
        out
    }

    /// Items whose envelope intersects `envelope`, paired with their envelope.
    pub fn query_entries(&self, envelope: &Envelope) -> Vec<(Envelope, Arc<T>)> {
        let mut out = Vec::new();
        self.root.query_pairs(envelope, &mut out);
        out
    }

    /// Items whose envelope lies entirely inside `envelope`.
    pub fn query_contained(&self, envelope: &Envelope) -> Vec<(Envelope, Arc<T>)> {
        let mut candidates = Vec::new();
        self.root.query_pairs(envelope, &mut candidates);
        candidates.retain(|(env, _)| envelope.contains(env));
        candidates
    }

    /// Every item in the index.
    pub fn query_all(&self) -> Vec<Arc<T>> {
        let mut all = Vec::with_capacity(self.len);
        self.root.collect(&mut all);
        all.into_iter().map(|(_, item)| item).collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T> Default for SpatialIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for SpatialIndex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialIndex")
            .field("len", &self.len)
            .field("bounds", &self.root.bounds)
            .finish()
    }
}
