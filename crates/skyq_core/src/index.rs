//! The spatial index: a growable tree while building, a mapped `.rti`
//! image once attached.

use crate::errors::{Result, SkyqError};
use crate::footprint::BoundingBox;
use crate::rtree::{EncodedNodes, Node, NodeId, RTree};
use crate::store::MappedFile;
use std::io::{self, Write};
use std::ops::ControlFlow;

pub enum SpatialIndex {
    Building(RTree<Vec<Node>>),
    Attached(RTree<EncodedNodes<MappedFile>>),
}

impl Default for SpatialIndex {
    fn default() -> Self { SpatialIndex::Building(RTree::new()) }
}

macro_rules! with_tree {
    ($self:expr, $t:ident => $body:expr) => {
        match $self {
            SpatialIndex::Building($t) => $body,
            SpatialIndex::Attached($t) => $body,
        }
    };
}

impl SpatialIndex {
    pub fn is_attached(&self) -> bool { matches!(self, SpatialIndex::Attached(_)) }

    /// Adds one entry box. An attached index is read-only.
    pub fn insert(&mut self, rect: BoundingBox, entry_id: u64) -> Result<()> {
        match self {
            SpatialIndex::Building(t) => {
                t.insert(rect, entry_id);
                Ok(())
            }
            SpatialIndex::Attached(_) => Err(SkyqError::ReadOnlyIndex),
        }
    }

    pub fn search<F>(&self, query: &BoundingBox, visit: F) -> usize
    where
        F: FnMut(u64) -> ControlFlow<()>,
    {
        with_tree!(self, t => t.search(query, visit))
    }

    pub fn trace(&self, entry_id: u64) -> Option<Vec<(NodeId, usize)>> { with_tree!(self, t => t.trace(entry_id)) }

    pub fn dump<W: Write>(&self, out: &mut W, limit: Option<usize>) -> io::Result<usize> {
        with_tree!(self, t => t.dump(out, limit))
    }

    pub fn relayout(&self) -> RTree<Vec<Node>> { with_tree!(self, t => t.relayout()) }

    pub fn building_tree(&self) -> Option<&RTree<Vec<Node>>> {
        match self {
            SpatialIndex::Building(t) => Some(t),
            SpatialIndex::Attached(_) => None,
        }
    }

    /// Renumbers a building tree depth-first so node ids are record
    /// offsets in the persisted image. No-op once attached.
    pub fn convert_to_offsets(&mut self) {
        if let SpatialIndex::Building(t) = self {
            *t = t.relayout();
        }
    }

    pub fn root(&self) -> NodeId { with_tree!(self, t => t.root()) }
    pub fn root_level(&self) -> u32 { with_tree!(self, t => t.root_level()) }
    pub fn node_count(&self) -> usize { with_tree!(self, t => t.node_count()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::Vec3;

    #[test]
    fn offsets_keep_search_results() {
        let mut idx = SpatialIndex::default();
        for i in 0..200u64 {
            let p = Vec3::from_radec(i as f64 * 1.7, (i as f64 * 0.37) % 60.0 - 30.0);
            idx.insert(BoundingBox::around(p, 1e-3), i + 1).unwrap();
        }
        // around the 20th point, (34, -22.6)
        let q = BoundingBox::around(Vec3::from_radec(20.0 * 1.7, (20.0 * 0.37) % 60.0 - 30.0), 0.2);
        let collect = |idx: &SpatialIndex| {
            let mut v = Vec::new();
            idx.search(&q, |id| {
                v.push(id);
                ControlFlow::Continue(())
            });
            v.sort_unstable();
            v
        };
        let before = collect(&idx);
        assert!(!before.is_empty());
        idx.convert_to_offsets();
        assert_eq!(idx.root(), NodeId(0));
        assert_eq!(collect(&idx), before);
        assert!(idx.trace(before[0]).is_some());
        assert!(idx.trace(10_000).is_none());
    }

    #[test]
    fn search_stops_on_break() {
        let mut idx = SpatialIndex::default();
        for i in 1..=20u64 {
            idx.insert(BoundingBox::around(Vec3::from_radec(10.0, 0.0), 1e-3), i).unwrap();
        }
        let q = BoundingBox::around(Vec3::from_radec(10.0, 0.0), 1e-3);
        let mut seen = 0;
        let hits = idx.search(&q, |_| {
            seen += 1;
            if seen == 3 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
        });
        assert_eq!((hits, seen), (3, 3));
    }
}
