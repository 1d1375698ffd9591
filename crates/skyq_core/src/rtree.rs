//! R-tree over 3-D bounding boxes (Guttman, quadratic split).
//!
//! Nodes live in an arena addressed by [`NodeId`]. While building, the arena
//! is a `Vec<Node>`; once written out it is the `.rti` byte image, read
//! through [`EncodedNodes`]. Both implement [`NodeStore`], so search, dump,
//! trace and relayout run unchanged on either.
//!
//! Node record (LE, `NODE_REC_SIZE` bytes):
//!   level[4] count[4]
//!   repeat MAX_BRANCHES * { min[3×8] max[3×8] child[8] }
//!
//! A leaf branch's child is a 1-based entry id; an internal branch's child is
//! the `NodeId` of the subtree.

use crate::consts::{BRANCH_SIZE, MAX_BRANCHES, MIN_FILL, NODE_REC_SIZE};
use crate::footprint::BoundingBox;
use crate::utils::{get_f64, get_u32, get_u64, put_f64, put_u32, put_u64};
use std::io::{self, Write};
use std::ops::ControlFlow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    fn idx(self) -> usize { self.0 as usize }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Branch {
    pub rect: BoundingBox,
    pub child: u64,
}

const EMPTY_BRANCH: Branch = Branch { rect: BoundingBox::EMPTY, child: 0 };

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    /// 0 for leaves.
    pub level: u32,
    count: u32,
    branches: [Branch; MAX_BRANCHES],
}

impl Node {
    pub fn new(level: u32) -> Self { Self { level, count: 0, branches: [EMPTY_BRANCH; MAX_BRANCHES] } }

    pub fn is_leaf(&self) -> bool { self.level == 0 }
    pub fn len(&self) -> usize { self.count as usize }
    pub fn is_empty(&self) -> bool { self.count == 0 }
    pub fn branches(&self) -> &[Branch] { &self.branches[..self.len()] }

    /// Adds a branch; `false` when the node is full.
    pub fn push(&mut self, b: Branch) -> bool {
        if self.len() == MAX_BRANCHES { return false; }
        self.branches[self.len()] = b;
        self.count += 1;
        true
    }

    pub fn cover(&self) -> BoundingBox {
        self.branches().iter().fold(BoundingBox::EMPTY, |acc, b| acc.combine(&b.rect))
    }

    pub fn encode(&self, buf: &mut [u8]) {
        put_u32(buf, 0, self.level);
        put_u32(buf, 4, self.count);
        for (i, b) in self.branches.iter().enumerate() {
            let at = 8 + i * BRANCH_SIZE;
            for k in 0..3 {
                put_f64(buf, at + 8 * k, b.rect.min[k]);
                put_f64(buf, at + 24 + 8 * k, b.rect.max[k]);
            }
            put_u64(buf, at + 48, b.child);
        }
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut node = Node::new(get_u32(buf, 0));
        node.count = get_u32(buf, 4).min(MAX_BRANCHES as u32);
        for i in 0..node.len() {
            let at = 8 + i * BRANCH_SIZE;
            let b = &mut node.branches[i];
            for k in 0..3 {
                b.rect.min[k] = get_f64(buf, at + 8 * k);
                b.rect.max[k] = get_f64(buf, at + 24 + 8 * k);
            }
            b.child = get_u64(buf, at + 48);
        }
        node
    }
}

/// Backing storage for the node arena.
pub trait NodeStore {
    fn node_count(&self) -> usize;
    fn get(&self, id: NodeId) -> Option<Node>;
}

impl NodeStore for Vec<Node> {
    fn node_count(&self) -> usize { self.len() }
    fn get(&self, id: NodeId) -> Option<Node> { self.as_slice().get(id.idx()).copied() }
}

/// Node arena stored as consecutive node records (the `.rti` image).
pub struct EncodedNodes<B> {
    bytes: B,
}

impl<B: AsRef<[u8]>> EncodedNodes<B> {
    pub fn new(bytes: B) -> Self { Self { bytes } }
    pub fn bytes(&self) -> &[u8] { self.bytes.as_ref() }
}

impl<B: AsRef<[u8]>> NodeStore for EncodedNodes<B> {
    fn node_count(&self) -> usize { self.bytes.as_ref().len() / NODE_REC_SIZE }

    fn get(&self, id: NodeId) -> Option<Node> {
        let at = id.idx().checked_mul(NODE_REC_SIZE)?;
        let rec = self.bytes.as_ref().get(at..at + NODE_REC_SIZE)?;
        Some(Node::decode(rec))
    }
}

/// Serializes an arena into its on-disk image.
pub fn encode_nodes(nodes: &[Node], out: &mut [u8]) {
    for (i, n) in nodes.iter().enumerate() {
        n.encode(&mut out[i * NODE_REC_SIZE..(i + 1) * NODE_REC_SIZE]);
    }
}

pub struct RTree<S> {
    nodes: S,
    root: NodeId,
}

impl<S: NodeStore> RTree<S> {
    pub fn from_parts(nodes: S, root: NodeId) -> Self { Self { nodes, root } }

    pub fn root(&self) -> NodeId { self.root }
    pub fn nodes(&self) -> &S { &self.nodes }
    pub fn node_count(&self) -> usize { self.nodes.node_count() }

    /// Level of the root node; 0 for a tree that is a single leaf.
    pub fn root_level(&self) -> u32 { self.nodes.get(self.root).map(|n| n.level).unwrap_or(0) }

    /// Calls `visit` with the id of every leaf branch whose box overlaps
    /// `query`, until it returns `Break`. Returns the number of visits.
    pub fn search<F>(&self, query: &BoundingBox, mut visit: F) -> usize
    where
        F: FnMut(u64) -> ControlFlow<()>,
    {
        let mut hits = 0;
        let _ = self.search_node(self.root, query, &mut visit, &mut hits);
        hits
    }

    fn search_node<F>(&self, id: NodeId, query: &BoundingBox, visit: &mut F, hits: &mut usize) -> ControlFlow<()>
    where
        F: FnMut(u64) -> ControlFlow<()>,
    {
        let Some(node) = self.nodes.get(id) else { return ControlFlow::Continue(()) };
        for b in node.branches() {
            if !b.rect.overlaps(query) { continue; }
            if node.is_leaf() {
                *hits += 1;
                visit(b.child)?;
            } else {
                self.search_node(NodeId(b.child as u32), query, visit, hits)?;
            }
        }
        ControlFlow::Continue(())
    }

    /// Path from the root down to the leaf branch holding `entry_id`, as
    /// `(node, branch slot)` pairs.
    pub fn trace(&self, entry_id: u64) -> Option<Vec<(NodeId, usize)>> {
        let mut path = Vec::new();
        if self.trace_node(self.root, entry_id, &mut path) { Some(path) } else { None }
    }

    fn trace_node(&self, id: NodeId, entry_id: u64, path: &mut Vec<(NodeId, usize)>) -> bool {
        let Some(node) = self.nodes.get(id) else { return false };
        for (slot, b) in node.branches().iter().enumerate() {
            path.push((id, slot));
            let found = if node.is_leaf() {
                b.child == entry_id
            } else {
                self.trace_node(NodeId(b.child as u32), entry_id, path)
            };
            if found { return true; }
            path.pop();
        }
        false
    }

    /// Writes the tree depth-first, at most `limit` nodes when given.
    /// Returns the number of nodes written.
    pub fn dump<W: Write>(&self, out: &mut W, limit: Option<usize>) -> io::Result<usize> {
        let mut written = 0;
        self.dump_node(out, self.root, 0, limit.unwrap_or(usize::MAX), &mut written)?;
        Ok(written)
    }

    fn dump_node<W: Write>(&self, out: &mut W, id: NodeId, depth: usize, limit: usize, written: &mut usize) -> io::Result<()> {
        if *written >= limit { return Ok(()); }
        let Some(node) = self.nodes.get(id) else { return Ok(()) };
        *written += 1;
        let pad = "  ".repeat(depth);
        writeln!(out, "{pad}node {} level {} count {}", id.0, node.level, node.len())?;
        for (i, b) in node.branches().iter().enumerate() {
            let r = &b.rect;
            writeln!(
                out,
                "{pad}  [{i:2}] x {:.9} {:.9}  y {:.9} {:.9}  z {:.9} {:.9}  -> {} {}",
                r.min[0], r.max[0], r.min[1], r.max[1], r.min[2], r.max[2],
                if node.is_leaf() { "entry" } else { "node" },
                b.child
            )?;
        }
        if !node.is_leaf() {
            for b in node.branches() {
                self.dump_node(out, NodeId(b.child as u32), depth + 1, limit, written)?;
            }
        }
        Ok(())
    }

    /// Copy of the tree with nodes renumbered in depth-first order, root first.
    pub fn relayout(&self) -> RTree<Vec<Node>> {
        let mut out = Vec::with_capacity(self.node_count());
        if self.nodes.get(self.root).is_none() {
            out.push(Node::new(0));
        } else {
            self.copy_subtree(self.root, &mut out);
        }
        RTree { nodes: out, root: NodeId(0) }
    }

    fn copy_subtree(&self, id: NodeId, out: &mut Vec<Node>) -> NodeId {
        let Some(mut node) = self.nodes.get(id) else { return NodeId(0) };
        let slot = out.len();
        out.push(node);
        if !node.is_leaf() {
            for i in 0..node.len() {
                let child = self.copy_subtree(NodeId(node.branches[i].child as u32), out);
                node.branches[i].child = u64::from(child.0);
            }
            out[slot] = node;
        }
        NodeId(slot as u32)
    }
}

impl Default for RTree<Vec<Node>> {
    fn default() -> Self { Self::new() }
}

impl RTree<Vec<Node>> {
    /// Empty tree: a single empty leaf.
    pub fn new() -> Self { Self { nodes: vec![Node::new(0)], root: NodeId(0) } }

    pub fn into_nodes(self) -> Vec<Node> { self.nodes }

    fn alloc(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId((self.nodes.len() - 1) as u32)
    }

    pub fn insert(&mut self, rect: BoundingBox, entry_id: u64) {
        let branch = Branch { rect, child: entry_id };
        if let Some(split) = self.insert_at(self.root, branch, 0) {
            let old = self.root;
            let mut root = Node::new(self.nodes[old.idx()].level + 1);
            root.push(Branch { rect: self.nodes[old.idx()].cover(), child: u64::from(old.0) });
            root.push(Branch { rect: self.nodes[split.idx()].cover(), child: u64::from(split.0) });
            self.root = self.alloc(root);
        }
    }

    /// Inserts `branch` at `level` below `id`; returns the new sibling when
    /// `id` had to split.
    fn insert_at(&mut self, id: NodeId, branch: Branch, level: u32) -> Option<NodeId> {
        let node = self.nodes[id.idx()];
        if node.level == level {
            return self.add_branch(id, branch);
        }
        let i = pick_branch(&node, &branch.rect);
        let child = NodeId(node.branches[i].child as u32);
        match self.insert_at(child, branch, level) {
            None => {
                let b = &mut self.nodes[id.idx()].branches[i];
                b.rect = b.rect.combine(&branch.rect);
                None
            }
            Some(split) => {
                self.nodes[id.idx()].branches[i].rect = self.nodes[child.idx()].cover();
                let sibling = Branch { rect: self.nodes[split.idx()].cover(), child: u64::from(split.0) };
                self.add_branch(id, sibling)
            }
        }
    }

    fn add_branch(&mut self, id: NodeId, b: Branch) -> Option<NodeId> {
        if self.nodes[id.idx()].push(b) { None } else { Some(self.split(id, b)) }
    }

    /// Quadratic split of a full node plus one extra branch.
    fn split(&mut self, id: NodeId, extra: Branch) -> NodeId {
        let node = self.nodes[id.idx()];
        let mut pool: Vec<Branch> = node.branches().to_vec();
        pool.push(extra);

        let (sa, sb) = pick_seeds(&pool);
        let mut groups = [Node::new(node.level), Node::new(node.level)];
        let mut covers = [pool[sa].rect, pool[sb].rect];
        groups[0].push(pool[sa]);
        groups[1].push(pool[sb]);
        let mut rest: Vec<Branch> =
            pool.iter().enumerate().filter(|(i, _)| *i != sa && *i != sb).map(|(_, b)| *b).collect();

        while !rest.is_empty() {
            if groups[0].len() + rest.len() <= MIN_FILL {
                rest.drain(..).for_each(|b| { groups[0].push(b); });
                break;
            }
            if groups[1].len() + rest.len() <= MIN_FILL {
                rest.drain(..).for_each(|b| { groups[1].push(b); });
                break;
            }
            let growth = |k: usize, b: &Branch| covers[k].combine(&b.rect).volume() - covers[k].volume();
            let Some((k, d0, d1)) = rest
                .iter()
                .enumerate()
                .map(|(k, b)| (k, growth(0, b), growth(1, b)))
                .max_by(|x, y| (x.1 - x.2).abs().total_cmp(&(y.1 - y.2).abs()))
            else {
                break;
            };
            let b = rest.swap_remove(k);
            let g = if d0 != d1 {
                usize::from(d1 < d0)
            } else if covers[0].volume() != covers[1].volume() {
                usize::from(covers[1].volume() < covers[0].volume())
            } else {
                usize::from(groups[1].len() < groups[0].len())
            };
            groups[g].push(b);
            covers[g] = covers[g].combine(&b.rect);
        }

        self.nodes[id.idx()] = groups[0];
        self.alloc(groups[1])
    }
}

/// Branch needing the least enlargement to take `rect`; ties go to the
/// smaller box.
fn pick_branch(node: &Node, rect: &BoundingBox) -> usize {
    let mut best = 0;
    let mut best_growth = f64::INFINITY;
    let mut best_volume = f64::INFINITY;
    for (i, b) in node.branches().iter().enumerate() {
        let volume = b.rect.volume();
        let growth = b.rect.combine(rect).volume() - volume;
        if growth < best_growth || (growth == best_growth && volume < best_volume) {
            best = i;
            best_growth = growth;
            best_volume = volume;
        }
    }
    best
}

/// The pair wasting the most volume when put together.
fn pick_seeds(pool: &[Branch]) -> (usize, usize) {
    let mut seeds = (0, 1);
    let mut worst = f64::NEG_INFINITY;
    for i in 0..pool.len() {
        for j in i + 1..pool.len() {
            let waste = pool[i].rect.combine(&pool[j].rect).volume() - pool[i].rect.volume() - pool[j].rect.volume();
            if waste > worst {
                worst = waste;
                seeds = (i, j);
            }
        }
    }
    seeds
}
