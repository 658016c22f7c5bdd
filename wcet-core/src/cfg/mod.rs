//! Control Flow Graphs
//!
//! This module provides the CFG data model shared by all analyses: blocks,
//! typed edges, per-procedure graphs and the whole-task collection.
//!
//! # Memory Optimizations
//! - Block, edge and CFG identifiers use `u32` (4 bytes, arena indices)
//! - Adjacency lists use `SmallVec<[u32; 2]>` (most blocks have ≤2 edges)
//! - Cross-CFG references (callee, callers) are ids, never pointers, so the
//!   call graph may contain cycles without ownership cycles
//!
//! # Graph Shape
//! Every CFG has exactly one entry and one exit sentinel block. After
//! normalization all other blocks are reachable from the entry and
//! co-reachable to the exit. Synthetic blocks stand in for calls and sit
//! inline in the caller's block sequence:
//! `caller --Call--> synthetic --NotTaken--> continuation`.

pub mod builder;
pub mod loop_info;
pub mod transform;

use crate::prog::{Address, Inst};
use smallvec::SmallVec;
use std::fmt;

/// Intra-CFG block identifier.
pub type BlockId = u32;
/// Intra-CFG edge identifier.
pub type EdgeId = u32;
/// Collection-wide CFG identifier.
pub type CfgId = u32;

/// Type of a control-flow edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EdgeKind {
    /// Branch taken (also used for unconditional transfers and returns)
    Taken = 0,
    /// Branch not taken / sequential fall-through
    NotTaken = 1,
    /// Edge into a synthetic call block
    Call = 2,
    /// Inlined call entry produced by virtualization
    VirtualCall = 3,
    /// Inlined call return produced by virtualization
    VirtualReturn = 4,
}

/// A directed, typed edge between two blocks of one CFG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub id: EdgeId,
    pub source: BlockId,
    pub sink: BlockId,
    pub kind: EdgeKind,
}

/// Payload of a block.
#[derive(Debug, Clone)]
pub enum BlockKind {
    /// Entry sentinel (exactly one per CFG)
    Entry,
    /// Exit sentinel (exactly one per CFG)
    Exit,
    /// Target of an unresolved indirect branch
    Unknown,
    /// Non-empty run of contiguous instructions
    Basic { insts: Vec<Inst> },
    /// Stand-in for a call; `callee` is `None` while unresolved
    Synthetic { callee: Option<CfgId> },
}

/// One block of a CFG.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub kind: BlockKind,
    /// Incoming edge ids
    pub ins: SmallVec<[EdgeId; 2]>,
    /// Outgoing edge ids
    pub outs: SmallVec<[EdgeId; 2]>,
    /// For blocks produced by a transformation: the source block in the
    /// pre-transformation CFG, used for property lookup.
    pub origin: Option<(CfgId, BlockId)>,
}

impl Block {
    pub fn is_basic(&self) -> bool {
        matches!(self.kind, BlockKind::Basic { .. })
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self.kind, BlockKind::Synthetic { .. })
    }

    pub fn is_entry(&self) -> bool {
        matches!(self.kind, BlockKind::Entry)
    }

    pub fn is_exit(&self) -> bool {
        matches!(self.kind, BlockKind::Exit)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self.kind, BlockKind::Unknown)
    }

    /// Entry, exit or unknown sentinel.
    pub fn is_end(&self) -> bool {
        matches!(
            self.kind,
            BlockKind::Entry | BlockKind::Exit | BlockKind::Unknown
        )
    }

    /// Instructions of a basic block, empty for other kinds.
    pub fn insts(&self) -> &[Inst] {
        match &self.kind {
            BlockKind::Basic { insts } => insts,
            _ => &[],
        }
    }

    /// Address of the first instruction, if any.
    pub fn address(&self) -> Option<Address> {
        self.insts().first().map(|i| i.address)
    }

    /// Total size in bytes of a basic block.
    pub fn size(&self) -> u32 {
        self.insts().iter().map(|i| i.size).sum()
    }

    /// Callee CFG of a synthetic block.
    pub fn callee(&self) -> Option<CfgId> {
        match self.kind {
            BlockKind::Synthetic { callee } => callee,
            _ => None,
        }
    }

    /// Last instruction of a basic block.
    pub fn last_inst(&self) -> Option<&Inst> {
        self.insts().last()
    }
}

/// A control flow graph for one procedure.
#[derive(Debug, Clone)]
pub struct Cfg {
    pub id: CfgId,
    /// Human-readable label (function name or synthesized)
    pub label: String,
    /// Entry address of the procedure
    pub address: Address,
    pub blocks: Vec<Block>,
    pub edges: Vec<Edge>,
    pub entry: BlockId,
    pub exit: BlockId,
    /// Call sites referencing this CFG: (caller CFG, synthetic block)
    pub callers: Vec<(CfgId, BlockId)>,
}

impl Cfg {
    /// Create a CFG holding only its entry and exit sentinels.
    pub fn new(id: CfgId, label: String, address: Address) -> Self {
        let mut cfg = Cfg {
            id,
            label,
            address,
            blocks: Vec::new(),
            edges: Vec::new(),
            entry: 0,
            exit: 0,
            callers: Vec::new(),
        };
        cfg.entry = cfg.add_block(BlockKind::Entry);
        cfg.exit = cfg.add_block(BlockKind::Exit);
        cfg
    }

    /// Append a block, returning its id.
    pub fn add_block(&mut self, kind: BlockKind) -> BlockId {
        let id = self.blocks.len() as BlockId;
        self.blocks.push(Block {
            id,
            kind,
            ins: SmallVec::new(),
            outs: SmallVec::new(),
            origin: None,
        });
        id
    }

    /// Append an edge, updating both adjacency lists.
    pub fn add_edge(&mut self, source: BlockId, sink: BlockId, kind: EdgeKind) -> EdgeId {
        let id = self.edges.len() as EdgeId;
        self.edges.push(Edge {
            id,
            source,
            sink,
            kind,
        });
        self.blocks[source as usize].outs.push(id);
        self.blocks[sink as usize].ins.push(id);
        id
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id as usize]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id as usize]
    }

    /// Number of blocks.
    pub fn count(&self) -> usize {
        self.blocks.len()
    }

    /// Incoming edges of a block.
    pub fn in_edges(&self, block: BlockId) -> impl Iterator<Item = &Edge> {
        self.blocks[block as usize]
            .ins
            .iter()
            .map(move |&e| &self.edges[e as usize])
    }

    /// Outgoing edges of a block.
    pub fn out_edges(&self, block: BlockId) -> impl Iterator<Item = &Edge> {
        self.blocks[block as usize]
            .outs
            .iter()
            .map(move |&e| &self.edges[e as usize])
    }

    /// Predecessor block ids.
    pub fn preds(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.in_edges(block).map(|e| e.source)
    }

    /// Successor block ids.
    pub fn succs(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.out_edges(block).map(|e| e.sink)
    }

    /// Reverse post-order over blocks from the entry, following out-edges.
    ///
    /// Deterministic: successors are visited in edge-insertion order. Blocks
    /// unreachable from the entry are appended afterwards in id order so the
    /// result always covers the whole graph.
    pub fn reverse_post_order(&self) -> Vec<BlockId> {
        let mut visited = vec![false; self.blocks.len()];
        let mut post = Vec::with_capacity(self.blocks.len());
        // Iterative DFS with an explicit (block, next-edge-index) stack.
        let mut stack: Vec<(BlockId, usize)> = vec![(self.entry, 0)];
        visited[self.entry as usize] = true;
        while let Some(top) = stack.last_mut() {
            let block = top.0;
            let edge_idx = top.1;
            top.1 += 1;
            let outs = &self.blocks[block as usize].outs;
            if edge_idx < outs.len() {
                let next = self.edges[outs[edge_idx] as usize].sink;
                if !visited[next as usize] {
                    visited[next as usize] = true;
                    stack.push((next, 0));
                }
            } else {
                post.push(block);
                stack.pop();
            }
        }
        post.reverse();
        for id in 0..self.blocks.len() {
            if !visited[id] {
                post.push(id as BlockId);
            }
        }
        post
    }
}

impl fmt::Display for Cfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.address)
    }
}

/// All CFGs reachable from the task entry, in discovery order.
///
/// Gives every block a flat collection-wide index used by bit-vector
/// analyses and by the IPET variable assignment.
#[derive(Debug, Clone)]
pub struct CfgCollection {
    pub cfgs: Vec<Cfg>,
    /// Id of the task-entry CFG
    pub entry: CfgId,
    /// Flat-index base per CFG
    offsets: Vec<u32>,
    /// Total number of blocks over all CFGs
    pub total_blocks: u32,
}

impl CfgCollection {
    pub fn new(cfgs: Vec<Cfg>, entry: CfgId) -> Self {
        let mut offsets = Vec::with_capacity(cfgs.len());
        let mut total: u32 = 0;
        for cfg in cfgs.iter() {
            offsets.push(total);
            total += cfg.count() as u32;
        }
        CfgCollection {
            cfgs,
            entry,
            offsets,
            total_blocks: total,
        }
    }

    pub fn get(&self, id: CfgId) -> &Cfg {
        &self.cfgs[id as usize]
    }

    pub fn entry_cfg(&self) -> &Cfg {
        &self.cfgs[self.entry as usize]
    }

    pub fn count(&self) -> usize {
        self.cfgs.len()
    }

    /// Flat collection-wide index of a block.
    pub fn flat_index(&self, cfg: CfgId, block: BlockId) -> u32 {
        self.offsets[cfg as usize] + block
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cfg> {
        self.cfgs.iter()
    }

    /// Iterate blocks of the whole task, descending into callees at call
    /// sites, starting from the entry CFG's entry block.
    pub fn inter_blocks(&self) -> InterBlockIter<'_> {
        InterBlockIter::new(self)
    }
}

/// Depth-first interprocedural block iterator.
///
/// Walks blocks of the entry CFG and descends into a callee the first time a
/// synthetic block referencing it is met. Implemented with an explicit stack
/// of per-CFG frames; each CFG is visited at most once.
pub struct InterBlockIter<'a> {
    collection: &'a CfgCollection,
    /// (cfg id, DFS stack of block ids)
    frames: Vec<(CfgId, Vec<BlockId>)>,
    /// Per-CFG visited block marks, indexed by flat index
    visited_blocks: Vec<bool>,
    visited_cfgs: Vec<bool>,
}

impl<'a> InterBlockIter<'a> {
    fn new(collection: &'a CfgCollection) -> Self {
        let mut iter = InterBlockIter {
            collection,
            frames: Vec::new(),
            visited_blocks: vec![false; collection.total_blocks as usize],
            visited_cfgs: vec![false; collection.count()],
        };
        iter.push_cfg(collection.entry);
        iter
    }

    fn push_cfg(&mut self, cfg: CfgId) {
        if !self.visited_cfgs[cfg as usize] {
            self.visited_cfgs[cfg as usize] = true;
            let entry = self.collection.get(cfg).entry;
            self.frames.push((cfg, vec![entry]));
        }
    }
}

impl<'a> Iterator for InterBlockIter<'a> {
    type Item = (CfgId, &'a Block);

    fn next(&mut self) -> Option<Self::Item> {
        let collection: &'a CfgCollection = self.collection;
        loop {
            let (cfg_id, stack) = self.frames.last_mut()?;
            let cfg_id = *cfg_id;
            let block_id = match stack.pop() {
                Some(b) => b,
                None => {
                    self.frames.pop();
                    continue;
                }
            };
            let flat = collection.flat_index(cfg_id, block_id) as usize;
            if self.visited_blocks[flat] {
                continue;
            }
            self.visited_blocks[flat] = true;
            let cfg = collection.get(cfg_id);
            let block = cfg.block(block_id);
            // Push successors in reverse edge order for stable traversal.
            let (_, stack) = self.frames.last_mut().unwrap();
            for edge in cfg.blocks[block_id as usize].outs.iter().rev() {
                stack.push(cfg.edges[*edge as usize].sink);
            }
            if let Some(callee) = block.callee() {
                self.push_cfg(callee);
            }
            return Some((cfg_id, block));
        }
    }
}
