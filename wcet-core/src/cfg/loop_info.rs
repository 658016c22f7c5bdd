//! Dominance and Loop Information
//!
//! Iterative bit-vector fixpoints for dominators (forward) and
//! post-dominators (backward), followed by loop-header and back-edge
//! identification, natural-loop bodies, nesting depth and loop-exit edges.
//!
//! A loop header is any block dominating one of its predecessors; the edge
//! from that predecessor is a back edge. A retreating edge whose target does
//! not dominate its source marks the CFG as irreducible; such edges are
//! reported separately and never treated as back edges.

use crate::cfg::{BlockId, Cfg, EdgeId};
use bitvec::prelude::*;
use std::collections::HashMap;

/// Loop and dominance information for one CFG.
#[derive(Debug, Clone)]
pub struct LoopInfo {
    /// Per block: set of dominating blocks
    pub dom: Vec<BitVec<u32>>,
    /// Per block: set of post-dominating blocks
    pub post_dom: Vec<BitVec<u32>>,
    /// Blocks that are loop headers
    pub headers: BitVec<u32>,
    /// Edges that are back edges (target dominates source)
    pub back_edges: BitVec<u32>,
    /// Retreating edges that are not back edges (irreducibility witnesses)
    pub irreducible_edges: Vec<EdgeId>,
    /// Natural loop body per header (includes the header)
    pub body: HashMap<BlockId, BitVec<u32>>,
    /// Innermost enclosing loop header per block; for a header this is the
    /// next outer header, not the header itself
    pub enclosing: Vec<Option<BlockId>>,
    /// Loop nesting depth per block (0 outside any loop)
    pub depth: Vec<u32>,
    /// Edges leaving the loop of each header
    pub exit_edges: HashMap<BlockId, Vec<EdgeId>>,
    /// Per edge: headers of loops the edge enters, outermost first
    pub entered_by: Vec<Vec<BlockId>>,
    /// Per edge: headers of loops the edge leaves, innermost first
    pub left_by: Vec<Vec<BlockId>>,
}

impl LoopInfo {
    /// `a` dominates `b`.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.dom[b as usize][a as usize]
    }

    /// `a` post-dominates `b`.
    pub fn post_dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.post_dom[b as usize][a as usize]
    }

    pub fn is_header(&self, block: BlockId) -> bool {
        self.headers[block as usize]
    }

    pub fn is_back_edge(&self, edge: EdgeId) -> bool {
        self.back_edges[edge as usize]
    }

    pub fn is_irreducible(&self) -> bool {
        !self.irreducible_edges.is_empty()
    }

    /// Block membership in the natural loop of `header`.
    pub fn in_loop(&self, block: BlockId, header: BlockId) -> bool {
        self.body
            .get(&header)
            .map(|b| b[block as usize])
            .unwrap_or(false)
    }

    /// Chain of enclosing headers of a block, outermost first.
    ///
    /// For a header block the chain ends with the block itself.
    pub fn nesting_chain(&self, block: BlockId) -> Vec<BlockId> {
        let mut chain = Vec::new();
        let mut current = if self.is_header(block) {
            Some(block)
        } else {
            self.enclosing[block as usize]
        };
        while let Some(h) = current {
            chain.push(h);
            current = self.enclosing[h as usize];
        }
        chain.reverse();
        chain
    }

    /// Non-back in-edges of a loop header (the edges entering the loop).
    pub fn entering_edges<'a>(&'a self, cfg: &'a Cfg, header: BlockId) -> Vec<EdgeId> {
        cfg.in_edges(header)
            .filter(|e| !self.is_back_edge(e.id))
            .map(|e| e.id)
            .collect()
    }

    /// Back in-edges of a loop header.
    pub fn back_in_edges<'a>(&'a self, cfg: &'a Cfg, header: BlockId) -> Vec<EdgeId> {
        cfg.in_edges(header)
            .filter(|e| self.is_back_edge(e.id))
            .map(|e| e.id)
            .collect()
    }
}

/// Compute dominance and loop information for a CFG.
pub fn analyze(cfg: &Cfg) -> LoopInfo {
    let n = cfg.count();
    let dom = dominators(cfg, false);
    let post_dom = dominators(cfg, true);

    // Back edges and headers: an edge t -> h is a back edge iff h dominates t.
    // Retreating edges (target earlier in RPO) that are not back edges make
    // the CFG irreducible.
    let mut headers: BitVec<u32> = bitvec![u32, Lsb0; 0; n];
    let mut back_edges: BitVec<u32> = bitvec![u32, Lsb0; 0; cfg.edges.len()];
    let mut irreducible_edges: Vec<EdgeId> = Vec::new();
    let rpo = cfg.reverse_post_order();
    let mut rpo_pos = vec![0usize; n];
    for (pos, &b) in rpo.iter().enumerate() {
        rpo_pos[b as usize] = pos;
    }
    for edge in cfg.edges.iter() {
        if dom[edge.source as usize][edge.sink as usize] {
            back_edges.set(edge.id as usize, true);
            headers.set(edge.sink as usize, true);
        } else if rpo_pos[edge.sink as usize] <= rpo_pos[edge.source as usize]
            && edge.source != edge.sink
        {
            irreducible_edges.push(edge.id);
        }
    }

    // Natural loop bodies: for each back edge t -> h, all blocks reaching t
    // backwards without passing through h, plus h itself.
    let mut body: HashMap<BlockId, BitVec<u32>> = HashMap::new();
    for edge in cfg.edges.iter() {
        if !back_edges[edge.id as usize] {
            continue;
        }
        let header = edge.sink;
        let set = body
            .entry(header)
            .or_insert_with(|| bitvec![u32, Lsb0; 0; n]);
        set.set(header as usize, true);
        let mut stack = vec![edge.source];
        while let Some(b) = stack.pop() {
            if set[b as usize] {
                continue;
            }
            set.set(b as usize, true);
            for pred in cfg.preds(b) {
                stack.push(pred);
            }
        }
    }

    // Depth and innermost enclosing header. Headers sorted by ascending body
    // size give innermost-first assignment.
    let mut depth = vec![0u32; n];
    let mut enclosing: Vec<Option<BlockId>> = vec![None; n];
    let mut headers_by_size: Vec<BlockId> = body.keys().copied().collect();
    headers_by_size.sort_by_key(|h| (body[h].count_ones(), *h));
    for block in 0..n as u32 {
        for header in headers_by_size.iter() {
            if *header != block && body[header][block as usize] {
                depth[block as usize] += 1;
                if enclosing[block as usize].is_none() {
                    enclosing[block as usize] = Some(*header);
                }
            }
        }
        if headers[block as usize] {
            depth[block as usize] += 1;
        }
    }

    // Exit edges: edges leaving each loop body.
    let mut exit_edges: HashMap<BlockId, Vec<EdgeId>> = HashMap::new();
    for (header, set) in body.iter() {
        let mut exits = Vec::new();
        for edge in cfg.edges.iter() {
            if set[edge.source as usize] && !set[edge.sink as usize] {
                exits.push(edge.id);
            }
        }
        exits.sort_unstable();
        exit_edges.insert(*header, exits);
    }

    // Per-edge loop entry/exit header lists for context tracking.
    let mut entered_by: Vec<Vec<BlockId>> = vec![Vec::new(); cfg.edges.len()];
    let mut left_by: Vec<Vec<BlockId>> = vec![Vec::new(); cfg.edges.len()];
    // Outermost-first ordering for entry, innermost-first for exit.
    let mut headers_outer_first = headers_by_size.clone();
    headers_outer_first.reverse();
    for edge in cfg.edges.iter() {
        for header in headers_outer_first.iter() {
            let set = &body[header];
            if set[edge.sink as usize]
                && !set[edge.source as usize]
                && !back_edges[edge.id as usize]
            {
                entered_by[edge.id as usize].push(*header);
            }
        }
        for header in headers_by_size.iter() {
            let set = &body[header];
            if set[edge.source as usize] && !set[edge.sink as usize] {
                left_by[edge.id as usize].push(*header);
            }
        }
    }

    LoopInfo {
        dom,
        post_dom,
        headers,
        back_edges,
        irreducible_edges,
        body,
        enclosing,
        depth,
        exit_edges,
        entered_by,
        left_by,
    }
}

/// Iterative bit-vector dominator fixpoint.
///
/// `backward = true` computes post-dominators by walking reversed edges from
/// the exit. Blocks unreachable from the root keep the full set (vacuous
/// dominance); normalization removes them before any consumer cares.
fn dominators(cfg: &Cfg, backward: bool) -> Vec<BitVec<u32>> {
    let n = cfg.count();
    let root = if backward { cfg.exit } else { cfg.entry };
    let mut full: BitVec<u32> = bitvec![u32, Lsb0; 0; n];
    for i in 0..n {
        full.set(i, true);
    }
    let mut dom: Vec<BitVec<u32>> = vec![full; n];
    let mut root_only: BitVec<u32> = bitvec![u32, Lsb0; 0; n];
    root_only.set(root as usize, true);
    dom[root as usize] = root_only;

    let mut order = cfg.reverse_post_order();
    if backward {
        order.reverse();
    }

    let mut changed = true;
    while changed {
        changed = false;
        for &b in order.iter() {
            if b == root {
                continue;
            }
            let mut inter: Option<BitVec<u32>> = None;
            let preds: Vec<BlockId> = if backward {
                cfg.succs(b).collect()
            } else {
                cfg.preds(b).collect()
            };
            for p in preds {
                match inter.as_mut() {
                    None => inter = Some(dom[p as usize].clone()),
                    Some(acc) => *acc &= dom[p as usize].as_bitslice(),
                }
            }
            let mut new = match inter {
                Some(acc) => acc,
                None => continue, // unreachable from root, keep full set
            };
            new.set(b as usize, true);
            if new != dom[b as usize] {
                dom[b as usize] = new;
                changed = true;
            }
        }
    }
    dom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{BlockKind, EdgeKind};
    use crate::prog::Address;

    /// entry -> h -> b -> h (back), h -> x -> exit
    fn simple_loop() -> Cfg {
        let mut cfg = Cfg::new(0, "loop".to_string(), Address::abs(0));
        let h = cfg.add_block(BlockKind::Basic { insts: vec![] });
        let b = cfg.add_block(BlockKind::Basic { insts: vec![] });
        let x = cfg.add_block(BlockKind::Basic { insts: vec![] });
        cfg.add_edge(cfg.entry, h, EdgeKind::NotTaken);
        cfg.add_edge(h, b, EdgeKind::Taken);
        cfg.add_edge(b, h, EdgeKind::Taken);
        cfg.add_edge(h, x, EdgeKind::NotTaken);
        cfg.add_edge(x, cfg.exit, EdgeKind::NotTaken);
        cfg
    }

    #[test]
    fn test_dominators() {
        let cfg = simple_loop();
        let info = analyze(&cfg);
        let (h, b, x) = (2, 3, 4);
        assert!(info.dominates(cfg.entry, h));
        assert!(info.dominates(h, b));
        assert!(info.dominates(h, x));
        assert!(!info.dominates(b, x));
        assert!(info.post_dominates(x, h));
    }

    #[test]
    fn test_loop_detection() {
        let cfg = simple_loop();
        let info = analyze(&cfg);
        let (h, b) = (2u32, 3u32);
        assert!(info.is_header(h));
        assert!(!info.is_header(b));
        // Edge b -> h is edge id 2
        assert!(info.is_back_edge(2));
        assert!(!info.is_irreducible());
        assert!(info.in_loop(b, h));
        assert!(!info.in_loop(4, h));
        assert_eq!(info.depth[h as usize], 1);
        assert_eq!(info.depth[b as usize], 1);
        assert_eq!(info.depth[4], 0);
        assert_eq!(info.enclosing[b as usize], Some(h));
    }

    #[test]
    fn test_entering_and_exit_edges() {
        let cfg = simple_loop();
        let info = analyze(&cfg);
        let h = 2u32;
        assert_eq!(info.entering_edges(&cfg, h), vec![0]);
        assert_eq!(info.back_in_edges(&cfg, h), vec![2]);
        assert_eq!(info.exit_edges[&h], vec![3]);
        // Edge entry -> h enters the loop; edge h -> x leaves it.
        assert_eq!(info.entered_by[0], vec![h]);
        assert_eq!(info.left_by[3], vec![h]);
    }

    #[test]
    fn test_nested_loops() {
        // entry -> oh -> ih -> ib -> ih (back), ib -> oh (back via ob)...
        // outer: oh { ih, ib }, inner: ih { ib }
        let mut cfg = Cfg::new(0, "nested".to_string(), Address::abs(0));
        let oh = cfg.add_block(BlockKind::Basic { insts: vec![] });
        let ih = cfg.add_block(BlockKind::Basic { insts: vec![] });
        let ib = cfg.add_block(BlockKind::Basic { insts: vec![] });
        let x = cfg.add_block(BlockKind::Basic { insts: vec![] });
        cfg.add_edge(cfg.entry, oh, EdgeKind::NotTaken);
        cfg.add_edge(oh, ih, EdgeKind::NotTaken);
        cfg.add_edge(ih, ib, EdgeKind::Taken);
        cfg.add_edge(ib, ih, EdgeKind::Taken); // inner back edge
        cfg.add_edge(ib, oh, EdgeKind::NotTaken); // outer back edge
        cfg.add_edge(oh, x, EdgeKind::Taken);
        cfg.add_edge(x, cfg.exit, EdgeKind::NotTaken);
        let info = analyze(&cfg);
        assert!(info.is_header(oh));
        assert!(info.is_header(ih));
        assert_eq!(info.depth[ib as usize], 2);
        assert_eq!(info.depth[ih as usize], 2);
        assert_eq!(info.depth[oh as usize], 1);
        assert_eq!(info.enclosing[ib as usize], Some(ih));
        assert_eq!(info.enclosing[ih as usize], Some(oh));
        assert_eq!(info.nesting_chain(ib), vec![oh, ih]);
    }
}
