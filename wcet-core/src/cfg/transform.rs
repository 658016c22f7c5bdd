//! CFG Transformations
//!
//! Rewrites producing fresh CFGs: normalization (dead-end removal),
//! virtualization (call inlining by duplication), first-iteration loop
//! unrolling, branch-delay expansion and predicated-instruction expansion.
//!
//! Every produced block records its `origin` (the pre-transformation block)
//! so analysis results can be mapped back for property lookup. Transforms do
//! not mutate their input; the pipeline replaces the workspace collection
//! with the transformed one and tracks which rewrites were applied through
//! its feature set, which keeps each rewrite effectively idempotent.

use crate::cfg::loop_info::{self, LoopInfo};
use crate::cfg::{Block, BlockId, BlockKind, Cfg, CfgCollection, CfgId, EdgeKind};
use crate::error::{AnalysisError, Result};
use bitvec::prelude::*;
use std::collections::{HashMap, HashSet};

/// Origin key of a block: its recorded origin, or itself.
fn origin_key(cfg: &Cfg, block: BlockId) -> (CfgId, BlockId) {
    cfg.blocks[block as usize]
        .origin
        .unwrap_or((cfg.id, block))
}

fn clone_block_into(out: &mut Cfg, cfg: &Cfg, block: &Block) -> BlockId {
    let id = out.add_block(block.kind.clone());
    out.blocks[id as usize].origin = Some(origin_key(cfg, block.id));
    id
}

/// Remove every block that is not both reachable from the entry and
/// co-reachable to the exit.
///
/// # Errors
/// `DisconnectedCfg` when a reachable block starts a dead-end and `force` is
/// false, or when no path from entry to exit exists at all.
pub fn normalize(cfg: &Cfg, force: bool) -> Result<Cfg> {
    let n = cfg.count();

    // Forward reachability from the entry.
    let mut fwd: BitVec<u32> = bitvec![u32, Lsb0; 0; n];
    let mut stack = vec![cfg.entry];
    while let Some(b) = stack.pop() {
        if fwd[b as usize] {
            continue;
        }
        fwd.set(b as usize, true);
        for s in cfg.succs(b) {
            stack.push(s);
        }
    }

    // Backward reachability from the exit.
    let mut bwd: BitVec<u32> = bitvec![u32, Lsb0; 0; n];
    let mut stack = vec![cfg.exit];
    while let Some(b) = stack.pop() {
        if bwd[b as usize] {
            continue;
        }
        bwd.set(b as usize, true);
        for p in cfg.preds(b) {
            stack.push(p);
        }
    }

    if !bwd[cfg.entry as usize] {
        return Err(AnalysisError::DisconnectedCfg {
            cfg: cfg.label.clone(),
            block: cfg.entry,
        });
    }
    for b in 0..n as BlockId {
        if fwd[b as usize] && !bwd[b as usize] {
            if !force {
                return Err(AnalysisError::DisconnectedCfg {
                    cfg: cfg.label.clone(),
                    block: b,
                });
            }
            log::warn!(
                "CFG {}: block {} starts a dead-end, removed",
                cfg.label,
                b
            );
        }
    }

    let mut out = Cfg::new(cfg.id, cfg.label.clone(), cfg.address);
    out.callers = cfg.callers.clone();
    let mut map: HashMap<BlockId, BlockId> = HashMap::new();
    map.insert(cfg.entry, out.entry);
    map.insert(cfg.exit, out.exit);
    for block in cfg.blocks.iter() {
        if block.is_entry() || block.is_exit() {
            continue;
        }
        if fwd[block.id as usize] && bwd[block.id as usize] {
            let new = clone_block_into(&mut out, cfg, block);
            map.insert(block.id, new);
        }
    }
    for edge in cfg.edges.iter() {
        if let (Some(&s), Some(&t)) = (map.get(&edge.source), map.get(&edge.sink)) {
            out.add_edge(s, t, edge.kind);
        }
    }
    Ok(out)
}

/// Hook-up points of an inlined CFG body.
struct ExpandResult {
    /// New blocks the callee entry leads to, with the original edge kind
    entry_targets: Vec<(BlockId, EdgeKind)>,
    /// New blocks leading to the callee exit, with the original edge kind
    exit_sources: Vec<(BlockId, EdgeKind)>,
    /// The callee has a direct entry -> exit edge
    passthrough: bool,
}

/// Inline every call by duplicating the callee CFG.
///
/// The result collection starts with the single virtualized entry CFG.
/// Recursive calls (a cycle in the call stack) are left as synthetic call
/// blocks; their callee CFGs are retained in the collection un-inlined, as
/// are the callees those retain in turn.
pub fn virtualize(collection: &CfgCollection) -> Result<CfgCollection> {
    let entry_cfg = collection.entry_cfg();
    let mut out = Cfg::new(0, entry_cfg.label.clone(), entry_cfg.address);
    let mut stack: Vec<CfgId> = Vec::new();
    let mut retained: Vec<CfgId> = Vec::new();

    let hooks = expand(collection, entry_cfg, &mut out, &mut stack, &mut retained)?;
    for (t, kind) in hooks.entry_targets.iter() {
        out.add_edge(out.entry, *t, *kind);
    }
    for (s, kind) in hooks.exit_sources.iter() {
        out.add_edge(*s, out.exit, *kind);
    }
    if hooks.passthrough {
        out.add_edge(out.entry, out.exit, EdgeKind::NotTaken);
    }

    // Retained CFGs (recursion) are copied un-inlined; their own callees are
    // retained transitively.
    let mut id_map: HashMap<CfgId, CfgId> = HashMap::new();
    let mut worklist = retained.clone();
    let mut order: Vec<CfgId> = Vec::new();
    while let Some(old) = worklist.pop() {
        if id_map.contains_key(&old) {
            continue;
        }
        id_map.insert(old, 1 + order.len() as CfgId);
        order.push(old);
        for block in collection.get(old).blocks.iter() {
            if let Some(callee) = block.callee() {
                worklist.push(callee);
            }
        }
    }

    let mut cfgs = vec![out];
    for old in order.iter() {
        let mut copy = collection.get(*old).clone();
        copy.id = id_map[old];
        copy.callers.clear();
        cfgs.push(copy);
    }
    // Patch synthetic callee ids everywhere, then rebuild caller lists.
    for cfg in cfgs.iter_mut() {
        for block in cfg.blocks.iter_mut() {
            if let BlockKind::Synthetic { callee: Some(old) } = &mut block.kind {
                *old = id_map[old];
            }
        }
    }
    rebuild_callers(&mut cfgs);
    Ok(CfgCollection::new(cfgs, 0))
}

/// Recompute the `callers` lists of a set of CFGs from their synthetic blocks.
pub fn rebuild_callers(cfgs: &mut [Cfg]) {
    for cfg in cfgs.iter_mut() {
        cfg.callers.clear();
    }
    let mut sites: Vec<(CfgId, CfgId, BlockId)> = Vec::new();
    for cfg in cfgs.iter() {
        for block in cfg.blocks.iter() {
            if let Some(callee) = block.callee() {
                sites.push((callee, cfg.id, block.id));
            }
        }
    }
    for (callee, caller, site) in sites {
        cfgs[callee as usize].callers.push((caller, site));
    }
}

/// Clone the body of `cfg` into `out`, inlining non-recursive call sites.
fn expand(
    collection: &CfgCollection,
    cfg: &Cfg,
    out: &mut Cfg,
    stack: &mut Vec<CfgId>,
    retained: &mut Vec<CfgId>,
) -> Result<ExpandResult> {
    stack.push(cfg.id);

    // Clone blocks. Inlinable synthetic blocks are not cloned; they expand
    // into their callee's body instead.
    let mut map: HashMap<BlockId, BlockId> = HashMap::new();
    let mut inlined: HashMap<BlockId, ExpandResult> = HashMap::new();
    for block in cfg.blocks.iter() {
        if block.is_entry() || block.is_exit() {
            continue;
        }
        match block.callee() {
            Some(callee) if !stack.contains(&callee) => {
                let hooks = expand(collection, collection.get(callee), out, stack, retained)?;
                inlined.insert(block.id, hooks);
            }
            Some(callee) => {
                // Recursive call: keep the synthetic block, retain the callee.
                if !retained.contains(&callee) {
                    retained.push(callee);
                }
                let new = clone_block_into(out, cfg, block);
                map.insert(block.id, new);
            }
            None => {
                let new = clone_block_into(out, cfg, block);
                map.insert(block.id, new);
            }
        }
    }

    // Resolve an old block to the new blocks standing for its entry side
    // (edge targets) or its exit side (edge sources).
    let targets_of = |b: BlockId| -> Vec<(BlockId, Option<EdgeKind>)> {
        if let Some(&new) = map.get(&b) {
            vec![(new, None)]
        } else if let Some(hooks) = inlined.get(&b) {
            hooks
                .entry_targets
                .iter()
                .map(|(t, _)| (*t, Some(EdgeKind::VirtualCall)))
                .collect()
        } else {
            Vec::new()
        }
    };
    let sources_of = |b: BlockId| -> Vec<(BlockId, Option<EdgeKind>)> {
        if let Some(&new) = map.get(&b) {
            vec![(new, None)]
        } else if let Some(hooks) = inlined.get(&b) {
            hooks
                .exit_sources
                .iter()
                .map(|(s, _)| (*s, Some(EdgeKind::VirtualReturn)))
                .collect()
        } else {
            Vec::new()
        }
    };

    let mut result = ExpandResult {
        entry_targets: Vec::new(),
        exit_sources: Vec::new(),
        passthrough: false,
    };
    let mut edges: Vec<(BlockId, BlockId, EdgeKind)> = Vec::new();
    for edge in cfg.edges.iter() {
        let from_entry = edge.source == cfg.entry;
        let to_exit = edge.sink == cfg.exit;
        if from_entry && to_exit {
            result.passthrough = true;
            continue;
        }
        if from_entry {
            for (t, kind) in targets_of(edge.sink) {
                result.entry_targets.push((t, kind.unwrap_or(edge.kind)));
            }
            // A call right at the function entry also exposes its callee's
            // passthrough; unsupported shapes would need an anchor block and
            // do not occur after normalization of non-empty procedures.
            continue;
        }
        if to_exit {
            for (s, kind) in sources_of(edge.source) {
                result.exit_sources.push((s, kind.unwrap_or(edge.kind)));
            }
            continue;
        }
        for (s, sk) in sources_of(edge.source) {
            for (t, tk) in targets_of(edge.sink) {
                let kind = tk.or(sk).unwrap_or(edge.kind);
                edges.push((s, t, kind));
            }
        }
    }
    for (s, t, kind) in edges {
        out.add_edge(s, t, kind);
    }

    // A callee with a direct entry -> exit path behaves as a no-op at its
    // call sites: wire the site's predecessors straight to its successors.
    let passthrough_sites: Vec<BlockId> = inlined
        .iter()
        .filter(|(_, hooks)| hooks.passthrough)
        .map(|(id, _)| *id)
        .collect();
    for site in passthrough_sites {
        let preds: Vec<BlockId> = cfg.preds(site).collect();
        let succs: Vec<BlockId> = cfg.succs(site).collect();
        for p in preds.iter() {
            for q in succs.iter() {
                if *p == cfg.entry || *q == cfg.exit {
                    continue;
                }
                for (s, _) in sources_of(*p) {
                    for (t, _) in targets_of(*q) {
                        out.add_edge(s, t, EdgeKind::NotTaken);
                    }
                }
            }
        }
    }

    stack.pop();
    Ok(result)
}

/// Unroll the first iteration of every reducible loop.
///
/// For each loop, the body is duplicated once; entering edges lead to the
/// duplicate (the first iteration) and the duplicate's back edges fall into
/// the original header, so the original header is only reached after one
/// iteration. Loops are processed innermost first; copies of an already
/// unrolled loop are not unrolled again.
///
/// # Errors
/// `IrreducibleLoop` when a retreating edge is not a back edge.
pub fn unroll_first_iteration(cfg: &Cfg) -> Result<Cfg> {
    let mut current = with_self_origins(cfg);
    let mut done: HashSet<(CfgId, BlockId)> = HashSet::new();
    loop {
        let info = loop_info::analyze(&current);
        if let Some(&edge) = info.irreducible_edges.first() {
            return Err(AnalysisError::IrreducibleLoop {
                cfg: current.label.clone(),
                header: current.edge(edge).sink,
            });
        }
        let mut next_header: Option<BlockId> = None;
        let mut best_size = usize::MAX;
        for (header, body) in info.body.iter() {
            let key = origin_key(&current, *header);
            if done.contains(&key) {
                continue;
            }
            let size = body.count_ones();
            if size < best_size || (size == best_size && Some(*header) < next_header) {
                best_size = size;
                next_header = Some(*header);
            }
        }
        let header = match next_header {
            Some(h) => h,
            None => return Ok(current),
        };
        done.insert(origin_key(&current, header));
        current = peel_loop(&current, &info, header);
    }
}

/// Clone a CFG, giving every block an explicit origin.
fn with_self_origins(cfg: &Cfg) -> Cfg {
    let mut out = cfg.clone();
    for block in out.blocks.iter_mut() {
        if block.origin.is_none() {
            block.origin = Some((cfg.id, block.id));
        }
    }
    out
}

/// Peel the first iteration of the loop headed at `header`.
fn peel_loop(cfg: &Cfg, info: &LoopInfo, header: BlockId) -> Cfg {
    let body = &info.body[&header];
    let mut out = Cfg::new(cfg.id, cfg.label.clone(), cfg.address);
    out.callers = cfg.callers.clone();

    // Original blocks keep their positions; body copies are appended.
    let mut map: HashMap<BlockId, BlockId> = HashMap::new();
    map.insert(cfg.entry, out.entry);
    map.insert(cfg.exit, out.exit);
    for block in cfg.blocks.iter() {
        if block.is_entry() || block.is_exit() {
            continue;
        }
        let new = clone_block_into(&mut out, cfg, block);
        map.insert(block.id, new);
    }
    let mut copy: HashMap<BlockId, BlockId> = HashMap::new();
    for block in cfg.blocks.iter() {
        if body[block.id as usize] {
            let new = clone_block_into(&mut out, cfg, block);
            copy.insert(block.id, new);
        }
    }

    for edge in cfg.edges.iter() {
        let src_in = body[edge.source as usize];
        let sink_in = body[edge.sink as usize];
        if !src_in && edge.sink == header && !info.is_back_edge(edge.id) {
            // Entering edge: redirect into the peeled first iteration.
            out.add_edge(map[&edge.source], copy[&header], edge.kind);
        } else {
            out.add_edge(map[&edge.source], map[&edge.sink], edge.kind);
        }
        if src_in {
            if sink_in {
                if edge.sink == header {
                    // Back edge in the copy falls into the steady-state header.
                    out.add_edge(copy[&edge.source], map[&header], edge.kind);
                } else {
                    out.add_edge(copy[&edge.source], copy[&edge.sink], edge.kind);
                }
            } else {
                // Loop-exit edge taken during the first iteration.
                out.add_edge(copy[&edge.source], map[&edge.sink], edge.kind);
            }
        }
    }
    out
}

/// Rewrite delay-slot instructions into explicit control flow.
///
/// For every basic block ending with a branch, the first `slots`
/// instructions of its fall-through successor execute before the branch
/// takes effect on either path. They are appended to the branching block and
/// the fall-through edge is redirected to a trimmed copy of the successor.
pub fn expand_delay_slots(cfg: &Cfg, slots: u32) -> Result<Cfg> {
    if slots == 0 {
        return Ok(with_self_origins(cfg));
    }
    let mut out = with_self_origins(cfg);
    let branching: Vec<BlockId> = out
        .blocks
        .iter()
        .filter(|b| b.last_inst().map(|i| i.is_branch()).unwrap_or(false))
        .map(|b| b.id)
        .collect();
    for b in branching {
        let ft_edge = match out.out_edges(b).find(|e| e.kind == EdgeKind::NotTaken) {
            Some(e) => *e,
            None => continue,
        };
        let ft = ft_edge.sink;
        let slot_insts: Vec<_> = {
            let insts = out.block(ft).insts();
            if insts.len() < slots as usize {
                continue;
            }
            insts[..slots as usize].to_vec()
        };
        // Execute the slot instructions as part of the branching block.
        if let BlockKind::Basic { insts } = &mut out.blocks[b as usize].kind {
            insts.extend(slot_insts);
        } else {
            continue;
        }
        // Fall-through path must not execute them twice.
        let rest: Vec<_> = out.block(ft).insts()[slots as usize..].to_vec();
        if rest.is_empty() {
            // Slot block fully consumed: jump straight to its successors.
            let succ_edges: Vec<_> = out.out_edges(ft).map(|e| (e.sink, e.kind)).collect();
            retarget_edge(&mut out, ft_edge.id, succ_edges);
        } else {
            let origin = out.blocks[ft as usize].origin;
            let trimmed = out.add_block(BlockKind::Basic { insts: rest });
            out.blocks[trimmed as usize].origin = origin;
            let succ_edges: Vec<_> = out.out_edges(ft).map(|e| (e.sink, e.kind)).collect();
            retarget_edge(&mut out, ft_edge.id, vec![(trimmed, EdgeKind::NotTaken)]);
            for (sink, kind) in succ_edges {
                out.add_edge(trimmed, sink, kind);
            }
        }
    }
    Ok(out)
}

/// Redirect an edge to one or more replacement targets.
fn retarget_edge(cfg: &mut Cfg, edge: u32, targets: Vec<(BlockId, EdgeKind)>) {
    let source = cfg.edges[edge as usize].source;
    let old_sink = cfg.edges[edge as usize].sink;
    // Drop the edge from both adjacency lists, keep the slot for the first
    // replacement to preserve edge ids where possible.
    let mut targets = targets.into_iter();
    if let Some((sink, kind)) = targets.next() {
        cfg.blocks[old_sink as usize].ins.retain(|e| *e != edge);
        cfg.edges[edge as usize].sink = sink;
        cfg.edges[edge as usize].kind = kind;
        cfg.blocks[sink as usize].ins.push(edge);
    }
    for (sink, kind) in targets {
        cfg.add_edge(source, sink, kind);
    }
}

/// Rewrite predicated (conditional, non-branch) instructions into explicit
/// diamonds: the instruction becomes its own block entered by a taken edge
/// and bypassed by a not-taken skip edge.
pub fn expand_conditional_instructions(cfg: &Cfg) -> Result<Cfg> {
    let needs_split = cfg.blocks.iter().any(|b| {
        b.insts()
            .iter()
            .any(|i| i.kind.is_cond() && !i.is_control())
    });
    if !needs_split {
        return Ok(with_self_origins(cfg));
    }

    let mut out = Cfg::new(cfg.id, cfg.label.clone(), cfg.address);
    out.callers = cfg.callers.clone();
    // Per original block: where incoming edges land and where outgoing edges
    // start. A block ending with a predicated instruction exposes two exit
    // points (executed and skipped); one starting with a predicated
    // instruction exposes two entry points.
    let mut in_targets: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    let mut out_sources: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    in_targets.insert(cfg.entry, vec![out.entry]);
    out_sources.insert(cfg.entry, vec![out.entry]);
    in_targets.insert(cfg.exit, vec![out.exit]);
    out_sources.insert(cfg.exit, vec![out.exit]);

    for block in cfg.blocks.iter() {
        if block.is_entry() || block.is_exit() {
            continue;
        }
        if !block.is_basic() {
            let new = clone_block_into(&mut out, cfg, block);
            in_targets.insert(block.id, vec![new]);
            out_sources.insert(block.id, vec![new]);
            continue;
        }
        // Cut the instruction run at every predicated instruction.
        let origin = origin_key(cfg, block.id);
        let mut segments: Vec<(Vec<crate::prog::Inst>, bool)> = Vec::new();
        let mut run: Vec<crate::prog::Inst> = Vec::new();
        for inst in block.insts() {
            if inst.kind.is_cond() && !inst.is_control() {
                if !run.is_empty() {
                    segments.push((std::mem::take(&mut run), false));
                }
                let mut plain = inst.clone();
                plain.kind =
                    crate::prog::InstKind(plain.kind.0 & !crate::prog::InstKind::COND.0);
                segments.push((vec![plain], true));
            } else {
                run.push(inst.clone());
            }
        }
        if !run.is_empty() {
            segments.push((run, false));
        }

        let ids: Vec<BlockId> = segments
            .iter()
            .map(|(insts, _)| {
                let seg = out.add_block(BlockKind::Basic {
                    insts: insts.clone(),
                });
                out.blocks[seg as usize].origin = Some(origin);
                seg
            })
            .collect();
        let predicated: Vec<bool> = segments.iter().map(|(_, p)| *p).collect();
        let k = ids.len();

        // Sequential edges: entering a predicated segment means its
        // predicate held.
        for i in 0..k - 1 {
            let kind = if predicated[i + 1] {
                EdgeKind::Taken
            } else {
                EdgeKind::NotTaken
            };
            out.add_edge(ids[i], ids[i + 1], kind);
        }
        // Skip edges around each predicated segment.
        for i in 0..k {
            if predicated[i] && i > 0 && i + 1 < k {
                out.add_edge(ids[i - 1], ids[i + 1], EdgeKind::NotTaken);
            }
        }
        // Entry points: a leading predicated segment may be skipped into the
        // second segment (single-segment predicated blocks degenerate to the
        // plain block).
        let mut ins = vec![ids[0]];
        if predicated[0] && k > 1 {
            ins.push(ids[1]);
        }
        // Exit points: a trailing predicated segment exposes the segment
        // before it as a skipped exit.
        let mut outs = vec![ids[k - 1]];
        if predicated[k - 1] && k > 1 {
            outs.push(ids[k - 2]);
        }
        in_targets.insert(block.id, ins);
        out_sources.insert(block.id, outs);
    }

    for edge in cfg.edges.iter() {
        for (si, src) in out_sources[&edge.source].iter().enumerate() {
            for (ti, tgt) in in_targets[&edge.sink].iter().enumerate() {
                // The primary pairing keeps the original kind; the extra
                // skip pairings are not-taken bypasses.
                let kind = if si == 0 && ti == 0 {
                    edge.kind
                } else {
                    EdgeKind::NotTaken
                };
                out.add_edge(*src, *tgt, kind);
            }
        }
    }
    Ok(out)
}
