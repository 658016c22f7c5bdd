//! Abstract Interpretation Driver
//!
//! Generic worklist fixpoint over a CFG, parameterized by an abstract domain.
//! Loop headers are handled by one of two selectable strategies:
//!
//! - **First-iteration unrolling**: the first visit of a header joins the
//!   entering (non-back) edges only; later visits join back edges too, and
//!   the fixpoint is reached when the header value stops changing.
//! - **Widening**: after a bounded number of header visits the header value
//!   is coarsened by the domain's `widen`.
//!
//! Loop context tracking (used by persistence analysis) happens on edge
//! propagation: when a value flows along an edge entering a loop the domain's
//! `enter_context` runs, and `leave_context` runs on loop-exit edges.
//!
//! The driver checks the workspace cancellation flag between block visits
//! and aborts with `Cancelled`, leaving no partial state behind.

use crate::cfg::loop_info::LoopInfo;
use crate::cfg::{Block, BlockId, Cfg, Edge};
use crate::error::{AnalysisError, Result};
use crate::prog::workspace::CancelToken;
use std::collections::BTreeSet;

/// An abstract domain driven by the fixpoint iterator.
///
/// `join` must be monotone and `update` a monotone transfer function;
/// violations diverge and are caught only by the driver's iteration cap.
pub trait Domain {
    type Value: Clone;

    /// Least element (identity of `join`).
    fn bottom(&self) -> Self::Value;

    /// Value entering the task (state at the CFG entry).
    fn entry(&self) -> Self::Value;

    /// `into <- into ⊔ other`.
    fn join(&self, into: &mut Self::Value, other: &Self::Value);

    fn equals(&self, a: &Self::Value, b: &Self::Value) -> bool;

    /// Transfer function of a block.
    fn update(&mut self, cfg: &Cfg, block: &Block, input: &Self::Value) -> Self::Value;

    /// Transfer function of an edge (defaults to identity).
    fn update_edge(&mut self, _cfg: &Cfg, _edge: &Edge, value: &Self::Value) -> Self::Value {
        value.clone()
    }

    /// A value flows into the loop headed at `header`.
    fn enter_context(&mut self, _value: &mut Self::Value, _header: BlockId) {}

    /// A value flows out of the loop headed at `header`.
    fn leave_context(&mut self, _value: &mut Self::Value, _header: BlockId) {}

    /// Coarsen a header value (widening mode only).
    fn widen(&self, _value: &mut Self::Value) {}
}

/// Loop-header fixpoint strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixpointMode {
    /// Separate the first loop iteration, converge on header equality
    UnrollFirst,
    /// Widen header values after `delay` visits
    Widening { delay: u32 },
}

/// Per-block fixpoint results.
#[derive(Debug, Clone)]
pub struct AiResult<V> {
    /// Value at block entry (after joining in-edges)
    pub input: Vec<V>,
    /// Value at block exit (after the block transfer)
    pub output: Vec<V>,
    /// Block visits performed until stabilization
    pub iterations: u32,
}

/// Run the fixpoint on one CFG.
///
/// The worklist is drained in reverse post-order position, which makes block
/// visit order deterministic and lets loop bodies stabilize before headers
/// are revisited.
pub fn solve<D: Domain>(
    cfg: &Cfg,
    loops: &LoopInfo,
    domain: &mut D,
    mode: FixpointMode,
    cancel: &CancelToken,
) -> Result<AiResult<D::Value>> {
    let n = cfg.count();
    let rpo = cfg.reverse_post_order();
    let mut pos_of = vec![0u32; n];
    for (pos, &b) in rpo.iter().enumerate() {
        pos_of[b as usize] = pos as u32;
    }

    let mut edge_val: Vec<Option<D::Value>> = vec![None; cfg.edges.len()];
    let mut in_val: Vec<D::Value> = vec![domain.bottom(); n];
    let mut out_val: Vec<D::Value> = vec![domain.bottom(); n];
    let mut visits = vec![0u32; n];
    let mut iterations: u32 = 0;
    // Divergence guard for non-monotone domains (programmer error).
    let cap = (n as u64 + 1) * (cfg.edges.len() as u64 + 1) * 64;

    let mut worklist: BTreeSet<u32> = BTreeSet::new();
    worklist.insert(pos_of[cfg.entry as usize]);

    while let Some(&pos) = worklist.iter().next() {
        worklist.remove(&pos);
        if cancel.is_set() {
            return Err(AnalysisError::Cancelled);
        }
        iterations += 1;
        if iterations as u64 > cap {
            return Err(AnalysisError::Domain {
                pass: "ai::solve",
                message: format!(
                    "no fixpoint after {} visits; non-monotone domain or missing widening",
                    iterations
                ),
            });
        }

        let b = rpo[pos as usize];
        let block = cfg.block(b);
        let is_header = loops.is_header(b);
        let first_visit = visits[b as usize] == 0;

        // Join the input.
        let mut input = if b == cfg.entry {
            domain.entry()
        } else {
            domain.bottom()
        };
        if b != cfg.entry {
            for edge in cfg.in_edges(b) {
                if is_header
                    && first_visit
                    && mode == FixpointMode::UnrollFirst
                    && loops.is_back_edge(edge.id)
                {
                    continue;
                }
                if let Some(v) = edge_val[edge.id as usize].as_ref() {
                    domain.join(&mut input, v);
                }
            }
        }
        if let FixpointMode::Widening { delay } = mode {
            if is_header && visits[b as usize] >= delay {
                domain.widen(&mut input);
            }
        }

        let output = domain.update(cfg, block, &input);
        let changed = first_visit || !domain.equals(&output, &out_val[b as usize]);
        in_val[b as usize] = input;
        out_val[b as usize] = output;
        visits[b as usize] += 1;

        if !changed {
            continue;
        }
        for edge in cfg.out_edges(b) {
            let mut value = domain.update_edge(cfg, edge, &out_val[b as usize]);
            for header in loops.entered_by[edge.id as usize].iter() {
                domain.enter_context(&mut value, *header);
            }
            for header in loops.left_by[edge.id as usize].iter() {
                domain.leave_context(&mut value, *header);
            }
            let differs = match edge_val[edge.id as usize].as_ref() {
                Some(old) => !domain.equals(old, &value),
                None => true,
            };
            if differs {
                edge_val[edge.id as usize] = Some(value);
                worklist.insert(pos_of[edge.sink as usize]);
            }
        }
    }

    Ok(AiResult {
        input: in_val,
        output: out_val,
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::loop_info;
    use crate::cfg::{BlockKind, EdgeKind};
    use crate::prog::Address;

    /// Saturating block-visit counter: value = max visits along any path,
    /// capped at 8 so the lattice is finite.
    struct CountDomain {
        contexts: Vec<(&'static str, BlockId)>,
    }

    impl Domain for CountDomain {
        type Value = u32;

        fn bottom(&self) -> u32 {
            0
        }

        fn entry(&self) -> u32 {
            0
        }

        fn join(&self, into: &mut u32, other: &u32) {
            *into = (*into).max(*other);
        }

        fn equals(&self, a: &u32, b: &u32) -> bool {
            a == b
        }

        fn update(&mut self, _cfg: &Cfg, _block: &Block, input: &u32) -> u32 {
            (input + 1).min(8)
        }

        fn enter_context(&mut self, _value: &mut u32, header: BlockId) {
            self.contexts.push(("enter", header));
        }

        fn leave_context(&mut self, _value: &mut u32, header: BlockId) {
            self.contexts.push(("leave", header));
        }
    }

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
    fn test_fixpoint_reaches_saturation() {
        let cfg = simple_loop();
        let loops = loop_info::analyze(&cfg);
        let mut domain = CountDomain { contexts: vec![] };
        let cancel = CancelToken::new();
        let result = solve(
            &cfg,
            &loops,
            &mut domain,
            FixpointMode::UnrollFirst,
            &cancel,
        )
        .unwrap();
        // The loop saturates the counter at the cap.
        assert_eq!(result.output[2], 8); // header
        assert_eq!(result.output[4], 8); // exit path block
        assert!(result.iterations > cfg.count() as u32);
    }

    #[test]
    fn test_contexts_fire_on_loop_edges() {
        let cfg = simple_loop();
        let loops = loop_info::analyze(&cfg);
        let mut domain = CountDomain { contexts: vec![] };
        let cancel = CancelToken::new();
        solve(
            &cfg,
            &loops,
            &mut domain,
            FixpointMode::UnrollFirst,
            &cancel,
        )
        .unwrap();
        assert!(domain.contexts.contains(&("enter", 2)));
        assert!(domain.contexts.contains(&("leave", 2)));
    }

    #[test]
    fn test_cancellation() {
        let cfg = simple_loop();
        let loops = loop_info::analyze(&cfg);
        let mut domain = CountDomain { contexts: vec![] };
        let cancel = CancelToken::new();
        cancel.set();
        let err = solve(
            &cfg,
            &loops,
            &mut domain,
            FixpointMode::UnrollFirst,
            &cancel,
        )
        .unwrap_err();
        assert_eq!(err, AnalysisError::Cancelled);
    }

    /// A deliberately non-monotone domain to exercise the divergence guard.
    struct FlipFlop;

    impl Domain for FlipFlop {
        type Value = u32;

        fn bottom(&self) -> u32 {
            0
        }

        fn entry(&self) -> u32 {
            1
        }

        fn join(&self, into: &mut u32, other: &u32) {
            *into = (*into).max(*other);
        }

        fn equals(&self, a: &u32, b: &u32) -> bool {
            a == b
        }

        fn update(&mut self, _cfg: &Cfg, _block: &Block, input: &u32) -> u32 {
            // Oscillates forever inside a loop.
            input.wrapping_add(1)
        }
    }

    #[test]
    fn test_divergence_guard() {
        let cfg = simple_loop();
        let loops = loop_info::analyze(&cfg);
        let mut domain = FlipFlop;
        let cancel = CancelToken::new();
        let err = solve(
            &cfg,
            &loops,
            &mut domain,
            FixpointMode::UnrollFirst,
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::Domain { .. }));
    }
}
