//! IPET Construction
//!
//! Translates the CFG collection, the flow facts and the cache/branch
//! categorizations into an integer linear program whose maximum is the WCET
//! estimate:
//!
//! - one execution-count variable per block and per edge,
//! - flow conservation (`x_b = Σ in = Σ out`) and `x_entry = 1`,
//! - call coupling (`x_{callee entry} = Σ call sites`),
//! - loop bounds (`Σ back ≤ N · Σ entering`),
//! - miss variables constrained by their access category,
//! - the objective `Σ t_b·x_b + Σ penalty·miss`.

use crate::cache::{CacheCategories, Category};
use crate::branch::{BranchPredictions, Prediction};
use crate::cfg::loop_info::LoopInfo;
use crate::cfg::{BlockId, CfgCollection, CfgId, EdgeId};
use crate::error::{AnalysisError, Result};
use crate::ilp::{Comparator, Solution, System, VarId};
use crate::prog::flowfact::FlowFacts;
use crate::timing::BlockTimer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Execution-count variables of the collection.
#[derive(Debug, Clone, Default)]
pub struct VarAssignment {
    block_vars: HashMap<(CfgId, BlockId), VarId>,
    edge_vars: HashMap<(CfgId, EdgeId), VarId>,
}

impl VarAssignment {
    pub fn block_var(&self, cfg: CfgId, block: BlockId) -> VarId {
        self.block_vars[&(cfg, block)]
    }

    pub fn edge_var(&self, cfg: CfgId, edge: EdgeId) -> VarId {
        self.edge_vars[&(cfg, edge)]
    }
}

/// Create one variable per block and per edge.
///
/// In explicit mode variables carry readable names (`x<cfg>_<block>`,
/// `e<cfg>_<source>_<sink>`) for LP export and reporting.
pub fn assign_vars(system: &mut System, collection: &CfgCollection, explicit: bool) -> VarAssignment {
    let mut vars = VarAssignment::default();
    for cfg in collection.iter() {
        for block in cfg.blocks.iter() {
            let name = explicit.then(|| format!("x{}_{}", cfg.id, block.id));
            vars.block_vars
                .insert((cfg.id, block.id), system.new_var(name));
        }
        for edge in cfg.edges.iter() {
            let name =
                explicit.then(|| format!("e{}_{}_{}", cfg.id, edge.source, edge.sink));
            vars.edge_vars
                .insert((cfg.id, edge.id), system.new_var(name));
        }
    }
    vars
}

/// Flow conservation for every block plus `x_entry = 1` on the task entry.
pub fn build_flow_constraints(
    system: &mut System,
    collection: &CfgCollection,
    vars: &VarAssignment,
) {
    for cfg in collection.iter() {
        for block in cfg.blocks.iter() {
            let bv = vars.block_var(cfg.id, block.id);
            if !block.ins.is_empty() {
                let cons = system.new_constraint(None, Comparator::Eq, 0.0);
                system.add_term(cons, 1.0, bv);
                for edge in block.ins.iter() {
                    system.add_term(cons, -1.0, vars.edge_var(cfg.id, *edge));
                }
            }
            if !block.outs.is_empty() {
                let cons = system.new_constraint(None, Comparator::Eq, 0.0);
                system.add_term(cons, 1.0, bv);
                for edge in block.outs.iter() {
                    system.add_term(cons, -1.0, vars.edge_var(cfg.id, *edge));
                }
            }
        }
    }
    let entry_cfg = collection.entry_cfg();
    let cons = system.new_constraint(Some("task entry"), Comparator::Eq, 1.0);
    system.add_term(cons, 1.0, vars.block_var(entry_cfg.id, entry_cfg.entry));
}

/// Couple every called CFG's entry count to its call sites.
pub fn build_call_constraints(
    system: &mut System,
    collection: &CfgCollection,
    vars: &VarAssignment,
) {
    for cfg in collection.iter() {
        if cfg.id == collection.entry {
            continue;
        }
        let cons = system.new_constraint(Some("call coupling"), Comparator::Eq, 0.0);
        system.add_term(cons, 1.0, vars.block_var(cfg.id, cfg.entry));
        for (caller, site) in cfg.callers.iter() {
            system.add_term(cons, -1.0, vars.block_var(*caller, *site));
        }
    }
}

/// Loop bounds from the flow facts: `Σ back ≤ N · Σ entering` per header.
///
/// # Errors
/// `MissingLoopBound` when a loop header has no declared bound; the system
/// would be unbounded otherwise.
pub fn build_loop_constraints(
    system: &mut System,
    collection: &CfgCollection,
    loops: &[LoopInfo],
    flow_facts: &FlowFacts,
    vars: &VarAssignment,
) -> Result<()> {
    for cfg in collection.iter() {
        let info = &loops[cfg.id as usize];
        for block in cfg.blocks.iter() {
            if !info.is_header(block.id) {
                continue;
            }
            let bound = block
                .address()
                .and_then(|addr| flow_facts.loop_bound(addr))
                .ok_or_else(|| AnalysisError::MissingLoopBound {
                    cfg: cfg.label.clone(),
                    header: block.id,
                })?;
            let cons = system.new_constraint(Some("loop bound"), Comparator::Le, 0.0);
            for edge in info.back_in_edges(cfg, block.id) {
                system.add_term(cons, 1.0, vars.edge_var(cfg.id, edge));
            }
            for edge in info.entering_edges(cfg, block.id) {
                system.add_term(cons, -(bound as f64), vars.edge_var(cfg.id, edge));
            }
        }
    }
    Ok(())
}

/// A miss (or mispredict) variable and its penalty, ready for the objective.
#[derive(Debug, Clone, Copy)]
pub struct MissTerm {
    pub var: VarId,
    pub penalty: u32,
}

/// Miss variables and constraints for one cache categorization.
///
/// Per access `a` in block `b`:
/// - Always-Hit: `m_a = 0`
/// - Always-Miss: `m_a = x_b`
/// - Persistent(L): `m_a ≤ Σ entering edges of L` and `m_a ≤ x_b`
/// - Not-Classified: `m_a ≤ x_b`
pub fn build_category_constraints(
    system: &mut System,
    collection: &CfgCollection,
    cfg_id: CfgId,
    categories: &CacheCategories,
    loops: &LoopInfo,
    vars: &VarAssignment,
    penalty: u32,
    prefix: &str,
    explicit: bool,
) -> Vec<MissTerm> {
    let cfg = collection.get(cfg_id);
    let mut terms = Vec::with_capacity(categories.accesses.len());
    for access in categories.accesses.iter() {
        let name = explicit.then(|| {
            format!("{}_{}_{}", prefix, access.inst_address, access.index)
        });
        let miss = system.new_var(name);
        let bv = vars.block_var(cfg_id, access.block);
        match access.category {
            Category::AlwaysHit => {
                let cons = system.new_constraint(None, Comparator::Eq, 0.0);
                system.add_term(cons, 1.0, miss);
            }
            Category::AlwaysMiss => {
                let cons = system.new_constraint(None, Comparator::Eq, 0.0);
                system.add_term(cons, 1.0, miss);
                system.add_term(cons, -1.0, bv);
            }
            Category::Persistent { header } => {
                let cons = system.new_constraint(Some("persistent"), Comparator::Le, 0.0);
                system.add_term(cons, 1.0, miss);
                for edge in loops.entering_edges(cfg, header) {
                    system.add_term(cons, -1.0, vars.edge_var(cfg_id, edge));
                }
                let cap = system.new_constraint(None, Comparator::Le, 0.0);
                system.add_term(cap, 1.0, miss);
                system.add_term(cap, -1.0, bv);
            }
            Category::NotClassified => {
                let cons = system.new_constraint(None, Comparator::Le, 0.0);
                system.add_term(cons, 1.0, miss);
                system.add_term(cons, -1.0, bv);
            }
        }
        terms.push(MissTerm { var: miss, penalty });
    }
    terms
}

/// Mispredict variables and constraints, mirroring the cache treatment.
pub fn build_branch_constraints(
    system: &mut System,
    collection: &CfgCollection,
    cfg_id: CfgId,
    predictions: &BranchPredictions,
    loops: &LoopInfo,
    vars: &VarAssignment,
    penalty: u32,
    explicit: bool,
) -> Vec<MissTerm> {
    let cfg = collection.get(cfg_id);
    let mut terms = Vec::with_capacity(predictions.branches.len());
    for branch in predictions.branches.iter() {
        let name = explicit.then(|| format!("XMPRED_{}", branch.inst_address));
        let miss = system.new_var(name);
        let bv = vars.block_var(cfg_id, branch.block);
        match branch.prediction {
            Prediction::AlwaysCorrect => {
                let cons = system.new_constraint(None, Comparator::Eq, 0.0);
                system.add_term(cons, 1.0, miss);
            }
            Prediction::AlwaysMispredict => {
                let cons = system.new_constraint(None, Comparator::Eq, 0.0);
                system.add_term(cons, 1.0, miss);
                system.add_term(cons, -1.0, bv);
            }
            Prediction::FirstMispredict { header } => {
                let cons = system.new_constraint(Some("first mispredict"), Comparator::Le, 0.0);
                system.add_term(cons, 1.0, miss);
                for edge in loops.entering_edges(cfg, header) {
                    system.add_term(cons, -1.0, vars.edge_var(cfg_id, edge));
                }
                let cap = system.new_constraint(None, Comparator::Le, 0.0);
                system.add_term(cap, 1.0, miss);
                system.add_term(cap, -1.0, bv);
            }
            Prediction::NotClassified => {
                let cons = system.new_constraint(None, Comparator::Le, 0.0);
                system.add_term(cons, 1.0, miss);
                system.add_term(cons, -1.0, bv);
            }
        }
        terms.push(MissTerm { var: miss, penalty });
    }
    terms
}

/// The objective: block times plus miss penalties, to maximize.
pub fn build_objective(
    system: &mut System,
    collection: &CfgCollection,
    timer: &dyn BlockTimer,
    vars: &VarAssignment,
    miss_terms: &[MissTerm],
) {
    for cfg in collection.iter() {
        for block in cfg.blocks.iter() {
            if !block.is_basic() {
                continue;
            }
            let time = timer.block_time(cfg, block);
            if time > 0 {
                system.add_objective_term(time as f64, vars.block_var(cfg.id, block.id));
            }
        }
    }
    for term in miss_terms.iter() {
        if term.penalty > 0 {
            system.add_objective_term(term.penalty as f64, term.var);
        }
    }
}

/// Per-block share of the WCET in the worst-case path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockStat {
    pub cfg: CfgId,
    pub block: BlockId,
    pub address: Option<String>,
    /// Worst-case execution count
    pub count: f64,
    /// Time of one execution
    pub time: u32,
    /// `count · time`
    pub contribution: f64,
}

/// WCET result record, exportable as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WcetStats {
    /// The WCET estimate in cycles
    pub wcet: u64,
    /// Raw objective value of the relaxation
    pub objective: f64,
    pub blocks: Vec<BlockStat>,
    /// Charged cache misses over the worst-case path
    pub miss_count: f64,
    /// Charged branch mispredictions over the worst-case path
    pub mispredict_count: f64,
}

/// Assemble the statistics record from a solved system.
pub fn extract_stats(
    collection: &CfgCollection,
    timer: &dyn BlockTimer,
    vars: &VarAssignment,
    solution: &Solution,
    cache_terms: &[MissTerm],
    branch_terms: &[MissTerm],
) -> WcetStats {
    let mut blocks = Vec::new();
    for cfg in collection.iter() {
        for block in cfg.blocks.iter() {
            if !block.is_basic() {
                continue;
            }
            let count = solution.value_of(vars.block_var(cfg.id, block.id));
            let time = timer.block_time(cfg, block);
            blocks.push(BlockStat {
                cfg: cfg.id,
                block: block.id,
                address: block.address().map(|a| a.to_string()),
                count,
                time,
                contribution: count * time as f64,
            });
        }
    }
    let miss_count = cache_terms
        .iter()
        .map(|t| solution.value_of(t.var))
        .sum();
    let mispredict_count = branch_terms
        .iter()
        .map(|t| solution.value_of(t.var))
        .sum();
    WcetStats {
        wcet: solution.objective.round() as u64,
        objective: solution.objective,
        blocks,
        miss_count,
        mispredict_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{BlockKind, Cfg, EdgeKind};
    use crate::cfg::loop_info;
    use crate::ilp::simplex::SimplexSolver;
    use crate::ilp::Solver;
    use crate::prog::{Address, Inst, InstKind};
    use crate::timing::MapBlockTimer;

    fn basic(cfg: &mut Cfg, addr: u32, n: usize) -> u32 {
        let insts = (0..n)
            .map(|i| Inst::new(Address::abs(addr + 4 * i as u32), 4, InstKind::INT))
            .collect();
        cfg.add_block(BlockKind::Basic { insts })
    }

    /// The S2 loop solved through the full builder chain.
    #[test]
    fn test_loop_wcet() {
        let mut cfg = Cfg::new(0, "main".to_string(), Address::abs(0));
        let e = basic(&mut cfg, 0x00, 1);
        let h = basic(&mut cfg, 0x10, 1);
        let b = basic(&mut cfg, 0x20, 1);
        let x = basic(&mut cfg, 0x30, 1);
        cfg.add_edge(cfg.entry, e, EdgeKind::NotTaken);
        cfg.add_edge(e, h, EdgeKind::NotTaken);
        cfg.add_edge(h, b, EdgeKind::Taken);
        cfg.add_edge(b, h, EdgeKind::Taken);
        cfg.add_edge(h, x, EdgeKind::NotTaken);
        cfg.add_edge(x, cfg.exit, EdgeKind::NotTaken);
        let collection = CfgCollection::new(vec![cfg], 0);
        let loops = vec![loop_info::analyze(collection.get(0))];

        let mut facts = FlowFacts::new();
        facts.set_loop_bound(Address::abs(0x10), 10);
        let mut timer = MapBlockTimer::new(0);
        timer.set(Address::abs(0x00), 1);
        timer.set(Address::abs(0x10), 1);
        timer.set(Address::abs(0x20), 3);

        let mut system = System::new(true);
        let vars = assign_vars(&mut system, &collection, true);
        build_flow_constraints(&mut system, &collection, &vars);
        build_call_constraints(&mut system, &collection, &vars);
        build_loop_constraints(&mut system, &collection, &loops, &facts, &vars).unwrap();
        build_objective(&mut system, &collection, &timer, &vars, &[]);

        let solution = SimplexSolver::default().solve(&system).unwrap();
        // 1 + 11*1 + 10*3 = 42
        assert!((solution.objective - 42.0).abs() < 1e-6);
        let stats = extract_stats(&collection, &timer, &vars, &solution, &[], &[]);
        assert_eq!(stats.wcet, 42);
        let header = stats
            .blocks
            .iter()
            .find(|s| s.address.as_deref() == Some("0x00000010"))
            .unwrap();
        assert!((header.count - 11.0).abs() < 1e-6);
    }

    #[test]
    fn test_missing_loop_bound_reported() {
        let mut cfg = Cfg::new(0, "main".to_string(), Address::abs(0));
        let h = basic(&mut cfg, 0x00, 1);
        let b = basic(&mut cfg, 0x10, 1);
        cfg.add_edge(cfg.entry, h, EdgeKind::NotTaken);
        cfg.add_edge(h, b, EdgeKind::Taken);
        cfg.add_edge(b, h, EdgeKind::Taken);
        cfg.add_edge(h, cfg.exit, EdgeKind::NotTaken);
        let collection = CfgCollection::new(vec![cfg], 0);
        let loops = vec![loop_info::analyze(collection.get(0))];
        let mut system = System::new(true);
        let vars = assign_vars(&mut system, &collection, false);
        let err = build_loop_constraints(
            &mut system,
            &collection,
            &loops,
            &FlowFacts::new(),
            &vars,
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::MissingLoopBound { .. }));
    }

    /// Persistent accesses are charged once per loop entry (the S4 claim).
    #[test]
    fn test_persistent_miss_charged_once() {
        let mut cfg = Cfg::new(0, "main".to_string(), Address::abs(0));
        let h = basic(&mut cfg, 0x00, 1);
        let b = basic(&mut cfg, 0x20, 1);
        let x = basic(&mut cfg, 0x40, 1);
        cfg.add_edge(cfg.entry, h, EdgeKind::NotTaken);
        cfg.add_edge(h, b, EdgeKind::Taken);
        cfg.add_edge(b, h, EdgeKind::Taken);
        cfg.add_edge(h, x, EdgeKind::NotTaken);
        cfg.add_edge(x, cfg.exit, EdgeKind::NotTaken);
        let collection = CfgCollection::new(vec![cfg], 0);
        let loops_v = vec![loop_info::analyze(collection.get(0))];
        let mut facts = FlowFacts::new();
        facts.set_loop_bound(Address::abs(0x00), 10);

        use crate::cache::{CategorizedAccess};
        let mut cats = CacheCategories::default();
        cats.accesses.push(CategorizedAccess {
            block: b,
            index: 0,
            inst_address: Address::abs(0x20),
            set: 0,
            category: Category::Persistent { header: h },
        });

        let timer = MapBlockTimer::new(1);
        let mut system = System::new(true);
        let vars = assign_vars(&mut system, &collection, false);
        build_flow_constraints(&mut system, &collection, &vars);
        build_loop_constraints(&mut system, &collection, &loops_v, &facts, &vars).unwrap();
        let miss_terms = build_category_constraints(
            &mut system,
            &collection,
            0,
            &cats,
            &loops_v[0],
            &vars,
            10,
            "XMISS_ICACHE",
            false,
        );
        build_objective(&mut system, &collection, &timer, &vars, &miss_terms);
        let solution = SimplexSolver::default().solve(&system).unwrap();
        // Blocks: h 11 times, b 10 times, x once; one charged miss.
        assert!((solution.objective - (11.0 + 10.0 + 1.0 + 10.0)).abs() < 1e-6);
    }
}
