//! Analysis Pipeline
//!
//! Passes declare the features they require, provide and invalidate; the
//! orchestrator runs them in dependency order over one workspace, checking
//! the cancellation flag between passes. A failing pass marks the workspace
//! failed and surfaces its error unchanged.
//!
//! # Standard WCET Pipeline
//! 1. **CFG collection**: discover the CFGs from the task entry
//! 2. **Normalization**: drop dead-end blocks
//! 3. **Architecture expansion**: delay slots, predicated instructions
//! 4. **Virtualization**: inline calls (configurable)
//! 5. **Loop info**: dominance, headers, back edges
//! 6. **CFG check**: structural invariants
//! 7. **Instruction/data cache analyses**: per-access categories
//! 8. **Branch prediction analysis**: per-branch categories
//! 9. **WCET computation**: IPET construction and solving

use crate::cfg::{builder, loop_info, transform};
use crate::error::{AnalysisError, Result};
use crate::ilp::simplex::SimplexSolver;
use crate::ilp::{Solver, System};
use crate::ipet;
use crate::prog::workspace::Workspace;
use crate::{branch, dcache, icache};
use bitvec::prelude::*;

/// Features passes exchange through the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Feature {
    CollectedCfgs,
    Normalized,
    Expanded,
    Virtualized,
    LoopInfo,
    CfgChecked,
    IcacheCategories,
    DcacheCategories,
    BranchPredictions,
    WcetComputed,
}

impl Feature {
    pub fn name(&self) -> &'static str {
        match self {
            Feature::CollectedCfgs => "collected-cfgs",
            Feature::Normalized => "normalized",
            Feature::Expanded => "arch-expanded",
            Feature::Virtualized => "virtualized",
            Feature::LoopInfo => "loop-info",
            Feature::CfgChecked => "cfg-checked",
            Feature::IcacheCategories => "icache-categories",
            Feature::DcacheCategories => "dcache-categories",
            Feature::BranchPredictions => "branch-predictions",
            Feature::WcetComputed => "wcet-computed",
        }
    }
}

/// One analysis pass.
pub trait Pass {
    fn name(&self) -> &'static str;

    /// Hard prerequisites: the pass cannot run without them.
    fn required(&self) -> &'static [Feature] {
        &[]
    }

    fn provided(&self) -> &'static [Feature];

    /// Soft inputs: consumed when present, so any pass providing one runs
    /// first, but their absence does not block this pass.
    fn used(&self) -> &'static [Feature] {
        &[]
    }

    fn invalidated(&self) -> &'static [Feature] {
        &[]
    }

    fn run(&mut self, ws: &mut Workspace) -> Result<()>;
}

/// Pass orchestrator.
#[derive(Default)]
pub struct Pipeline {
    passes: Vec<Box<dyn Pass>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline { passes: Vec::new() }
    }

    pub fn push(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    /// The standard WCET pipeline.
    pub fn standard() -> Pipeline {
        let mut pipeline = Pipeline::new();
        pipeline.push(Box::new(CfgCollectorPass));
        pipeline.push(Box::new(NormalizerPass));
        pipeline.push(Box::new(ArchExpansionPass));
        pipeline.push(Box::new(VirtualizerPass));
        pipeline.push(Box::new(LoopInfoPass));
        pipeline.push(Box::new(CfgCheckerPass));
        pipeline.push(Box::new(IcacheAnalysisPass));
        pipeline.push(Box::new(DcacheAnalysisPass));
        pipeline.push(Box::new(BranchAnalysisPass));
        pipeline.push(Box::new(WcetComputationPass));
        pipeline
    }

    /// Run the passes in declared-dependency order.
    ///
    /// Declaration order breaks ties; a pass whose requirements can never be
    /// met aborts the run with `MissingFeature`. A pass waits for its `used`
    /// features only while another pending pass still provides them.
    pub fn run(&mut self, ws: &mut Workspace) -> Result<()> {
        let n = self.passes.len();
        let mut done = vec![false; n];
        for _ in 0..n {
            if ws.is_cancelled() {
                ws.failed = true;
                return Err(AnalysisError::Cancelled);
            }
            let pending_provides = |f: Feature, done: &[bool]| {
                (0..n).any(|j| !done[j] && self.passes[j].provided().contains(&f))
            };
            let next = (0..n).find(|&i| {
                !done[i]
                    && self.passes[i].required().iter().all(|f| ws.has(*f))
                    && self.passes[i]
                        .used()
                        .iter()
                        .all(|f| ws.has(*f) || !pending_provides(*f, &done))
            });
            let i = match next {
                Some(i) => i,
                None => {
                    let stuck = (0..n).find(|&i| !done[i]).unwrap();
                    let missing = self.passes[stuck]
                        .required()
                        .iter()
                        .chain(self.passes[stuck].used().iter())
                        .find(|f| !ws.has(**f))
                        .map(|f| f.name())
                        .unwrap_or("unknown");
                    ws.failed = true;
                    return Err(AnalysisError::MissingFeature {
                        pass: self.passes[stuck].name(),
                        feature: missing,
                    });
                }
            };
            log::info!("running pass {}", self.passes[i].name());
            if let Err(e) = self.passes[i].run(ws) {
                ws.failed = true;
                log::warn!("pass {} failed: {}", self.passes[i].name(), e);
                return Err(e);
            }
            for f in self.passes[i].invalidated() {
                ws.invalidate(*f);
            }
            for f in self.passes[i].provided() {
                ws.provide(*f);
            }
            done[i] = true;
        }
        Ok(())
    }
}

/// Run the standard pipeline and return the WCET estimate in cycles.
pub fn compute_wcet(ws: &mut Workspace) -> Result<u64> {
    Pipeline::standard().run(ws)?;
    Ok(ws.wcet.as_ref().map(|w| w.wcet).unwrap_or(0))
}

/// Missing-feature error for a pass that found its input slot empty.
fn missing(pass: &'static str, feature: Feature) -> AnalysisError {
    AnalysisError::MissingFeature {
        pass,
        feature: feature.name(),
    }
}

fn take_cfgs(ws: &mut Workspace, pass: &'static str) -> Result<crate::cfg::CfgCollection> {
    ws.cfgs
        .take()
        .ok_or(missing(pass, Feature::CollectedCfgs))
}

/// Discovers the CFG collection from the task entries.
pub struct CfgCollectorPass;

impl Pass for CfgCollectorPass {
    fn name(&self) -> &'static str {
        "cfg-collector"
    }

    fn provided(&self) -> &'static [Feature] {
        &[Feature::CollectedCfgs]
    }

    fn run(&mut self, ws: &mut Workspace) -> Result<()> {
        if ws.entries.is_empty() {
            return Err(AnalysisError::Cfg("no task entry declared".to_string()));
        }
        let collection = builder::build_collection(&*ws.provider, &ws.flow_facts, &ws.entries)?;
        log::info!(
            "collected {} CFGs, {} blocks",
            collection.count(),
            collection.total_blocks
        );
        ws.cfgs = Some(collection);
        Ok(())
    }
}

/// Removes blocks that are not co-reachable to the exit.
pub struct NormalizerPass;

impl Pass for NormalizerPass {
    fn name(&self) -> &'static str {
        "cfg-normalizer"
    }

    fn required(&self) -> &'static [Feature] {
        &[Feature::CollectedCfgs]
    }

    fn provided(&self) -> &'static [Feature] {
        &[Feature::Normalized]
    }

    fn invalidated(&self) -> &'static [Feature] {
        &[Feature::LoopInfo]
    }

    fn run(&mut self, ws: &mut Workspace) -> Result<()> {
        let collection = take_cfgs(ws, self.name())?;
        let force = ws.config.force_normalize;
        let mut cfgs = Vec::with_capacity(collection.count());
        for cfg in collection.iter() {
            cfgs.push(transform::normalize(cfg, force)?);
        }
        transform::rebuild_callers(&mut cfgs);
        ws.cfgs = Some(crate::cfg::CfgCollection::new(cfgs, collection.entry));
        Ok(())
    }
}

/// Rewrites delay slots and predicated instructions into explicit control
/// flow, as demanded by the processor description.
pub struct ArchExpansionPass;

impl Pass for ArchExpansionPass {
    fn name(&self) -> &'static str {
        "arch-expansion"
    }

    fn required(&self) -> &'static [Feature] {
        &[Feature::CollectedCfgs]
    }

    fn provided(&self) -> &'static [Feature] {
        &[Feature::Expanded]
    }

    fn invalidated(&self) -> &'static [Feature] {
        &[Feature::LoopInfo]
    }

    fn run(&mut self, ws: &mut Workspace) -> Result<()> {
        let slots = ws.platform.processor.delay_slots;
        let collection = take_cfgs(ws, self.name())?;
        let mut cfgs = Vec::with_capacity(collection.count());
        for cfg in collection.iter() {
            let expanded = transform::expand_delay_slots(cfg, slots)?;
            cfgs.push(transform::expand_conditional_instructions(&expanded)?);
        }
        transform::rebuild_callers(&mut cfgs);
        ws.cfgs = Some(crate::cfg::CfgCollection::new(cfgs, collection.entry));
        Ok(())
    }
}

/// Inlines calls by duplication when the configuration asks for it.
pub struct VirtualizerPass;

impl Pass for VirtualizerPass {
    fn name(&self) -> &'static str {
        "cfg-virtualizer"
    }

    fn required(&self) -> &'static [Feature] {
        &[Feature::CollectedCfgs]
    }

    fn provided(&self) -> &'static [Feature] {
        &[Feature::Virtualized]
    }

    fn invalidated(&self) -> &'static [Feature] {
        &[Feature::LoopInfo]
    }

    fn run(&mut self, ws: &mut Workspace) -> Result<()> {
        if !ws.config.virtualize {
            log::debug!("virtualization disabled by configuration");
            return Ok(());
        }
        let collection = take_cfgs(ws, self.name())?;
        let virtualized = transform::virtualize(&collection)?;
        log::info!(
            "virtualized {} CFGs into {} ({} blocks)",
            collection.count(),
            virtualized.count(),
            virtualized.total_blocks
        );
        ws.cfgs = Some(virtualized);
        Ok(())
    }
}

/// Computes dominance and loop information per CFG.
pub struct LoopInfoPass;

impl Pass for LoopInfoPass {
    fn name(&self) -> &'static str {
        "loop-info"
    }

    fn required(&self) -> &'static [Feature] {
        &[Feature::CollectedCfgs]
    }

    fn provided(&self) -> &'static [Feature] {
        &[Feature::LoopInfo]
    }

    fn run(&mut self, ws: &mut Workspace) -> Result<()> {
        let collection = ws
            .cfgs
            .as_ref()
            .ok_or(missing(self.name(), Feature::CollectedCfgs))?;
        let loops: Vec<_> = collection.iter().map(loop_info::analyze).collect();
        ws.loops = Some(loops);
        Ok(())
    }
}

/// Verifies the structural CFG invariants.
pub struct CfgCheckerPass;

impl Pass for CfgCheckerPass {
    fn name(&self) -> &'static str {
        "cfg-checker"
    }

    fn required(&self) -> &'static [Feature] {
        &[Feature::CollectedCfgs, Feature::Normalized]
    }

    fn provided(&self) -> &'static [Feature] {
        &[Feature::CfgChecked]
    }

    fn run(&mut self, ws: &mut Workspace) -> Result<()> {
        let collection = ws
            .cfgs
            .as_ref()
            .ok_or(missing(self.name(), Feature::CollectedCfgs))?;
        for cfg in collection.iter() {
            let n = cfg.count();
            let mut reach: BitVec<u32> = bitvec![u32, Lsb0; 0; n];
            let mut stack = vec![cfg.entry];
            while let Some(b) = stack.pop() {
                if reach[b as usize] {
                    continue;
                }
                reach.set(b as usize, true);
                for s in cfg.succs(b) {
                    stack.push(s);
                }
            }
            let mut coreach: BitVec<u32> = bitvec![u32, Lsb0; 0; n];
            let mut stack = vec![cfg.exit];
            while let Some(b) = stack.pop() {
                if coreach[b as usize] {
                    continue;
                }
                coreach.set(b as usize, true);
                for p in cfg.preds(b) {
                    stack.push(p);
                }
            }
            for block in cfg.blocks.iter() {
                if !reach[block.id as usize] || !coreach[block.id as usize] {
                    return Err(AnalysisError::Cfg(format!(
                        "CFG {}: block {} violates reachability",
                        cfg.label, block.id
                    )));
                }
                if !block.is_entry() && block.ins.is_empty() {
                    return Err(AnalysisError::Cfg(format!(
                        "CFG {}: block {} has no in-edge",
                        cfg.label, block.id
                    )));
                }
                if !block.is_exit() && block.outs.is_empty() {
                    return Err(AnalysisError::Cfg(format!(
                        "CFG {}: block {} has no out-edge",
                        cfg.label, block.id
                    )));
                }
            }
        }
        // Every block of the collection should be on some interprocedural
        // path from the task entry.
        let visited = collection.inter_blocks().count() as u32;
        if visited < collection.total_blocks {
            log::warn!(
                "{} blocks are unreachable from the task entry",
                collection.total_blocks - visited
            );
        }
        Ok(())
    }
}

/// Instruction-cache categorization (skipped without an instruction cache).
pub struct IcacheAnalysisPass;

impl Pass for IcacheAnalysisPass {
    fn name(&self) -> &'static str {
        "icache-analysis"
    }

    fn required(&self) -> &'static [Feature] {
        &[Feature::LoopInfo]
    }

    fn used(&self) -> &'static [Feature] {
        &[Feature::Virtualized]
    }

    fn provided(&self) -> &'static [Feature] {
        &[Feature::IcacheCategories]
    }

    fn run(&mut self, ws: &mut Workspace) -> Result<()> {
        let cache = match &ws.platform.caches.inst {
            Some(c) => c.clone(),
            None => {
                log::debug!("no instruction cache configured");
                return Ok(());
            }
        };
        let collection = ws
            .cfgs
            .as_ref()
            .ok_or(missing(self.name(), Feature::CollectedCfgs))?;
        let loops = ws
            .loops
            .as_ref()
            .ok_or(missing(self.name(), Feature::LoopInfo))?;
        let mut tables = Vec::with_capacity(collection.count());
        for cfg in collection.iter() {
            tables.push(icache::category::analyze(
                cfg,
                &loops[cfg.id as usize],
                &cache,
                ws.config.mode,
                ws.config.warm_caches,
                ws.cancel_token(),
            )?);
        }
        ws.icache_categories = Some(tables);
        Ok(())
    }
}

/// Data-cache categorization (skipped without a data cache).
pub struct DcacheAnalysisPass;

impl Pass for DcacheAnalysisPass {
    fn name(&self) -> &'static str {
        "dcache-analysis"
    }

    fn required(&self) -> &'static [Feature] {
        &[Feature::LoopInfo]
    }

    fn used(&self) -> &'static [Feature] {
        &[Feature::Virtualized]
    }

    fn provided(&self) -> &'static [Feature] {
        &[Feature::DcacheCategories]
    }

    fn run(&mut self, ws: &mut Workspace) -> Result<()> {
        let cache = match &ws.platform.caches.data {
            Some(c) => c.clone(),
            None => {
                log::debug!("no data cache configured");
                return Ok(());
            }
        };
        let collection = ws
            .cfgs
            .as_ref()
            .ok_or(missing(self.name(), Feature::CollectedCfgs))?;
        let loops = ws
            .loops
            .as_ref()
            .ok_or(missing(self.name(), Feature::LoopInfo))?;
        let sp_reg = ws.platform.processor.sp_reg;
        let initial_sp = ws.provider.initial_sp();
        let mut tables = Vec::with_capacity(collection.count());
        for cfg in collection.iter() {
            let info = &loops[cfg.id as usize];
            let addresses =
                dcache::StackAnalysis::run(cfg, info, sp_reg, ws.cancel_token())?;
            let partition = dcache::build_accesses(
                cfg,
                &cache,
                &ws.platform.memory,
                initial_sp,
                &addresses,
            );
            tables.push(dcache::category::categorize_partition(
                cfg,
                info,
                &partition,
                ws.config.mode,
                ws.config.warm_caches,
                ws.cancel_token(),
            )?);
        }
        ws.dcache_categories = Some(tables);
        Ok(())
    }
}

/// Branch-prediction categorization (skipped without a BHT).
pub struct BranchAnalysisPass;

impl Pass for BranchAnalysisPass {
    fn name(&self) -> &'static str {
        "branch-analysis"
    }

    fn required(&self) -> &'static [Feature] {
        &[Feature::LoopInfo]
    }

    fn used(&self) -> &'static [Feature] {
        &[Feature::Virtualized]
    }

    fn provided(&self) -> &'static [Feature] {
        &[Feature::BranchPredictions]
    }

    fn run(&mut self, ws: &mut Workspace) -> Result<()> {
        let bht = match &ws.platform.bht {
            Some(b) => b.clone(),
            None => {
                log::debug!("no BHT configured");
                return Ok(());
            }
        };
        let collection = ws
            .cfgs
            .as_ref()
            .ok_or(missing(self.name(), Feature::CollectedCfgs))?;
        let loops = ws
            .loops
            .as_ref()
            .ok_or(missing(self.name(), Feature::LoopInfo))?;
        let mut tables = Vec::with_capacity(collection.count());
        for cfg in collection.iter() {
            tables.push(branch::analyze(
                cfg,
                &loops[cfg.id as usize],
                &bht,
                ws.config.mode,
                ws.cancel_token(),
            )?);
        }
        ws.branch_predictions = Some(tables);
        Ok(())
    }
}

/// IPET construction and solving.
pub struct WcetComputationPass;

impl Pass for WcetComputationPass {
    fn name(&self) -> &'static str {
        "wcet-computation"
    }

    fn required(&self) -> &'static [Feature] {
        &[Feature::LoopInfo]
    }

    fn used(&self) -> &'static [Feature] {
        &[
            Feature::IcacheCategories,
            Feature::DcacheCategories,
            Feature::BranchPredictions,
        ]
    }

    fn provided(&self) -> &'static [Feature] {
        &[Feature::WcetComputed]
    }

    fn run(&mut self, ws: &mut Workspace) -> Result<()> {
        let collection = ws
            .cfgs
            .as_ref()
            .ok_or(missing(self.name(), Feature::CollectedCfgs))?;
        let loops = ws
            .loops
            .as_ref()
            .ok_or(missing(self.name(), Feature::LoopInfo))?;
        let explicit = ws.config.explicit_names;

        let mut system = System::new(true);
        let vars = ipet::assign_vars(&mut system, collection, explicit);
        ipet::build_flow_constraints(&mut system, collection, &vars);
        ipet::build_call_constraints(&mut system, collection, &vars);
        ipet::build_loop_constraints(&mut system, collection, loops, &ws.flow_facts, &vars)?;

        let mut cache_terms = Vec::new();
        if let (Some(tables), Some(cache)) =
            (&ws.icache_categories, &ws.platform.caches.inst)
        {
            for (cfg_id, cats) in tables.iter().enumerate() {
                cache_terms.extend(ipet::build_category_constraints(
                    &mut system,
                    collection,
                    cfg_id as u32,
                    cats,
                    &loops[cfg_id],
                    &vars,
                    cache.miss_penalty,
                    "XMISS_ICACHE",
                    explicit,
                ));
            }
        }
        if let (Some(tables), Some(cache)) =
            (&ws.dcache_categories, &ws.platform.caches.data)
        {
            for (cfg_id, cats) in tables.iter().enumerate() {
                cache_terms.extend(ipet::build_category_constraints(
                    &mut system,
                    collection,
                    cfg_id as u32,
                    cats,
                    &loops[cfg_id],
                    &vars,
                    cache.miss_penalty,
                    "XMISS_DATA",
                    explicit,
                ));
            }
        }
        let mut branch_terms = Vec::new();
        if let (Some(tables), Some(bht)) = (&ws.branch_predictions, &ws.platform.bht) {
            for (cfg_id, preds) in tables.iter().enumerate() {
                branch_terms.extend(ipet::build_branch_constraints(
                    &mut system,
                    collection,
                    cfg_id as u32,
                    preds,
                    &loops[cfg_id],
                    &vars,
                    bht.cond_penalty,
                    explicit,
                ));
            }
        }

        let mut miss_terms = cache_terms.clone();
        miss_terms.extend(branch_terms.iter().copied());
        ipet::build_objective(&mut system, collection, &*ws.timer, &vars, &miss_terms);

        log::info!(
            "ILP system: {} variables, {} constraints",
            system.count_vars(),
            system.count_constraints()
        );
        let solution = SimplexSolver::default().solve(&system)?;
        let stats = ipet::extract_stats(
            collection,
            &*ws.timer,
            &vars,
            &solution,
            &cache_terms,
            &branch_terms,
        );
        log::info!("WCET estimate: {} cycles", stats.wcet);
        ws.system = Some(system);
        ws.wcet = Some(stats);
        Ok(())
    }
}
