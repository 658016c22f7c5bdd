//! Workspace
//!
//! The root container of one analysis run: the instruction provider, the
//! platform description, the flow facts, and one typed side-table per
//! analysis result. Passes read their inputs from and write their outputs
//! into the workspace; the property lists of ad-hoc designs are replaced by
//! these statically typed slots.
//!
//! The workspace also carries the cooperative cancellation flag checked by
//! the AI driver between block visits and by the orchestrator between
//! passes.

use crate::ai::FixpointMode;
use crate::branch::BranchPredictions;
use crate::cache::CacheCategories;
use crate::cfg::loop_info::LoopInfo;
use crate::cfg::CfgCollection;
use crate::hard::Platform;
use crate::ilp::System;
use crate::ipet::WcetStats;
use crate::pipeline::Feature;
use crate::prog::flowfact::FlowFacts;
use crate::prog::{Address, InstructionProvider};
use crate::timing::{BlockTimer, TrivialBlockTimer};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// Monotonically-set cancellation flag.
///
/// The core is single-threaded; the atomic only exists so an external
/// controller may set the flag from a signal handler or watchdog thread.
#[derive(Debug, Default)]
pub struct CancelToken(AtomicBool);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(AtomicBool::new(false))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Knobs shared by the standard passes.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Name ILP variables readably (slower, better reports)
    pub explicit_names: bool,
    /// Loop-header fixpoint strategy for the abstract interpretations
    pub mode: FixpointMode,
    /// Inline calls before the cache and branch analyses
    pub virtualize: bool,
    /// Model warmed caches instead of cold ones
    pub warm_caches: bool,
    /// Remove dead-ends silently instead of failing
    pub force_normalize: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            explicit_names: false,
            mode: FixpointMode::UnrollFirst,
            virtualize: true,
            warm_caches: false,
            force_normalize: false,
        }
    }
}

/// The analysis workspace. Owns everything a run produces.
pub struct Workspace {
    pub provider: Box<dyn InstructionProvider>,
    pub platform: Platform,
    pub flow_facts: FlowFacts,
    pub config: AnalysisConfig,
    pub timer: Box<dyn BlockTimer>,
    /// Task entry points: (label, address); the first is the task entry
    pub entries: Vec<(String, Address)>,

    // Typed per-analysis side tables.
    pub cfgs: Option<CfgCollection>,
    /// Loop information per CFG, parallel to the collection
    pub loops: Option<Vec<LoopInfo>>,
    /// Instruction-cache categories per CFG
    pub icache_categories: Option<Vec<CacheCategories>>,
    /// Data-cache categories per CFG
    pub dcache_categories: Option<Vec<CacheCategories>>,
    /// Branch predictions per CFG
    pub branch_predictions: Option<Vec<BranchPredictions>>,
    pub system: Option<System>,
    pub wcet: Option<WcetStats>,

    /// Set when a pass failed; partial results are not trustworthy
    pub failed: bool,
    cancel: CancelToken,
    provided: BTreeSet<Feature>,
}

impl Workspace {
    pub fn new(provider: Box<dyn InstructionProvider>, platform: Platform) -> Self {
        Workspace {
            provider,
            platform,
            flow_facts: FlowFacts::new(),
            config: AnalysisConfig::default(),
            timer: Box::new(TrivialBlockTimer::default()),
            entries: Vec::new(),
            cfgs: None,
            loops: None,
            icache_categories: None,
            dcache_categories: None,
            branch_predictions: None,
            system: None,
            wcet: None,
            failed: false,
            cancel: CancelToken::new(),
            provided: BTreeSet::new(),
        }
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.set();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_set()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn provide(&mut self, feature: Feature) {
        self.provided.insert(feature);
    }

    pub fn has(&self, feature: Feature) -> bool {
        self.provided.contains(&feature)
    }

    /// Drop a feature and free the artifacts it guards.
    pub fn invalidate(&mut self, feature: Feature) {
        self.provided.remove(&feature);
        match feature {
            Feature::CollectedCfgs => {
                self.cfgs = None;
                self.loops = None;
            }
            Feature::LoopInfo => self.loops = None,
            Feature::IcacheCategories => self.icache_categories = None,
            Feature::DcacheCategories => self.dcache_categories = None,
            Feature::BranchPredictions => self.branch_predictions = None,
            Feature::WcetComputed => {
                self.system = None;
                self.wcet = None;
            }
            Feature::Normalized
            | Feature::Expanded
            | Feature::Virtualized
            | Feature::CfgChecked => {}
        }
    }
}
