//! Cache Analysis Machinery
//!
//! Shared between the instruction-cache and data-cache analyses: the
//! per-set access model, the Must+Persistence and May abstract domains
//! driven by the AI fixpoint, and the categorization walker producing
//! Always-Hit / Always-Miss / Persistent / Not-Classified per access.
//!
//! Both cache analyses reduce their accesses to per-set effect lists before
//! running the domains, so the fixpoint code is written once. A synthetic
//! call block that survives into an analysis (recursion, or virtualization
//! disabled) carries an effect-only clobber, since its callee may touch
//! anything.

pub mod acs;

use crate::ai::{self, AiResult, Domain, FixpointMode};
use crate::cache::acs::{Acs, PersAcs};
use crate::cfg::loop_info::LoopInfo;
use crate::cfg::{Block, BlockId, Cfg};
use crate::error::Result;
use crate::prog::workspace::CancelToken;
use crate::prog::Address;

/// Effect of one memory access on one cache set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetEffect {
    /// Access to a known tracked cache block (per-set block id)
    Definite(u32),
    /// Access somewhere in this set; the listed tracked blocks are the
    /// candidates that may be loaded (range accesses)
    Unknown(Vec<u32>),
    /// Access that may touch anything anywhere (fully unknown address)
    UnknownAll,
}

/// Access id of effect-only entries that never get categorized: a synthetic
/// call block whose un-inlined callee may touch anything.
pub const CLOBBER_ACCESS: u32 = u32::MAX;

/// One access of a basic block, in program order.
#[derive(Debug, Clone)]
pub struct SetAccess {
    /// Index of the access in the analysis' flat access list, or
    /// `CLOBBER_ACCESS` for effect-only entries
    pub access: u32,
    pub effect: SetEffect,
}

/// Per-set analysis problem: the tracked blocks and the per-block access
/// sequences of one cache set.
#[derive(Debug, Clone)]
pub struct SetProblem {
    pub set: u32,
    /// Number of tracked cache blocks in this set
    pub block_count: u32,
    pub assoc: u8,
    /// Access sequence per CFG block id
    pub accesses: Vec<Vec<SetAccess>>,
}

impl SetProblem {
    pub fn new(set: u32, block_count: u32, assoc: u8, cfg_blocks: usize) -> Self {
        SetProblem {
            set,
            block_count,
            assoc,
            accesses: vec![Vec::new(); cfg_blocks],
        }
    }
}

/// Product value of the Must and Persistence analyses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MustPers {
    pub must: Acs,
    pub pers: PersAcs,
}

/// Must + Persistence domain over one cache set.
pub struct MustPersDomain<'a> {
    pub prob: &'a SetProblem,
    /// Optional warmed entry state (defaults to an empty cache)
    pub entry_acs: Option<Acs>,
}

impl<'a> Domain for MustPersDomain<'a> {
    type Value = MustPers;

    fn bottom(&self) -> MustPers {
        MustPers {
            must: Acs::all_zero(self.prob.block_count as usize, self.prob.assoc),
            pers: PersAcs::bottom(),
        }
    }

    fn entry(&self) -> MustPers {
        MustPers {
            must: self
                .entry_acs
                .clone()
                .unwrap_or_else(|| {
                    Acs::all_absent(self.prob.block_count as usize, self.prob.assoc)
                }),
            pers: PersAcs::entry(),
        }
    }

    fn join(&self, into: &mut MustPers, other: &MustPers) {
        into.must.join_max(&other.must);
        into.pers.join(&other.pers);
    }

    fn equals(&self, a: &MustPers, b: &MustPers) -> bool {
        a == b
    }

    fn update(&mut self, _cfg: &Cfg, block: &Block, input: &MustPers) -> MustPers {
        let mut out = input.clone();
        for access in self.prob.accesses[block.id as usize].iter() {
            apply_must_pers(&mut out, &access.effect);
        }
        out
    }

    fn enter_context(&mut self, value: &mut MustPers, _header: BlockId) {
        value
            .pers
            .push_level(self.prob.block_count as usize, self.prob.assoc);
    }

    fn leave_context(&mut self, value: &mut MustPers, _header: BlockId) {
        value.pers.pop_level();
    }

    fn widen(&self, value: &mut MustPers) {
        // Coarsening to the Must top loses precision but never soundness.
        value.must.set_all_absent();
        value.pers.set_all_absent();
    }
}

fn apply_must_pers(state: &mut MustPers, effect: &SetEffect) {
    match effect {
        SetEffect::Definite(block) => {
            state.pers.inject(&state.must, *block);
            state.must.inject_must(*block);
        }
        SetEffect::Unknown(_) => {
            state.must.age_all();
            state.pers.age_all();
        }
        SetEffect::UnknownAll => {
            state.must.set_all_absent();
            state.pers.set_all_absent();
        }
    }
}

/// May domain over one cache set.
pub struct MayDomain<'a> {
    pub prob: &'a SetProblem,
    pub entry_acs: Option<Acs>,
}

impl<'a> Domain for MayDomain<'a> {
    type Value = Acs;

    fn bottom(&self) -> Acs {
        Acs::all_absent(self.prob.block_count as usize, self.prob.assoc)
    }

    fn entry(&self) -> Acs {
        self.entry_acs
            .clone()
            .unwrap_or_else(|| Acs::all_absent(self.prob.block_count as usize, self.prob.assoc))
    }

    fn join(&self, into: &mut Acs, other: &Acs) {
        into.join_min(other);
    }

    fn equals(&self, a: &Acs, b: &Acs) -> bool {
        a == b
    }

    fn update(&mut self, _cfg: &Cfg, block: &Block, input: &Acs) -> Acs {
        let mut out = input.clone();
        for access in self.prob.accesses[block.id as usize].iter() {
            apply_may(&mut out, &access.effect);
        }
        out
    }

    fn widen(&self, value: &mut Acs) {
        value.set_all_zero();
    }
}

fn apply_may(state: &mut Acs, effect: &SetEffect) {
    match effect {
        SetEffect::Definite(block) => state.inject_may(*block),
        SetEffect::Unknown(candidates) => state.refresh(candidates),
        SetEffect::UnknownAll => state.set_all_zero(),
    }
}

/// Access categorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    AlwaysHit,
    AlwaysMiss,
    /// Misses at most once per entry into the loop headed at `header`
    Persistent { header: BlockId },
    NotClassified,
}

/// One categorized access (instruction cache fetch or data access).
#[derive(Debug, Clone)]
pub struct CategorizedAccess {
    /// CFG block containing the access
    pub block: BlockId,
    /// Position among the block's accesses of this analysis
    pub index: u32,
    /// Address of the accessing (or fetched) instruction
    pub inst_address: Address,
    pub set: u32,
    pub category: Category,
}

/// Categorization table of one cache analysis over one CFG.
#[derive(Debug, Clone, Default)]
pub struct CacheCategories {
    pub accesses: Vec<CategorizedAccess>,
}

impl CacheCategories {
    pub fn count_of(&self, category: Category) -> usize {
        self.accesses
            .iter()
            .filter(|a| a.category == category)
            .count()
    }
}

/// Fixpoint results of one set: Must+Pers and May at every block entry.
pub struct SetFixpoint {
    pub must_pers: AiResult<MustPers>,
    pub may: AiResult<Acs>,
}

/// Run both fixpoints for one set.
pub fn solve_set(
    cfg: &Cfg,
    loops: &LoopInfo,
    prob: &SetProblem,
    entry_acs: Option<&Acs>,
    mode: FixpointMode,
    cancel: &CancelToken,
) -> Result<SetFixpoint> {
    let mut must_pers = MustPersDomain {
        prob,
        entry_acs: entry_acs.cloned(),
    };
    let mp = ai::solve(cfg, loops, &mut must_pers, mode, cancel)?;
    let mut may = MayDomain {
        prob,
        entry_acs: entry_acs.cloned(),
    };
    let m = ai::solve(cfg, loops, &mut may, mode, cancel)?;
    Ok(SetFixpoint {
        must_pers: mp,
        may: m,
    })
}

/// Categorize every access of one set against the fixpoint states.
///
/// Each access is judged against the state right before it (the block input
/// with the block's earlier accesses replayed), then applied. Unknown
/// accesses cannot be certified and stay Not-Classified.
///
/// The qualifying persistence level is the outermost one whose furthest age
/// stays below the associativity; its header comes from the block's loop
/// nesting chain, which is aligned with the level stack by construction.
pub fn categorize_set(
    cfg: &Cfg,
    loops: &LoopInfo,
    prob: &SetProblem,
    fix: &SetFixpoint,
    out: &mut Vec<(u32, Category)>,
) {
    for block in cfg.blocks.iter() {
        let accesses = &prob.accesses[block.id as usize];
        if accesses.is_empty() {
            continue;
        }
        let mut mp = fix.must_pers.input[block.id as usize].clone();
        let mut may = fix.may.input[block.id as usize].clone();
        let chain = loops.nesting_chain(block.id);
        for access in accesses.iter() {
            if access.access == CLOBBER_ACCESS {
                apply_must_pers(&mut mp, &access.effect);
                apply_may(&mut may, &access.effect);
                continue;
            }
            let category = match &access.effect {
                SetEffect::Definite(b) => {
                    if mp.must.contains(*b) {
                        Category::AlwaysHit
                    } else if !may.contains(*b) {
                        Category::AlwaysMiss
                    } else if let Some(level) = mp
                        .pers
                        .levels
                        .iter()
                        .position(|l| l.age(*b) < l.assoc())
                    {
                        match chain.get(level) {
                            Some(header) => Category::Persistent { header: *header },
                            None => Category::NotClassified,
                        }
                    } else {
                        Category::NotClassified
                    }
                }
                SetEffect::Unknown(_) | SetEffect::UnknownAll => Category::NotClassified,
            };
            out.push((access.access, category));
            apply_must_pers(&mut mp, &access.effect);
            apply_may(&mut may, &access.effect);
        }
    }
}
