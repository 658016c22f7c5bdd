//! Branch Prediction Analysis
//!
//! Models the branch history table as a set-associative cache of branch
//! addresses: a conditional branch hits its BHT row when its entry was
//! retained since the last execution. Running the Must/May/Persistence
//! machinery over the rows yields, per conditional branch:
//!
//! - **Always-Correct**: the entry is certainly retained (Must), the
//!   predictor always has history for this branch.
//! - **Always-Mispredict**: the entry is certainly absent (May), every
//!   execution falls back to the default prediction and is charged.
//! - **First-Mispredict(L)**: the entry is retained within loop L after
//!   the first execution; at most one charged misprediction per entry of L.
//! - **Not-Classified**: none of the above.
//!
//! History-bit interaction is deliberately not modeled; Not-Classified
//! bounds the mispredict count by the branch execution count.

use crate::ai::FixpointMode;
use crate::cache::{self, Category, SetAccess, SetEffect, SetProblem};
use crate::cfg::loop_info::LoopInfo;
use crate::cfg::{BlockId, Cfg};
use crate::error::Result;
use crate::hard::Bht;
use crate::prog::workspace::CancelToken;
use crate::prog::Address;
use std::collections::HashMap;

/// Prediction category of one conditional branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prediction {
    AlwaysCorrect,
    AlwaysMispredict,
    /// Mispredicts at most once per entry into the loop headed at `header`
    FirstMispredict { header: BlockId },
    NotClassified,
}

/// One analyzed conditional branch.
#[derive(Debug, Clone)]
pub struct BranchPrediction {
    /// Block ending with the conditional branch
    pub block: BlockId,
    /// Address of the branch instruction
    pub inst_address: Address,
    /// BHT row indexed by the branch
    pub row: u32,
    pub prediction: Prediction,
}

/// Prediction table of one CFG.
#[derive(Debug, Clone, Default)]
pub struct BranchPredictions {
    pub branches: Vec<BranchPrediction>,
}

/// Run the BHT retention analysis over one CFG.
pub fn analyze(
    cfg: &Cfg,
    loops: &LoopInfo,
    bht: &Bht,
    mode: FixpointMode,
    cancel: &CancelToken,
) -> Result<BranchPredictions> {
    // Collect the conditional branches and their rows.
    struct Site {
        block: BlockId,
        address: Address,
        row: u32,
        entry: u32,
    }
    let mut sites: Vec<Site> = Vec::new();
    let mut row_entries: Vec<HashMap<Address, u32>> =
        vec![HashMap::new(); bht.row_count() as usize];
    for block in cfg.blocks.iter() {
        let last = match block.last_inst() {
            Some(i) => i,
            None => continue,
        };
        if !(last.is_branch() && last.is_cond()) {
            continue;
        }
        let row = bht.row_of(last.address);
        let entries = &mut row_entries[row as usize];
        let next = entries.len() as u32;
        let entry = *entries.entry(last.address).or_insert(next);
        sites.push(Site {
            block: block.id,
            address: last.address,
            row,
            entry,
        });
    }
    if sites.is_empty() {
        return Ok(BranchPredictions::default());
    }

    // Per-row problems: executing a branch touches its BHT entry.
    let assoc = bht.way_count().min(u8::MAX as u32) as u8;
    let mut rows: Vec<SetProblem> = (0..bht.row_count())
        .map(|r| {
            SetProblem::new(
                r,
                row_entries[r as usize].len() as u32,
                assoc,
                cfg.count(),
            )
        })
        .collect();
    for (i, site) in sites.iter().enumerate() {
        rows[site.row as usize].accesses[site.block as usize].push(SetAccess {
            access: i as u32,
            effect: SetEffect::Definite(site.entry),
        });
    }
    // Branches of un-inlined callees may evict any entry.
    for block in cfg.blocks.iter() {
        if block.is_synthetic() {
            for row in rows.iter_mut() {
                row.accesses[block.id as usize].push(SetAccess {
                    access: cache::CLOBBER_ACCESS,
                    effect: SetEffect::UnknownAll,
                });
            }
        }
    }

    let mut predictions: Vec<Option<Prediction>> = vec![None; sites.len()];
    for prob in rows.iter() {
        if prob.block_count == 0 {
            continue;
        }
        let fix = cache::solve_set(cfg, loops, prob, None, mode, cancel)?;
        let mut cats = Vec::new();
        cache::categorize_set(cfg, loops, prob, &fix, &mut cats);
        for (access, category) in cats {
            predictions[access as usize] = Some(match category {
                Category::AlwaysHit => Prediction::AlwaysCorrect,
                Category::AlwaysMiss => Prediction::AlwaysMispredict,
                Category::Persistent { header } => Prediction::FirstMispredict { header },
                Category::NotClassified => Prediction::NotClassified,
            });
        }
    }

    let mut result = BranchPredictions::default();
    for (site, prediction) in sites.iter().zip(predictions.iter()) {
        result.branches.push(BranchPrediction {
            block: site.block,
            inst_address: site.address,
            row: site.row,
            prediction: prediction.unwrap_or(Prediction::NotClassified),
        });
    }
    log::debug!(
        "branch prediction: {} conditional branches analyzed",
        result.branches.len()
    );
    Ok(result)
}
