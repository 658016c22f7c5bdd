//! Data Cache Categorization
//!
//! Runs the Must/May/Persistence fixpoints per cache set over the block
//! accesses and attaches a category to every data access.

use crate::ai::FixpointMode;
use crate::cache::acs::Acs;
use crate::cache::{self, CacheCategories, CategorizedAccess, Category};
use crate::cfg::loop_info::LoopInfo;
use crate::cfg::Cfg;
use crate::dcache::{DataAccessKind, DataAccessPartition};
use crate::error::Result;
use crate::prog::workspace::CancelToken;

/// Categorize a prebuilt data-access partition.
pub fn categorize_partition(
    cfg: &Cfg,
    loops: &LoopInfo,
    partition: &DataAccessPartition,
    mode: FixpointMode,
    warm: bool,
    cancel: &CancelToken,
) -> Result<CacheCategories> {
    let mut categories: Vec<Option<Category>> = vec![None; partition.accesses.len()];
    for prob in partition.sets.iter() {
        if prob.block_count == 0 && prob.accesses.iter().all(|a| a.is_empty()) {
            continue;
        }
        let entry = warm.then(|| Acs::all_zero(prob.block_count as usize, prob.assoc));
        let fix = cache::solve_set(cfg, loops, prob, entry.as_ref(), mode, cancel)?;
        let mut cats = Vec::new();
        cache::categorize_set(cfg, loops, prob, &fix, &mut cats);
        log::debug!(
            "dcache set {}: {} tracked blocks, {} accesses categorized",
            prob.set,
            prob.block_count,
            cats.len()
        );
        for (access, category) in cats {
            // Multi-set accesses (ranges, unknowns) appear once per touched
            // set; all of them are Not-Classified by construction.
            let slot = &mut categories[access as usize];
            *slot = match slot.take() {
                None => Some(category),
                Some(prev) if prev == category => Some(prev),
                Some(_) => Some(Category::NotClassified),
            };
        }
    }

    let mut result = CacheCategories::default();
    for (access, category) in partition.accesses.iter().zip(categories.iter()) {
        let set = match &access.kind {
            DataAccessKind::Exact { set, .. } => *set,
            _ => 0,
        };
        result.accesses.push(CategorizedAccess {
            block: access.block,
            index: access.index,
            inst_address: access.inst_address,
            set,
            category: category.unwrap_or(Category::NotClassified),
        });
    }
    Ok(result)
}
