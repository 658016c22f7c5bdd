//! Instruction Cache Categorization
//!
//! Runs the Must/May/Persistence fixpoints per cache set over the L-block
//! partition and attaches a category to every L-block fetch.

use crate::ai::FixpointMode;
use crate::cache::acs::Acs;
use crate::cache::{self, CacheCategories, CategorizedAccess, Category};
use crate::cfg::loop_info::LoopInfo;
use crate::cfg::Cfg;
use crate::error::Result;
use crate::hard::Cache;
use crate::icache::{build_lblocks, LBlockPartition};
use crate::prog::workspace::CancelToken;

/// Instruction-cache analysis over one CFG.
///
/// `warm` starts every set from an all-young cache instead of the cold empty
/// state (useful to model a pre-loaded scratch configuration).
pub fn analyze(
    cfg: &Cfg,
    loops: &LoopInfo,
    cache: &Cache,
    mode: FixpointMode,
    warm: bool,
    cancel: &CancelToken,
) -> Result<CacheCategories> {
    let partition = build_lblocks(cfg, cache);
    categorize_partition(cfg, loops, &partition, mode, warm, cancel)
}

/// Categorize a prebuilt L-block partition.
pub fn categorize_partition(
    cfg: &Cfg,
    loops: &LoopInfo,
    partition: &LBlockPartition,
    mode: FixpointMode,
    warm: bool,
    cancel: &CancelToken,
) -> Result<CacheCategories> {
    let mut categories: Vec<Option<Category>> = vec![None; partition.lblocks.len()];
    for prob in partition.sets.iter() {
        if prob.block_count == 0 {
            continue;
        }
        let entry = warm.then(|| Acs::all_zero(prob.block_count as usize, prob.assoc));
        let fix = cache::solve_set(cfg, loops, prob, entry.as_ref(), mode, cancel)?;
        let mut cats = Vec::new();
        cache::categorize_set(cfg, loops, prob, &fix, &mut cats);
        log::debug!(
            "icache set {}: {} tracked blocks, {} accesses categorized",
            prob.set,
            prob.block_count,
            cats.len()
        );
        for (access, category) in cats {
            categories[access as usize] = Some(category);
        }
    }

    let mut result = CacheCategories::default();
    for (lblock, category) in partition.lblocks.iter().zip(categories.iter()) {
        result.accesses.push(CategorizedAccess {
            block: lblock.block,
            index: lblock.index,
            inst_address: lblock.address,
            set: lblock.set,
            category: category.unwrap_or(Category::NotClassified),
        });
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::loop_info;
    use crate::cfg::{BlockKind, Cfg, EdgeKind};
    use crate::hard::{ReplacementPolicy, WritePolicy};
    use crate::prog::{Address, Inst, InstKind};

    fn cache_2way_2sets() -> Cache {
        Cache {
            block_bits: 4,
            row_bits: 1,
            way_bits: 1,
            replace: ReplacementPolicy::Lru,
            write: WritePolicy::WriteBack,
            allocate: true,
            miss_penalty: 10,
        }
    }

    fn basic(cfg: &mut Cfg, addrs: &[u32]) -> u32 {
        let insts = addrs
            .iter()
            .map(|a| Inst::new(Address::abs(*a), 4, InstKind::INT))
            .collect();
        cfg.add_block(BlockKind::Basic { insts })
    }

    /// The S4 shape: one L-block fetched inside a loop stays cached after
    /// the first iteration.
    #[test]
    fn test_loop_body_fetch_is_persistent() {
        let cache = cache_2way_2sets();
        let mut cfg = Cfg::new(0, "s4".to_string(), Address::abs(0));
        let h = basic(&mut cfg, &[0x00]);
        let b = basic(&mut cfg, &[0x20, 0x24]);
        let x = basic(&mut cfg, &[0x40]);
        cfg.add_edge(cfg.entry, h, EdgeKind::NotTaken);
        cfg.add_edge(h, b, EdgeKind::Taken);
        cfg.add_edge(b, h, EdgeKind::Taken);
        cfg.add_edge(h, x, EdgeKind::NotTaken);
        cfg.add_edge(x, cfg.exit, EdgeKind::NotTaken);
        let loops = loop_info::analyze(&cfg);
        let cancel = CancelToken::new();

        let cats = analyze(
            &cfg,
            &loops,
            &cache,
            FixpointMode::UnrollFirst,
            false,
            &cancel,
        )
        .unwrap();
        // One L-block per block here.
        assert_eq!(cats.accesses.len(), 3);
        let body_fetch = cats
            .accesses
            .iter()
            .find(|a| a.block == b)
            .expect("body access");
        assert_eq!(body_fetch.category, Category::Persistent { header: h });
        // The loop-header fetch is persistent as well.
        let header_fetch = cats.accesses.iter().find(|a| a.block == h).unwrap();
        assert_eq!(header_fetch.category, Category::Persistent { header: h });
    }

    #[test]
    fn test_straight_line_cold_misses() {
        let cache = cache_2way_2sets();
        let mut cfg = Cfg::new(0, "cold".to_string(), Address::abs(0));
        let a = basic(&mut cfg, &[0x00, 0x04]);
        cfg.add_edge(cfg.entry, a, EdgeKind::NotTaken);
        cfg.add_edge(a, cfg.exit, EdgeKind::NotTaken);
        let loops = loop_info::analyze(&cfg);
        let cancel = CancelToken::new();
        let cats = analyze(
            &cfg,
            &loops,
            &cache,
            FixpointMode::UnrollFirst,
            false,
            &cancel,
        )
        .unwrap();
        assert_eq!(cats.accesses.len(), 1);
        assert_eq!(cats.accesses[0].category, Category::AlwaysMiss);
    }

    #[test]
    fn test_warm_start_hits() {
        let cache = cache_2way_2sets();
        let mut cfg = Cfg::new(0, "warm".to_string(), Address::abs(0));
        let a = basic(&mut cfg, &[0x00]);
        cfg.add_edge(cfg.entry, a, EdgeKind::NotTaken);
        cfg.add_edge(a, cfg.exit, EdgeKind::NotTaken);
        let loops = loop_info::analyze(&cfg);
        let cancel = CancelToken::new();
        let cats = analyze(
            &cfg,
            &loops,
            &cache,
            FixpointMode::UnrollFirst,
            true,
            &cancel,
        )
        .unwrap();
        assert_eq!(cats.accesses[0].category, Category::AlwaysHit);
    }
}
