//! Instruction Cache Analysis
//!
//! Partitions every basic block into L-blocks (the intersection of a block
//! with one cache line) and runs the Must/May/Persistence categorization per
//! cache set. Fetching the instructions of an L-block is one access to its
//! cache block.
//!
//! # L-block Construction
//! Walking a basic block's instructions, a new L-block starts whenever the
//! fetch address crosses a cache-line boundary. An instruction spanning a
//! boundary is attributed to the **last** line it touches, so its fetch is
//! categorized against that line.

pub mod category;

use crate::cache::{SetAccess, SetEffect, SetProblem};
use crate::cfg::{BlockId, Cfg};
use crate::hard::Cache;
use crate::prog::Address;
use std::collections::HashMap;

/// One L-block: a maximal run of instructions of one basic block inside one
/// cache line.
#[derive(Debug, Clone)]
pub struct LBlock {
    /// Containing CFG block
    pub block: BlockId,
    /// Position among the L-blocks of the containing block
    pub index: u32,
    /// Address of the first instruction
    pub address: Address,
    /// Bytes covered inside the containing block
    pub size: u32,
    /// Cache set of the (last touched) line
    pub set: u32,
    /// Per-set tracked cache-block id
    pub cache_block: u32,
}

/// L-block partition of one CFG: the flat L-block list plus the per-set
/// analysis problems feeding the abstract domains.
#[derive(Debug, Clone)]
pub struct LBlockPartition {
    pub lblocks: Vec<LBlock>,
    pub sets: Vec<SetProblem>,
}

/// Partition every basic block of a CFG into L-blocks.
pub fn build_lblocks(cfg: &Cfg, cache: &Cache) -> LBlockPartition {
    let set_count = cache.set_count();
    // Per-set dedup of cache blocks: global line number -> tracked id.
    let mut block_ids: Vec<HashMap<u32, u32>> = vec![HashMap::new(); set_count as usize];
    let mut lblocks: Vec<LBlock> = Vec::new();
    // (block, access id) per set, gathered before sizes are known.
    let mut per_set: Vec<Vec<(BlockId, u32, u32)>> = vec![Vec::new(); set_count as usize];

    for block in cfg.blocks.iter() {
        let insts = block.insts();
        if insts.is_empty() {
            continue;
        }
        let mut index: u32 = 0;
        let mut start = 0usize;
        while start < insts.len() {
            let line = fetch_line(cache, &insts[start]);
            let mut end = start + 1;
            while end < insts.len() && fetch_line(cache, &insts[end]) == line {
                end += 1;
            }
            let first = insts[start].address;
            let size: u32 = insts[start..end].iter().map(|i| i.size).sum();
            let line_address = Address::new(first.page, line << cache.block_bits);
            let set = cache.set_of(line_address);
            let ids = &mut block_ids[set as usize];
            let next_id = ids.len() as u32;
            let cache_block = *ids.entry(line).or_insert(next_id);
            let access = lblocks.len() as u32;
            lblocks.push(LBlock {
                block: block.id,
                index,
                address: first,
                size,
                set,
                cache_block,
            });
            per_set[set as usize].push((block.id, access, cache_block));
            index += 1;
            start = end;
        }
    }

    let assoc = cache.way_count().min(u8::MAX as u32) as u8;
    let mut sets = Vec::with_capacity(set_count as usize);
    for set in 0..set_count {
        let mut prob = SetProblem::new(
            set,
            block_ids[set as usize].len() as u32,
            assoc,
            cfg.count(),
        );
        for (block, access, cache_block) in per_set[set as usize].iter() {
            prob.accesses[*block as usize].push(SetAccess {
                access: *access,
                effect: SetEffect::Definite(*cache_block),
            });
        }
        // Un-inlined calls may fetch anything: clobber the set.
        for block in cfg.blocks.iter() {
            if block.is_synthetic() {
                prob.accesses[block.id as usize].push(SetAccess {
                    access: crate::cache::CLOBBER_ACCESS,
                    effect: SetEffect::UnknownAll,
                });
            }
        }
        sets.push(prob);
    }
    LBlockPartition { lblocks, sets }
}

/// Cache line an instruction's fetch is charged to: the line of its last
/// byte, so boundary-spanning instructions count against the line completing
/// the fetch.
fn fetch_line(cache: &Cache, inst: &crate::prog::Inst) -> u32 {
    let last = inst.address.wrapping_add(inst.size.saturating_sub(1));
    cache.block_of(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{BlockKind, EdgeKind};
    use crate::hard::{ReplacementPolicy, WritePolicy};
    use crate::prog::{Inst, InstKind};

    fn cache_16b_lines() -> Cache {
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

    fn block_of_insts(cfg: &mut Cfg, addrs: &[u32]) -> BlockId {
        let insts = addrs
            .iter()
            .map(|a| Inst::new(Address::abs(*a), 4, InstKind::INT))
            .collect();
        let b = cfg.add_block(BlockKind::Basic { insts });
        b
    }

    #[test]
    fn test_partition_splits_at_line_boundary() {
        let cache = cache_16b_lines();
        let mut cfg = Cfg::new(0, "f".to_string(), Address::abs(0));
        // 6 instructions from 0x08: 0x08..0x20 crosses the 0x10 boundary.
        let b = block_of_insts(&mut cfg, &[0x08, 0x0c, 0x10, 0x14, 0x18, 0x1c]);
        cfg.add_edge(cfg.entry, b, EdgeKind::NotTaken);
        cfg.add_edge(b, cfg.exit, EdgeKind::NotTaken);

        let part = build_lblocks(&cfg, &cache);
        assert_eq!(part.lblocks.len(), 2);
        assert_eq!(part.lblocks[0].address, Address::abs(0x08));
        assert_eq!(part.lblocks[0].size, 8);
        assert_eq!(part.lblocks[1].address, Address::abs(0x10));
        assert_eq!(part.lblocks[1].size, 16);
        // Lines 0 and 1 fall into different sets of a 2-set cache.
        assert_ne!(part.lblocks[0].set, part.lblocks[1].set);
    }

    #[test]
    fn test_same_line_shared_across_blocks() {
        let cache = cache_16b_lines();
        let mut cfg = Cfg::new(0, "f".to_string(), Address::abs(0));
        let a = block_of_insts(&mut cfg, &[0x00, 0x04]);
        let b = block_of_insts(&mut cfg, &[0x08, 0x0c]);
        cfg.add_edge(cfg.entry, a, EdgeKind::NotTaken);
        cfg.add_edge(a, b, EdgeKind::NotTaken);
        cfg.add_edge(b, cfg.exit, EdgeKind::NotTaken);

        let part = build_lblocks(&cfg, &cache);
        assert_eq!(part.lblocks.len(), 2);
        // Both L-blocks sit in line 0: one tracked cache block.
        assert_eq!(part.lblocks[0].cache_block, part.lblocks[1].cache_block);
        assert_eq!(part.sets[0].block_count, 1);
        // Two accesses to set 0, one per block.
        let accesses: usize = part.sets[0].accesses.iter().map(|a| a.len()).sum();
        assert_eq!(accesses, 2);
    }

    #[test]
    fn test_boundary_spanning_instruction_charged_to_last_line() {
        let cache = cache_16b_lines();
        let mut cfg = Cfg::new(0, "f".to_string(), Address::abs(0));
        // A 8-byte instruction at 0x0c spans lines 0 and 1.
        let insts = vec![
            Inst::new(Address::abs(0x08), 4, InstKind::INT),
            Inst::new(Address::abs(0x0c), 8, InstKind::INT),
        ];
        let b = cfg.add_block(BlockKind::Basic { insts });
        cfg.add_edge(cfg.entry, b, EdgeKind::NotTaken);
        cfg.add_edge(b, cfg.exit, EdgeKind::NotTaken);

        let part = build_lblocks(&cfg, &cache);
        assert_eq!(part.lblocks.len(), 2);
        // The spanning instruction belongs to line 1.
        assert_eq!(part.lblocks[1].address, Address::abs(0x0c));
        assert_eq!(part.lblocks[1].set, 1);
    }
}
