//! Block Timing
//!
//! The block-timing collaborator contract plus two stock implementations: a
//! trivial per-instruction timer scaled by the platform description, and a
//! fixed table keyed by block address for externally computed times.

use crate::cfg::{Block, Cfg};
use crate::prog::Address;
use std::collections::HashMap;

/// Supplies the execution time of a basic block in cycles.
pub trait BlockTimer {
    fn block_time(&self, cfg: &Cfg, block: &Block) -> u32;
}

/// One cycle per instruction (configurable), plus flat penalties for memory
/// instructions. A stand-in for a real pipeline analysis.
pub struct TrivialBlockTimer {
    pub cycles_per_inst: u32,
    pub load_extra: u32,
    pub store_extra: u32,
}

impl Default for TrivialBlockTimer {
    fn default() -> Self {
        TrivialBlockTimer {
            cycles_per_inst: 1,
            load_extra: 0,
            store_extra: 0,
        }
    }
}

impl BlockTimer for TrivialBlockTimer {
    fn block_time(&self, _cfg: &Cfg, block: &Block) -> u32 {
        let mut time = 0;
        for inst in block.insts() {
            time += self.cycles_per_inst;
            if inst.kind.is_load() {
                time += self.load_extra;
            }
            if inst.kind.is_store() {
                time += self.store_extra;
            }
        }
        time
    }
}

/// Fixed times per block start address; blocks without an entry get the
/// default. Block addresses survive virtualization and unrolling, so one
/// table serves transformed CFGs too.
pub struct MapBlockTimer {
    pub times: HashMap<Address, u32>,
    pub default: u32,
}

impl MapBlockTimer {
    pub fn new(default: u32) -> Self {
        MapBlockTimer {
            times: HashMap::new(),
            default,
        }
    }

    pub fn set(&mut self, address: Address, time: u32) {
        self.times.insert(address, time);
    }
}

impl BlockTimer for MapBlockTimer {
    fn block_time(&self, _cfg: &Cfg, block: &Block) -> u32 {
        match block.address() {
            Some(address) => self.times.get(&address).copied().unwrap_or(self.default),
            None => 0,
        }
    }
}
