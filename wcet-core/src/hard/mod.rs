//! Hardware Description
//!
//! Structured platform configuration consumed by the analyses: processor
//! pipeline shape, memory banks, cache geometry and the branch history
//! table. All types derive `serde` so platform descriptions can be loaded
//! from JSON configuration files.
//!
//! # Address Decomposition
//! Cache geometry follows the usual bit split of an address offset:
//! `| tag | set (row_bits) | offset (block_bits) |`. The way count is
//! `2^way_bits`; `way_bits == 0` describes a direct-mapped cache.

use crate::prog::Address;
use serde::{Deserialize, Serialize};

/// Processor pipeline stage kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageKind {
    Fetch,
    Decode,
    Execute,
    Commit,
}

/// One pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub kind: StageKind,
    /// Instructions handled per cycle
    pub width: u32,
    /// Cycles spent in the stage
    pub latency: u32,
}

/// A functional unit reachable from the execute stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionalUnit {
    pub name: String,
    pub latency: u32,
    pub width: u32,
    pub pipelined: bool,
}

/// Processor description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Processor {
    pub stages: Vec<Stage>,
    pub units: Vec<FunctionalUnit>,
    /// Architectural register holding the stack pointer
    pub sp_reg: i16,
    /// Branch delay slots of the architecture (0 for most targets)
    pub delay_slots: u32,
}

impl Default for Processor {
    fn default() -> Self {
        Processor {
            stages: Vec::new(),
            units: Vec::new(),
            sp_reg: 1,
            delay_slots: 0,
        }
    }
}

/// One memory bank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bank {
    pub name: String,
    /// First offset of the bank (page 0)
    pub base: u32,
    /// Bank size in bytes
    pub size: u32,
    /// Whether accesses to this bank go through the data cache
    pub cached: bool,
    pub read_latency: u32,
    pub write_latency: u32,
    pub worst_read: u32,
    pub worst_write: u32,
}

impl Bank {
    pub fn contains(&self, address: Address) -> bool {
        address.page == 0
            && address.offset >= self.base
            && (address.offset - self.base) < self.size
    }
}

/// Memory description: an ordered list of banks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Memory {
    pub banks: Vec<Bank>,
}

impl Memory {
    /// Bank covering an address, if any.
    pub fn bank_of(&self, address: Address) -> Option<&Bank> {
        self.banks.iter().find(|b| b.contains(address))
    }

    /// Whether an address is cached. Unknown addresses default to cached
    /// (the conservative answer for cache analysis).
    pub fn is_cached(&self, address: Address) -> bool {
        self.bank_of(address).map(|b| b.cached).unwrap_or(true)
    }

    /// A single RAM bank covering the whole page-0 space.
    pub fn flat(read_latency: u32, write_latency: u32) -> Self {
        Memory {
            banks: vec![Bank {
                name: "ram".to_string(),
                base: 0,
                size: u32::MAX,
                cached: true,
                read_latency,
                write_latency,
                worst_read: read_latency,
                worst_write: write_latency,
            }],
        }
    }
}

/// Cache replacement policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplacementPolicy {
    Lru,
    Fifo,
    Plru,
    Random,
}

/// Cache write policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WritePolicy {
    WriteThrough,
    WriteBack,
}

/// One cache level description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cache {
    /// log2 of the block (line) size in bytes
    pub block_bits: u32,
    /// log2 of the number of sets
    pub row_bits: u32,
    /// log2 of the associativity
    pub way_bits: u32,
    pub replace: ReplacementPolicy,
    pub write: WritePolicy,
    /// Whether stores allocate a line on miss
    pub allocate: bool,
    /// Additional cycles charged on a miss
    pub miss_penalty: u32,
}

impl Cache {
    /// Block (line) size in bytes.
    pub fn block_size(&self) -> u32 {
        1 << self.block_bits
    }

    /// Number of sets (rows).
    pub fn set_count(&self) -> u32 {
        1 << self.row_bits
    }

    /// Associativity (ways per set).
    pub fn way_count(&self) -> u32 {
        1 << self.way_bits
    }

    /// Total size in bytes.
    pub fn cache_size(&self) -> u32 {
        1 << (self.block_bits + self.row_bits + self.way_bits)
    }

    /// Offset of an address inside its block.
    pub fn offset(&self, address: Address) -> u32 {
        address.offset & (self.block_size() - 1)
    }

    /// Set index of an address.
    pub fn set_of(&self, address: Address) -> u32 {
        (address.offset >> self.block_bits) & (self.set_count() - 1)
    }

    /// Global cache-block number of an address (its line-aligned offset).
    pub fn block_of(&self, address: Address) -> u32 {
        address.offset >> self.block_bits
    }

    /// Tag of an address.
    pub fn tag(&self, address: Address) -> u32 {
        address.offset >> (self.block_bits + self.row_bits)
    }
}

/// Instruction and data cache configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    pub inst: Option<Cache>,
    pub data: Option<Cache>,
}

/// Default branch prediction when no BHT entry exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Predict {
    Taken,
    NotTaken,
    /// Backward branches predicted taken, forward not taken
    Direct,
}

/// Branch history table description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bht {
    /// log2 of the number of rows
    pub row_bits: u32,
    /// log2 of the entries per row
    pub way_bits: u32,
    /// Penalty of a mispredicted conditional branch
    pub cond_penalty: u32,
    /// Penalty of an indirect branch
    pub indirect_penalty: u32,
    pub correct_taken_penalty: u32,
    pub incorrect_taken_penalty: u32,
    pub correct_not_taken_penalty: u32,
    pub incorrect_not_taken_penalty: u32,
    pub default_prediction: Predict,
}

impl Bht {
    pub fn row_count(&self) -> u32 {
        1 << self.row_bits
    }

    pub fn way_count(&self) -> u32 {
        1 << self.way_bits
    }

    /// BHT row indexed by a branch instruction address.
    ///
    /// Instruction addresses are word-aligned on the supported targets, so
    /// the two low bits are skipped before indexing.
    pub fn row_of(&self, address: Address) -> u32 {
        (address.offset >> 2) & (self.row_count() - 1)
    }
}

/// Complete platform description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    pub processor: Processor,
    pub memory: Memory,
    pub caches: CacheConfig,
    pub bht: Option<Bht>,
}

impl Default for Platform {
    fn default() -> Self {
        Platform {
            processor: Processor::default(),
            memory: Memory::flat(1, 1),
            caches: CacheConfig::default(),
            bht: None,
        }
    }
}

impl Platform {
    /// Load a platform description from JSON.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
