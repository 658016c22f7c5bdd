//! Data Cache Analysis
//!
//! Three stages feed the shared Must/May/Persistence machinery:
//!
//! 1. An **address analysis** supplies, per memory instruction, an absolute
//!    address, a stack-relative offset, a small range, or `Any`. The default
//!    provider is a forward data-flow analysis over the semantic sequences
//!    tracking constants and stack-pointer offsets per register.
//! 2. The **block builder** translates each access into a block access:
//!    exact cache block, explicit set range, or fully unknown, honoring
//!    memory-bank cacheability and the cache's write policy (write-through
//!    stores do not touch the cache state).
//! 3. The per-set **categorization** of `cache::categorize_set`.
//!
//! A range spanning at least as many lines as the cache has sets degrades to
//! `Any` at build time, so both passes see one semantics for wide ranges.

pub mod category;

use crate::ai::{self, Domain};
use crate::cache::{SetAccess, SetEffect, SetProblem};
use crate::cfg::loop_info::LoopInfo;
use crate::cfg::{Block, BlockId, Cfg};
use crate::error::Result;
use crate::hard::{Cache, Memory, WritePolicy};
use crate::prog::sem::SemOp;
use crate::prog::workspace::CancelToken;
use crate::prog::{Address, Inst};
use std::collections::{BTreeMap, HashMap};

/// Result of the address analysis for one memory instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessValue {
    /// Absolute address
    Abs(Address),
    /// Offset from the initial stack pointer
    SpRel(i32),
    /// Absolute range (inclusive)
    Range(Address, Address),
    /// Nothing known
    Any,
}

impl AccessValue {
    /// Lattice join used when several abstract paths reach one instruction.
    pub fn join(self, other: AccessValue) -> AccessValue {
        use AccessValue::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Abs(a), Abs(b)) if a.page == b.page => {
                let (lo, hi) = if a.offset <= b.offset { (a, b) } else { (b, a) };
                Range(lo, hi)
            }
            (Abs(a), Range(lo, hi)) | (Range(lo, hi), Abs(a)) if a.page == lo.page => Range(
                Address::new(a.page, a.offset.min(lo.offset)),
                Address::new(a.page, a.offset.max(hi.offset)),
            ),
            (Range(a, b), Range(c, d)) if a.page == c.page => Range(
                Address::new(a.page, a.offset.min(c.offset)),
                Address::new(a.page, b.offset.max(d.offset)),
            ),
            _ => Any,
        }
    }
}

/// Address-analysis collaborator: yields the access value of a memory
/// instruction.
pub trait AddressProvider {
    fn access_for(&self, inst: &Inst) -> AccessValue;
}

/// Abstract register value of the stack analysis: a cut-down CLP value with
/// constants, stack offsets and plain intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegValue {
    Const(u32),
    SpRel(i32),
    Range(u32, u32),
    Top,
}

impl RegValue {
    fn join(self, other: RegValue) -> RegValue {
        use RegValue::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Const(a), Const(b)) => Range(a.min(b), a.max(b)),
            (Const(a), Range(lo, hi)) | (Range(lo, hi), Const(a)) => {
                Range(a.min(lo), a.max(hi))
            }
            (Range(a, b), Range(c, d)) => Range(a.min(c), b.max(d)),
            _ => Top,
        }
    }

    fn add(self, other: RegValue) -> RegValue {
        use RegValue::*;
        match (self, other) {
            (Const(a), Const(b)) => Const(a.wrapping_add(b)),
            (SpRel(a), Const(b)) | (Const(b), SpRel(a)) => SpRel(a.wrapping_add(b as i32)),
            (Range(lo, hi), Const(b)) | (Const(b), Range(lo, hi)) => {
                Range(lo.wrapping_add(b), hi.wrapping_add(b))
            }
            _ => Top,
        }
    }

    fn sub(self, other: RegValue) -> RegValue {
        use RegValue::*;
        match (self, other) {
            (Const(a), Const(b)) => Const(a.wrapping_sub(b)),
            (SpRel(a), Const(b)) => SpRel(a.wrapping_sub(b as i32)),
            (Range(lo, hi), Const(b)) => Range(lo.wrapping_sub(b), hi.wrapping_sub(b)),
            _ => Top,
        }
    }

    fn shl(self, other: RegValue) -> RegValue {
        match (self, other) {
            (RegValue::Const(a), RegValue::Const(b)) if b < 32 => RegValue::Const(a << b),
            _ => RegValue::Top,
        }
    }

    fn shr(self, other: RegValue) -> RegValue {
        match (self, other) {
            (RegValue::Const(a), RegValue::Const(b)) if b < 32 => RegValue::Const(a >> b),
            _ => RegValue::Top,
        }
    }
}

/// Per-program-point register environment. A register missing from the map
/// is `Top`; `bottom` marks the unreachable state (join identity).
#[derive(Debug, Clone, PartialEq, Eq)]
struct RegState {
    regs: BTreeMap<i16, RegValue>,
    bottom: bool,
}

impl RegState {
    fn bottom() -> Self {
        RegState {
            regs: BTreeMap::new(),
            bottom: true,
        }
    }

    fn get(&self, reg: i16) -> RegValue {
        self.regs.get(&reg).copied().unwrap_or(RegValue::Top)
    }

    fn set(&mut self, reg: i16, value: RegValue) {
        if value == RegValue::Top {
            self.regs.remove(&reg);
        } else {
            self.regs.insert(reg, value);
        }
    }

    fn join(&mut self, other: &RegState) {
        if other.bottom {
            return;
        }
        if self.bottom {
            *self = other.clone();
            return;
        }
        let keys: Vec<i16> = self.regs.keys().copied().collect();
        for key in keys {
            match other.regs.get(&key) {
                Some(v) => {
                    let joined = self.get(key).join(*v);
                    self.set(key, joined);
                }
                None => {
                    self.regs.remove(&key);
                }
            }
        }
    }
}

/// Stack/absolute address analysis over semantic sequences (the default
/// address provider).
pub struct StackAnalysis {
    accesses: HashMap<Address, AccessValue>,
}

impl AddressProvider for StackAnalysis {
    fn access_for(&self, inst: &Inst) -> AccessValue {
        self.accesses
            .get(&inst.address)
            .copied()
            .unwrap_or(AccessValue::Any)
    }
}

struct StackDomain {
    sp_reg: i16,
    accesses: HashMap<Address, AccessValue>,
}

impl StackDomain {
    /// Interpret one instruction's semantic sequence.
    fn exec_inst(&mut self, state: &mut RegState, inst: &Inst) {
        let mut temps: HashMap<i16, RegValue> = HashMap::new();
        let mut recorded: Option<AccessValue> = None;
        // Destinations written under an unresolved predicate are weakened.
        let mut weaken_until: usize = 0;

        let get = |state: &RegState, temps: &HashMap<i16, RegValue>, r: i16| -> RegValue {
            if r < 0 {
                temps.get(&r).copied().unwrap_or(RegValue::Top)
            } else {
                state.get(r)
            }
        };

        for (idx, op) in inst.sem.iter().enumerate() {
            let value = match op.op {
                SemOp::Seti => Some(RegValue::Const(op.cst)),
                SemOp::Set => Some(get(state, &temps, op.a)),
                SemOp::Add => Some(get(state, &temps, op.a).add(get(state, &temps, op.b))),
                SemOp::Sub => Some(get(state, &temps, op.a).sub(get(state, &temps, op.b))),
                SemOp::Shl => Some(get(state, &temps, op.a).shl(get(state, &temps, op.b))),
                SemOp::Shr | SemOp::Asr => {
                    Some(get(state, &temps, op.a).shr(get(state, &temps, op.b)))
                }
                SemOp::Scratch | SemOp::Cmp | SemOp::Cmpu => Some(RegValue::Top),
                SemOp::Load => {
                    let addr = get(state, &temps, op.a);
                    let access = self.to_access(addr);
                    recorded = Some(match recorded {
                        Some(prev) => prev.join(access),
                        None => access,
                    });
                    Some(RegValue::Top)
                }
                SemOp::Store => {
                    let addr = get(state, &temps, op.a);
                    let access = self.to_access(addr);
                    recorded = Some(match recorded {
                        Some(prev) => prev.join(access),
                        None => access,
                    });
                    None
                }
                SemOp::If => {
                    // Both paths are merged: everything the guarded ops
                    // write becomes unknown.
                    weaken_until = weaken_until.max(idx + 1 + op.b.max(0) as usize);
                    None
                }
                SemOp::Setp
                | SemOp::Nop
                | SemOp::Branch
                | SemOp::Trap
                | SemOp::Cont => None,
            };
            if let Some(mut v) = value {
                if idx < weaken_until {
                    v = RegValue::Top;
                }
                if op.d < 0 {
                    if v == RegValue::Top {
                        temps.remove(&op.d);
                    } else {
                        temps.insert(op.d, v);
                    }
                } else {
                    state.set(op.d, v);
                }
            }
        }

        if inst.is_mem() {
            let access = recorded.unwrap_or(AccessValue::Any);
            self.accesses
                .entry(inst.address)
                .and_modify(|a| *a = a.join(access))
                .or_insert(access);
        }
    }

    fn to_access(&self, value: RegValue) -> AccessValue {
        match value {
            RegValue::Const(c) => AccessValue::Abs(Address::abs(c)),
            RegValue::SpRel(off) => AccessValue::SpRel(off),
            RegValue::Range(lo, hi) => {
                AccessValue::Range(Address::abs(lo), Address::abs(hi))
            }
            RegValue::Top => AccessValue::Any,
        }
    }
}

impl Domain for StackDomain {
    type Value = RegState;

    fn bottom(&self) -> RegState {
        RegState::bottom()
    }

    fn entry(&self) -> RegState {
        let mut state = RegState {
            regs: BTreeMap::new(),
            bottom: false,
        };
        state.set(self.sp_reg, RegValue::SpRel(0));
        state
    }

    fn join(&self, into: &mut RegState, other: &RegState) {
        into.join(other);
    }

    fn equals(&self, a: &RegState, b: &RegState) -> bool {
        a == b
    }

    fn update(&mut self, _cfg: &Cfg, block: &Block, input: &RegState) -> RegState {
        let mut state = input.clone();
        if state.bottom {
            state.bottom = false;
        }
        for inst in block.insts() {
            self.exec_inst(&mut state, inst);
        }
        state
    }

    fn widen(&self, value: &mut RegState) {
        // Only interval values grow along ascending chains; constants and
        // stack offsets either stay stable or die in joins.
        value.regs.retain(|_, v| !matches!(v, RegValue::Range(_, _)));
        value.bottom = false;
    }
}

impl StackAnalysis {
    /// Run the address analysis over one CFG.
    ///
    /// The register interval lattice has unbounded ascending chains through
    /// `Range` growth, so the fixpoint runs in widening mode.
    pub fn run(
        cfg: &Cfg,
        loops: &LoopInfo,
        sp_reg: i16,
        cancel: &CancelToken,
    ) -> Result<StackAnalysis> {
        let mut domain = StackDomain {
            sp_reg,
            accesses: HashMap::new(),
        };
        ai::solve(
            cfg,
            loops,
            &mut domain,
            ai::FixpointMode::Widening { delay: 4 },
            cancel,
        )?;
        Ok(StackAnalysis {
            accesses: domain.accesses,
        })
    }
}

/// Kind of a data block access after address resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataAccessKind {
    /// One known cache block
    Exact { set: u32, cache_block: u32 },
    /// Known small range of lines
    Range { first: Address, last: Address },
    /// Unknown address
    Any,
}

/// One data access of a basic block.
#[derive(Debug, Clone)]
pub struct DataAccess {
    pub block: BlockId,
    /// Position among the block's data accesses
    pub index: u32,
    pub inst_address: Address,
    pub store: bool,
    pub kind: DataAccessKind,
}

/// Data accesses of one CFG plus the per-set analysis problems.
#[derive(Debug, Clone)]
pub struct DataAccessPartition {
    pub accesses: Vec<DataAccess>,
    pub sets: Vec<SetProblem>,
}

/// Translate every memory instruction into block accesses.
///
/// Stores are skipped entirely under a write-through policy (they do not
/// bring data into the cache and are charged through the memory latency
/// model instead). Uncached banks never produce accesses.
pub fn build_accesses(
    cfg: &Cfg,
    cache: &Cache,
    memory: &Memory,
    initial_sp: Address,
    provider: &dyn AddressProvider,
) -> DataAccessPartition {
    let set_count = cache.set_count();
    let stores_allocate = cache.write == WritePolicy::WriteBack;

    // Resolve every access first so the tracked-block universe is known
    // before range candidates are computed.
    struct Resolved {
        block: BlockId,
        index: u32,
        inst_address: Address,
        store: bool,
        value: AccessValue,
    }
    let mut resolved: Vec<Resolved> = Vec::new();
    for block in cfg.blocks.iter() {
        let mut index: u32 = 0;
        for inst in block.insts() {
            if !inst.is_mem() {
                continue;
            }
            let store = inst.kind.is_store() && !inst.kind.is_load();
            if store && !stores_allocate {
                continue;
            }
            let mut value = provider.access_for(inst);
            if let AccessValue::SpRel(off) = value {
                value = AccessValue::Abs(initial_sp.wrapping_offset(off));
            }
            // Wide ranges degrade to Any.
            if let AccessValue::Range(lo, hi) = value {
                let span = cache.block_of(hi) - cache.block_of(lo) + 1;
                if span >= set_count {
                    value = AccessValue::Any;
                }
            }
            // Uncached banks bypass the cache.
            if let AccessValue::Abs(addr) = value {
                if !memory.is_cached(addr) {
                    log::debug!("access at {} targets uncached {}", inst.address, addr);
                    continue;
                }
            }
            resolved.push(Resolved {
                block: block.id,
                index,
                inst_address: inst.address,
                store,
                value,
            });
            index += 1;
        }
    }

    // Tracked cache blocks: every exactly addressed line.
    let mut block_ids: Vec<HashMap<u32, u32>> = vec![HashMap::new(); set_count as usize];
    for r in resolved.iter() {
        if let AccessValue::Abs(addr) = r.value {
            let line = cache.block_of(addr);
            let set = cache.set_of(addr);
            let ids = &mut block_ids[set as usize];
            let next = ids.len() as u32;
            ids.entry(line).or_insert(next);
        }
    }

    let assoc = cache.way_count().min(u8::MAX as u32) as u8;
    let mut sets: Vec<SetProblem> = (0..set_count)
        .map(|s| SetProblem::new(s, block_ids[s as usize].len() as u32, assoc, cfg.count()))
        .collect();

    let mut accesses: Vec<DataAccess> = Vec::new();
    for r in resolved {
        let access_id = accesses.len() as u32;
        let kind = match r.value {
            AccessValue::Abs(addr) => {
                let set = cache.set_of(addr);
                let cache_block = block_ids[set as usize][&cache.block_of(addr)];
                sets[set as usize].accesses[r.block as usize].push(SetAccess {
                    access: access_id,
                    effect: SetEffect::Definite(cache_block),
                });
                DataAccessKind::Exact { set, cache_block }
            }
            AccessValue::Range(lo, hi) => {
                for line in cache.block_of(lo)..=cache.block_of(hi) {
                    let line_addr = Address::new(lo.page, line << cache.block_bits);
                    let set = cache.set_of(line_addr);
                    let candidates: Vec<u32> = block_ids[set as usize]
                        .iter()
                        .filter(|(l, _)| **l >= cache.block_of(lo) && **l <= cache.block_of(hi))
                        .map(|(_, id)| *id)
                        .collect();
                    sets[set as usize].accesses[r.block as usize].push(SetAccess {
                        access: access_id,
                        effect: SetEffect::Unknown(candidates),
                    });
                }
                DataAccessKind::Range {
                    first: lo,
                    last: hi,
                }
            }
            AccessValue::Any => {
                for set in sets.iter_mut() {
                    if set.block_count > 0 {
                        set.accesses[r.block as usize].push(SetAccess {
                            access: access_id,
                            effect: SetEffect::UnknownAll,
                        });
                    }
                }
                DataAccessKind::Any
            }
            AccessValue::SpRel(_) => unreachable!("resolved above"),
        };
        accesses.push(DataAccess {
            block: r.block,
            index: r.index,
            inst_address: r.inst_address,
            store: r.store,
            kind,
        });
    }
    // Un-inlined calls may access anything: clobber every set.
    for block in cfg.blocks.iter() {
        if block.is_synthetic() {
            for set in sets.iter_mut() {
                set.accesses[block.id as usize].push(SetAccess {
                    access: crate::cache::CLOBBER_ACCESS,
                    effect: SetEffect::UnknownAll,
                });
            }
        }
    }
    DataAccessPartition { accesses, sets }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::loop_info;
    use crate::cfg::{BlockKind, Cfg, EdgeKind};
    use crate::hard::ReplacementPolicy;
    use crate::prog::{sem, InstKind};

    fn data_cache() -> Cache {
        Cache {
            block_bits: 4,
            row_bits: 2,
            way_bits: 1,
            replace: ReplacementPolicy::Lru,
            write: WritePolicy::WriteBack,
            allocate: true,
            miss_penalty: 8,
        }
    }

    fn load_inst(addr: u32, sem: Vec<crate::prog::sem::SemInst>) -> Inst {
        let mut inst = Inst::new(Address::abs(addr), 4, InstKind::LOAD | InstKind::INT);
        inst.sem = sem;
        inst
    }

    #[test]
    fn test_stack_analysis_constant_address() {
        // r2 <- 0x1000 ; load [r2]
        let mut cfg = Cfg::new(0, "f".to_string(), Address::abs(0));
        let set_inst = {
            let mut i = Inst::new(Address::abs(0x0), 4, InstKind::INT);
            i.sem = vec![sem::seti(2, 0x1000)];
            i
        };
        let ld = load_inst(0x4, vec![sem::load(-1, 2, 4)]);
        let b = cfg.add_block(BlockKind::Basic {
            insts: vec![set_inst, ld.clone()],
        });
        cfg.add_edge(cfg.entry, b, EdgeKind::NotTaken);
        cfg.add_edge(b, cfg.exit, EdgeKind::NotTaken);
        let loops = loop_info::analyze(&cfg);
        let analysis = StackAnalysis::run(&cfg, &loops, 1, &CancelToken::new()).unwrap();
        assert_eq!(
            analysis.access_for(&ld),
            AccessValue::Abs(Address::abs(0x1000))
        );
    }

    #[test]
    fn test_stack_analysis_sp_offset() {
        // r2 <- sp + 8 ; load [r2]
        let mut cfg = Cfg::new(0, "f".to_string(), Address::abs(0));
        let compute = {
            let mut i = Inst::new(Address::abs(0x0), 4, InstKind::INT);
            i.sem = vec![sem::seti(-1, 8), sem::add(2, 1, -1)];
            i
        };
        let ld = load_inst(0x4, vec![sem::load(-1, 2, 4)]);
        let b = cfg.add_block(BlockKind::Basic {
            insts: vec![compute, ld.clone()],
        });
        cfg.add_edge(cfg.entry, b, EdgeKind::NotTaken);
        cfg.add_edge(b, cfg.exit, EdgeKind::NotTaken);
        let loops = loop_info::analyze(&cfg);
        let analysis = StackAnalysis::run(&cfg, &loops, 1, &CancelToken::new()).unwrap();
        assert_eq!(analysis.access_for(&ld), AccessValue::SpRel(8));
    }

    #[test]
    fn test_stack_analysis_joined_paths_to_range() {
        // Two paths set r2 to different constants before the load.
        let mut cfg = Cfg::new(0, "f".to_string(), Address::abs(0));
        let a = {
            let mut i = Inst::new(Address::abs(0x0), 4, InstKind::BRANCH | InstKind::COND);
            i.sem = vec![sem::cont()];
            i
        };
        let left = {
            let mut i = Inst::new(Address::abs(0x4), 4, InstKind::INT);
            i.sem = vec![sem::seti(2, 0x1000)];
            i
        };
        let right = {
            let mut i = Inst::new(Address::abs(0x8), 4, InstKind::INT);
            i.sem = vec![sem::seti(2, 0x1010)];
            i
        };
        let ld = load_inst(0xc, vec![sem::load(-1, 2, 4)]);
        let ba = cfg.add_block(BlockKind::Basic { insts: vec![a] });
        let bl = cfg.add_block(BlockKind::Basic { insts: vec![left] });
        let br = cfg.add_block(BlockKind::Basic { insts: vec![right] });
        let bj = cfg.add_block(BlockKind::Basic {
            insts: vec![ld.clone()],
        });
        cfg.add_edge(cfg.entry, ba, EdgeKind::NotTaken);
        cfg.add_edge(ba, bl, EdgeKind::Taken);
        cfg.add_edge(ba, br, EdgeKind::NotTaken);
        cfg.add_edge(bl, bj, EdgeKind::NotTaken);
        cfg.add_edge(br, bj, EdgeKind::NotTaken);
        cfg.add_edge(bj, cfg.exit, EdgeKind::NotTaken);
        let loops = loop_info::analyze(&cfg);
        let analysis = StackAnalysis::run(&cfg, &loops, 1, &CancelToken::new()).unwrap();
        assert_eq!(
            analysis.access_for(&ld),
            AccessValue::Range(Address::abs(0x1000), Address::abs(0x1010))
        );
    }

    struct FixedProvider(HashMap<Address, AccessValue>);

    impl AddressProvider for FixedProvider {
        fn access_for(&self, inst: &Inst) -> AccessValue {
            self.0.get(&inst.address).copied().unwrap_or(AccessValue::Any)
        }
    }

    #[test]
    fn test_build_accesses_exact_and_spill() {
        let cache = data_cache();
        let memory = Memory::flat(2, 2);
        let mut cfg = Cfg::new(0, "f".to_string(), Address::abs(0));
        let ld = load_inst(0x0, vec![]);
        let st = {
            let mut i = Inst::new(Address::abs(0x4), 4, InstKind::STORE | InstKind::INT);
            i.sem = vec![];
            i
        };
        let b = cfg.add_block(BlockKind::Basic {
            insts: vec![ld, st],
        });
        cfg.add_edge(cfg.entry, b, EdgeKind::NotTaken);
        cfg.add_edge(b, cfg.exit, EdgeKind::NotTaken);

        let mut values = HashMap::new();
        values.insert(Address::abs(0x0), AccessValue::Abs(Address::abs(0x2000)));
        values.insert(Address::abs(0x4), AccessValue::SpRel(-8));
        let provider = FixedProvider(values);
        let part = build_accesses(&cfg, &cache, &memory, Address::abs(0x8000), &provider);
        assert_eq!(part.accesses.len(), 2);
        // The spill store resolves against the initial SP.
        match &part.accesses[1].kind {
            DataAccessKind::Exact { set, .. } => {
                assert_eq!(*set, cache.set_of(Address::abs(0x8000 - 8)));
            }
            k => panic!("unexpected kind {:?}", k),
        }
        assert!(part.accesses[1].store);
    }

    #[test]
    fn test_write_through_store_skipped() {
        let mut cache = data_cache();
        cache.write = WritePolicy::WriteThrough;
        let memory = Memory::flat(2, 2);
        let mut cfg = Cfg::new(0, "f".to_string(), Address::abs(0));
        let st = {
            let mut i = Inst::new(Address::abs(0x0), 4, InstKind::STORE | InstKind::INT);
            i.sem = vec![];
            i
        };
        let b = cfg.add_block(BlockKind::Basic { insts: vec![st] });
        cfg.add_edge(cfg.entry, b, EdgeKind::NotTaken);
        cfg.add_edge(b, cfg.exit, EdgeKind::NotTaken);
        let mut values = HashMap::new();
        values.insert(Address::abs(0x0), AccessValue::Abs(Address::abs(0x2000)));
        let part = build_accesses(
            &cfg,
            &cache,
            &memory,
            Address::abs(0x8000),
            &FixedProvider(values),
        );
        assert!(part.accesses.is_empty());
    }

    #[test]
    fn test_wide_range_degrades_to_any() {
        let cache = data_cache(); // 4 sets, 16-byte lines
        let memory = Memory::flat(2, 2);
        let mut cfg = Cfg::new(0, "f".to_string(), Address::abs(0));
        let ld = load_inst(0x0, vec![]);
        let b = cfg.add_block(BlockKind::Basic { insts: vec![ld] });
        cfg.add_edge(cfg.entry, b, EdgeKind::NotTaken);
        cfg.add_edge(b, cfg.exit, EdgeKind::NotTaken);
        let mut values = HashMap::new();
        values.insert(
            Address::abs(0x0),
            AccessValue::Range(Address::abs(0x1000), Address::abs(0x1100)),
        );
        let part = build_accesses(
            &cfg,
            &cache,
            &memory,
            Address::abs(0x8000),
            &FixedProvider(values),
        );
        assert_eq!(part.accesses[0].kind, DataAccessKind::Any);
    }
}
