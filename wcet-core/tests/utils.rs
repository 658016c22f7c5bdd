//! Test Utilities
//!
//! Mock instruction provider and small instruction constructors shared by
//! the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use wcet_core::error::{AnalysisError, Result};
use wcet_core::prog::{sem, Address, Inst, InstKind, InstructionProvider};

/// Route `log` output to the test harness (`RUST_LOG=debug cargo test`).
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Instruction provider backed by a hash table, standing in for a loaded
/// binary.
pub struct TableProvider {
    insts: HashMap<Address, Inst>,
    labels: HashMap<String, Address>,
    sp: Address,
}

impl TableProvider {
    pub fn new() -> Self {
        TableProvider {
            insts: HashMap::new(),
            labels: HashMap::new(),
            sp: Address::abs(0x7fff_0000),
        }
    }

    pub fn with_sp(mut self, sp: Address) -> Self {
        self.sp = sp;
        self
    }

    pub fn push(&mut self, inst: Inst) -> &mut Self {
        self.insts.insert(inst.address, inst);
        self
    }

    pub fn label(&mut self, name: &str, address: Address) -> &mut Self {
        self.labels.insert(name.to_string(), address);
        self
    }
}

impl InstructionProvider for TableProvider {
    fn instruction_at(&self, address: Address) -> Result<Inst> {
        self.insts
            .get(&address)
            .cloned()
            .ok_or(AnalysisError::UnknownInstruction(address))
    }

    fn iterate_in_segment(&self, from: Address) -> Box<dyn Iterator<Item = Inst> + '_> {
        let mut next = Some(from);
        Box::new(std::iter::from_fn(move || {
            let addr = next?;
            let inst = self.insts.get(&addr)?.clone();
            next = Some(inst.next_address());
            Some(inst)
        }))
    }

    fn find_label(&self, name: &str) -> Option<Address> {
        self.labels.get(name).copied()
    }

    fn initial_sp(&self) -> Address {
        self.sp
    }
}

pub fn plain(addr: u32) -> Inst {
    Inst::new(Address::abs(addr), 4, InstKind::INT)
}

pub fn branch(addr: u32, target: u32) -> Inst {
    let mut i = Inst::new(Address::abs(addr), 4, InstKind::BRANCH);
    i.target = Some(Address::abs(target));
    i
}

pub fn cond_branch(addr: u32, target: u32) -> Inst {
    let mut i = Inst::new(Address::abs(addr), 4, InstKind::BRANCH | InstKind::COND);
    i.target = Some(Address::abs(target));
    i
}

pub fn indirect_branch(addr: u32) -> Inst {
    Inst::new(Address::abs(addr), 4, InstKind::BRANCH)
}

pub fn call(addr: u32, target: u32) -> Inst {
    let mut i = Inst::new(Address::abs(addr), 4, InstKind::CALL);
    i.target = Some(Address::abs(target));
    i
}

pub fn ret(addr: u32) -> Inst {
    Inst::new(Address::abs(addr), 4, InstKind::RETURN)
}

/// Load through a register holding a constant address:
/// `r<reg> <- base ; load [r<reg>]`.
pub fn load_abs(addr: u32, reg: i16, base: u32) -> Inst {
    let mut i = Inst::new(Address::abs(addr), 4, InstKind::LOAD | InstKind::INT);
    i.sem = vec![sem::seti(reg, base), sem::load(-1, reg, 4)];
    i.reads.push(reg);
    i
}

/// Store to a stack slot: `r<tmp> <- sp + offset ; store [r<tmp>]`.
pub fn store_stack(addr: u32, sp_reg: i16, offset: u32) -> Inst {
    let mut i = Inst::new(Address::abs(addr), 4, InstKind::STORE | InstKind::INT);
    i.sem = vec![
        sem::seti(-1, offset),
        sem::add(-2, sp_reg, -1),
        sem::store(-3, -2, 4),
    ];
    i.reads.push(sp_reg);
    i
}

/// Dummy test so this helper file passes as its own test binary.
#[test]
fn test_table_provider_round_trip() {
    let mut p = TableProvider::new();
    p.push(plain(0x100));
    p.push(ret(0x104));
    p.label("main", Address::abs(0x100));
    assert_eq!(p.find_label("main"), Some(Address::abs(0x100)));
    assert_eq!(
        p.instruction_at(Address::abs(0x104)).unwrap().kind,
        InstKind::RETURN
    );
    let run: Vec<Inst> = p.iterate_in_segment(Address::abs(0x100)).collect();
    assert_eq!(run.len(), 2);
}
