//! Semantic Instruction Sequences
//!
//! Each machine instruction lowers to a short sequence of semantic micro-ops
//! over virtual registers. Data-flow analyses (notably the stack address
//! analysis feeding the data cache) interpret these sequences instead of
//! decoding target-specific instruction formats.
//!
//! Register convention: non-negative indices name architectural registers,
//! negative indices name temporaries local to one sequence.

use std::fmt;

/// Semantic micro-operation opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SemOp {
    /// No operation
    Nop = 0,
    /// Branch on the address held in register `a`
    Branch,
    /// Raise a trap
    Trap,
    /// Continue in sequence
    Cont,
    /// If condition `cond` holds in register `a`, continue; else skip `b` ops
    If,
    /// `d <- MEM_b(a)`
    Load,
    /// `MEM_b(a) <- d`
    Store,
    /// `d <- T` (unknown value)
    Scratch,
    /// `d <- a`
    Set,
    /// `d <- cst`
    Seti,
    /// `page(d) <- cst`
    Setp,
    /// `d <- a ~ b` (signed compare)
    Cmp,
    /// `d <- a ~u b` (unsigned compare)
    Cmpu,
    /// `d <- a + b`
    Add,
    /// `d <- a - b`
    Sub,
    /// `d <- a << b`
    Shl,
    /// `d <- a >> b` (logical)
    Shr,
    /// `d <- a +>> b` (arithmetic)
    Asr,
}

/// Comparison conditions used by `If` and `Trap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SemCond {
    NoCond = 0,
    Eq,
    Lt,
    Le,
    Ge,
    Gt,
    AnyCond = 8,
    Ne,
    Ult,
    Ule,
    Uge,
    Ugt,
}

/// One semantic micro-op.
///
/// `d`, `a`, `b` are virtual register indices; `cst` carries the immediate of
/// `Seti`/`Setp`. For `If`, `d` holds the condition, `a` the compared
/// register and `b` the skip count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemInst {
    pub op: SemOp,
    pub d: i16,
    pub a: i16,
    pub b: i16,
    pub cst: u32,
}

impl SemInst {
    fn raw(op: SemOp, d: i16, a: i16, b: i16, cst: u32) -> Self {
        SemInst { op, d, a, b, cst }
    }
}

pub fn nop() -> SemInst {
    SemInst::raw(SemOp::Nop, 0, 0, 0, 0)
}

pub fn branch(to: i16) -> SemInst {
    SemInst::raw(SemOp::Branch, to, 0, 0, 0)
}

pub fn trap(cond: SemCond) -> SemInst {
    SemInst::raw(SemOp::Trap, cond as i16, 0, 0, 0)
}

pub fn cont() -> SemInst {
    SemInst::raw(SemOp::Cont, 0, 0, 0, 0)
}

pub fn cond_skip(cond: SemCond, sr: i16, jump: i16) -> SemInst {
    SemInst::raw(SemOp::If, cond as i16, sr, jump, 0)
}

pub fn load(d: i16, a: i16, size: i16) -> SemInst {
    SemInst::raw(SemOp::Load, d, a, size, 0)
}

pub fn store(d: i16, a: i16, size: i16) -> SemInst {
    SemInst::raw(SemOp::Store, d, a, size, 0)
}

pub fn scratch(d: i16) -> SemInst {
    SemInst::raw(SemOp::Scratch, d, 0, 0, 0)
}

pub fn set(d: i16, a: i16) -> SemInst {
    SemInst::raw(SemOp::Set, d, a, 0, 0)
}

pub fn seti(d: i16, cst: u32) -> SemInst {
    SemInst::raw(SemOp::Seti, d, 0, 0, cst)
}

pub fn setp(d: i16, cst: u32) -> SemInst {
    SemInst::raw(SemOp::Setp, d, 0, 0, cst)
}

pub fn cmp(d: i16, a: i16, b: i16) -> SemInst {
    SemInst::raw(SemOp::Cmp, d, a, b, 0)
}

pub fn cmpu(d: i16, a: i16, b: i16) -> SemInst {
    SemInst::raw(SemOp::Cmpu, d, a, b, 0)
}

pub fn add(d: i16, a: i16, b: i16) -> SemInst {
    SemInst::raw(SemOp::Add, d, a, b, 0)
}

pub fn sub(d: i16, a: i16, b: i16) -> SemInst {
    SemInst::raw(SemOp::Sub, d, a, b, 0)
}

pub fn shl(d: i16, a: i16, b: i16) -> SemInst {
    SemInst::raw(SemOp::Shl, d, a, b, 0)
}

pub fn shr(d: i16, a: i16, b: i16) -> SemInst {
    SemInst::raw(SemOp::Shr, d, a, b, 0)
}

pub fn asr(d: i16, a: i16, b: i16) -> SemInst {
    SemInst::raw(SemOp::Asr, d, a, b, 0)
}

impl fmt::Display for SemInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            SemOp::Nop => write!(f, "nop"),
            SemOp::Branch => write!(f, "branch r{}", self.d),
            SemOp::Trap => write!(f, "trap"),
            SemOp::Cont => write!(f, "cont"),
            SemOp::If => write!(f, "if c{}, r{}, {}", self.d, self.a, self.b),
            SemOp::Load => write!(f, "load r{}, [r{}], {}", self.d, self.a, self.b),
            SemOp::Store => write!(f, "store r{}, [r{}], {}", self.d, self.a, self.b),
            SemOp::Scratch => write!(f, "scratch r{}", self.d),
            SemOp::Set => write!(f, "set r{}, r{}", self.d, self.a),
            SemOp::Seti => write!(f, "seti r{}, {:#x}", self.d, self.cst),
            SemOp::Setp => write!(f, "setp r{}, {:#x}", self.d, self.cst),
            SemOp::Cmp => write!(f, "cmp r{}, r{}, r{}", self.d, self.a, self.b),
            SemOp::Cmpu => write!(f, "cmpu r{}, r{}, r{}", self.d, self.a, self.b),
            SemOp::Add => write!(f, "add r{}, r{}, r{}", self.d, self.a, self.b),
            SemOp::Sub => write!(f, "sub r{}, r{}, r{}", self.d, self.a, self.b),
            SemOp::Shl => write!(f, "shl r{}, r{}, r{}", self.d, self.a, self.b),
            SemOp::Shr => write!(f, "shr r{}, r{}, r{}", self.d, self.a, self.b),
            SemOp::Asr => write!(f, "asr r{}, r{}, r{}", self.d, self.a, self.b),
        }
    }
}
