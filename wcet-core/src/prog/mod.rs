//! Program Model
//!
//! This module provides the uniform instruction abstraction the analyses work
//! on: addresses, instruction records with their kind mask and register sets,
//! and the instruction-provider contract fulfilled by external loaders.
//!
//! # Memory Optimizations
//! - `InstKind` is a `u16` bit mask (1 bit per property instead of an enum set)
//! - Register sets use `SmallVec` (most instructions touch ≤4 registers)
//! - `Address` packs into 8 bytes (page + offset)

pub mod flowfact;
pub mod sem;
pub mod workspace;

use crate::error::Result;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;

/// A machine address: a (page, offset) pair.
///
/// Addresses are totally ordered within a page; arithmetic preserves the
/// page. A distinguished null address exists (`Address::NULL`). Most targets
/// use a single page (0); pages model banked or overlaid address spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    /// Page identifier (0 for flat address spaces)
    pub page: u32,
    /// Offset inside the page
    pub offset: u32,
}

impl Address {
    /// The distinguished null address.
    pub const NULL: Address = Address {
        page: u32::MAX,
        offset: 0,
    };

    /// Build an address from a page and an offset.
    pub const fn new(page: u32, offset: u32) -> Self {
        Address { page, offset }
    }

    /// Build an address in the flat page 0.
    pub const fn abs(offset: u32) -> Self {
        Address { page: 0, offset }
    }

    /// Check against the distinguished null address.
    pub fn is_null(&self) -> bool {
        *self == Address::NULL
    }

    /// Add a byte count, staying in the same page.
    pub fn wrapping_add(self, bytes: u32) -> Self {
        Address {
            page: self.page,
            offset: self.offset.wrapping_add(bytes),
        }
    }

    /// Subtract a byte count, staying in the same page.
    pub fn wrapping_sub(self, bytes: u32) -> Self {
        Address {
            page: self.page,
            offset: self.offset.wrapping_sub(bytes),
        }
    }

    /// Signed displacement, staying in the same page.
    pub fn wrapping_offset(self, delta: i32) -> Self {
        Address {
            page: self.page,
            offset: self.offset.wrapping_add(delta as u32),
        }
    }

    /// Byte distance to a higher address of the same page.
    ///
    /// Returns `None` across pages.
    pub fn distance_to(self, other: Address) -> Option<u32> {
        if self.page == other.page {
            Some(other.offset.wrapping_sub(self.offset))
        } else {
            None
        }
    }
}

impl PartialOrd for Address {
    /// Addresses of different pages are not comparable.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.page == other.page {
            Some(self.offset.cmp(&other.offset))
        } else {
            None
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "<null>")
        } else if self.page == 0 {
            write!(f, "0x{:08x}", self.offset)
        } else {
            write!(f, "{}:0x{:08x}", self.page, self.offset)
        }
    }
}

/// Instruction kind bit mask.
///
/// One bit per property; an instruction may combine several (a conditional
/// call is `BRANCH | COND | CALL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InstKind(pub u16);

impl InstKind {
    /// Control-flow transfer.
    pub const BRANCH: InstKind = InstKind(0x0001);
    /// Execution depends on a condition (branch or predicated instruction).
    pub const COND: InstKind = InstKind(0x0002);
    /// Sub-program call.
    pub const CALL: InstKind = InstKind(0x0004);
    /// Sub-program return.
    pub const RETURN: InstKind = InstKind(0x0008);
    /// Reads memory.
    pub const LOAD: InstKind = InstKind(0x0010);
    /// Writes memory.
    pub const STORE: InstKind = InstKind(0x0020);
    /// Integer operation.
    pub const INT: InstKind = InstKind(0x0040);
    /// Floating-point operation.
    pub const FLOAT: InstKind = InstKind(0x0080);
    /// May raise a trap.
    pub const TRAP: InstKind = InstKind(0x0100);
    /// Internal/system operation.
    pub const INTERN: InstKind = InstKind(0x0200);

    /// Test whether all bits of `other` are set.
    pub fn contains(self, other: InstKind) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_branch(self) -> bool {
        self.contains(InstKind::BRANCH)
    }

    pub fn is_cond(self) -> bool {
        self.contains(InstKind::COND)
    }

    pub fn is_call(self) -> bool {
        self.contains(InstKind::CALL)
    }

    pub fn is_return(self) -> bool {
        self.contains(InstKind::RETURN)
    }

    pub fn is_load(self) -> bool {
        self.contains(InstKind::LOAD)
    }

    pub fn is_store(self) -> bool {
        self.contains(InstKind::STORE)
    }

    pub fn is_mem(self) -> bool {
        self.0 & (InstKind::LOAD.0 | InstKind::STORE.0) != 0
    }

    /// Any instruction ending a basic block.
    pub fn is_control(self) -> bool {
        self.0 & (InstKind::BRANCH.0 | InstKind::CALL.0 | InstKind::RETURN.0 | InstKind::TRAP.0)
            != 0
    }
}

impl std::ops::BitOr for InstKind {
    type Output = InstKind;

    fn bitor(self, rhs: InstKind) -> InstKind {
        InstKind(self.0 | rhs.0)
    }
}

/// An immutable machine instruction record.
///
/// Register indices follow the semantic-sequence convention: non-negative
/// indices are architectural registers, negative indices are temporaries
/// (temporaries never appear in `reads`/`writes`, only inside `sem`).
#[derive(Debug, Clone)]
pub struct Inst {
    /// Instruction address
    pub address: Address,
    /// Size in bytes
    pub size: u32,
    /// Kind bit mask
    pub kind: InstKind,
    /// Direct branch/call target, when statically known
    pub target: Option<Address>,
    /// Architectural registers read
    pub reads: SmallVec<[i16; 4]>,
    /// Architectural registers written
    pub writes: SmallVec<[i16; 2]>,
    /// Lowered semantic sequence (empty when not needed by any analysis)
    pub sem: Vec<sem::SemInst>,
}

impl Inst {
    /// Build a plain instruction with no register or semantic information.
    pub fn new(address: Address, size: u32, kind: InstKind) -> Self {
        Inst {
            address,
            size,
            kind,
            target: None,
            reads: SmallVec::new(),
            writes: SmallVec::new(),
            sem: Vec::new(),
        }
    }

    /// Address of the byte following this instruction.
    pub fn next_address(&self) -> Address {
        self.address.wrapping_add(self.size)
    }

    pub fn is_branch(&self) -> bool {
        self.kind.is_branch()
    }

    pub fn is_cond(&self) -> bool {
        self.kind.is_cond()
    }

    pub fn is_call(&self) -> bool {
        self.kind.is_call()
    }

    pub fn is_return(&self) -> bool {
        self.kind.is_return()
    }

    pub fn is_mem(&self) -> bool {
        self.kind.is_mem()
    }

    pub fn is_control(&self) -> bool {
        self.kind.is_control()
    }

    /// Direct target of a branch or call, `None` for indirect transfers.
    pub fn target(&self) -> Option<Address> {
        self.target
    }
}

/// Instruction provider contract (external collaborator).
///
/// Fulfilled by binary loaders and disassemblers outside the core. The
/// analyses only ever pull instructions through this interface.
pub trait InstructionProvider {
    /// Decode the instruction at an address.
    ///
    /// # Errors
    /// `AnalysisError::UnknownInstruction` when the address lies outside any
    /// executable segment.
    fn instruction_at(&self, address: Address) -> Result<Inst>;

    /// Iterate instructions from an address to the end of its segment.
    fn iterate_in_segment(&self, from: Address) -> Box<dyn Iterator<Item = Inst> + '_>;

    /// Resolve a label to its address.
    fn find_label(&self, name: &str) -> Option<Address>;

    /// Initial stack pointer value of the task.
    fn initial_sp(&self) -> Address;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_ordering_within_page() {
        let a = Address::abs(0x1000);
        let b = Address::abs(0x1004);
        assert!(a < b);
        assert_eq!(a.distance_to(b), Some(4));
    }

    #[test]
    fn test_address_cross_page_not_ordered() {
        let a = Address::new(0, 0x1000);
        let b = Address::new(1, 0x1000);
        assert_eq!(a.partial_cmp(&b), None);
        assert_eq!(a.distance_to(b), None);
    }

    #[test]
    fn test_address_null() {
        assert!(Address::NULL.is_null());
        assert!(!Address::abs(0).is_null());
    }

    #[test]
    fn test_kind_mask() {
        let kind = InstKind::BRANCH | InstKind::COND;
        assert!(kind.is_branch());
        assert!(kind.is_cond());
        assert!(!kind.is_call());
        assert!(kind.is_control());
        assert!(!InstKind::INT.is_control());
    }
}
