//! WCET Analysis Core
//!
//! Static worst-case execution-time analysis for embedded real-time
//! binaries: CFG reconstruction from disassembled instructions, abstract
//! interpretation of instruction/data caches and branch prediction, and
//! WCET computation by implicit path enumeration (IPET) over an integer
//! linear program.
//!
//! Binary loading, disassembly and flow-fact parsing stay outside this
//! crate; callers supply them through the `prog::InstructionProvider`
//! contract, the `hard::Platform` description and the in-memory
//! `prog::flowfact::FlowFacts` store.
//!
//! # Typical Use
//! ```ignore
//! let mut ws = Workspace::new(Box::new(loader), platform);
//! ws.entries.push(("main".to_string(), entry_address));
//! ws.flow_facts.set_loop_bound(header_address, 10);
//! let wcet = pipeline::compute_wcet(&mut ws)?;
//! ```

pub mod ai;
pub mod branch;
pub mod cache;
pub mod cfg;
pub mod dcache;
pub mod error;
pub mod hard;
pub mod icache;
pub mod ilp;
pub mod ipet;
pub mod pipeline;
pub mod prog;
pub mod timing;

// Re-export commonly used types
pub use error::{AnalysisError, Result};
pub use pipeline::{compute_wcet, Pipeline};
pub use prog::workspace::{AnalysisConfig, Workspace};
pub use prog::{Address, Inst, InstKind, InstructionProvider};
