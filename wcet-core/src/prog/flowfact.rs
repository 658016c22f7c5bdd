//! Flow Facts
//!
//! In-memory store for externally supplied control-flow constraints: loop
//! bounds and indirect-branch targets. Textual flow-fact parsing lives
//! outside the core; callers fill this store before running the pipeline.

use crate::prog::Address;
use std::collections::HashMap;

/// Flow-fact collaborator store.
#[derive(Debug, Clone, Default)]
pub struct FlowFacts {
    /// Maximum iteration count per loop-header instruction address
    loop_bounds: HashMap<Address, u32>,
    /// Declared targets per indirect-branch instruction address
    branch_targets: HashMap<Address, Vec<Address>>,
}

impl FlowFacts {
    pub fn new() -> Self {
        FlowFacts::default()
    }

    /// Declare the maximum iteration count of the loop headed at `header`.
    ///
    /// The bound counts back-edge traversals per loop entry.
    pub fn set_loop_bound(&mut self, header: Address, max_iterations: u32) {
        self.loop_bounds.insert(header, max_iterations);
    }

    /// Declare the possible targets of the indirect branch at `branch`.
    pub fn add_branch_target(&mut self, branch: Address, target: Address) {
        self.branch_targets.entry(branch).or_default().push(target);
    }

    /// Maximum iteration count for the loop headed at `header`, if declared.
    pub fn loop_bound(&self, header: Address) -> Option<u32> {
        self.loop_bounds.get(&header).copied()
    }

    /// Declared targets of the indirect branch at `branch`.
    pub fn branch_targets(&self, branch: Address) -> &[Address] {
        self.branch_targets
            .get(&branch)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}
