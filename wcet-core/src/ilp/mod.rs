//! ILP System
//!
//! The abstract integer-linear-program model the IPET builder fills in:
//! non-negative integer variables, linear constraints and an objective row.
//! Solver back-ends implement the narrow `Solver` trait; solving never
//! mutates the system, so a failed solve leaves it intact for export or for
//! another backend.

pub mod simplex;

use crate::error::Result;
use std::fmt::Write as _;

/// Variable identifier inside one system.
pub type VarId = u32;

/// One decision variable. All variables are integer and non-negative;
/// `name` is present when the system is built in explicit mode.
#[derive(Debug, Clone)]
pub struct Var {
    pub id: VarId,
    pub name: Option<String>,
}

/// Constraint comparators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Le,
    Eq,
    Ge,
}

impl Comparator {
    fn symbol(&self) -> &'static str {
        match self {
            Comparator::Le => "<=",
            Comparator::Eq => "=",
            Comparator::Ge => ">=",
        }
    }
}

/// One linear constraint: `Σ coef·var  ⋚  constant`.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub label: Option<String>,
    pub comparator: Comparator,
    pub constant: f64,
    pub terms: Vec<(f64, VarId)>,
}

/// Solver outcome: the objective value and one optimal assignment.
#[derive(Debug, Clone)]
pub struct Solution {
    pub objective: f64,
    /// Value per variable id
    pub values: Vec<f64>,
}

impl Solution {
    pub fn value_of(&self, var: VarId) -> f64 {
        self.values.get(var as usize).copied().unwrap_or(0.0)
    }
}

/// Solver back-end contract.
///
/// Implementations return `Infeasible`, `Unbounded` or `Solver(..)` through
/// the crate error type and must leave the system untouched.
pub trait Solver {
    fn solve(&mut self, system: &System) -> Result<Solution>;
}

/// The abstract ILP system.
#[derive(Debug, Clone)]
pub struct System {
    maximize: bool,
    vars: Vec<Var>,
    constraints: Vec<Constraint>,
    objective: Vec<(f64, VarId)>,
}

impl System {
    pub fn new(maximize: bool) -> Self {
        System {
            maximize,
            vars: Vec::new(),
            constraints: Vec::new(),
            objective: Vec::new(),
        }
    }

    pub fn is_maximizing(&self) -> bool {
        self.maximize
    }

    /// Create a variable, optionally named.
    pub fn new_var(&mut self, name: Option<String>) -> VarId {
        let id = self.vars.len() as VarId;
        self.vars.push(Var { id, name });
        id
    }

    /// Create an empty constraint `0 ⋚ constant`, returning its index.
    pub fn new_constraint(
        &mut self,
        label: Option<&str>,
        comparator: Comparator,
        constant: f64,
    ) -> usize {
        self.constraints.push(Constraint {
            label: label.map(|s| s.to_string()),
            comparator,
            constant,
            terms: Vec::new(),
        });
        self.constraints.len() - 1
    }

    /// Add `coef·var` to a constraint's left side.
    pub fn add_term(&mut self, constraint: usize, coef: f64, var: VarId) {
        self.constraints[constraint].terms.push((coef, var));
    }

    /// Add `coef·var` to the objective.
    pub fn add_objective_term(&mut self, coef: f64, var: VarId) {
        self.objective.push((coef, var));
    }

    pub fn count_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn count_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn objective(&self) -> &[(f64, VarId)] {
        &self.objective
    }

    pub fn var(&self, id: VarId) -> &Var {
        &self.vars[id as usize]
    }

    /// Printable name of a variable (`x<id>` when anonymous).
    pub fn name_of(&self, id: VarId) -> String {
        match &self.vars[id as usize].name {
            Some(name) => name.clone(),
            None => format!("x{}", id),
        }
    }

    /// Render the system in lp text format for debugging or external
    /// solvers.
    pub fn export_lp(&self) -> String {
        let mut out = String::new();
        let dir = if self.maximize { "max" } else { "min" };
        let _ = write!(out, "{}:", dir);
        for (coef, var) in self.objective.iter() {
            let _ = write!(out, " {:+} {}", coef, self.name_of(*var));
        }
        let _ = writeln!(out, ";");
        for (i, cons) in self.constraints.iter().enumerate() {
            match &cons.label {
                Some(label) => {
                    let _ = write!(out, "/* {} */ c{}:", label, i);
                }
                None => {
                    let _ = write!(out, "c{}:", i);
                }
            }
            for (coef, var) in cons.terms.iter() {
                let _ = write!(out, " {:+} {}", coef, self.name_of(*var));
            }
            let _ = writeln!(out, " {} {};", cons.comparator.symbol(), cons.constant);
        }
        let _ = write!(out, "int");
        for var in self.vars.iter() {
            let _ = write!(out, " {}", self.name_of(var.id));
        }
        let _ = writeln!(out, ";");
        out
    }

    /// Render the solution per named variable, for reporting.
    pub fn dump_solution(&self, solution: &Solution) -> String {
        let mut out = String::new();
        for var in self.vars.iter() {
            let _ = writeln!(
                out,
                "{} = {}",
                self.name_of(var.id),
                solution.value_of(var.id)
            );
        }
        out
    }
}
