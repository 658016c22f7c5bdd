//! Simplex Solver Backend
//!
//! A dense two-phase simplex over the abstract system. IPET systems are
//! network-flow shaped, so the LP relaxation optimum is integral in
//! practice; the solver still verifies nothing about integrality and simply
//! reports the relaxation optimum.
//!
//! Phase 1 minimizes the artificial variables of `=`/`>=` rows to find a
//! feasible basis; phase 2 optimizes the real objective. Bland's rule keeps
//! the iteration cycle-free.

use crate::error::{AnalysisError, Result};
use crate::ilp::{Comparator, Solution, Solver, System};

/// Dense two-phase simplex.
pub struct SimplexSolver {
    pub epsilon: f64,
    pub max_iterations: u32,
}

impl Default for SimplexSolver {
    fn default() -> Self {
        SimplexSolver {
            epsilon: 1e-7,
            max_iterations: 100_000,
        }
    }
}

struct Tableau {
    /// m rows of ncols coefficients
    a: Vec<Vec<f64>>,
    /// Right-hand side, kept non-negative
    b: Vec<f64>,
    /// Basic variable per row
    basis: Vec<usize>,
    ncols: usize,
    /// First artificial column (artificials are never re-entered)
    first_artificial: usize,
    epsilon: f64,
}

impl Tableau {
    fn pivot(&mut self, row: usize, col: usize) {
        let factor = self.a[row][col];
        for value in self.a[row].iter_mut() {
            *value /= factor;
        }
        self.b[row] /= factor;
        for r in 0..self.a.len() {
            if r == row {
                continue;
            }
            let scale = self.a[r][col];
            if scale.abs() <= self.epsilon {
                continue;
            }
            for c in 0..self.ncols {
                let delta = scale * self.a[row][c];
                self.a[r][c] -= delta;
            }
            self.b[r] -= scale * self.b[row];
        }
        self.basis[row] = col;
    }

    /// Reduced costs for a cost vector, pricing out the current basis.
    fn reduced_costs(&self, cost: &[f64]) -> (Vec<f64>, f64) {
        let mut reduced = cost.to_vec();
        let mut objective = 0.0;
        for (row, &bv) in self.basis.iter().enumerate() {
            let cb = cost[bv];
            if cb == 0.0 {
                continue;
            }
            objective += cb * self.b[row];
            for c in 0..self.ncols {
                reduced[c] -= cb * self.a[row][c];
            }
        }
        (reduced, objective)
    }

    /// Minimize `cost` from the current basis. Returns false on
    /// unboundedness.
    fn optimize(&mut self, cost: &[f64], allow_artificials: bool, max_iter: u32) -> Result<bool> {
        for _ in 0..max_iter {
            let (reduced, _) = self.reduced_costs(cost);
            // Bland's rule: smallest improving column index.
            let limit = if allow_artificials {
                self.ncols
            } else {
                self.first_artificial
            };
            let entering = (0..limit).find(|&c| reduced[c] < -self.epsilon);
            let col = match entering {
                Some(c) => c,
                None => return Ok(true),
            };
            // Ratio test, ties broken on the smallest basic variable.
            let mut best: Option<(f64, usize, usize)> = None;
            for row in 0..self.a.len() {
                let coef = self.a[row][col];
                if coef > self.epsilon {
                    let ratio = self.b[row] / coef;
                    let key = (ratio, self.basis[row]);
                    match best {
                        None => best = Some((key.0, key.1, row)),
                        Some((r, _, _)) if key.0 < r - self.epsilon => {
                            best = Some((key.0, key.1, row))
                        }
                        Some((r, bv, _))
                            if (key.0 - r).abs() <= self.epsilon && key.1 < bv =>
                        {
                            best = Some((key.0, key.1, row))
                        }
                        _ => {}
                    }
                }
            }
            match best {
                Some((_, _, row)) => self.pivot(row, col),
                None => return Ok(false),
            }
        }
        Err(AnalysisError::Solver(
            "simplex iteration limit exceeded".to_string(),
        ))
    }
}

impl Solver for SimplexSolver {
    fn solve(&mut self, system: &System) -> Result<Solution> {
        let n = system.count_vars();
        let m = system.count_constraints();

        // Dense rows with per-variable accumulation, right-hand sides made
        // non-negative.
        let mut rows: Vec<(Vec<f64>, f64, Comparator)> = Vec::with_capacity(m);
        for cons in system.constraints() {
            let mut row = vec![0.0; n];
            for (coef, var) in cons.terms.iter() {
                row[*var as usize] += coef;
            }
            let mut rhs = cons.constant;
            let mut comp = cons.comparator;
            if rhs < 0.0 {
                for value in row.iter_mut() {
                    *value = -*value;
                }
                rhs = -rhs;
                comp = match comp {
                    Comparator::Le => Comparator::Ge,
                    Comparator::Eq => Comparator::Eq,
                    Comparator::Ge => Comparator::Le,
                };
            }
            rows.push((row, rhs, comp));
        }

        // Column layout: structural | slacks/surpluses | artificials.
        let slack_count = rows
            .iter()
            .filter(|(_, _, c)| *c != Comparator::Eq)
            .count();
        let artificial_count = rows
            .iter()
            .filter(|(_, _, c)| *c != Comparator::Le)
            .count();
        let ncols = n + slack_count + artificial_count;
        let first_artificial = n + slack_count;

        let mut a = vec![vec![0.0; ncols]; m];
        let mut b = vec![0.0; m];
        let mut basis = vec![0usize; m];
        let mut next_slack = n;
        let mut next_artificial = first_artificial;
        for (i, (row, rhs, comp)) in rows.iter().enumerate() {
            a[i][..n].copy_from_slice(row);
            b[i] = *rhs;
            match comp {
                Comparator::Le => {
                    a[i][next_slack] = 1.0;
                    basis[i] = next_slack;
                    next_slack += 1;
                }
                Comparator::Ge => {
                    a[i][next_slack] = -1.0;
                    next_slack += 1;
                    a[i][next_artificial] = 1.0;
                    basis[i] = next_artificial;
                    next_artificial += 1;
                }
                Comparator::Eq => {
                    a[i][next_artificial] = 1.0;
                    basis[i] = next_artificial;
                    next_artificial += 1;
                }
            }
        }

        let mut tableau = Tableau {
            a,
            b,
            basis,
            ncols,
            first_artificial,
            epsilon: self.epsilon,
        };

        // Phase 1: drive the artificials to zero.
        if artificial_count > 0 {
            let mut phase1 = vec![0.0; ncols];
            for c in first_artificial..ncols {
                phase1[c] = 1.0;
            }
            if !tableau.optimize(&phase1, true, self.max_iterations)? {
                return Err(AnalysisError::Solver(
                    "phase-1 relaxation unbounded".to_string(),
                ));
            }
            let (_, objective) = tableau.reduced_costs(&phase1);
            if objective > self.epsilon {
                return Err(AnalysisError::Infeasible);
            }
            // Pivot surviving artificials out of the basis where possible;
            // rows that resist are redundant and harmless at level zero.
            for row in 0..m {
                if tableau.basis[row] >= first_artificial {
                    if let Some(col) = (0..first_artificial)
                        .find(|&c| tableau.a[row][c].abs() > self.epsilon)
                    {
                        tableau.pivot(row, col);
                    }
                }
            }
        }

        // Phase 2: the real objective (internally minimized).
        let mut cost = vec![0.0; ncols];
        let sign = if system.is_maximizing() { -1.0 } else { 1.0 };
        for (coef, var) in system.objective() {
            cost[*var as usize] += sign * coef;
        }
        if !tableau.optimize(&cost, false, self.max_iterations)? {
            return Err(AnalysisError::Unbounded);
        }

        let mut values = vec![0.0; n];
        for (row, &bv) in tableau.basis.iter().enumerate() {
            if bv < n {
                values[bv] = tableau.b[row];
            }
        }
        let objective = system
            .objective()
            .iter()
            .map(|(coef, var)| coef * values[*var as usize])
            .sum();
        Ok(Solution { objective, values })
    }
}
