//! Exact settlement of the defaulting set.
//!
//! Once the defaulting set is known, the ratios of its members solve a
//! linear system: each member pays out its own resources plus what the
//! other members and the rest of the network pay it. Plain rounds only
//! approach that solution geometrically, which never ends in practice for
//! a group of defaulters that mostly owe each other. Settling solves it
//! directly, one strongly connected component at a time, debtors first.

use crate::clearing::bookkeeping::DefaultBook;
use crate::core::node::NodeId;
use crate::core::numeric::{clamped_ratio, CompensatedSum};
use crate::graph::incoming::IncomingIndex;
use crate::graph::liability_graph::LiabilityGraph;
use crate::graph::scc::strongly_connected_components;

/// Components up to this size are solved by elimination; larger ones by
/// Gauss-Seidel sweeps.
pub const DENSE_LIMIT: usize = 256;

/// Largest ratio change a confirming round may show right after a settle
/// and still count as converged (rounding in the elimination).
pub const SETTLED_DRIFT: f64 = 1e-9;

const NOT_LOCAL: usize = usize::MAX;

/// What one settle pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SettleReport {
    pub components: usize,
    /// Components solved by elimination.
    pub eliminated: usize,
    /// Components solved by sweeps (too large, or singular).
    pub swept: usize,
    /// Largest ratio reduction applied.
    pub max_change: f64,
}

/// Replace the ratios of every short or defaulting node with its exact
/// clearing ratio, given the current ratios of everyone else.
///
/// Ratios only ever go down: each member is capped at its current ratio
/// and floored at 0. A member whose solution falls outside that range is
/// pinned to the bound and the rest of its component is solved again.
pub fn settle_defaulting_set(
    graph: &LiabilityGraph,
    incoming: &IncomingIndex,
    book: &DefaultBook,
    ratios: &mut [f64],
    tolerance: f64,
    sweep_limit: u32,
) -> SettleReport {
    let components = {
        let current: &[f64] = ratios;
        strongly_connected_components(graph, |node: NodeId| {
            !graph.is_sink(node)
                && graph.nominal_obligation(node) > 0.0
                && (book.is_in_default(node) || current[node.index()] < 1.0)
        })
    };

    let mut report = SettleReport {
        components: components.len(),
        ..Default::default()
    };
    let mut local = vec![NOT_LOCAL; graph.node_count()];

    for component in &components {
        let caps: Vec<f64> = component.iter().map(|node| ratios[node.index()]).collect();
        for (k, node) in component.iter().enumerate() {
            local[node.index()] = k;
        }

        let solved = if component.len() <= DENSE_LIMIT {
            let system = Component {
                graph,
                incoming,
                members: component,
                local: &local,
            };
            let free = vec![None; component.len()];
            match system.eliminate(&caps, ratios, free) {
                Some(solution) => Some(solution),
                None => system.drain(ratios),
            }
        } else {
            None
        };
        match solved {
            Some(solution) => {
                report.eliminated += 1;
                for ((node, cap), p) in component.iter().zip(&caps).zip(solution) {
                    ratios[node.index()] = p.clamp(0.0, *cap);
                }
            }
            None => {
                report.swept += 1;
                sweep(graph, incoming, component, ratios, tolerance, sweep_limit);
            }
        }

        for (node, cap) in component.iter().zip(&caps) {
            report.max_change = report.max_change.max(cap - ratios[node.index()]);
            local[node.index()] = NOT_LOCAL;
        }
    }
    report
}

/// One strongly connected component and how to find its members.
struct Component<'a> {
    graph: &'a LiabilityGraph,
    incoming: &'a IncomingIndex,
    members: &'a [NodeId],
    /// Position of each node within `members`, or `NOT_LOCAL`.
    local: &'a [usize],
}

impl Component<'_> {
    /// Solve by Gaussian elimination with bound pinning, starting from
    /// the given pins.
    ///
    /// Returns `None` when the system is singular, or when a pinned member
    /// would not actually sit at its bound given the others.
    fn eliminate(
        &self,
        caps: &[f64],
        ratios: &[f64],
        mut pinned: Vec<Option<f64>>,
    ) -> Option<Vec<f64>> {
        let k = self.members.len();

        loop {
            let free: Vec<usize> = (0..k).filter(|&r| pinned[r].is_none()).collect();
            let m = free.len();
            let mut slot = vec![NOT_LOCAL; k];
            for (s, &r) in free.iter().enumerate() {
                slot[r] = s;
            }

            let mut matrix = vec![0.0; m * m];
            let mut rhs = vec![0.0; m];
            for (s, &r) in free.iter().enumerate() {
                let node = self.members[r];
                matrix[s * m + s] += self.graph.nominal_obligation(node);
                let mut known = CompensatedSum::new();
                known.add(self.graph.own_resources(node));
                let (debtors, amounts) = self.incoming.incoming(node);
                for (debtor, &amount) in debtors.iter().zip(amounts) {
                    match self.local[debtor.index()] {
                        NOT_LOCAL => known.add(amount * ratios[debtor.index()]),
                        q => match pinned[q] {
                            Some(p) => known.add(amount * p),
                            None => matrix[s * m + slot[q]] -= amount,
                        },
                    }
                }
                rhs[s] = known.value();
            }

            let solution = solve_linear(matrix, rhs, m)?;
            let mut repinned = false;
            for (s, &r) in free.iter().enumerate() {
                if solution[s] < 0.0 {
                    pinned[r] = Some(0.0);
                    repinned = true;
                } else if solution[s] > caps[r] {
                    pinned[r] = Some(caps[r]);
                    repinned = true;
                }
            }
            if repinned {
                continue;
            }

            let full: Vec<f64> = (0..k)
                .map(|r| pinned[r].unwrap_or_else(|| solution[slot[r]]))
                .collect();
            let holds = (0..k).all(|r| match pinned[r] {
                Some(bound) => {
                    let reachable = self.ratio_given(r, &full, ratios);
                    if bound >= caps[r] {
                        reachable >= bound - SETTLED_DRIFT
                    } else {
                        reachable <= SETTLED_DRIFT
                    }
                }
                None => true,
            });
            return holds.then_some(full);
        }
    }

    /// A closed loop of debt: payments only circulate among the members,
    /// so the system is singular and any shortfall drains the whole loop.
    ///
    /// One Gauss-Seidel pass shows which way the loop is draining. The
    /// member that would run dry first is pinned at 0, which leaves a
    /// regular system for the rest.
    fn drain(&self, ratios: &mut [f64]) -> Option<Vec<f64>> {
        let before: Vec<f64> = self.members.iter().map(|node| ratios[node.index()]).collect();
        for &node in self.members {
            let i = node.index();
            let resources = self.graph.own_resources(node) + self.incoming.inflow(node, ratios);
            ratios[i] = clamped_ratio(resources, self.graph.nominal_obligation(node)).min(ratios[i]);
        }
        let after: Vec<f64> = self.members.iter().map(|node| ratios[node.index()]).collect();

        let first_dry = before
            .iter()
            .zip(&after)
            .enumerate()
            .filter(|(_, (b, a))| b > a)
            .map(|(r, (b, a))| (r, a / (b - a)))
            .min_by(|x, y| x.1.total_cmp(&y.1))
            .map(|(r, _)| r);
        let Some(dry) = first_dry else {
            // Nothing moved: the loop is already balanced.
            return Some(after);
        };

        let mut pinned = vec![None; self.members.len()];
        pinned[dry] = Some(0.0);
        self.eliminate(&after, ratios, pinned)
    }

    /// Ratio member `r` could pay if the component paid `solution`.
    fn ratio_given(&self, r: usize, solution: &[f64], ratios: &[f64]) -> f64 {
        let node = self.members[r];
        let mut resources = CompensatedSum::new();
        resources.add(self.graph.own_resources(node));
        let (debtors, amounts) = self.incoming.incoming(node);
        for (debtor, &amount) in debtors.iter().zip(amounts) {
            let p = match self.local[debtor.index()] {
                NOT_LOCAL => ratios[debtor.index()],
                q => solution[q],
            };
            resources.add(amount * p);
        }
        clamped_ratio(resources.value(), self.graph.nominal_obligation(node))
    }
}

/// Gauss-Seidel sweeps over one component until no ratio moves by more
/// than `tolerance`, or `sweep_limit` sweeps have run.
fn sweep(
    graph: &LiabilityGraph,
    incoming: &IncomingIndex,
    component: &[NodeId],
    ratios: &mut [f64],
    tolerance: f64,
    sweep_limit: u32,
) {
    for _ in 0..sweep_limit {
        let mut change: f64 = 0.0;
        for &node in component {
            let i = node.index();
            let resources = graph.own_resources(node) + incoming.inflow(node, ratios);
            let next = clamped_ratio(resources, graph.nominal_obligation(node)).min(ratios[i]);
            change = change.max(ratios[i] - next);
            ratios[i] = next;
        }
        if change <= tolerance {
            return;
        }
    }
}

/// Solve the `m × m` row-major system `matrix · x = rhs` with partial
/// pivoting. `None` if a pivot vanishes relative to the largest entry.
fn solve_linear(mut matrix: Vec<f64>, mut rhs: Vec<f64>, m: usize) -> Option<Vec<f64>> {
    let scale = matrix.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if m > 0 && scale == 0.0 {
        return None;
    }
    let singular = scale * 1e-12;

    for col in 0..m {
        let pivot = (col..m).max_by(|&a, &b| {
            matrix[a * m + col]
                .abs()
                .total_cmp(&matrix[b * m + col].abs())
        })?;
        if matrix[pivot * m + col].abs() <= singular {
            return None;
        }
        if pivot != col {
            for c in 0..m {
                matrix.swap(pivot * m + c, col * m + c);
            }
            rhs.swap(pivot, col);
        }
        let diagonal = matrix[col * m + col];
        for row in col + 1..m {
            let factor = matrix[row * m + col] / diagonal;
            if factor == 0.0 {
                continue;
            }
            for c in col..m {
                matrix[row * m + c] -= factor * matrix[col * m + c];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = vec![0.0; m];
    for row in (0..m).rev() {
        let mut acc = rhs[row];
        for c in row + 1..m {
            acc -= matrix[row * m + c] * x[c];
        }
        x[row] = acc / matrix[row * m + row];
    }
    Some(x)
}
