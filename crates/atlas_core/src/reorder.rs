//! Precedence-based branch reordering.
//!
//! Computes one permutation of branch indices, applied uniformly across the
//! whole grid, so that branches satisfying the highest-precedence class come
//! first. A branch's standing in a class is the number of grid points at
//! which it satisfies the class; ties fall through to the next class and
//! finally to the original index, keeping the result deterministic.

use anyhow::{bail, Result};

use crate::classify::ClassLabels;
use crate::solutions::SolutionGrid;

/// Reorders the solution grid and every stored class array with one shared
/// branch permutation. Applying it to only one of the two would desynchronize
/// labels from branches, so both happen here or not at all.
pub fn order_branches(
    solutions: &mut SolutionGrid,
    classes: &mut [ClassLabels],
    precedence: &[&str],
) -> Result<()> {
    let branch_count = solutions.branch_count();
    if branch_count == 0 {
        return Ok(());
    }

    let mut scores: Vec<Vec<usize>> = vec![Vec::with_capacity(precedence.len()); branch_count];
    for name in precedence {
        let class = classes
            .iter()
            .find(|c| &c.name == name)
            .ok_or_else(|| anyhow::anyhow!("no classification named `{}` is stored", name))?;
        for branch in 0..branch_count {
            let satisfied = class
                .labels
                .iter()
                .filter(|row| row.get(branch).copied().unwrap_or(false))
                .count();
            scores[branch].push(satisfied);
        }
    }

    let mut permutation: Vec<usize> = (0..branch_count).collect();
    permutation.sort_by(|&a, &b| scores[b].cmp(&scores[a]).then(a.cmp(&b)));

    if permutation.iter().enumerate().all(|(slot, &b)| slot == b) {
        return Ok(());
    }

    for i in 0..solutions.len() {
        let point = solutions.point_mut(i);
        if point.len() != branch_count {
            bail!("solution grid must be aligned before branch reordering");
        }
        *point = permutation.iter().map(|&b| point[b].clone()).collect();
    }
    for class in classes.iter_mut() {
        for row in &mut class.labels {
            *row = permutation.iter().map(|&b| row[b]).collect();
        }
    }
    Ok(())
}
