/// Exhaustive combinatorial search for a subset of candidate amounts
/// summing to a target, used when ordered accumulation fails.
///
/// Depth-first over include/exclude branches in candidate order, with an
/// explicit frame stack instead of recursion so large candidate pools
/// cannot overflow the call stack. Branches whose partial sum already
/// exceeds target + tolerance are pruned; the first branch landing
/// within tolerance terminates the search.
#[derive(Debug)]
pub struct SearchOutcome {
    /// Indices into the candidate slice, in candidate order.
    pub found: Option<Vec<usize>>,
    pub nodes_visited: u64,
    pub nodes_pruned: u64,
    pub cap_hit: bool,
}

pub fn search(amounts: &[i64], target: i64, tolerance: i64, max_nodes: u64) -> SearchOutcome {
    let mut nodes_visited: u64 = 0;
    let mut nodes_pruned: u64 = 0;

    // Frame: (next candidate, partial sum, path length before this node,
    // candidate included on entering this node). The shared `chosen`
    // vector is rewound to `base_len` on every pop.
    let mut stack: Vec<(usize, i64, usize, Option<usize>)> = vec![(0, 0, 0, None)];
    let mut chosen: Vec<usize> = Vec::new();

    while let Some((start, sum, base_len, included)) = stack.pop() {
        chosen.truncate(base_len);
        if let Some(idx) = included {
            chosen.push(idx);
        }

        nodes_visited += 1;
        if nodes_visited > max_nodes {
            return SearchOutcome {
                found: None,
                nodes_visited,
                nodes_pruned,
                cap_hit: true,
            };
        }

        if (sum - target).abs() <= tolerance && !chosen.is_empty() {
            return SearchOutcome {
                found: Some(chosen),
                nodes_visited,
                nodes_pruned,
                cap_hit: false,
            };
        }
        if sum > target + tolerance {
            nodes_pruned += 1;
            continue;
        }
        if start >= amounts.len() {
            continue;
        }

        let len = chosen.len();
        // Exclude pushed first so the include branch is explored first.
        stack.push((start + 1, sum, len, None));
        stack.push((start + 1, sum + amounts[start], len, Some(start)));
    }

    SearchOutcome {
        found: None,
        nodes_visited,
        nodes_pruned,
        cap_hit: false,
    }
}
