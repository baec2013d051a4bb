use std::collections::{BTreeMap, BTreeSet};

use ckd_ledger::AllocationMap;

/// Directed wait-for graph over order ids.
///
/// Nodes are indices into a sorted name table; adjacency lists are sorted
/// and deduplicated, so traversal order is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitForGraph {
    names: Vec<String>,
    adjacency: Vec<Vec<usize>>,
}

impl WaitForGraph {
    /// Build from holder allocations and pending requests.
    ///
    /// Nodes: every holder and every requester. Edge `A -> B` when `A`
    /// requests a positive quantity of a resource `B` holds a positive
    /// quantity of, and `A != B`. The held quantity is not compared with the
    /// requested one: any holder of the resource blocks the requester.
    pub fn build(allocations: &AllocationMap, requests: &AllocationMap) -> Self {
        let names: Vec<String> = allocations
            .keys()
            .chain(requests.keys())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let index: BTreeMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();

        let mut adjacency: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); names.len()];
        for (waiter, wanted) in requests {
            let from = index[waiter.as_str()];
            for (res, &qty) in wanted {
                if qty <= 0 {
                    continue;
                }
                for (holder, held) in allocations {
                    if holder != waiter && held.get(res).copied().unwrap_or(0) > 0 {
                        adjacency[from].insert(index[holder.as_str()]);
                    }
                }
            }
        }

        Self {
            names,
            adjacency: adjacency
                .into_iter()
                .map(|s| s.into_iter().collect())
                .collect(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.names.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum()
    }

    /// Order ids, sorted.
    pub fn nodes(&self) -> &[String] {
        &self.names
    }

    /// `(waiter, holder)` pairs.
    pub fn edges(&self) -> Vec<(String, String)> {
        self.adjacency
            .iter()
            .enumerate()
            .flat_map(|(from, tos)| {
                tos.iter()
                    .map(move |&to| (self.names[from].clone(), self.names[to].clone()))
            })
            .collect()
    }

    /// One cycle per DFS root that reaches one.
    ///
    /// Roots are visited in id order, skipping nodes an earlier root already
    /// reached. When the walk meets a neighbor that is on the current path,
    /// the cycle is the path from that neighbor through the current node,
    /// and the walk for this root stops. Not every cycle of a densely cyclic
    /// component is enumerated.
    pub fn detect_cycles(&self) -> Vec<BTreeSet<String>> {
        let n = self.names.len();
        let mut visited = vec![false; n];
        let mut on_path = vec![false; n];
        let mut cycles = Vec::new();

        for root in 0..n {
            if visited[root] {
                continue;
            }

            // Frame: (node, index of next neighbor to try). The frame stack is
            // the current DFS path.
            let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
            visited[root] = true;
            on_path[root] = true;
            let mut found: Option<BTreeSet<String>> = None;

            while let Some(frame) = frames.last_mut() {
                let (node, next) = *frame;
                let Some(&neighbor) = self.adjacency[node].get(next) else {
                    on_path[node] = false;
                    frames.pop();
                    continue;
                };
                frame.1 += 1;

                if !visited[neighbor] {
                    visited[neighbor] = true;
                    on_path[neighbor] = true;
                    frames.push((neighbor, 0));
                } else if on_path[neighbor] {
                    let start = frames
                        .iter()
                        .position(|&(p, _)| p == neighbor)
                        .unwrap_or(0);
                    found = Some(
                        frames[start..]
                            .iter()
                            .map(|&(p, _)| self.names[p].clone())
                            .collect(),
                    );
                    break;
                }
            }

            for &(p, _) in &frames {
                on_path[p] = false;
            }
            if let Some(cycle) = found {
                cycles.push(cycle);
            }
        }

        cycles
    }
}

/// Build the wait-for graph and extract its cycles.
pub fn detect(allocations: &AllocationMap, requests: &AllocationMap) -> Vec<BTreeSet<String>> {
    WaitForGraph::build(allocations, requests).detect_cycles()
}

/// Union of all cycle members.
pub fn deadlocked_orders(cycles: &[BTreeSet<String>]) -> BTreeSet<String> {
    cycles.iter().flatten().cloned().collect()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ckd_ledger::resource_map;

    fn alloc(items: &[(&str, &[(&str, i64)])]) -> AllocationMap {
        items
            .iter()
            .map(|(id, res)| (id.to_string(), resource_map(res.iter().copied())))
            .collect()
    }

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn two_order_cycle_is_found() {
        let held = alloc(&[("A", &[("Oven", 1)]), ("B", &[("Chef", 1)])]);
        let wanted = alloc(&[("A", &[("Chef", 1)]), ("B", &[("Oven", 1)])]);
        assert_eq!(detect(&held, &wanted), vec![set(&["A", "B"])]);
    }

    #[test]
    fn no_overlap_no_cycle() {
        let held = alloc(&[("A", &[("Oven", 1)])]);
        let wanted = alloc(&[("B", &[("Chef", 1)])]);
        let g = WaitForGraph::build(&held, &wanted);
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.edge_count(), 0);
        assert!(g.detect_cycles().is_empty());
    }

    #[test]
    fn edge_added_even_when_holder_has_less_than_requested() {
        let held = alloc(&[("A", &[("Chef", 1)])]);
        let wanted = alloc(&[("B", &[("Chef", 5)])]);
        let g = WaitForGraph::build(&held, &wanted);
        assert_eq!(g.edges(), vec![("B".to_string(), "A".to_string())]);
    }

    #[test]
    fn order_never_waits_on_itself() {
        let held = alloc(&[("A", &[("Oven", 1)])]);
        let wanted = alloc(&[("A", &[("Oven", 1)])]);
        let g = WaitForGraph::build(&held, &wanted);
        assert_eq!(g.edge_count(), 0);
        assert!(g.detect_cycles().is_empty());
    }

    #[test]
    fn zero_quantity_request_creates_no_edge() {
        let held = alloc(&[("A", &[("Oven", 1)])]);
        let wanted = alloc(&[("B", &[("Oven", 0)])]);
        assert_eq!(WaitForGraph::build(&held, &wanted).edge_count(), 0);
    }

    #[test]
    fn cycle_excludes_tail_leading_into_it() {
        // A -> B -> C -> B: A waits on the cycle but is not part of it.
        let held = alloc(&[("B", &[("Chef", 1)]), ("C", &[("Oven", 1)])]);
        let wanted = alloc(&[
            ("A", &[("Chef", 1)]),
            ("B", &[("Oven", 1)]),
            ("C", &[("Chef", 1)]),
        ]);
        assert_eq!(detect(&held, &wanted), vec![set(&["B", "C"])]);
    }

    #[test]
    fn disjoint_cycles_each_reported() {
        let held = alloc(&[
            ("A", &[("Oven", 1)]),
            ("B", &[("Chef", 1)]),
            ("X", &[("Bike", 1)]),
            ("Y", &[("Ingredients", 1)]),
        ]);
        let wanted = alloc(&[
            ("A", &[("Chef", 1)]),
            ("B", &[("Oven", 1)]),
            ("X", &[("Ingredients", 1)]),
            ("Y", &[("Bike", 1)]),
        ]);
        let cycles = detect(&held, &wanted);
        assert_eq!(cycles, vec![set(&["A", "B"]), set(&["X", "Y"])]);
        assert_eq!(deadlocked_orders(&cycles), set(&["A", "B", "X", "Y"]));
    }

    #[test]
    fn root_after_abandoned_walk_starts_clean() {
        // Root A finds A<->B and stops with C unvisited. C -> A must not be
        // mistaken for a back edge on a stale path.
        let held = alloc(&[("A", &[("Oven", 1)]), ("B", &[("Chef", 1)])]);
        let wanted = alloc(&[
            ("A", &[("Chef", 1)]),
            ("B", &[("Oven", 1)]),
            ("C", &[("Oven", 1)]),
        ]);
        assert_eq!(detect(&held, &wanted), vec![set(&["A", "B"])]);
    }

    #[test]
    fn long_chain_does_not_recurse() {
        // Order i holds R{i} and waits on R{i+1}; the last waits on R0.
        let n = 10_000;
        let mut held = AllocationMap::new();
        let mut wanted = AllocationMap::new();
        for i in 0..n {
            let id = format!("O{i:05}");
            held.insert(id.clone(), resource_map([(format!("R{i}"), 1)]));
            wanted.insert(id, resource_map([(format!("R{}", (i + 1) % n), 1)]));
        }
        let cycles = detect(&held, &wanted);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), n);
    }
}
