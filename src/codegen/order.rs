use ahash::AHashMap;
use std::collections::BTreeSet;

/// Kahn's algorithm over `nodes` (declaration order) and `edges`. Among the nodes that
/// are ready at any point, the one declared first goes next, so the order is
/// deterministic.
///
/// Returns positions into `nodes`, or the names of the nodes left over when the
/// graph has a cycle.
pub fn execution_order(nodes: &[&str], edges: &[(&str, &str)]) -> Result<Vec<usize>, Vec<String>> {
    let position: AHashMap<&str, usize> = nodes.iter().enumerate().map(|(i, n)| (*n, i)).collect();
    let mut in_degree = vec![0usize; nodes.len()];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for (from, to) in edges {
        let (Some(&from), Some(&to)) = (position.get(from), position.get(to)) else {
            continue;
        };
        if !successors[from].contains(&to) {
            successors[from].push(to);
            in_degree[to] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &successor in &successors[next] {
            in_degree[successor] -= 1;
            if in_degree[successor] == 0 {
                ready.insert(successor);
            }
        }
    }

    if order.len() == nodes.len() {
        Ok(order)
    } else {
        Err((0..nodes.len())
            .filter(|i| in_degree[*i] > 0)
            .map(|i| nodes[i].to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_follow_declaration_order() {
        let order = execution_order(&["c", "a", "b"], &[]).unwrap();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn dependencies_come_first() {
        let order = execution_order(&["late", "early"], &[("early", "late")]).unwrap();
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn cycle_reports_remaining_nodes() {
        let remaining =
            execution_order(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("c", "b")]).unwrap_err();
        assert_eq!(remaining, vec!["b", "c"]);
    }
}
