use crate::ir::{ParentRef, Workflow};
use crate::validator::{Diagnostic, DiagnosticCode, RuleContext, ValidationRule};
use ahash::{AHashMap, AHashSet};

/// Depth-first cycle detection over non-scoped control and data edges.
///
/// The top-level graph and the members of each scope are separate regions; an edge
/// only counts when both ends are in the same region.
pub struct CycleRule;

impl ValidationRule for CycleRule {
    fn id(&self) -> &'static str {
        "cycles"
    }

    fn description(&self) -> &'static str {
        "The top-level graph and every scope body are acyclic"
    }

    fn validate(&self, workflow: &Workflow, _context: &RuleContext) -> Vec<Diagnostic> {
        let mut regions: Vec<Option<&ParentRef>> = Vec::new();
        for instance in &workflow.instances {
            let region = instance.parent.as_ref();
            if !regions.contains(&region) {
                regions.push(region);
            }
        }

        let mut diagnostics = Vec::new();
        for region in regions {
            let nodes: Vec<&str> = workflow
                .instances
                .iter()
                .filter(|i| i.parent.as_ref() == region)
                .map(|i| i.id.as_str())
                .collect();
            let members: AHashSet<&str> = nodes.iter().copied().collect();
            let edges: Vec<(&str, &str)> = workflow
                .connections
                .iter()
                .filter(|c| !c.is_scoped())
                .filter(|c| members.contains(c.from.node.as_str()) && members.contains(c.to.node.as_str()))
                .map(|c| (c.from.node.as_str(), c.to.node.as_str()))
                .collect();

            for cycle in find_cycles(&nodes, &edges) {
                let first = cycle.first().cloned().unwrap_or_default();
                let location = workflow.instance(&first).and_then(|i| i.location.as_ref());
                let within = region
                    .map(|p| format!(" in scope '{}.{}'", p.id, p.scope))
                    .unwrap_or_default();
                diagnostics.push(
                    Diagnostic::error(
                        DiagnosticCode::CycleDetected,
                        format!("Cycle detected{}: {}", within, cycle.join(" -> ")),
                    )
                    .with_node(&first)
                    .with_location(location),
                );
            }
        }
        diagnostics
    }
}

/// Returns every cycle reachable through a back edge, each as a node sequence that
/// ends with its first node again. Traversal follows `nodes` and `edges` order, so
/// the result is deterministic.
pub fn find_cycles(nodes: &[&str], edges: &[(&str, &str)]) -> Vec<Vec<String>> {
    let mut adjacency: AHashMap<&str, Vec<&str>> = AHashMap::new();
    for &(from, to) in edges {
        let targets = adjacency.entry(from).or_default();
        if !targets.contains(&to) {
            targets.push(to);
        }
    }

    let mut visited: AHashSet<&str> = AHashSet::new();
    let mut stack: Vec<&str> = Vec::new();
    let mut cycles = Vec::new();
    for &node in nodes {
        visit(node, &adjacency, &mut visited, &mut stack, &mut cycles);
    }
    cycles
}

fn visit<'a>(
    node: &'a str,
    adjacency: &AHashMap<&'a str, Vec<&'a str>>,
    visited: &mut AHashSet<&'a str>,
    stack: &mut Vec<&'a str>,
    cycles: &mut Vec<Vec<String>>,
) {
    if let Some(position) = stack.iter().position(|n| *n == node) {
        let mut cycle: Vec<String> = stack[position..].iter().map(|n| n.to_string()).collect();
        cycle.push(node.to_string());
        cycles.push(cycle);
        return;
    }
    if visited.contains(node) {
        return;
    }

    stack.push(node);
    if let Some(targets) = adjacency.get(node) {
        for &target in targets {
            visit(target, adjacency, visited, stack, cycles);
        }
    }
    stack.pop();
    visited.insert(node);
}
