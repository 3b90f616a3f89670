use crate::ir::{Connection, Direction, ParentRef, PortRef, Workflow, scope_key, split_scope_key};
use crate::validator::{Diagnostic, DiagnosticCode, RuleContext, ValidationRule};
use ahash::AHashMap;

/// Scope ownership, membership, boundary-crossing connections and required scoped ports.
pub struct ScopeRule;

impl ValidationRule for ScopeRule {
    fn id(&self) -> &'static str {
        "scopes"
    }

    fn description(&self) -> &'static str {
        "Scope members match their parent; scoped traffic carries the scope qualifier"
    }

    fn validate(&self, workflow: &Workflow, _context: &RuleContext) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        check_membership(workflow, &mut diagnostics);
        for connection in &workflow.connections {
            if let Some(message) = crossing_problem(workflow, connection) {
                diagnostics.push(
                    Diagnostic::error(DiagnosticCode::ScopeConnectionMismatch, message)
                        .with_connection(connection),
                );
            }
        }
        check_required_ports(workflow, &mut diagnostics);
        diagnostics
    }
}

fn check_membership(workflow: &Workflow, out: &mut Vec<Diagnostic>) {
    let mut memberships: AHashMap<&str, Vec<&str>> = AHashMap::new();

    for (key, members) in &workflow.scopes {
        let Some((owner, scope)) = split_scope_key(key) else {
            out.push(Diagnostic::error(
                DiagnosticCode::ScopeUnknownOwner,
                format!("Scope key '{}' is not of the form 'owner.scope'", key),
            ));
            continue;
        };
        match workflow.instance(owner) {
            None => out.push(
                Diagnostic::error(
                    DiagnosticCode::ScopeUnknownOwner,
                    format!("Scope '{}' is owned by unknown instance '{}'", key, owner),
                )
                .with_node(owner),
            ),
            Some(instance) => {
                if let Some(owner_type) = workflow.node_type(&instance.node_type) {
                    let problem = if !owner_type.is_map_iterator() {
                        Some(format!(
                            "Instance '{}' of type '{}' cannot own scopes; only map iterators can",
                            owner, owner_type.name
                        ))
                    } else if !owner_type.scope_names().contains(&scope) {
                        Some(format!(
                            "Node type '{}' declares no scope named '{}'",
                            owner_type.name, scope
                        ))
                    } else {
                        None
                    };
                    if let Some(message) = problem {
                        out.push(
                            Diagnostic::error(DiagnosticCode::InvalidScopeOwner, message)
                                .with_node(owner)
                                .with_location(instance.location.as_ref()),
                        );
                    }
                }
            }
        }

        for member in members {
            let Some(instance) = workflow.instance(member) else {
                out.push(
                    Diagnostic::error(
                        DiagnosticCode::ScopeUnknownMember,
                        format!("Scope '{}' lists unknown instance '{}'", key, member),
                    )
                    .with_node(member),
                );
                continue;
            };
            memberships.entry(member.as_str()).or_default().push(key.as_str());
            let expected = ParentRef {
                id: owner.to_string(),
                scope: scope.to_string(),
            };
            if instance.parent.as_ref() != Some(&expected) {
                out.push(
                    Diagnostic::error(
                        DiagnosticCode::ScopeParentMismatch,
                        format!(
                            "Instance '{}' is listed in scope '{}' but its parent is {}",
                            member,
                            key,
                            describe_parent(instance.parent.as_ref())
                        ),
                    )
                    .with_node(member)
                    .with_location(instance.location.as_ref()),
                );
            }
        }
    }

    for instance in &workflow.instances {
        if let Some(keys) = memberships.get(instance.id.as_str()) {
            if keys.len() > 1 {
                out.push(
                    Diagnostic::error(
                        DiagnosticCode::InstanceInMultipleScopes,
                        format!(
                            "Instance '{}' belongs to several scopes: {}",
                            instance.id,
                            keys.join(", ")
                        ),
                    )
                    .with_node(&instance.id)
                    .with_location(instance.location.as_ref()),
                );
            }
        }
        // A parent that no scope lists is just as inconsistent.
        if let Some(parent) = &instance.parent {
            let key = scope_key(&parent.id, &parent.scope);
            let listed = workflow
                .scopes
                .get(&key)
                .is_some_and(|members| members.contains(&instance.id));
            if !listed {
                out.push(
                    Diagnostic::error(
                        DiagnosticCode::ScopeParentMismatch,
                        format!(
                            "Instance '{}' names parent scope '{}' which does not list it",
                            instance.id, key
                        ),
                    )
                    .with_node(&instance.id)
                    .with_location(instance.location.as_ref()),
                );
            }
        }
    }
}

fn describe_parent(parent: Option<&ParentRef>) -> String {
    match parent {
        Some(p) => format!("'{}.{}'", p.id, p.scope),
        None => "unset".to_string(),
    }
}

/// The region an endpoint lives in: `None` for the top level (and the virtual nodes).
fn region<'w>(workflow: &'w Workflow, node: &str) -> Option<&'w ParentRef> {
    workflow.instance(node).and_then(|i| i.parent.as_ref())
}

fn in_scope(workflow: &Workflow, node: &str, owner: &str, scope: &str) -> bool {
    region(workflow, node).is_some_and(|p| p.id == owner && p.scope == scope)
}

/// The declared scope of the port an endpoint refers to, if any.
fn port_scope<'w>(workflow: &'w Workflow, endpoint: &PortRef, output: bool) -> Option<&'w str> {
    let port = if output {
        workflow.output_port(&endpoint.node, &endpoint.port)
    } else {
        workflow.input_port(&endpoint.node, &endpoint.port)
    };
    port.and_then(|p| p.scope.as_deref())
}

fn crossing_problem(workflow: &Workflow, connection: &Connection) -> Option<String> {
    let (from, to) = (&connection.from, &connection.to);
    // Unresolvable endpoints are the connection rule's business.
    if !workflow.has_node(&from.node) || !workflow.has_node(&to.node) {
        return None;
    }
    let from_port_scope = port_scope(workflow, from, true);
    let to_port_scope = port_scope(workflow, to, false);

    match (&from.scope, &to.scope) {
        (Some(_), Some(_)) => Some(format!(
            "Connection '{}' qualifies both ends with a scope",
            connection
        )),
        (Some(scope), None) => {
            if from_port_scope != Some(scope.as_str()) {
                Some(format!(
                    "'{}' is not a port of scope '{}'",
                    from, scope
                ))
            } else if !in_scope(workflow, &to.node, &from.node, scope) {
                Some(format!(
                    "'{}' enters scope '{}.{}' but '{}' is not a member of it",
                    connection, from.node, scope, to.node
                ))
            } else {
                None
            }
        }
        (None, Some(scope)) => {
            if to_port_scope != Some(scope.as_str()) {
                Some(format!("'{}' is not a port of scope '{}'", to, scope))
            } else if !in_scope(workflow, &from.node, &to.node, scope) {
                Some(format!(
                    "'{}' leaves scope '{}.{}' but '{}' is not a member of it",
                    connection, to.node, scope, from.node
                ))
            } else {
                None
            }
        }
        (None, None) => {
            if let Some(scope) = from_port_scope.or(to_port_scope) {
                return Some(format!(
                    "'{}' uses a port of scope '{}' and must carry the ':{}' qualifier",
                    connection, scope, scope
                ));
            }
            let (from_region, to_region) =
                (region(workflow, &from.node), region(workflow, &to.node));
            if from_region != to_region {
                Some(format!(
                    "'{}' crosses from {} into {} without a scope qualifier",
                    connection,
                    describe_region(from_region),
                    describe_region(to_region)
                ))
            } else {
                None
            }
        }
    }
}

fn describe_region(region: Option<&ParentRef>) -> String {
    match region {
        Some(p) => format!("scope '{}.{}'", p.id, p.scope),
        None => "the top level".to_string(),
    }
}

/// Every non-optional scoped port of a scope owner needs an internal connection.
fn check_required_ports(workflow: &Workflow, out: &mut Vec<Diagnostic>) {
    for instance in &workflow.instances {
        let Some(node_type) = workflow.node_type(&instance.node_type) else {
            continue;
        };
        for scope in node_type.scope_names() {
            for port in node_type.scoped_ports(scope).filter(|p| !p.optional) {
                let wired = workflow.connections.iter().any(|c| {
                    let endpoint = match port.direction {
                        Direction::Output => &c.from,
                        Direction::Input => &c.to,
                    };
                    endpoint.node == instance.id
                        && endpoint.port == port.name
                        && endpoint.scope.as_deref() == Some(scope)
                });
                if !wired {
                    out.push(
                        Diagnostic::warning(
                            DiagnosticCode::ScopeMissingRequiredInput,
                            format!(
                                "Scoped port '{}.{}' of scope '{}' has no internal connection",
                                instance.id, port.name, scope
                            ),
                        )
                        .with_node(&instance.id)
                        .with_location(instance.location.as_ref()),
                    );
                }
            }
        }
    }
}
