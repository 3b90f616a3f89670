use crate::error::ExpandError;
use crate::expander;
use crate::ir::{
    EXECUTE, ExecuteWhen, Macro, NodeInstance, NodeType, ON_FAILURE, ON_SUCCESS, Port,
    PortOverride, Workflow,
};
use itertools::Itertools;
use std::fmt::Write;

/// Accumulates ` * @name args` lines of one doc-comment block.
struct Block {
    out: String,
}

impl Block {
    fn new() -> Self {
        Self {
            out: String::from("/**\n"),
        }
    }

    fn line(&mut self, name: &str, args: &str) {
        if args.is_empty() {
            let _ = writeln!(self.out, " * @{}", name);
        } else {
            let _ = writeln!(self.out, " * @{} {}", name, args);
        }
    }

    fn finish(mut self) -> String {
        self.out.push_str(" */\n");
        self.out
    }
}

/// Writes a port in the `@input`/`@output`/`@param`/`@returns` syntax with its type
/// always spelled out.
fn port_spec(port: &Port) -> String {
    let mut text = match (&port.default, port.optional) {
        (Some(default), _) => format!("[{}={}]", port.name, default),
        (None, true) => format!("[{}]", port.name),
        (None, false) => port.name.clone(),
    };
    let _ = write!(text, " {{{}}}", port.data_type);
    if port.multi {
        text.push_str(" [multi]");
    }
    if let Some(description) = &port.description {
        let _ = write!(text, " - {}", description);
    }
    text
}

fn json_string(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

fn port_override(name: &str, port_override: &PortOverride) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(label) = &port_override.label {
        parts.push(format!("label={}", json_string(label)));
    }
    if let Some(data_type) = port_override.data_type {
        parts.push(format!("type={}", data_type));
    }
    if let Some(default) = &port_override.default {
        parts.push(format!("default={}", default));
    }
    format!("[port {}: {}]", name, parts.join(", "))
}

fn node_line(instance: &NodeInstance) -> String {
    let mut line = format!("{} {}", instance.id, instance.node_type);
    let config = &instance.config;
    if let Some(label) = &config.label {
        let _ = write!(line, " [label: {}]", json_string(label));
    }
    if let Some(position) = config.position {
        let _ = write!(line, " [position: {} {}]", position.x, position.y);
    }
    if config.minimized {
        line.push_str(" [minimized]");
    }
    if config.pull_execution {
        line.push_str(" [pull]");
    }
    for (port, overrides) in &config.port_overrides {
        if !overrides.is_empty() {
            let _ = write!(line, " {}", port_override(port, overrides));
        }
    }
    line
}

fn macro_line(declared: &Macro) -> String {
    match declared {
        Macro::Map {
            iterator,
            child,
            ports,
            source,
        } => match ports {
            Some((input, output)) => {
                format!("{} {}({} -> {}) over {}", iterator, child, input, output, source)
            }
            None => format!("{} {} over {}", iterator, child, source),
        },
        Macro::Path { steps } => steps.iter().join(" -> "),
        Macro::FanOut { source, targets } => {
            format!("{} -> {}", source, targets.iter().join(", "))
        }
        Macro::FanIn { sources, target } => {
            format!("{} -> {}", sources.iter().join(", "), target)
        }
    }
}

/// Regenerates the canonical annotation block of a workflow.
///
/// Instances, scopes and connections produced by a macro are not written out; the
/// macro line stands for them. Everything else is emitted explicitly in a fixed
/// order, so emitting an already canonical workflow reproduces the same text.
pub fn emit_workflow(workflow: &Workflow) -> Result<String, ExpandError> {
    let covered = expander::coverage(workflow)?;
    let mut block = Block::new();

    block.line("flowWeaver", "workflow");
    if workflow.name != workflow.function_name {
        block.line("name", &workflow.name);
    }
    if let Some(description) = &workflow.description {
        block.line("description", description);
    }
    if workflow.metadata.strict_types {
        block.line("strictTypes", "");
    }
    if workflow.metadata.force_async {
        block.line("forceAsync", "");
    }
    for port in workflow.start_data_ports() {
        block.line("param", &port_spec(port));
    }
    for port in workflow.exit_data_ports() {
        block.line("returns", &port_spec(port));
    }
    for instance in workflow
        .instances
        .iter()
        .filter(|i| !covered.covers_instance(&i.id))
    {
        block.line("node", &node_line(instance));
    }
    for declared in &workflow.macros {
        block.line(declared.kind(), &macro_line(declared));
    }
    for (key, members) in &workflow.scopes {
        if !covered.covers_scope(key) {
            block.line("scope", &format!("{} [{}]", key, members.join(", ")));
        }
    }
    for connection in workflow
        .connections
        .iter()
        .filter(|c| !covered.covers_connection(c))
    {
        block.line("connect", &connection.to_string());
    }

    Ok(block.finish())
}

/// Regenerates the annotation block of a node type.
pub fn emit_node_type(node_type: &NodeType) -> String {
    let mut block = Block::new();
    block.line("flowWeaver", "nodeType");
    if node_type.name != node_type.function_name {
        block.line("name", &node_type.name);
    }
    if let Some(label) = &node_type.label {
        block.line("label", label);
    }
    if let Some(description) = &node_type.description {
        block.line("description", description);
    }
    if node_type.expression {
        block.line("expression", "");
    }
    if node_type.pull_execution {
        block.line("pullExecution", "");
    }
    if node_type.execute_when != ExecuteWhen::default() {
        block.line("executeWhen", node_type.execute_when.as_str());
    }
    for port in node_type
        .inputs
        .iter()
        .filter(|p| !(p.name == EXECUTE && p.is_control_flow()) && !p.is_scoped())
    {
        block.line("input", &port_spec(port));
    }
    for port in node_type.outputs.iter().filter(|p| !p.is_scoped()) {
        if is_standard_control(port) {
            continue;
        }
        if port.is_control_flow() {
            block.line("step", &port.name);
        } else {
            block.line("output", &port_spec(port));
        }
    }
    block.finish()
}

fn is_standard_control(port: &Port) -> bool {
    port.is_control_flow() && (port.name == ON_SUCCESS || port.name == ON_FAILURE)
}
