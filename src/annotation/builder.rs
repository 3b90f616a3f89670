use super::{Annotation, Declaration, FunctionSignature, ParsedUnit, SourceUnit};
use crate::error::{BuildError, UnknownDataType};
use crate::expander;
use crate::ir::{
    Connection, DataType, Direction, EXECUTE, ExecuteWhen, Macro, NodeInstance, NodeType,
    ON_FAILURE, ON_SUCCESS, ParentRef, PathRoute, PathStep, Port, PortOverride, PortRef,
    PortTarget, Workflow, split_scope_key,
};
use serde_json::Value;
use tracing::{debug, trace};

const KIND: &str = "flowWeaver";

/// Builds every node type and workflow declared in `unit`.
///
/// Node types are collected first so that each workflow sees the full catalog
/// regardless of declaration order. Declarations without `@flowWeaver` are skipped.
pub fn build_unit(unit: &SourceUnit) -> Result<ParsedUnit, BuildError> {
    let mut node_types: Vec<NodeType> = Vec::new();
    let mut workflow_declarations: Vec<&Declaration> = Vec::new();

    for declaration in &unit.declarations {
        let Some(kind) = declaration.annotation(KIND) else {
            trace!(function = %declaration.signature.name, "Skipping declaration without @flowWeaver");
            continue;
        };
        match kind.args.trim() {
            "nodeType" => {
                let node_type = build_node_type(declaration)?;
                if node_types.iter().any(|t| t.name == node_type.name) {
                    return Err(BuildError::DuplicateNodeType(node_type.name));
                }
                node_types.push(node_type);
            }
            "workflow" => workflow_declarations.push(declaration),
            "" => {
                return Err(BuildError::MissingKind {
                    function: declaration.signature.name.clone(),
                });
            }
            other => {
                return Err(BuildError::UnknownKind {
                    kind: other.to_string(),
                    function: declaration.signature.name.clone(),
                    location: kind.location.clone(),
                });
            }
        }
    }

    let mut workflows: Vec<Workflow> = Vec::new();
    for declaration in workflow_declarations {
        let workflow = build_workflow(declaration, &node_types)?;
        if workflows.iter().any(|w| w.name == workflow.name) {
            return Err(BuildError::DuplicateWorkflow(workflow.name));
        }
        workflows.push(workflow);
    }

    debug!(
        node_types = node_types.len(),
        workflows = workflows.len(),
        "Built source unit"
    );
    Ok(ParsedUnit {
        node_types,
        workflows,
    })
}

// ---- node types ----

/// Builds one `@flowWeaver nodeType` declaration.
pub fn build_node_type(declaration: &Declaration) -> Result<NodeType, BuildError> {
    let signature = &declaration.signature;
    let expression = declaration.annotation("expression").is_some();
    let mut node_type = if expression {
        NodeType::expression(&signature.name)
    } else {
        NodeType::function(&signature.name)
    };
    let mut declared_inputs = false;
    let mut declared_outputs = false;

    for annotation in &declaration.annotations {
        match annotation.name.as_str() {
            "name" => node_type.name = single_word(annotation)?.to_string(),
            "label" => node_type.label = Some(annotation.args.clone()),
            "description" => node_type.description = Some(annotation.args.clone()),
            "input" => {
                declared_inputs = true;
                let port = port_from_annotation(annotation, Direction::Input, signature)?;
                node_type = node_type.with_input(port);
            }
            "output" => {
                declared_outputs = true;
                let port = port_from_annotation(annotation, Direction::Output, signature)?;
                node_type = node_type.with_output(port);
            }
            "step" => {
                let name = single_word(annotation)?;
                node_type = node_type.with_output(Port::output(name, DataType::Step));
            }
            "executeWhen" => {
                let execute_when = annotation
                    .args
                    .parse::<ExecuteWhen>()
                    .map_err(|e| malformed(annotation, format!("unknown trigger '{}'", e.0)))?;
                node_type = node_type.with_execute_when(execute_when);
            }
            "pullExecution" => node_type = node_type.pull(),
            KIND | "expression" => {}
            other => trace!(annotation = other, "Ignoring annotation on node type"),
        }
    }

    if !declared_inputs {
        for param in signature.params.iter().filter(|p| p.name != EXECUTE) {
            let mut port = Port::input(&param.name, param.data_type);
            port.optional = param.optional;
            node_type = node_type.with_input(port);
        }
    }
    if !declared_outputs {
        for returned in signature
            .returns
            .iter()
            .filter(|r| r.name != ON_SUCCESS && r.name != ON_FAILURE)
        {
            node_type = node_type.with_output(Port::output(&returned.name, returned.data_type));
        }
    }
    if signature.is_async {
        node_type = node_type.asynchronous();
    }
    node_type = match &declaration.body {
        Some(body) => node_type.with_function_text(body),
        None => node_type.stub(),
    };
    Ok(node_type)
}

// ---- workflows ----

/// Builds one `@flowWeaver workflow` declaration and expands its macros.
pub fn build_workflow(
    declaration: &Declaration,
    node_types: &[NodeType],
) -> Result<Workflow, BuildError> {
    let signature = &declaration.signature;
    let mut workflow = node_types
        .iter()
        .cloned()
        .fold(Workflow::new(&signature.name), Workflow::with_node_type);
    let mut declared_params = false;
    let mut declared_returns = false;

    for annotation in &declaration.annotations {
        workflow = match annotation.name.as_str() {
            "name" => workflow.with_name(single_word(annotation)?),
            "description" => workflow.with_description(&annotation.args),
            "strictTypes" => workflow.strict_types(true),
            "forceAsync" => workflow.force_async(true),
            "param" => {
                declared_params = true;
                workflow.with_start_port(port_from_annotation(
                    annotation,
                    Direction::Output,
                    signature,
                )?)
            }
            "returns" => {
                declared_returns = true;
                workflow.with_exit_port(port_from_annotation(
                    annotation,
                    Direction::Input,
                    signature,
                )?)
            }
            "node" => workflow.with_instance(parse_node(annotation)?),
            "connect" => workflow.with_connection(parse_connect(annotation)?),
            "scope" => {
                let (owner, scope, members) = parse_scope(annotation)?;
                workflow.with_scope(&owner, &scope, members)
            }
            "map" => workflow.with_macro(parse_map(annotation)?),
            "path" => workflow.with_macro(parse_path(annotation)?),
            "fanOut" => workflow.with_macro(parse_fan_out(annotation)?),
            "fanIn" => workflow.with_macro(parse_fan_in(annotation)?),
            KIND => workflow,
            other => {
                trace!(annotation = other, "Ignoring annotation on workflow");
                workflow
            }
        };
    }

    if !declared_params {
        for param in signature.params.iter().filter(|p| p.name != EXECUTE) {
            let mut port = Port::output(&param.name, param.data_type);
            port.optional = param.optional;
            workflow = workflow.with_start_port(port);
        }
    }
    if !declared_returns {
        for returned in signature
            .returns
            .iter()
            .filter(|r| r.name != ON_SUCCESS && r.name != ON_FAILURE)
        {
            workflow = workflow.with_exit_port(Port::input(&returned.name, returned.data_type));
        }
    }

    // `@scope` is the only textual way to place an instance inside a scope.
    let placements: Vec<(String, ParentRef)> = workflow
        .scopes
        .iter()
        .filter_map(|(key, members)| {
            let (owner, scope) = split_scope_key(key)?;
            Some(members.iter().map(move |member| {
                (
                    member.clone(),
                    ParentRef {
                        id: owner.to_string(),
                        scope: scope.to_string(),
                    },
                )
            }))
        })
        .flatten()
        .collect();
    for (member, parent) in placements {
        if let Some(instance) = workflow.instances.iter_mut().find(|i| i.id == member) {
            instance.parent = Some(parent);
        }
    }

    let workflow = expander::expand(workflow)?;
    debug!(
        workflow = %workflow.name,
        instances = workflow.instances.len(),
        connections = workflow.connections.len(),
        macros = workflow.macros.len(),
        "Built workflow"
    );
    Ok(workflow)
}

// ---- argument grammar ----

/// A syntax problem inside one annotation's arguments.
enum SyntaxError {
    Malformed(String),
    DataType(UnknownDataType),
}

impl From<UnknownDataType> for SyntaxError {
    fn from(e: UnknownDataType) -> Self {
        SyntaxError::DataType(e)
    }
}

impl From<String> for SyntaxError {
    fn from(message: String) -> Self {
        SyntaxError::Malformed(message)
    }
}

fn malformed(annotation: &Annotation, message: impl Into<String>) -> BuildError {
    BuildError::MalformedAnnotation {
        annotation: annotation.name.clone(),
        message: message.into(),
        location: annotation.location.clone(),
    }
}

fn located(annotation: &Annotation, error: SyntaxError) -> BuildError {
    match error {
        SyntaxError::Malformed(message) => malformed(annotation, message),
        SyntaxError::DataType(source) => BuildError::InvalidDataType {
            source,
            location: annotation.location.clone(),
        },
    }
}

fn single_word(annotation: &Annotation) -> Result<&str, BuildError> {
    let word = annotation.args.trim();
    if word.is_empty() || word.contains(char::is_whitespace) {
        return Err(malformed(annotation, "expected a single name"));
    }
    Ok(word)
}

fn is_identifier(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// `name | [name] | [name=json]`, then `{TYPE}`, `[multi]`, `- description`.
struct PortSpec {
    name: String,
    optional: bool,
    default: Option<Value>,
    data_type: Option<DataType>,
    multi: bool,
    description: Option<String>,
}

fn parse_port_spec(args: &str) -> Result<PortSpec, SyntaxError> {
    let mut rest = args.trim();
    let mut parsed = PortSpec {
        name: String::new(),
        optional: false,
        default: None,
        data_type: None,
        multi: false,
        description: None,
    };

    if rest.starts_with('[') {
        let (inner, after) = take_bracketed(rest)?;
        parsed.optional = true;
        match inner.split_once('=') {
            Some((name, default)) => {
                parsed.name = name.trim().to_string();
                parsed.default = Some(parse_literal(default.trim()));
            }
            None => parsed.name = inner.trim().to_string(),
        }
        rest = after;
    } else {
        let end = rest
            .find(|c: char| c.is_whitespace() || c == '{')
            .unwrap_or(rest.len());
        parsed.name = rest[..end].to_string();
        rest = &rest[end..];
    }
    if !is_identifier(&parsed.name) {
        return Err(format!("invalid port name '{}'", parsed.name).into());
    }

    rest = rest.trim_start();
    if let Some(after) = rest.strip_prefix('{') {
        let end = after
            .find('}')
            .ok_or_else(|| "unterminated '{' in port type".to_string())?;
        parsed.data_type = Some(after[..end].parse::<DataType>()?);
        rest = after[end + 1..].trim_start();
    }
    if let Some(after) = rest.strip_prefix("[multi]") {
        parsed.multi = true;
        rest = after.trim_start();
    }
    if let Some(description) = rest.strip_prefix('-') {
        let description = description.trim();
        if !description.is_empty() {
            parsed.description = Some(description.to_string());
        }
        rest = "";
    }
    if !rest.is_empty() {
        return Err(format!("unexpected '{}'", rest).into());
    }
    Ok(parsed)
}

/// Turns a port annotation into a port; an absent `{TYPE}` is taken from the
/// signature entry of the same name, falling back to `ANY`.
fn port_from_annotation(
    annotation: &Annotation,
    direction: Direction,
    signature: &FunctionSignature,
) -> Result<Port, BuildError> {
    let parsed = parse_port_spec(&annotation.args).map_err(|e| located(annotation, e))?;
    let declared = match annotation.name.as_str() {
        "output" | "returns" => signature.returned(&parsed.name),
        _ => signature.param(&parsed.name),
    };
    let data_type = parsed
        .data_type
        .or(declared.map(|p| p.data_type))
        .unwrap_or(DataType::Any);

    let mut port = match direction {
        Direction::Input => Port::input(&parsed.name, data_type),
        Direction::Output => Port::output(&parsed.name, data_type),
    };
    port.optional = parsed.optional;
    port.default = parsed.default;
    port.multi = parsed.multi;
    port.description = parsed.description;
    Ok(port)
}

/// Splits `[inner] rest` honoring nested brackets and JSON strings.
fn take_bracketed(text: &str) -> Result<(&str, &str), SyntaxError> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Ok((&text[1..i], &text[i + 1..]));
                }
            }
            _ => {}
        }
    }
    Err(format!("unterminated '[' in '{}'", text).into())
}

/// Reads one JSON value from the front of `text`.
fn take_json(text: &str) -> Option<(Value, &str)> {
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Some((value, &text[stream.byte_offset()..])),
        _ => None,
    }
}

/// JSON when it parses, otherwise the raw text as a string.
fn parse_literal(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn take_word<'a>(rest: &mut &'a str) -> Option<&'a str> {
    let trimmed = rest.trim_start();
    let end = trimmed
        .find(char::is_whitespace)
        .unwrap_or(trimmed.len());
    if end == 0 {
        return None;
    }
    *rest = &trimmed[end..];
    Some(&trimmed[..end])
}

/// `@node id type [label: "x"] [position: x y] [minimized] [pull] [port p: ...]`
fn parse_node(annotation: &Annotation) -> Result<NodeInstance, BuildError> {
    let mut rest = annotation.args.as_str();
    let (Some(id), Some(node_type)) = (take_word(&mut rest), take_word(&mut rest)) else {
        return Err(malformed(annotation, "expected '<id> <nodeType>'"));
    };
    if !is_identifier(id) {
        return Err(malformed(annotation, format!("invalid instance id '{}'", id)));
    }

    let mut instance = NodeInstance::new(id, node_type).at_location(annotation.location.clone());
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        if !rest.starts_with('[') {
            return Err(malformed(annotation, format!("unexpected '{}'", rest)));
        }
        let (inner, after) = take_bracketed(rest).map_err(|e| located(annotation, e))?;
        instance = apply_attribute(instance, inner.trim()).map_err(|e| located(annotation, e))?;
        rest = after;
    }
    Ok(instance)
}

fn apply_attribute(instance: NodeInstance, attribute: &str) -> Result<NodeInstance, SyntaxError> {
    let key_end = attribute
        .find(|c: char| c == ':' || c.is_whitespace())
        .unwrap_or(attribute.len());
    let (key, value) = attribute.split_at(key_end);
    let value = value.trim_start();

    match key {
        "minimized" if value.is_empty() => Ok(instance.minimized()),
        "pull" if value.is_empty() => Ok(instance.pull()),
        "label" => {
            let value = value.strip_prefix(':').unwrap_or(value).trim();
            match take_json(value) {
                Some((Value::String(label), rest)) if rest.trim().is_empty() => {
                    Ok(instance.with_label(&label))
                }
                _ => Err(format!("label must be a quoted string, found '{}'", value).into()),
            }
        }
        "position" => {
            let value = value.strip_prefix(':').unwrap_or(value);
            let coordinates: Vec<f64> = value
                .split_whitespace()
                .map(str::parse::<f64>)
                .collect::<Result<_, _>>()
                .map_err(|_| format!("invalid position '{}'", value.trim()))?;
            match coordinates.as_slice() {
                [x, y] => Ok(instance.at(*x, *y)),
                _ => Err(format!("position expects two numbers, found '{}'", value.trim()).into()),
            }
        }
        "port" => {
            let (port, overrides) = value
                .split_once(':')
                .ok_or_else(|| "expected 'port <name>: key=value, ...'".to_string())?;
            let port = port.trim();
            if !is_identifier(port) {
                return Err(format!("invalid port name '{}'", port).into());
            }
            Ok(instance.with_port_override(port, parse_port_override(overrides)?))
        }
        other => Err(format!("unknown instance attribute '{}'", other).into()),
    }
}

/// `label="..", type=NUMBER, default=<json>` in any order.
fn parse_port_override(text: &str) -> Result<PortOverride, SyntaxError> {
    let mut port_override = PortOverride::default();
    let mut rest = text.trim();
    while !rest.is_empty() {
        let (key, value) = rest
            .split_once('=')
            .ok_or_else(|| format!("expected 'key=value' in '{}'", rest))?;
        let value = value.trim_start();
        rest = match key.trim() {
            "label" => match take_json(value) {
                Some((Value::String(label), after)) => {
                    port_override.label = Some(label);
                    after
                }
                _ => return Err(format!("port label must be a quoted string in '{}'", value).into()),
            },
            "type" => {
                let end = value.find(',').unwrap_or(value.len());
                port_override.data_type = Some(value[..end].parse::<DataType>()?);
                &value[end..]
            }
            "default" => match take_json(value) {
                Some((default, after)) => {
                    port_override.default = Some(default);
                    after
                }
                None => return Err(format!("invalid JSON default in '{}'", value).into()),
            },
            other => return Err(format!("unknown port override '{}'", other).into()),
        };
        rest = rest.trim_start();
        rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
    }
    Ok(port_override)
}

fn port_ref(annotation: &Annotation, text: &str) -> Result<PortRef, BuildError> {
    PortRef::parse(text)
        .ok_or_else(|| malformed(annotation, format!("expected 'node.port', found '{}'", text.trim())))
}

fn port_target(annotation: &Annotation, text: &str) -> Result<PortTarget, BuildError> {
    PortTarget::parse(text).ok_or_else(|| {
        malformed(
            annotation,
            format!("expected 'node' or 'node.port', found '{}'", text.trim()),
        )
    })
}

fn split_arrow<'a>(annotation: &Annotation, text: &'a str) -> Result<(&'a str, &'a str), BuildError> {
    text.split_once("->")
        .ok_or_else(|| malformed(annotation, "expected '->'"))
}

/// `@connect A.p[:scope] -> B.q[:scope]`
fn parse_connect(annotation: &Annotation) -> Result<Connection, BuildError> {
    let (from, to) = split_arrow(annotation, &annotation.args)?;
    Ok(Connection::new(
        port_ref(annotation, from)?,
        port_ref(annotation, to)?,
    ))
}

/// `@scope owner.scope [a, b]`
fn parse_scope(annotation: &Annotation) -> Result<(String, String, Vec<String>), BuildError> {
    let args = annotation.args.trim();
    let open = args
        .find('[')
        .ok_or_else(|| malformed(annotation, "expected 'owner.scope [members]'"))?;
    let (owner, scope) = split_scope_key(args[..open].trim())
        .ok_or_else(|| malformed(annotation, "expected 'owner.scope'"))?;
    let (inner, rest) = take_bracketed(&args[open..]).map_err(|e| located(annotation, e))?;
    if !rest.trim().is_empty() {
        return Err(malformed(annotation, format!("unexpected '{}'", rest.trim())));
    }
    let members = inner
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect();
    Ok((owner.to_string(), scope.to_string(), members))
}

/// `@map iter child[(in -> out)] over Node.port`
fn parse_map(annotation: &Annotation) -> Result<Macro, BuildError> {
    let mut rest = annotation.args.as_str();
    let iterator = take_word(&mut rest)
        .ok_or_else(|| malformed(annotation, "expected an iterator id"))?;
    let (child_part, source) = rest
        .rsplit_once(" over ")
        .ok_or_else(|| malformed(annotation, "expected 'over <node.port>'"))?;
    let child_part = child_part.trim();

    let (child, ports) = match child_part.split_once('(') {
        Some((child, mapping)) => {
            let mapping = mapping
                .trim_end()
                .strip_suffix(')')
                .ok_or_else(|| malformed(annotation, "unterminated port mapping"))?;
            let (input, output) = split_arrow(annotation, mapping)?;
            let (input, output) = (input.trim(), output.trim());
            if !is_identifier(input) || !is_identifier(output) {
                return Err(malformed(annotation, "expected '(input -> output)'"));
            }
            (child.trim(), Some((input.to_string(), output.to_string())))
        }
        None => (child_part, None),
    };
    if !is_identifier(iterator) || !is_identifier(child) {
        return Err(malformed(annotation, "expected '<iterator> <child>'"));
    }

    Ok(Macro::Map {
        iterator: iterator.to_string(),
        child: child.to_string(),
        ports,
        source: port_ref(annotation, source)?,
    })
}

/// `@path A -> B:ok -> C:fail -> D`
fn parse_path(annotation: &Annotation) -> Result<Macro, BuildError> {
    let steps = annotation
        .args
        .split("->")
        .map(|step| {
            let step = step.trim();
            let (node, route) = match step.split_once(':') {
                Some((node, "ok")) => (node, Some(PathRoute::Ok)),
                Some((node, "fail")) => (node, Some(PathRoute::Fail)),
                Some((_, other)) => {
                    return Err(malformed(
                        annotation,
                        format!("unknown route ':{}' (expected ':ok' or ':fail')", other),
                    ));
                }
                None => (step, None),
            };
            if !is_identifier(node) {
                return Err(malformed(annotation, format!("invalid path step '{}'", step)));
            }
            Ok(PathStep {
                node: node.to_string(),
                route,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if steps.len() < 2 {
        return Err(malformed(annotation, "a path needs at least two steps"));
    }
    Ok(Macro::Path { steps })
}

/// `@fanOut A.p -> B, C.q`
fn parse_fan_out(annotation: &Annotation) -> Result<Macro, BuildError> {
    let (source, targets) = split_arrow(annotation, &annotation.args)?;
    let targets = targets
        .split(',')
        .map(|t| port_target(annotation, t))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Macro::FanOut {
        source: port_ref(annotation, source)?,
        targets,
    })
}

/// `@fanIn A.p, B -> C.q`
fn parse_fan_in(annotation: &Annotation) -> Result<Macro, BuildError> {
    let (sources, target) = split_arrow(annotation, &annotation.args)?;
    let sources = sources
        .split(',')
        .map(|s| port_target(annotation, s))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Macro::FanIn {
        sources,
        target: port_ref(annotation, target)?,
    })
}
