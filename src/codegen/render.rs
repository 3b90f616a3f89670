use super::program::{CompiledWorkflow, InputBinding, Invocation, Region, SourceRef, Step, Trigger};
use itertools::Itertools;
use std::fmt::Write;

impl CompiledWorkflow {
    /// A readable listing of the program: one numbered line per step, bindings
    /// indented below it, iteration bodies nested. Deterministic for a given program.
    pub fn render_source(&self) -> String {
        render_program(self)
    }
}

fn render_program(program: &CompiledWorkflow) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "======== WORKFLOW {} ({}{}) ========",
        program.name,
        if program.is_async { "async " } else { "" },
        program.function_name
    );
    if !program.start_ports.is_empty() {
        let params = program
            .start_ports
            .iter()
            .map(|p| {
                let mut param = format!("{}: {}", p.name, p.data_type);
                if let Some(default) = &p.default {
                    let _ = write!(param, " = {}", default.0);
                } else if p.optional {
                    param.push('?');
                }
                param
            })
            .join(", ");
        let _ = writeln!(output, "params: {}", params);
    }

    let _ = writeln!(output, "\n--- MAIN ---");
    render_region(&mut output, &program.root, 0);

    let _ = writeln!(output, "\n--- EXIT ---");
    let _ = writeln!(output, "onSuccess <- {}", sources(&program.exit.success));
    let _ = writeln!(output, "onFailure <- {}", sources(&program.exit.failure));
    for (name, from) in &program.exit.outputs {
        let _ = writeln!(output, "{} <- {}", name, sources(from));
    }
    let _ = writeln!(output, "\n================ END OF WORKFLOW ================");
    output
}

fn render_region(output: &mut String, region: &Region, depth: usize) {
    let pad = "    ".repeat(depth);
    if !region.captures.is_empty() {
        let _ = writeln!(output, "{}captures {}", pad, sources(&region.captures));
    }
    for (i, step) in region.steps.iter().enumerate() {
        let line = format!("{}{:04}: ", pad, i);
        match step {
            Step::Invoke(invocation) => render_invocation(output, &line, "INVOKE", invocation, &pad),
            Step::Pull(invocation) => render_invocation(output, &line, "PULL", invocation, &pad),
            Step::Stub(invocation) => render_invocation(output, &line, "STUB", invocation, &pad),
            Step::Iterate(iteration) => {
                let _ = writeln!(
                    output,
                    "{}{:<8} {} {}",
                    line,
                    "ITERATE",
                    iteration.instance,
                    trigger(&iteration.trigger)
                );
                render_binding(output, &iteration.items, &pad);
                if let Some((owner, scope)) = &iteration.body.scope {
                    let _ = writeln!(output, "{}      --- SCOPE {}.{} ---", pad, owner, scope);
                }
                render_region(output, &iteration.body, depth + 2);
                let _ = writeln!(output, "{}      success <- {}", pad, sources(&iteration.success));
                let _ = writeln!(output, "{}      failure <- {}", pad, sources(&iteration.failure));
                if let Some(processed) = &iteration.processed {
                    let _ = writeln!(output, "{}      processed <- {}", pad, processed);
                }
            }
        }
    }
}

fn render_invocation(output: &mut String, line: &str, op: &str, invocation: &Invocation, pad: &str) {
    let _ = writeln!(
        output,
        "{}{:<8} {} = {}{}(){}",
        line,
        op,
        invocation.instance,
        if invocation.is_async { "await " } else { "" },
        invocation.function,
        if invocation.expression {
            String::new()
        } else {
            format!(" {}", trigger(&invocation.trigger))
        }
    );
    for binding in &invocation.inputs {
        render_binding(output, binding, pad);
    }
    if !invocation.outputs.is_empty() {
        let _ = writeln!(output, "{}      -> {}", pad, invocation.outputs.join(", "));
    }
}

fn render_binding(output: &mut String, binding: &InputBinding, pad: &str) {
    let mut text = format!("{}      {} <- {}", pad, binding.port, sources(&binding.sources));
    if binding.multi {
        text.push_str(" [multi]");
    }
    if let Some(default) = &binding.default {
        let _ = write!(text, " (default {})", default.0);
    }
    if let Some(data_type) = binding.coerce {
        let _ = write!(text, " as {}", data_type);
    }
    let _ = writeln!(output, "{}", text);
}

fn trigger(trigger: &Trigger) -> String {
    format!("when {}({})", trigger.when, sources(&trigger.sources))
}

fn sources(sources: &[SourceRef]) -> String {
    if sources.is_empty() {
        "-".to_string()
    } else {
        sources.iter().join(", ")
    }
}
