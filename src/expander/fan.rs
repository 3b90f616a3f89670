use super::{Expansion, require_input, require_output};
use crate::error::ExpandError;
use crate::ir::{Connection, PortRef, PortTarget, Workflow};

/// One source port to many targets. A target without a port receives on the
/// source's port name.
pub(super) fn expand_out(
    workflow: &Workflow,
    source: &PortRef,
    targets: &[PortTarget],
) -> Result<Expansion, ExpandError> {
    const KIND: &str = "fanOut";
    require_output(workflow, KIND, &source.node, &source.port)?;

    let mut expansion = Expansion::default();
    for target in targets {
        let port = target.port.as_deref().unwrap_or(&source.port);
        require_input(workflow, KIND, &target.node, port)?;
        expansion.connect(Connection::new(
            source.clone(),
            PortRef::new(&target.node, port),
        ));
    }
    Ok(expansion)
}

/// Many sources into one target port. A source without a port sends from the
/// target's port name.
pub(super) fn expand_in(
    workflow: &Workflow,
    sources: &[PortTarget],
    target: &PortRef,
) -> Result<Expansion, ExpandError> {
    const KIND: &str = "fanIn";
    require_input(workflow, KIND, &target.node, &target.port)?;

    let mut expansion = Expansion::default();
    for source in sources {
        let port = source.port.as_deref().unwrap_or(&target.port);
        require_output(workflow, KIND, &source.node, port)?;
        expansion.connect(Connection::new(
            PortRef::new(&source.node, port),
            target.clone(),
        ));
    }
    Ok(expansion)
}
