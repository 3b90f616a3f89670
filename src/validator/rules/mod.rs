//! Built-in validation rules.

mod connections;
mod cycles;
mod dataflow;
mod scopes;
mod structural;
mod types;

pub use connections::ConnectionRule;
pub use cycles::{CycleRule, find_cycles};
pub use dataflow::DataFlowRule;
pub use scopes::ScopeRule;
pub use structural::StructuralRule;
pub use types::TypeRule;
