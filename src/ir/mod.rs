//! The graph intermediate representation.
//!
//! Everything downstream (expansion, validation, generation, emission) operates on
//! these plain data types. They carry no behavior beyond lookups and by-value
//! builders: each builder consumes a `Workflow` and returns a new one, so no two
//! pipeline stages ever alias the same mutable graph.

pub mod connection;
pub mod instance;
pub mod macros;
pub mod node_type;
pub mod port;
pub mod workflow;

pub use connection::*;
pub use instance::*;
pub use macros::*;
pub use node_type::*;
pub use port::*;
pub use workflow::*;

/// Virtual node exposing the workflow's own inputs as outputs.
pub const START: &str = "Start";
/// Virtual node receiving the workflow's outputs.
pub const EXIT: &str = "Exit";
/// The single control-flow input of every non-expression node type.
pub const EXECUTE: &str = "execute";
pub const ON_SUCCESS: &str = "onSuccess";
pub const ON_FAILURE: &str = "onFailure";

/// Returns true for the two virtual boundary node ids.
pub fn is_virtual(node: &str) -> bool {
    node == START || node == EXIT
}
