pub mod graph;
pub mod parse;
pub mod wire;

pub use graph::{
    ArgRange, CommandBuilder, CommandGraph, CommandNode, Invoker, NodeKind, OutputSink,
};
pub use parse::CommandError;
