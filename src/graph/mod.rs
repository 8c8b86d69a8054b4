pub(crate) mod key;
pub(crate) mod node;
pub(crate) mod operation_graph;
