pub(crate) mod factories;
pub(crate) mod sources;
