pub(crate) mod operation_registry;
pub(crate) mod params;
