pub(crate) mod cache;
pub(crate) mod factory;
pub(crate) mod listener;
pub(crate) mod raster;
pub(crate) mod request;
pub(crate) mod scheduler;
pub(crate) mod source;
pub(crate) mod spill;
