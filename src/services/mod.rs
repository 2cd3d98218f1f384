pub mod detector;
pub mod probes;
pub mod scan;
pub mod store;
