pub mod bblock;
#[allow(clippy::module_inception)]
pub mod cfg;
