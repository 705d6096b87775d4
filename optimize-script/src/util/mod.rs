pub mod bitset;
pub mod debug;
