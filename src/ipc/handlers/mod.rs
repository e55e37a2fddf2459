pub mod batch;
pub mod core;
pub mod imports;
pub mod roster;
