//! Bringup file configuration parsing and substitution

mod bringup_file;
mod substitution;

pub use bringup_file::*;
pub use substitution::*;
