//! Runtime components: plan model, event bus and process supervision

pub mod action;
pub mod bus;
pub mod chain;
pub mod plan;
pub mod process;
pub mod supervisor;

pub use action::*;
pub use bus::*;
pub use chain::*;
pub use plan::*;
pub use process::*;
pub use supervisor::*;
