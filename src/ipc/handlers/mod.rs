pub mod contracts;
pub mod core;
pub mod planner;
pub mod registry;
