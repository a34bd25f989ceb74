//! The planner interaction engine: everything between an operator gesture
//! and a store commit. Pure state over the last-fetched snapshot; modules
//! here never open the database.

pub mod feasibility;
pub mod filter;
pub mod grade;
pub mod protocol;
pub mod selection;
pub mod session;
pub mod slots;
pub mod snapshot;
