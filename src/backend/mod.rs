//! Concrete backends for tool capabilities.

pub mod cli;
pub mod verbs;
