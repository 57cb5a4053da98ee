// src/sync/mod.rs

//! Blocking synchronisation primitives shared by futures and executors.

pub mod condition;

pub use condition::Condition;
