// src/fanin/mod.rs

//! Fan-in: picking one consistent revision set across a pipeline's
//! (possibly diamond-shaped) upstream dependency graph.

pub mod graph;
pub mod resolver;

pub use graph::{FanInGraph, UpstreamNode};
pub use resolver::FanInResolver;
