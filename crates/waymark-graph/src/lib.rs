//! Waymark Graph - pure dependency-graph algorithms
//!
//! Nothing here touches storage. The store builds a [`DependencyGraph`] from
//! its edge set inside a transaction and asks it whether a candidate edge is
//! safe, which keeps the acyclicity guarantee independent of the backend.

pub mod cycle;
pub mod graph;

pub use cycle::{cycle_path, would_create_cycle};
pub use graph::{DependencyGraph, EdgeRejection, EdgeWeight};
