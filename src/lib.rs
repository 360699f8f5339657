//! clusterlet - a small cluster resource manager
//!
//! Tracks a pool of worker nodes, places CPU-bound pods onto them, detects
//! node failure from missed heartbeats and reschedules the affected pods,
//! and optionally grows or shrinks the pool from aggregate CPU allocation.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod runtime;
