//! judgebox: a single-shot program-execution sandbox for judging untrusted
//! code under user namespaces and cgroup v2.
//!
//! One request in on stdin, one verdict out on stdout. Three nested
//! processes share the work: the supervisor parses the request and writes
//! the user-namespace maps from outside, the container init builds mounts
//! and the cgroup, and the executor drops privileges and runs the target
//! under a hard deadline.

pub mod cgroup;
pub mod cli;
pub mod client;
pub mod container;
pub mod executor;
pub mod mount;
pub mod proto;
pub mod supervisor;
pub mod sweeper;
pub mod types;
pub mod verdict;
