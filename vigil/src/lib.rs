//! vigil agent: watches one directory and the user's shell history, and hands
//! change and command reports to a local outbox.
//!
//! The engines live in `vigil-core`; this crate supplies the git-backed object
//! store, the per-directory control files, the periodic driver and the CLI.

pub mod agent;
pub mod config;
pub mod git;
pub mod lock;
pub mod outbox;
pub mod paths;
pub mod shell;
pub mod signal;
