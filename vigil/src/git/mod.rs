//! Git integration for vigil.
//!
//! [`store::GitStore`] implements the core object-store seam over a git2
//! repository. [`worker::AsyncGit`] owns a background `std::thread::spawn`
//! thread that holds the store for its lifetime, so every git2 call happens on
//! one thread and the async driver only exchanges owned requests and results.
pub mod store;
pub mod worker;
