//! Workspace stub crate.
//!
//! The actual functionality lives in the `barrage-*` crates under `crates/`.
