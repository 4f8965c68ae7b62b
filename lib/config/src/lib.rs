//! Build-time capacities for the orchestrator.
//! Values come from `flags.json` at the workspace root, with per-architecture overrides.

#![no_std]
#![deny(missing_docs)]

/// Capacities generated from `flags.json`.
#[allow(missing_docs)]
pub mod build_flags {
    include!(concat!(env!("OUT_DIR"), "/build_flags.rs"));
}
