//! Platform resource orchestrator.
//!
//! Models clocks, power domains, resets and the logical devices built from them as a
//! graph of nodes, tracks which subsystem uses each resource, and drives every resource
//! through its bring-up and tear-down sequence with reference counting and permission
//! checks.
//!
//! Layout, leaf-first:
//! - [node]: identities shared by every resource.
//! - [clock], [reset], [power]: the resource graphs.
//! - [device]: device state machines built on top of them.
//! - [requirement], [subsystem]: who demands what, and who may control what.
//! - [registry], [topology]: the arenas and the builder filling them.
//! - [orchestrator], [command]: the command surface.
//!
//! Everything runs to completion on one thread. The only deferred work is a power-up or
//! power-down the power controller acknowledges later, finished by
//! [Orchestrator::power_event].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
pub mod logging;

pub mod clock;
pub mod command;
pub mod device;
pub mod error;
pub mod hw;
pub mod node;
pub mod orchestrator;
pub mod power;
pub mod registry;
pub mod requirement;
pub mod reset;
pub mod subsystem;
pub mod topology;

pub use error::{PmError, PmResult};
pub use orchestrator::Orchestrator;
