//! VesperOS task core: task lifecycle, the blocker protocol, and the
//! shared-memory object registry.
//!
//! The scheduler, memory manager, filesystem, and architecture layer
//! are collaborators reached through the service tables in
//! `vesper_lib::services`; they must be wired before
//! [`tasking::tasking_initialize`] runs.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod error;
pub mod tasking;
