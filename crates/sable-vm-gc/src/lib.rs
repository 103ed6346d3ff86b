//! # Sable VM Garbage Collector
//!
//! Stop-the-world collector for a tag-bit managed runtime on a 64-bit flat
//! address space.
//!
//! ## Design
//!
//! - **Copying semispaces**: the general and cons areas are Cheney-style
//!   copying heaps; one address bit selects the current newspace and flips
//!   each cycle
//! - **Pinned mark-sweep**: the wired and pinned areas mark objects in place
//!   via an alternating header bit and rebuild coalesced freelists after
//!   each cycle
//! - **Precise stack scanning**: per-PC metadata tables emitted by the code
//!   generator drive layout-bitmap root discovery on thread stacks,
//!   including dynamic-extent roots and interrupt-precise register images
//! - **Weak pointers**: key liveness is resolved by fixpoint iteration;
//!   dead weak pointers are cleared and their finalizers queued for
//!   post-cycle execution
//!
//! The collector owns the heap exclusively for the duration of a cycle; the
//! embedding runtime supplies world-stop control, PC-to-function resolution
//! and finalizer invocation through the [`Supervisor`] trait.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod collector;
pub mod heap;
pub mod memory;
pub mod metadata;
pub mod pinned;
pub mod scavenge;
pub mod stack;
pub mod tagged;
pub mod thread;
pub mod transport;
pub mod weak;

pub use collector::{Collector, GcError, GcResult, GcStats, Supervisor};
pub use heap::{GcConfig, Heap, PinnedArea};
pub use memory::{MemoryMap, StoreStatistics, PAGE_SIZE};
pub use metadata::{
    ExtraRegisters, FrameState, GcMetadataEntry, IncomingArguments, encode_gc_metadata,
    map_function_gc_metadata,
};
pub use tagged::{ObjectHeader, ObjectTag, Region, TaggedWord};
