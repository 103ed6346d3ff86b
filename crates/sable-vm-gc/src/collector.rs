//! Cycle driver, statistics, errors and the supervisor interface.
//!
//! A collection runs strictly under a stopped world: flip the semispaces,
//! scavenge the static roots and the current thread's stack, drain the two
//! newspace scan fingers, resolve weak-pointer liveness by fixpoint,
//! release oldspace, rebuild the pinned freelists, trim the committed
//! windows and hand the queued finalizers to the supervisor once the world
//! is running again.

use std::time::Instant;

use thiserror::Error;

use crate::heap::{DYNAMIC_AREA_GRANULARITY, GcConfig, Heap, PinnedArea};
use crate::memory::PAGE_SIZE;
use crate::tagged::TaggedWord;

/// Runtime services the collector consumes.
///
/// The collector treats these as given: how threads are halted, how a
/// return address resolves to its enclosing function and how a finalizer is
/// invoked are all the embedding runtime's business.
pub trait Supervisor {
    /// Halt every thread but the caller at a safepoint.
    fn stop_the_world(&mut self);

    /// Resume the threads halted by [`Supervisor::stop_the_world`].
    fn resume_the_world(&mut self);

    /// The thread invoking the collector, if any. Its stack is scanned
    /// inline during root scavenging and skipped by the thread scanner.
    fn current_thread(&self) -> Option<TaggedWord> {
        None
    }

    /// True for the few system threads whose stacks are guaranteed to
    /// reference only wired objects transitively; their stacks are not
    /// walked.
    fn thread_stack_is_wired(&self, _thread: TaggedWord) -> bool {
        false
    }

    /// Resolve a return address to the function object containing it.
    fn return_address_to_function(&self, pc: u64) -> TaggedWord;

    /// Invoke one queued finalizer. Runs after the world has resumed; no
    /// ordering with mutator activity may be assumed.
    fn run_finalizer(&mut self, finalizer: TaggedWord);
}

/// Collector errors. Everything else the collector can hit is an invariant
/// violation and panics: the heap is not safe to continue with.
#[derive(Debug, Error)]
pub enum GcError {
    /// `collect` was re-entered while a cycle was running.
    #[error("collection already in progress")]
    AlreadyInProgress,
}

/// Result type using [`GcError`].
pub type GcResult<T> = Result<T, GcError>;

/// Collection statistics and meters.
#[derive(Debug, Default, Clone)]
pub struct GcStats {
    /// Objects relocated into newspace during the last cycle.
    pub objects_copied: u64,
    /// Words relocated into newspace during the last cycle.
    pub words_copied: u64,
    /// Completed collection cycles since startup.
    pub gc_epoch: u64,
    /// Bytes of backing store available for heap growth, keeping 256 pages
    /// of headroom.
    pub memory_expansion_remaining: u64,
    /// Wall-clock pause of the last cycle.
    pub last_pause: std::time::Duration,
    /// Accumulated pause time across all cycles.
    pub total_pause: std::time::Duration,
}

/// The garbage collector.
pub struct Collector {
    pub(crate) heap: Heap,
    pub(crate) stats: GcStats,
    in_progress: bool,
}

impl Collector {
    /// Create a collector over a freshly bootstrapped heap.
    pub fn new(config: GcConfig) -> Collector {
        Collector {
            heap: Heap::new(config),
            stats: GcStats::default(),
            in_progress: false,
        }
    }

    /// The managed heap.
    #[inline]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Mutable access to the managed heap (allocation, seeding).
    #[inline]
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Current statistics.
    #[inline]
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Run one full collection cycle. `roots` are the mutator's root cells;
    /// each is rewritten in place to its post-collection value.
    pub fn collect(
        &mut self,
        roots: &mut [TaggedWord],
        supervisor: &mut dyn Supervisor,
    ) -> GcResult<()> {
        if self.in_progress {
            return Err(GcError::AlreadyInProgress);
        }
        supervisor.stop_the_world();
        self.in_progress = true;
        let start = Instant::now();

        self.stats.objects_copied = 0;
        self.stats.words_copied = 0;
        self.heap.weak_pointer_worklist = self.heap.nil();

        let oldspace_general_limit = self.heap.general_limit;
        let oldspace_cons_limit = self.heap.cons_limit;
        self.heap.flip();

        self.heap.reprotect_newspace();

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "sable::gc",
            epoch = self.stats.gc_epoch,
            roots = roots.len(),
            "collection cycle starting"
        );

        for singleton in self.heap.runtime_singletons() {
            self.scavenge(singleton, supervisor);
        }
        let known = self.heap.known_finalizers;
        self.heap.known_finalizers = self.scavenge(known, supervisor);
        let pending = self.heap.pending_finalizers;
        self.heap.pending_finalizers = self.scavenge(pending, supervisor);
        for root in roots.iter_mut() {
            *root = self.scavenge(*root, supervisor);
        }
        if let Some(thread) = supervisor.current_thread() {
            let thread = self.scavenge(thread, supervisor);
            self.scavenge_current_thread_stack(thread, supervisor);
        }

        self.scavenge_dynamic(supervisor);

        self.weak_pointer_fixpoint(supervisor);
        self.splice_dead_finalizers();

        // Weak-key examination reads oldspace headers for forwarding tags,
        // so oldspace stays mapped until all weak work is done.
        let general_old = self.heap.general_oldspace_base();
        self.heap
            .memory
            .release_range(general_old, oldspace_general_limit);
        let cons_old = self.heap.cons_oldspace_base();
        self.heap.memory.release_range(cons_old, oldspace_cons_limit);

        self.rebuild_freelist(PinnedArea::Pinned);
        self.rebuild_freelist(PinnedArea::Wired);

        self.trim_dynamic_areas();

        let store = self.heap.memory.store_statistics();
        self.stats.memory_expansion_remaining =
            store.free_blocks.saturating_sub(256) * PAGE_SIZE;

        self.stats.gc_epoch += 1;
        let pause = start.elapsed();
        self.stats.last_pause = pause;
        self.stats.total_pause += pause;
        self.in_progress = false;
        supervisor.resume_the_world();

        #[cfg(feature = "gc_logging")]
        tracing::info!(
            target: "sable::gc",
            epoch = self.stats.gc_epoch,
            objects_copied = self.stats.objects_copied,
            words_copied = self.stats.words_copied,
            pause_us = pause.as_micros() as u64,
            "collection cycle complete"
        );

        self.run_pending_finalizers(supervisor);
        Ok(())
    }

    /// Round the newspace bumps up to the growth granularity and release
    /// the tails of both semispace windows.
    fn trim_dynamic_areas(&mut self) {
        let new_general = self
            .heap
            .general_bump
            .next_multiple_of(DYNAMIC_AREA_GRANULARITY)
            .max(DYNAMIC_AREA_GRANULARITY);
        if new_general < self.heap.general_limit {
            let tail = self.heap.general_limit - new_general;
            let newspace = self.heap.general_newspace_base() + new_general;
            self.heap.memory.release_range(newspace, tail);
            let oldspace = self.heap.general_oldspace_base() + new_general;
            self.heap.memory.release_range(oldspace, tail);
        }
        self.heap.general_limit = new_general;

        let new_cons = self
            .heap
            .cons_bump
            .next_multiple_of(DYNAMIC_AREA_GRANULARITY)
            .max(DYNAMIC_AREA_GRANULARITY);
        if new_cons < self.heap.cons_limit {
            let tail = self.heap.cons_limit - new_cons;
            let newspace = self.heap.cons_newspace_base() + new_cons;
            self.heap.memory.release_range(newspace, tail);
            let oldspace = self.heap.cons_oldspace_base() + new_cons;
            self.heap.memory.release_range(oldspace, tail);
        }
        self.heap.cons_limit = new_cons;
    }
}
