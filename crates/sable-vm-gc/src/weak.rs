//! Weak pointers and finalizers.
//!
//! A weak pointer holds a key it does not keep alive. During scanning,
//! every live weak pointer encountered goes onto a worklist; after the
//! dynamic areas are drained, key liveness is resolved by fixpoint: a key
//! already relocated (or pinned-marked) is live, and making its value live
//! can in turn transport objects whose scanning discovers more weak
//! pointers. Only when a full pass makes no key live is the remainder
//! truly dead: those weak pointers are cleared and the ones carrying
//! finalizers move to the pending queue, which the supervisor drains once
//! the world is running again.

use crate::collector::{Collector, Supervisor};
use crate::heap::Heap;
use crate::tagged::{ObjectHeader, ObjectTag, Region, TaggedWord};

/// Key slot of a weak pointer.
pub const WEAK_POINTER_KEY: u64 = 1;
/// Value slot of a weak pointer.
pub const WEAK_POINTER_VALUE: u64 = 2;
/// Worklist link slot of a weak pointer.
pub const WEAK_POINTER_LINK: u64 = 3;
/// Finalizer-list link slot of a weak pointer.
pub const WEAK_POINTER_FINALIZER_LINK: u64 = 4;
/// Finalizer slot of a weak pointer.
pub const WEAK_POINTER_FINALIZER: u64 = 5;

/// Livep flag within a weak pointer's header data field.
const WEAK_POINTER_LIVEP: u64 = 1;

impl Heap {
    /// True if `word` is a weak pointer object.
    pub fn weak_pointer_p(&self, word: TaggedWord) -> bool {
        word.is_object() && self.object_header(word).object_tag() == Some(ObjectTag::WeakPointer)
    }

    /// Read a weak pointer: `(value, true)` while the key is live,
    /// `(nil, false)` after it has been cleared.
    pub fn weak_pointer_value(&self, word: TaggedWord) -> (TaggedWord, bool) {
        debug_assert!(self.weak_pointer_p(word));
        if self.object_header(word).data() & WEAK_POINTER_LIVEP != 0 {
            (self.object_slot(word, WEAK_POINTER_VALUE), true)
        } else {
            (self.nil(), false)
        }
    }

    /// Allocate a live weak pointer. A non-nil `finalizer` also registers
    /// it on the known-finalizers list so a later cycle can queue it.
    pub fn allocate_weak_pointer(
        &mut self,
        key: TaggedWord,
        value: TaggedWord,
        finalizer: TaggedWord,
    ) -> TaggedWord {
        let nil = self.nil();
        let wp = self.allocate_general(ObjectTag::WeakPointer, WEAK_POINTER_LIVEP);
        self.set_object_slot(wp, WEAK_POINTER_KEY, key);
        self.set_object_slot(wp, WEAK_POINTER_VALUE, value);
        self.set_object_slot(wp, WEAK_POINTER_LINK, nil);
        self.set_object_slot(wp, WEAK_POINTER_FINALIZER, finalizer);
        if finalizer != nil {
            let known = self.known_finalizers;
            self.set_object_slot(wp, WEAK_POINTER_FINALIZER_LINK, known);
            self.known_finalizers = wp;
        } else {
            self.set_object_slot(wp, WEAK_POINTER_FINALIZER_LINK, nil);
        }
        wp
    }

    fn weak_pointer_livep(&self, wp: TaggedWord) -> bool {
        self.object_header(wp).data() & WEAK_POINTER_LIVEP != 0
    }
}

impl Collector {
    /// Scan hook for a weak pointer: the finalizer and its list link are
    /// strong (a finalizer must survive until it runs), the key and value
    /// are left for the fixpoint, and live weak pointers join the
    /// worklist.
    pub(crate) fn scan_weak_pointer(&mut self, wp: TaggedWord, sup: &dyn Supervisor) {
        let addr = wp.pointer_address();
        self.scavenge_slot(addr + WEAK_POINTER_FINALIZER_LINK * 8, sup);
        self.scavenge_slot(addr + WEAK_POINTER_FINALIZER * 8, sup);
        if self.heap.weak_pointer_livep(wp) {
            let head = self.heap.weak_pointer_worklist;
            self.heap.set_object_slot(wp, WEAK_POINTER_LINK, head);
            self.heap.weak_pointer_worklist = wp;
        }
    }

    /// Examine a weak key. `Some(key')` means the key is live and `key'`
    /// is its current pointer; `None` means it died this cycle.
    fn examine_weak_key(&self, key: TaggedWord) -> Option<TaggedWord> {
        if !key.is_pointer() {
            return Some(key);
        }
        let addr = key.pointer_address();
        match Region::of_address(addr) {
            Region::General | Region::Cons => {
                if self.heap.in_dynamic_newspace(addr) {
                    return Some(key);
                }
                // Oldspace: live iff something already transported it.
                let first = TaggedWord::from_raw(self.heap.memory.read_word(addr));
                if first.is_gc_forward() {
                    Some(TaggedWord::from_parts(
                        first.pointer_address(),
                        key.tag_bits(),
                    ))
                } else {
                    None
                }
            }
            Region::Pinned => {
                let header_addr = if key.is_cons() { addr - 16 } else { addr };
                let header = ObjectHeader::from_raw(self.heap.memory.read_word(header_addr));
                if header.mark_bit() == self.heap.pinned_mark_bit {
                    Some(key)
                } else {
                    None
                }
            }
            Region::Stack => Some(key),
        }
    }

    /// Resolve weak-key liveness to a fixpoint, then clear the weak
    /// pointers whose keys are truly dead.
    ///
    /// Each pass either retires a weak pointer (key live: rewrite it,
    /// scavenge the value, drop it from the worklist) or retains it. Any
    /// retirement can enqueue new transport work, whose scanning can
    /// discover further weak pointers, so the dynamic areas are drained
    /// again after every pass that made progress. The worklist shrinks on
    /// every productive pass, bounding the iteration count by the number
    /// of weak pointers discovered.
    pub(crate) fn weak_pointer_fixpoint(&mut self, sup: &dyn Supervisor) {
        let nil = self.heap.nil();
        loop {
            let mut progressed = false;
            let mut wp = self.heap.weak_pointer_worklist;
            self.heap.weak_pointer_worklist = nil;
            while wp != nil {
                let next = self.heap.object_slot(wp, WEAK_POINTER_LINK);
                let key = self.heap.object_slot(wp, WEAK_POINTER_KEY);
                match self.examine_weak_key(key) {
                    Some(live_key) => {
                        if live_key != key {
                            self.heap.set_object_slot(wp, WEAK_POINTER_KEY, live_key);
                        }
                        let addr = wp.pointer_address();
                        self.scavenge_slot(addr + WEAK_POINTER_VALUE * 8, sup);
                        self.heap.set_object_slot(wp, WEAK_POINTER_LINK, nil);
                        progressed = true;
                    }
                    None => {
                        let head = self.heap.weak_pointer_worklist;
                        self.heap.set_object_slot(wp, WEAK_POINTER_LINK, head);
                        self.heap.weak_pointer_worklist = wp;
                    }
                }
                wp = next;
            }
            if progressed {
                self.scavenge_dynamic(sup);
            } else {
                break;
            }
        }

        // Every survivor's key is dead: clear key, value and livep.
        let mut wp = self.heap.weak_pointer_worklist;
        self.heap.weak_pointer_worklist = nil;
        while wp != nil {
            let next = self.heap.object_slot(wp, WEAK_POINTER_LINK);
            self.heap.set_object_slot(wp, WEAK_POINTER_KEY, nil);
            self.heap.set_object_slot(wp, WEAK_POINTER_VALUE, nil);
            self.heap.set_object_slot(wp, WEAK_POINTER_LINK, nil);
            let header = self.heap.object_header(wp);
            self.heap.set_object_header(wp, header.with_data(0));
            wp = next;
        }
    }

    /// Move every known finalizable weak pointer whose livep bit went
    /// clear this cycle onto the pending queue.
    pub(crate) fn splice_dead_finalizers(&mut self) {
        let nil = self.heap.nil();
        let mut previous: Option<TaggedWord> = None;
        let mut wp = self.heap.known_finalizers;
        while wp != nil {
            let next = self.heap.object_slot(wp, WEAK_POINTER_FINALIZER_LINK);
            if self.heap.weak_pointer_livep(wp) {
                previous = Some(wp);
            } else {
                match previous {
                    None => self.heap.known_finalizers = next,
                    Some(p) => self.heap.set_object_slot(p, WEAK_POINTER_FINALIZER_LINK, next),
                }
                let pending = self.heap.pending_finalizers;
                self.heap
                    .set_object_slot(wp, WEAK_POINTER_FINALIZER_LINK, pending);
                self.heap.pending_finalizers = wp;
            }
            wp = next;
        }
    }

    /// Hand every queued finalizer to the supervisor. Runs after the world
    /// resumes; the finalizer slot is dropped right after each call so the
    /// finalizer itself cannot keep its object graph alive.
    pub(crate) fn run_pending_finalizers(&mut self, sup: &mut dyn Supervisor) {
        let nil = self.heap.nil();
        let mut wp = self.heap.pending_finalizers;
        self.heap.pending_finalizers = nil;
        while wp != nil {
            let next = self.heap.object_slot(wp, WEAK_POINTER_FINALIZER_LINK);
            self.heap
                .set_object_slot(wp, WEAK_POINTER_FINALIZER_LINK, nil);
            let finalizer = self.heap.object_slot(wp, WEAK_POINTER_FINALIZER);
            if finalizer != nil {
                sup.run_finalizer(finalizer);
            }
            self.heap.set_object_slot(wp, WEAK_POINTER_FINALIZER, nil);
            wp = next;
        }
    }
}
