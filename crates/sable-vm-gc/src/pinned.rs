//! Pinned-region marking and freelist reconstruction.
//!
//! Objects in the wired and pinned areas never move. Liveness is a single
//! header bit whose "live" polarity alternates each cycle, so no reset
//! pass is needed: an object is live this cycle iff its mark bit equals
//! the current global polarity. After the dynamic areas are drained, each
//! area is swept object-by-object and every maximal run of unmarked words
//! becomes one coalesced freelist entry.

use crate::collector::{Collector, Supervisor};
use crate::heap::{Heap, PinnedArea};
use crate::tagged::{
    ObjectHeader, ObjectTag, TaggedWord, object_size_words, round_to_even, tag,
};

/// Words consumed in a pinned area by the allocation behind `header`:
/// its object size rounded up to an even word count, or for an existing
/// freelist entry, its recorded extent.
pub(crate) fn size_of_pinned_allocation(header: ObjectHeader) -> Option<u64> {
    object_size_words(header).map(round_to_even)
}

impl Collector {
    /// Mark a pinned object live and, on the first visit this cycle, scan
    /// its reference slots.
    pub(crate) fn mark_pinned(&mut self, word: TaggedWord, sup: &dyn Supervisor) {
        let addr = word.pointer_address();
        if word.is_cons() {
            // A pinned cons is preceded by a two-word header block.
            let header_addr = addr - 16;
            let header = ObjectHeader::from_raw(self.heap.memory.read_word(header_addr));
            if header.object_tag() != Some(ObjectTag::Cons) {
                panic!("pinned cons at {addr:#x} has a non-cons header: {header:?}");
            }
            if header.mark_bit() != self.heap.pinned_mark_bit {
                let marked = header.with_mark_bit(self.heap.pinned_mark_bit);
                self.heap.memory.write_word(header_addr, marked.raw());
                self.scavenge_many(addr, 2, sup);
            }
        } else {
            let header = ObjectHeader::from_raw(self.heap.memory.read_word(addr));
            if header.object_tag() == Some(ObjectTag::FreelistEntry) {
                panic!("marking a freelist entry at {addr:#x}: {header:?}");
            }
            if header.mark_bit() != self.heap.pinned_mark_bit {
                let marked = header.with_mark_bit(self.heap.pinned_mark_bit);
                self.heap.memory.write_word(addr, marked.raw());
                self.scan_object(word, sup);
            }
        }
    }

    /// Sweep one mark-sweep area: walk its allocations in address order
    /// and rebuild the freelist from every run of unmarked words, adjacent
    /// runs coalesced into single entries.
    pub(crate) fn rebuild_freelist(&mut self, area: PinnedArea) {
        let (base, end) = self.heap.pinned_area_extent(area);
        let mark = self.heap.pinned_mark_bit;
        let nil = self.heap.nil();
        let mut head = nil;
        let mut previous_entry: Option<u64> = None;
        let mut open_run: Option<(u64, u64)> = None;

        let mut addr = base;
        while addr < end {
            let header = ObjectHeader::from_raw(self.heap.memory.read_word(addr));
            let words = size_of_pinned_allocation(header).unwrap_or_else(|| {
                panic!("freelist sweep hit unrecognized object at {addr:#x}: {header:?}")
            });
            if header.mark_bit() == mark {
                if let Some((start, run_words)) = open_run.take() {
                    self.close_freelist_entry(start, run_words, &mut head, &mut previous_entry);
                }
            } else {
                open_run = match open_run {
                    None => Some((addr, words)),
                    Some((start, run_words)) => Some((start, run_words + words)),
                };
            }
            addr += words * 8;
        }
        if let Some((start, run_words)) = open_run {
            self.close_freelist_entry(start, run_words, &mut head, &mut previous_entry);
        }
        self.heap.set_freelist_head(area, head);
    }

    /// Turn a run of free words into a freelist entry and link it behind
    /// its predecessor.
    fn close_freelist_entry(
        &mut self,
        start: u64,
        words: u64,
        head: &mut TaggedWord,
        previous_entry: &mut Option<u64>,
    ) {
        let nil = self.heap.nil();
        // The link goes in before the header rewrite so the entry is never
        // observable half-formed.
        self.heap.memory.write_word(start + 8, nil.raw());
        let header = ObjectHeader::new(ObjectTag::FreelistEntry, words)
            .with_mark_bit(self.heap.pinned_mark_bit);
        self.heap.memory.write_word(start, header.raw());
        if self.heap.config.paranoid_allocation {
            for slot in 2..words {
                self.heap.memory.write_word(start + slot * 8, u64::MAX);
            }
        }
        let entry = TaggedWord::from_parts(start, tag::OBJECT);
        match previous_entry {
            None => *head = entry,
            Some(prev) => self.heap.memory.write_word(*prev + 8, entry.raw()),
        }
        *previous_entry = Some(start);
    }
}

impl Heap {
    /// Find the object containing `address` by linear search of the wired
    /// area, then the pinned area. Returns `None` when the address falls
    /// outside both areas or inside free space.
    pub fn base_address_of_internal_pointer(&self, address: u64) -> Option<TaggedWord> {
        for area in [PinnedArea::Wired, PinnedArea::Pinned] {
            let (base, end) = self.pinned_area_extent(area);
            if address < base || address >= end {
                continue;
            }
            let mut addr = base;
            while addr < end {
                let header = ObjectHeader::from_raw(self.memory.read_word(addr));
                let words = size_of_pinned_allocation(header).unwrap_or_else(|| {
                    panic!("area walk hit unrecognized object at {addr:#x}: {header:?}")
                });
                if address < addr + words * 8 {
                    return match header.object_tag() {
                        Some(ObjectTag::FreelistEntry) => None,
                        Some(ObjectTag::Cons) => {
                            Some(TaggedWord::from_parts(addr + 16, tag::CONS))
                        }
                        _ => Some(TaggedWord::from_parts(addr, tag::OBJECT)),
                    };
                }
                addr += words * 8;
            }
        }
        None
    }
}
