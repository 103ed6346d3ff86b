//! Slot scavenging and object scanning.
//!
//! `scavenge` maps one tagged word to its post-collection value: immediates
//! pass through, oldspace pointers are transported, pinned pointers are
//! marked in place, stack pointers are left to the stack walker.
//! `scan_object` dispatches on the 6-bit object type and scavenges exactly
//! the reference slots of each layout.

use crate::collector::{Collector, Supervisor};
use crate::tagged::{
    ObjectTag, Region, TaggedWord, function_machine_code_size, function_pool_size,
    object_size_words, round_to_even, tag,
};

impl Collector {
    /// Compute the post-collection value of one tagged word, transporting
    /// or marking as required.
    pub(crate) fn scavenge(&mut self, word: TaggedWord, sup: &dyn Supervisor) -> TaggedWord {
        match word.tag_bits() {
            tag::CONS | tag::OBJECT => {
                let addr = word.pointer_address();
                match Region::of_address(addr) {
                    Region::General | Region::Cons => {
                        if self.heap.in_dynamic_newspace(addr) {
                            word
                        } else {
                            self.transport(word)
                        }
                    }
                    Region::Pinned => {
                        self.mark_pinned(word, sup);
                        word
                    }
                    Region::Stack => word,
                }
            }
            tag::GC_FORWARD => panic!("forwarding word reached scavenge: {word:?}"),
            // Fixnums, characters, floats, dx-root markers and header words
            // are all inert here.
            _ => word,
        }
    }

    /// Scavenge the slot at `addr` in place. The store is skipped when the
    /// value is unchanged, so a live slot is never written concurrently
    /// with an observer sampling it.
    pub(crate) fn scavenge_slot(&mut self, addr: u64, sup: &dyn Supervisor) {
        let old = TaggedWord::from_raw(self.heap.memory.read_word(addr));
        let new = self.scavenge(old, sup);
        if new != old {
            self.heap.memory.write_word(addr, new.raw());
        }
    }

    /// Scavenge `count` consecutive slots starting at `base`.
    pub(crate) fn scavenge_many(&mut self, base: u64, count: u64, sup: &dyn Supervisor) {
        for i in 0..count {
            self.scavenge_slot(base + i * 8, sup);
        }
    }

    /// Walk the reference slots of a header-prefixed object.
    pub(crate) fn scan_object(&mut self, obj: TaggedWord, sup: &dyn Supervisor) {
        use ObjectTag::*;
        let addr = obj.pointer_address();
        let header = self.heap.object_header(obj);
        let Some(tag) = header.object_tag() else {
            panic!("scan of unrecognized object at {addr:#x}: {header:?}")
        };
        let data = header.data();
        match tag {
            ArrayT | StructureInstance => self.scavenge_many(addr, 1 + data, sup),
            Ratio | ComplexRational => self.scavenge_many(addr, 3, sup),
            String | ComplexArray | StdInstance | FunctionReference => {
                self.scavenge_many(addr, 4, sup)
            }
            Symbol => self.scavenge_many(addr, 6, sup),
            Function | Closure | FuncallableInstance => {
                // The constant pool follows the machine code.
                let pool_base = addr + function_machine_code_size(data);
                self.scavenge_many(pool_base, function_pool_size(data) / 8, sup);
            }
            Thread => self.scan_thread(obj, sup),
            WeakPointer => self.scan_weak_pointer(obj, sup),
            // A pinned cons header; the pair sits two words in.
            Cons => self.scavenge_many(addr + 16, 2, sup),
            // Leaf payloads hold no references.
            ArrayU8 | ArrayU16 | ArrayU32 | ArrayU64 | ArrayF32 | ArrayF64 | Bignum | Float64
            | ComplexF32 | ComplexF64 | SimdVector | UnboundValue => {}
            FreelistEntry => panic!("scan of freelist entry at {addr:#x}"),
        }
    }

    /// Drain both newspace areas: scan every object behind the fingers
    /// until the fingers catch up with the bump pointers. Outer passes
    /// alternate the two areas since scanning either can grow both.
    pub(crate) fn scavenge_dynamic(&mut self, sup: &dyn Supervisor) {
        loop {
            let mut progressed = false;
            while self.heap.general_finger < self.heap.general_bump {
                let addr = self.heap.general_newspace_base() + self.heap.general_finger;
                let obj = TaggedWord::from_parts(addr, tag::OBJECT);
                let header = self.heap.object_header(obj);
                let size = object_size_words(header).unwrap_or_else(|| {
                    panic!("newspace scan hit unrecognized object at {addr:#x}: {header:?}")
                });
                self.scan_object(obj, sup);
                self.heap.general_finger += round_to_even(size) * 8;
                progressed = true;
            }
            while self.heap.cons_finger < self.heap.cons_bump {
                let addr = self.heap.cons_newspace_base() + self.heap.cons_finger;
                self.scavenge_many(addr, 2, sup);
                self.heap.cons_finger += 16;
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
    }
}
