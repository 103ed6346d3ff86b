//! Relocation of live dynamic-region objects into newspace.

use crate::collector::Collector;
use crate::tagged::{
    ObjectHeader, Region, TaggedWord, object_size_words, round_to_even, tag,
};

impl Collector {
    /// Copy the object behind `obj` (a cons or object pointer into
    /// oldspace) into the matching newspace area, leave a forwarding word
    /// in its first oldspace slot and return the relocated pointer with the
    /// original primary tag.
    ///
    /// Transporting an already-relocated object short-circuits on the
    /// forwarding word, so cycles in the heap converge on one copy.
    pub(crate) fn transport(&mut self, obj: TaggedWord) -> TaggedWord {
        let addr = obj.pointer_address();
        debug_assert!(
            !self.heap.in_dynamic_newspace(addr),
            "transport of newspace pointer {obj:?}"
        );
        let first = TaggedWord::from_raw(self.heap.memory.read_word(addr));
        if first.is_gc_forward() {
            return TaggedWord::from_parts(first.pointer_address(), obj.tag_bits());
        }

        let (size, new_addr) = match Region::of_address(addr) {
            Region::Cons => (2, self.heap.reserve_cons()),
            Region::General => {
                let header = ObjectHeader::from_raw(first.raw());
                let size = object_size_words(header).unwrap_or_else(|| {
                    panic!("transport of unrecognized object at {addr:#x}: {header:?}")
                });
                let padded = round_to_even(size);
                let new_addr = self.heap.reserve_general(padded);
                if padded != size {
                    self.heap.memory.write_word(new_addr + size * 8, 0);
                }
                (size, new_addr)
            }
            other => panic!("transport of pointer into the {other:?} region at {addr:#x}"),
        };

        self.heap.memory.copy_words(addr, new_addr, size);
        self.heap
            .memory
            .write_word(addr, new_addr | tag::GC_FORWARD as u64);
        self.stats.objects_copied += 1;
        self.stats.words_copied += size;
        TaggedWord::from_parts(new_addr, obj.tag_bits())
    }
}
