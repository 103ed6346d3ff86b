//! Heap regions, allocation and the collector's region-level state.
//!
//! The [`Heap`] bundles what the running system treats as process-wide
//! state: the mark-bit parities, the bump pointers and scan fingers of the
//! two copying areas, the pinned-region freelists, the weak-pointer and
//! finalizer lists, and the interned runtime singletons. All of it has a
//! lifecycle of "one collection cycle", except the mark bits whose values
//! persist to encode the current parity.
//!
//! Allocation is bump-pointer in the copying areas (always padded to an
//! even word count in the general area, exactly two words in the cons
//! area) and first-fit freelist in the wired and pinned areas.

use crate::memory::{MemoryMap, PAGE_SIZE, flags};
use crate::tagged::{
    self, ADDRESS_NEWSPACE_BIT, CONS_AREA_BASE, GENERAL_AREA_BASE, ObjectHeader, ObjectTag,
    PINNED_AREA_START, STACK_REGION_BASE, TaggedWord, WIRED_AREA_START, function_header_data,
    object_size_words, round_to_even,
};

/// Granularity of dynamic-area growth and trimming.
pub const DYNAMIC_AREA_GRANULARITY: u64 = 2 << 20;

/// Collector configuration.
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Initial committed size of each general-area semispace (bytes).
    pub general_area_size: u64,
    /// Initial committed size of each cons-area semispace (bytes).
    pub cons_area_size: u64,
    /// Size of the wired area (bytes).
    pub wired_area_size: u64,
    /// Size of the pinned area (bytes).
    pub pinned_area_size: u64,
    /// Total pages in the backing store.
    pub store_blocks: u64,
    /// Poison freelist interiors with `-1` to trap use-after-free.
    pub paranoid_allocation: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            general_area_size: DYNAMIC_AREA_GRANULARITY,
            cons_area_size: DYNAMIC_AREA_GRANULARITY,
            wired_area_size: 2 << 20,
            pinned_area_size: 2 << 20,
            store_blocks: 1 << 20,
            paranoid_allocation: false,
        }
    }
}

/// The two mark-sweep areas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinnedArea {
    /// Fixed-address area for objects the supervisor needs at known
    /// locations.
    Wired,
    /// General mark-sweep area.
    Pinned,
}

/// The managed heap: regions, allocation state and runtime singletons.
pub struct Heap {
    pub(crate) memory: MemoryMap,
    pub(crate) config: GcConfig,

    /// Value of the newspace address bit for the current cycle (0 or
    /// `ADDRESS_NEWSPACE_BIT`).
    pub(crate) dynamic_mark_bit: u64,
    /// Value of the header mark bit that means "live this cycle" (0 or 1).
    pub(crate) pinned_mark_bit: u64,

    pub(crate) general_bump: u64,
    pub(crate) general_limit: u64,
    pub(crate) general_finger: u64,
    pub(crate) cons_bump: u64,
    pub(crate) cons_limit: u64,
    pub(crate) cons_finger: u64,
    stack_bump: u64,

    pub(crate) wired_freelist: TaggedWord,
    pub(crate) pinned_freelist: TaggedWord,

    pub(crate) weak_pointer_worklist: TaggedWord,
    pub(crate) known_finalizers: TaggedWord,
    pub(crate) pending_finalizers: TaggedWord,

    nil: TaggedWord,
    unbound_value: TaggedWord,
    unbound_tls_slot: TaggedWord,
    undefined_function: TaggedWord,
    closure_trampoline: TaggedWord,
}

impl Heap {
    /// Create a heap with the given configuration and intern the runtime
    /// singletons.
    pub fn new(config: GcConfig) -> Heap {
        let mut memory = MemoryMap::new(config.store_blocks);
        let rw = flags::PRESENT | flags::WRITABLE | flags::ZERO_FILL;
        memory.protect_range(GENERAL_AREA_BASE, config.general_area_size, rw);
        memory.protect_range(CONS_AREA_BASE, config.cons_area_size, rw);
        memory.protect_range(WIRED_AREA_START, config.wired_area_size, rw);
        memory.protect_range(PINNED_AREA_START, config.pinned_area_size, rw);

        let placeholder = TaggedWord::fixnum(0);
        let mut heap = Heap {
            general_limit: config.general_area_size,
            cons_limit: config.cons_area_size,
            memory,
            config,
            dynamic_mark_bit: 0,
            pinned_mark_bit: 0,
            general_bump: 0,
            general_finger: 0,
            cons_bump: 0,
            cons_finger: 0,
            stack_bump: 0,
            wired_freelist: placeholder,
            pinned_freelist: placeholder,
            weak_pointer_worklist: placeholder,
            known_finalizers: placeholder,
            pending_finalizers: placeholder,
            nil: placeholder,
            unbound_value: placeholder,
            unbound_tls_slot: placeholder,
            undefined_function: placeholder,
            closure_trampoline: placeholder,
        };
        heap.bootstrap();
        heap
    }

    /// Intern `nil` at the bottom of the wired area, seed both freelists
    /// and allocate the remaining singletons.
    fn bootstrap(&mut self) {
        // nil is a symbol whose every slot names itself.
        let nil_addr = WIRED_AREA_START;
        self.memory
            .write_word(nil_addr, ObjectHeader::new(ObjectTag::Symbol, 0).raw());
        self.nil = TaggedWord::from_parts(nil_addr, tagged::tag::OBJECT);
        for slot in 1..6 {
            self.memory.write_word(nil_addr + slot * 8, self.nil.raw());
        }

        let wired_entry = nil_addr + 48;
        let wired_words = (self.config.wired_area_size - 48) / 8;
        self.write_freelist_entry(wired_entry, wired_words, self.nil);
        self.wired_freelist = TaggedWord::from_parts(wired_entry, tagged::tag::OBJECT);

        let pinned_words = self.config.pinned_area_size / 8;
        self.write_freelist_entry(PINNED_AREA_START, pinned_words, self.nil);
        self.pinned_freelist = TaggedWord::from_parts(PINNED_AREA_START, tagged::tag::OBJECT);

        self.weak_pointer_worklist = self.nil;
        self.known_finalizers = self.nil;
        self.pending_finalizers = self.nil;

        self.unbound_value = self.allocate_pinned(PinnedArea::Wired, ObjectTag::UnboundValue, 0);
        self.unbound_tls_slot =
            self.allocate_pinned(PinnedArea::Wired, ObjectTag::UnboundValue, 1);
        let stub = function_header_data(16, 0, 0);
        self.undefined_function =
            self.allocate_pinned(PinnedArea::Wired, ObjectTag::Function, stub);
        self.closure_trampoline =
            self.allocate_pinned(PinnedArea::Wired, ObjectTag::Function, stub);
    }

    // --- Singletons ---------------------------------------------------

    /// The `nil` object.
    #[inline]
    pub fn nil(&self) -> TaggedWord {
        self.nil
    }

    /// The unbound-value sentinel.
    #[inline]
    pub fn unbound_value(&self) -> TaggedWord {
        self.unbound_value
    }

    /// The unbound-TLS-slot sentinel.
    #[inline]
    pub fn unbound_tls_slot(&self) -> TaggedWord {
        self.unbound_tls_slot
    }

    /// The undefined-function trampoline.
    #[inline]
    pub fn undefined_function(&self) -> TaggedWord {
        self.undefined_function
    }

    /// The closure trampoline.
    #[inline]
    pub fn closure_trampoline(&self) -> TaggedWord {
        self.closure_trampoline
    }

    /// The statically known roots scavenged at the start of every cycle.
    pub fn runtime_singletons(&self) -> [TaggedWord; 5] {
        [
            self.nil,
            self.unbound_value,
            self.unbound_tls_slot,
            self.undefined_function,
            self.closure_trampoline,
        ]
    }

    // --- Accessors ----------------------------------------------------

    /// The backing address space.
    #[inline]
    pub fn memory(&self) -> &MemoryMap {
        &self.memory
    }

    /// The configuration this heap was built with.
    #[inline]
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Current value of the newspace address bit.
    #[inline]
    pub fn dynamic_mark_bit(&self) -> u64 {
        self.dynamic_mark_bit
    }

    /// Current value of the pinned header mark bit.
    #[inline]
    pub fn pinned_mark_bit(&self) -> u64 {
        self.pinned_mark_bit
    }

    /// Head of the wired-area freelist.
    #[inline]
    pub fn wired_freelist(&self) -> TaggedWord {
        self.wired_freelist
    }

    /// Head of the pinned-area freelist.
    #[inline]
    pub fn pinned_freelist(&self) -> TaggedWord {
        self.pinned_freelist
    }

    /// Read a raw word at a canonical address.
    #[inline]
    pub fn read_raw_word(&self, addr: u64) -> u64 {
        self.memory.read_word(addr)
    }

    /// Write a raw word at a canonical address.
    #[inline]
    pub fn write_raw_word(&mut self, addr: u64, value: u64) {
        self.memory.write_word(addr, value);
    }

    /// True if a dynamic-region address lies in the current newspace.
    #[inline]
    pub fn in_dynamic_newspace(&self, addr: u64) -> bool {
        addr & ADDRESS_NEWSPACE_BIT == self.dynamic_mark_bit
    }

    pub(crate) fn general_newspace_base(&self) -> u64 {
        GENERAL_AREA_BASE | self.dynamic_mark_bit
    }

    pub(crate) fn general_oldspace_base(&self) -> u64 {
        GENERAL_AREA_BASE | (self.dynamic_mark_bit ^ ADDRESS_NEWSPACE_BIT)
    }

    pub(crate) fn cons_newspace_base(&self) -> u64 {
        CONS_AREA_BASE | self.dynamic_mark_bit
    }

    pub(crate) fn cons_oldspace_base(&self) -> u64 {
        CONS_AREA_BASE | (self.dynamic_mark_bit ^ ADDRESS_NEWSPACE_BIT)
    }

    // --- Object access ------------------------------------------------

    /// Header of a header-prefixed object.
    #[inline]
    pub fn object_header(&self, obj: TaggedWord) -> ObjectHeader {
        ObjectHeader::from_raw(self.memory.read_word(obj.pointer_address()))
    }

    /// Replace the header of a header-prefixed object.
    #[inline]
    pub fn set_object_header(&mut self, obj: TaggedWord, header: ObjectHeader) {
        self.memory.write_word(obj.pointer_address(), header.raw());
    }

    /// Read object slot `index` (slot 0 is the header word).
    #[inline]
    pub fn object_slot(&self, obj: TaggedWord, index: u64) -> TaggedWord {
        TaggedWord::from_raw(self.memory.read_word(obj.pointer_address() + index * 8))
    }

    /// Write object slot `index`.
    #[inline]
    pub fn set_object_slot(&mut self, obj: TaggedWord, index: u64, value: TaggedWord) {
        self.memory
            .write_word(obj.pointer_address() + index * 8, value.raw());
    }

    /// The car of a cons.
    #[inline]
    pub fn cons_car(&self, c: TaggedWord) -> TaggedWord {
        TaggedWord::from_raw(self.memory.read_word(c.pointer_address()))
    }

    /// The cdr of a cons.
    #[inline]
    pub fn cons_cdr(&self, c: TaggedWord) -> TaggedWord {
        TaggedWord::from_raw(self.memory.read_word(c.pointer_address() + 8))
    }

    /// Set the car of a cons.
    #[inline]
    pub fn set_cons_car(&mut self, c: TaggedWord, value: TaggedWord) {
        self.memory.write_word(c.pointer_address(), value.raw());
    }

    /// Set the cdr of a cons.
    #[inline]
    pub fn set_cons_cdr(&mut self, c: TaggedWord, value: TaggedWord) {
        self.memory.write_word(c.pointer_address() + 8, value.raw());
    }

    // --- Dynamic-area allocation ---------------------------------------

    pub(crate) fn ensure_general_capacity(&mut self, bytes: u64) {
        while self.general_bump + bytes > self.general_limit {
            let base = self.general_newspace_base() + self.general_limit;
            self.memory.protect_range(
                base,
                DYNAMIC_AREA_GRANULARITY,
                flags::PRESENT | flags::WRITABLE | flags::ZERO_FILL,
            );
            self.general_limit += DYNAMIC_AREA_GRANULARITY;
        }
    }

    pub(crate) fn ensure_cons_capacity(&mut self, bytes: u64) {
        while self.cons_bump + bytes > self.cons_limit {
            let base = self.cons_newspace_base() + self.cons_limit;
            self.memory.protect_range(
                base,
                DYNAMIC_AREA_GRANULARITY,
                flags::PRESENT | flags::WRITABLE | flags::ZERO_FILL,
            );
            self.cons_limit += DYNAMIC_AREA_GRANULARITY;
        }
    }

    /// Reserve `words` words in the general newspace and return their
    /// address. The count must be even.
    pub(crate) fn reserve_general(&mut self, words: u64) -> u64 {
        debug_assert_eq!(words & 1, 0, "general allocations must be even-sized");
        self.ensure_general_capacity(words * 8);
        let addr = self.general_newspace_base() + self.general_bump;
        self.general_bump += words * 8;
        addr
    }

    /// Reserve one cons cell (16 bytes) in the cons newspace.
    pub(crate) fn reserve_cons(&mut self) -> u64 {
        self.ensure_cons_capacity(16);
        let addr = self.cons_newspace_base() + self.cons_bump;
        self.cons_bump += 16;
        addr
    }

    /// Allocate a header-prefixed object in the general area. Slots beyond
    /// the header start out as fixnum zero.
    pub fn allocate_general(&mut self, tag: ObjectTag, data: u64) -> TaggedWord {
        let header = ObjectHeader::new(tag, data);
        let size = object_size_words(header).expect("allocation of unknown object type");
        let addr = self.reserve_general(round_to_even(size));
        self.memory.write_word(addr, header.raw());
        for slot in 1..round_to_even(size) {
            self.memory.write_word(addr + slot * 8, 0);
        }
        TaggedWord::from_parts(addr, tagged::tag::OBJECT)
    }

    /// Allocate a cons cell.
    pub fn allocate_cons(&mut self, car: TaggedWord, cdr: TaggedWord) -> TaggedWord {
        let addr = self.reserve_cons();
        self.memory.write_word(addr, car.raw());
        self.memory.write_word(addr + 8, cdr.raw());
        TaggedWord::from_parts(addr, tagged::tag::CONS)
    }

    /// Allocate a reference vector holding `elements`.
    pub fn allocate_vector(&mut self, elements: &[TaggedWord]) -> TaggedWord {
        let v = self.allocate_general(ObjectTag::ArrayT, elements.len() as u64);
        for (i, element) in elements.iter().enumerate() {
            self.set_object_slot(v, 1 + i as u64, *element);
        }
        v
    }

    /// Allocate a string backed by a fresh byte array.
    pub fn allocate_string(&mut self, contents: &str) -> TaggedWord {
        let bytes = contents.as_bytes();
        let storage = self.allocate_general(ObjectTag::ArrayU8, bytes.len() as u64);
        let storage_addr = storage.pointer_address();
        for (i, b) in bytes.iter().enumerate() {
            self.memory.write_u8(storage_addr + 8 + i as u64, *b);
        }
        let s = self.allocate_general(ObjectTag::String, bytes.len() as u64);
        self.set_object_slot(s, 1, storage);
        self.set_object_slot(s, 2, TaggedWord::fixnum(bytes.len() as i64));
        let nil = self.nil;
        self.set_object_slot(s, 3, nil);
        s
    }

    /// Allocate a function object in the pinned area. `mc_size` is the
    /// machine-code extent in bytes (a multiple of 16 covering the 16-byte
    /// prologue); the constant pool and GC metadata blob follow it.
    pub fn allocate_function(
        &mut self,
        mc_size: u64,
        pool: &[TaggedWord],
        gc_info: &[u8],
    ) -> TaggedWord {
        assert!(mc_size >= 16 && mc_size % 16 == 0, "bad machine code size");
        let pool_size = pool.len() as u64 * 8;
        let data = function_header_data(mc_size, pool_size, gc_info.len() as u64);
        let func = self.allocate_pinned(PinnedArea::Pinned, ObjectTag::Function, data);
        let addr = func.pointer_address();
        for (i, word) in pool.iter().enumerate() {
            self.memory.write_word(addr + mc_size + i as u64 * 8, word.raw());
        }
        for (i, byte) in gc_info.iter().enumerate() {
            self.memory
                .write_u8(addr + mc_size + pool_size + i as u64, *byte);
        }
        func
    }

    /// Map a fresh stack of `size` bytes and return its base address. A
    /// guard gap is left between consecutive stacks.
    pub fn allocate_stack(&mut self, size: u64) -> u64 {
        let size = size.next_multiple_of(PAGE_SIZE);
        let base = STACK_REGION_BASE + self.stack_bump;
        self.memory.protect_range(
            base,
            size,
            flags::PRESENT | flags::WRITABLE | flags::ZERO_FILL,
        );
        self.stack_bump += size + PAGE_SIZE;
        base
    }

    // --- Pinned-area allocation ----------------------------------------

    pub(crate) fn freelist_head(&self, area: PinnedArea) -> TaggedWord {
        match area {
            PinnedArea::Wired => self.wired_freelist,
            PinnedArea::Pinned => self.pinned_freelist,
        }
    }

    pub(crate) fn set_freelist_head(&mut self, area: PinnedArea, head: TaggedWord) {
        match area {
            PinnedArea::Wired => self.wired_freelist = head,
            PinnedArea::Pinned => self.pinned_freelist = head,
        }
    }

    /// Write a freelist entry header and link at `addr` covering `words`
    /// words. Fresh entries carry the current mark bit so the sweep counts
    /// them as accounted-for.
    pub(crate) fn write_freelist_entry(&mut self, addr: u64, words: u64, next: TaggedWord) {
        let header =
            ObjectHeader::new(ObjectTag::FreelistEntry, words).with_mark_bit(self.pinned_mark_bit);
        self.memory.write_word(addr, header.raw());
        self.memory.write_word(addr + 8, next.raw());
        if self.config.paranoid_allocation {
            for slot in 2..words {
                self.memory.write_word(addr + slot * 8, u64::MAX);
            }
        }
    }

    /// First-fit allocation of `words` words (even) from an area freelist.
    fn allocate_from_freelist(&mut self, area: PinnedArea, words: u64) -> u64 {
        debug_assert_eq!(words & 1, 0);
        let nil = self.nil;
        let mut prev: Option<TaggedWord> = None;
        let mut entry = self.freelist_head(area);
        while entry != nil {
            let addr = entry.pointer_address();
            let header = ObjectHeader::from_raw(self.memory.read_word(addr));
            debug_assert_eq!(header.object_tag(), Some(ObjectTag::FreelistEntry));
            let entry_words = header.data();
            let next = TaggedWord::from_raw(self.memory.read_word(addr + 8));
            if entry_words >= words {
                let remainder = entry_words - words;
                let replacement = if remainder >= 2 {
                    let rest = addr + words * 8;
                    self.write_freelist_entry(rest, remainder, next);
                    TaggedWord::from_parts(rest, tagged::tag::OBJECT)
                } else {
                    next
                };
                match prev {
                    None => self.set_freelist_head(area, replacement),
                    Some(p) => {
                        self.memory
                            .write_word(p.pointer_address() + 8, replacement.raw());
                    }
                }
                return addr;
            }
            prev = Some(entry);
            entry = next;
        }
        panic!("{area:?} area exhausted allocating {words} words");
    }

    /// Allocate a header-prefixed object in a mark-sweep area. The header
    /// carries the current mark bit, so fresh objects count as live for the
    /// remainder of the cycle they are born in.
    pub fn allocate_pinned(&mut self, area: PinnedArea, tag: ObjectTag, data: u64) -> TaggedWord {
        let header = ObjectHeader::new(tag, data);
        let size = object_size_words(header).expect("allocation of unknown object type");
        let padded = round_to_even(size);
        let addr = self.allocate_from_freelist(area, padded);
        self.memory
            .write_word(addr, header.with_mark_bit(self.pinned_mark_bit).raw());
        for slot in 1..padded {
            self.memory.write_word(addr + slot * 8, 0);
        }
        TaggedWord::from_parts(addr, tagged::tag::OBJECT)
    }

    /// Allocate a cons cell in a mark-sweep area. The pair is preceded by a
    /// two-word header block and the returned pointer aims at the car.
    pub fn allocate_pinned_cons(
        &mut self,
        area: PinnedArea,
        car: TaggedWord,
        cdr: TaggedWord,
    ) -> TaggedWord {
        let addr = self.allocate_from_freelist(area, 4);
        let header = ObjectHeader::new(ObjectTag::Cons, 0).with_mark_bit(self.pinned_mark_bit);
        self.memory.write_word(addr, header.raw());
        self.memory.write_word(addr + 8, 0);
        self.memory.write_word(addr + 16, car.raw());
        self.memory.write_word(addr + 24, cdr.raw());
        TaggedWord::from_parts(addr + 16, tagged::tag::CONS)
    }

    /// Used extent of a mark-sweep area: `(start, end)` addresses.
    pub(crate) fn pinned_area_extent(&self, area: PinnedArea) -> (u64, u64) {
        match area {
            PinnedArea::Wired => (
                WIRED_AREA_START,
                WIRED_AREA_START + self.config.wired_area_size,
            ),
            PinnedArea::Pinned => (
                PINNED_AREA_START,
                PINNED_AREA_START + self.config.pinned_area_size,
            ),
        }
    }

    /// Map both newspace windows writable and zero-fill-on-demand up to
    /// their committed limits.
    pub(crate) fn reprotect_newspace(&mut self) {
        let rw = flags::PRESENT | flags::WRITABLE | flags::ZERO_FILL;
        let general_base = self.general_newspace_base();
        self.memory
            .protect_range(general_base, self.general_limit, rw);
        let cons_base = self.cons_newspace_base();
        self.memory.protect_range(cons_base, self.cons_limit, rw);
    }

    /// Flip the semispaces and mark-bit parities and reset the copy state
    /// for a new cycle.
    pub(crate) fn flip(&mut self) {
        self.dynamic_mark_bit ^= ADDRESS_NEWSPACE_BIT;
        self.pinned_mark_bit ^= 1;
        self.general_bump = 0;
        self.general_finger = 0;
        self.cons_bump = 0;
        self.cons_finger = 0;
    }
}
