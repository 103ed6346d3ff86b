//! Tagged words, object headers and size derivation.
//!
//! Every managed value is a 64-bit word whose low four bits carry the
//! primary tag. Fixnums, characters and single-floats are immediates; cons
//! and object tags are pointers; `gc-forward` appears only in the first
//! word of a relocated oldspace object and `dx-root-object` only in stack
//! slots.
//!
//! Pointer addresses select their region in bits 46:45 and carry the
//! newspace/oldspace flag in bit 44. An object header packs a 6-bit type
//! tag at bit 2, the pinned mark bit at bit 0 and a 56-bit data field at
//! bit 8. The pointer tag values are chosen so that no header word can
//! alias a pointer: a header's low four bits are always one of
//! {0, 1, 4, 5, 8, 9, 12, 13}, disjoint from every pointer tag, which makes
//! header words inert under scavenging.

/// Low bits that are zero in every fixnum; the fixnum value is the word
/// shifted right by this amount.
pub const FIXNUM_SHIFT: u32 = 3;

/// Bit of a dynamic-region address that distinguishes newspace from
/// oldspace. The current-newspace value of this bit flips each cycle.
pub const ADDRESS_NEWSPACE_BIT: u64 = 1 << 44;

/// Shift of the region selector within an address.
pub const ADDRESS_REGION_SHIFT: u32 = 45;

/// Base address of the general (copying) region.
pub const GENERAL_AREA_BASE: u64 = 0 << ADDRESS_REGION_SHIFT;
/// Base address of the cons (copying) region.
pub const CONS_AREA_BASE: u64 = 1 << ADDRESS_REGION_SHIFT;
/// Base address of the pinned (mark-sweep) region.
pub const PINNED_REGION_BASE: u64 = 2 << ADDRESS_REGION_SHIFT;
/// Base address of the stack region.
pub const STACK_REGION_BASE: u64 = 3 << ADDRESS_REGION_SHIFT;

/// Start of the wired area, 2 MiB into the pinned region.
pub const WIRED_AREA_START: u64 = PINNED_REGION_BASE + (2 << 20);
/// Start of the pinned area proper, 2 GiB into the pinned region.
pub const PINNED_AREA_START: u64 = PINNED_REGION_BASE + (2 << 30);

/// Primary tag values (low four bits of a word).
pub mod tag {
    /// Pair pointer.
    pub const CONS: u8 = 0b0010;
    /// Character immediate.
    pub const CHARACTER: u8 = 0b0011;
    /// Forwarding pointer left in the first word of a relocated object.
    pub const GC_FORWARD: u8 = 0b0110;
    /// Header-prefixed heap object pointer.
    pub const OBJECT: u8 = 0b1010;
    /// Single-float immediate.
    pub const SINGLE_FLOAT: u8 = 0b1011;
    /// Dynamic-extent root marker; appears only in stack slots.
    pub const DX_ROOT: u8 = 0b1110;
}

/// Heap region named by bits 46:45 of an address.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Copying heap for header-prefixed objects.
    General = 0,
    /// Copying heap for bare two-word pairs.
    Cons = 1,
    /// Mark-sweep heap (wired and pinned areas).
    Pinned = 2,
    /// Thread stacks; raw words, scanned only by the stack walker.
    Stack = 3,
}

impl Region {
    /// Region of a canonical address.
    #[inline]
    pub fn of_address(addr: u64) -> Region {
        match (addr >> ADDRESS_REGION_SHIFT) & 3 {
            0 => Region::General,
            1 => Region::Cons,
            2 => Region::Pinned,
            _ => Region::Stack,
        }
    }
}

/// A 64-bit tagged word.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaggedWord(u64);

impl TaggedWord {
    /// Wrap a raw word.
    #[inline]
    pub const fn from_raw(raw: u64) -> TaggedWord {
        TaggedWord(raw)
    }

    /// The raw word.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// The primary tag (low four bits).
    #[inline]
    pub const fn tag_bits(self) -> u8 {
        (self.0 & 0xF) as u8
    }

    /// The address portion of a pointer (low four bits cleared).
    #[inline]
    pub const fn pointer_address(self) -> u64 {
        self.0 & !0xF
    }

    /// Assemble a word from an address and a primary tag. The address must
    /// have its low four bits clear.
    #[inline]
    pub fn from_parts(address: u64, tag_bits: u8) -> TaggedWord {
        debug_assert_eq!(address & 0xF, 0, "misaligned pointer {address:#x}");
        TaggedWord(address | tag_bits as u64)
    }

    /// Build a fixnum.
    #[inline]
    pub const fn fixnum(value: i64) -> TaggedWord {
        TaggedWord((value << FIXNUM_SHIFT) as u64)
    }

    /// The value of a fixnum word.
    #[inline]
    pub const fn as_fixnum(self) -> i64 {
        (self.0 as i64) >> FIXNUM_SHIFT
    }

    /// Build a character immediate.
    #[inline]
    pub fn character(c: char) -> TaggedWord {
        TaggedWord(((c as u64) << 4) | tag::CHARACTER as u64)
    }

    /// Build a single-float immediate.
    #[inline]
    pub fn single_float(f: f32) -> TaggedWord {
        TaggedWord(((f.to_bits() as u64) << 32) | tag::SINGLE_FLOAT as u64)
    }

    /// True for fixnums (low three bits zero).
    #[inline]
    pub const fn is_fixnum(self) -> bool {
        self.0 & 0b111 == 0
    }

    /// True for fixnums, characters and single-floats.
    #[inline]
    pub const fn is_immediate(self) -> bool {
        self.is_fixnum()
            || self.tag_bits() == tag::CHARACTER
            || self.tag_bits() == tag::SINGLE_FLOAT
    }

    /// True for cons pointers.
    #[inline]
    pub const fn is_cons(self) -> bool {
        self.tag_bits() == tag::CONS
    }

    /// True for object pointers.
    #[inline]
    pub const fn is_object(self) -> bool {
        self.tag_bits() == tag::OBJECT
    }

    /// True for cons or object pointers.
    #[inline]
    pub const fn is_pointer(self) -> bool {
        self.is_cons() || self.is_object()
    }

    /// True for forwarding words.
    #[inline]
    pub const fn is_gc_forward(self) -> bool {
        self.tag_bits() == tag::GC_FORWARD
    }

    /// True for dynamic-extent root markers.
    #[inline]
    pub const fn is_dx_root(self) -> bool {
        self.tag_bits() == tag::DX_ROOT
    }
}

impl std::fmt::Debug for TaggedWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_fixnum() {
            write!(f, "fixnum {}", self.as_fixnum())
        } else {
            write!(f, "word {:#x} (tag {:#06b})", self.0, self.tag_bits())
        }
    }
}

/// Object type tags (6 bits in the header word).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectTag {
    /// Reference vector; data field is the element count.
    ArrayT = 0,
    /// Packed unsigned-byte-8 array.
    ArrayU8 = 1,
    /// Packed unsigned-byte-16 array.
    ArrayU16 = 2,
    /// Packed unsigned-byte-32 array.
    ArrayU32 = 3,
    /// Packed unsigned-byte-64 array.
    ArrayU64 = 4,
    /// Packed single-float array.
    ArrayF32 = 5,
    /// Packed double-float array.
    ArrayF64 = 6,
    /// Arbitrary-precision integer; data field is the limb count.
    Bignum = 7,
    /// Rational pair (numerator, denominator).
    Ratio = 8,
    /// Boxed double-float.
    Float64 = 9,
    /// Complex number with rational parts.
    ComplexRational = 10,
    /// Complex number with single-float parts.
    ComplexF32 = 11,
    /// Complex number with double-float parts.
    ComplexF64 = 12,
    /// 128-bit SIMD vector.
    SimdVector = 13,
    /// String header; storage lives in a packed array.
    String = 14,
    /// Non-simple array header.
    ComplexArray = 15,
    /// Symbol.
    Symbol = 16,
    /// Structure instance; data field is the slot count.
    StructureInstance = 17,
    /// Standard (CLOS-style) instance.
    StdInstance = 18,
    /// Function reference cell.
    FunctionReference = 19,
    /// Compiled function; data field packs code/pool/metadata sizes.
    Function = 20,
    /// Closure over a compiled function.
    Closure = 21,
    /// Funcallable instance.
    FuncallableInstance = 22,
    /// Thread control block.
    Thread = 23,
    /// Weak pointer.
    WeakPointer = 24,
    /// Unbound-value sentinel.
    UnboundValue = 25,
    /// Free block in a pinned-region freelist; data field is its size in
    /// words.
    FreelistEntry = 26,
    /// Header preceding a cons cell allocated in the pinned region.
    Cons = 27,
}

impl ObjectTag {
    /// Decode a 6-bit type tag.
    pub fn from_bits(bits: u8) -> Option<ObjectTag> {
        use ObjectTag::*;
        Some(match bits {
            0 => ArrayT,
            1 => ArrayU8,
            2 => ArrayU16,
            3 => ArrayU32,
            4 => ArrayU64,
            5 => ArrayF32,
            6 => ArrayF64,
            7 => Bignum,
            8 => Ratio,
            9 => Float64,
            10 => ComplexRational,
            11 => ComplexF32,
            12 => ComplexF64,
            13 => SimdVector,
            14 => String,
            15 => ComplexArray,
            16 => Symbol,
            17 => StructureInstance,
            18 => StdInstance,
            19 => FunctionReference,
            20 => Function,
            21 => Closure,
            22 => FuncallableInstance,
            23 => Thread,
            24 => WeakPointer,
            25 => UnboundValue,
            26 => FreelistEntry,
            27 => Cons,
            _ => return None,
        })
    }
}

/// Shift of the type tag within a header word.
pub const HEADER_TYPE_SHIFT: u32 = 2;
/// Shift of the data field within a header word.
pub const HEADER_DATA_SHIFT: u32 = 8;
/// Mask of the pinned mark bit within a header word.
pub const HEADER_MARK_BIT: u64 = 1;

/// The first word of every header-prefixed heap object.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader(u64);

impl ObjectHeader {
    /// Build a header from a type tag and data field; the mark bit starts
    /// clear.
    #[inline]
    pub const fn new(tag: ObjectTag, data: u64) -> ObjectHeader {
        ObjectHeader((data << HEADER_DATA_SHIFT) | ((tag as u64) << HEADER_TYPE_SHIFT))
    }

    /// Wrap a raw header word.
    #[inline]
    pub const fn from_raw(raw: u64) -> ObjectHeader {
        ObjectHeader(raw)
    }

    /// The raw header word.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// The 6-bit type tag, or `None` for an unrecognized encoding.
    #[inline]
    pub fn object_tag(self) -> Option<ObjectTag> {
        ObjectTag::from_bits(((self.0 >> HEADER_TYPE_SHIFT) & 0x3F) as u8)
    }

    /// The 56-bit data field.
    #[inline]
    pub const fn data(self) -> u64 {
        self.0 >> HEADER_DATA_SHIFT
    }

    /// The pinned mark bit.
    #[inline]
    pub const fn mark_bit(self) -> u64 {
        self.0 & HEADER_MARK_BIT
    }

    /// Copy of this header with the mark bit set to `bit` (0 or 1).
    #[inline]
    pub const fn with_mark_bit(self, bit: u64) -> ObjectHeader {
        ObjectHeader((self.0 & !HEADER_MARK_BIT) | bit)
    }

    /// Copy of this header with the data field replaced.
    #[inline]
    pub const fn with_data(self, data: u64) -> ObjectHeader {
        ObjectHeader((self.0 & ((1 << HEADER_DATA_SHIFT) - 1)) | (data << HEADER_DATA_SHIFT))
    }
}

impl std::fmt::Debug for ObjectHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "header {{ tag: {:?}, data: {:#x}, mark: {} }}",
            self.object_tag(),
            self.data(),
            self.mark_bit()
        )
    }
}

/// Machine-code size subfield of a function header's data field (bytes,
/// multiple of 16, includes the 16-byte object prologue).
#[inline]
pub const fn function_machine_code_size(data: u64) -> u64 {
    data & 0xFFFF
}

/// Constant-pool size subfield of a function header's data field (bytes,
/// multiple of 8).
#[inline]
pub const fn function_pool_size(data: u64) -> u64 {
    (data >> 16) & 0xFFFF
}

/// GC-metadata size subfield of a function header's data field (bytes).
#[inline]
pub const fn function_gc_info_size(data: u64) -> u64 {
    (data >> 32) & 0xFFFF
}

/// Pack a function header data field from its three byte-count subfields.
#[inline]
pub const fn function_header_data(mc_size: u64, pool_size: u64, gc_info_size: u64) -> u64 {
    mc_size | (pool_size << 16) | (gc_info_size << 32)
}

/// Size in 8-byte words of the object described by `header`, or `None` for
/// an unrecognized type tag.
pub fn object_size_words(header: ObjectHeader) -> Option<u64> {
    use ObjectTag::*;
    let data = header.data();
    Some(match header.object_tag()? {
        ArrayT | StructureInstance | Bignum | ArrayU64 | ArrayF64 => 1 + data,
        ArrayU8 => 1 + data.div_ceil(8),
        ArrayU16 => 1 + data.div_ceil(4),
        ArrayU32 | ArrayF32 => 1 + data.div_ceil(2),
        Float64 | ComplexF32 | UnboundValue => 2,
        Ratio | ComplexRational | ComplexF64 | SimdVector => 3,
        String | ComplexArray | StdInstance | FunctionReference => 4,
        Symbol | WeakPointer => 6,
        Function | Closure | FuncallableInstance => {
            let total = function_machine_code_size(data)
                + function_pool_size(data)
                + function_gc_info_size(data);
            total.div_ceil(8)
        }
        Thread => 512,
        FreelistEntry => data,
        Cons => 4,
    })
}

/// Round a word count up to the next even count.
#[inline]
pub const fn round_to_even(words: u64) -> u64 {
    (words + 1) & !1
}
