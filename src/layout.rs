//! Target layout primitives: sizes, alignments and per-target data layout.

use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub};

/// Size of a type in bytes.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Size {
    raw: u64,
}

impl Size {
    pub const ZERO: Size = Size { raw: 0 };

    /// Rounds `bits` up to the next-higher byte boundary, if `bits` is
    /// not aligned.
    #[inline]
    pub fn from_bits(bits: u64) -> Size {
        Size { raw: bits / 8 + ((bits % 8) + 7) / 8 }
    }

    #[inline]
    pub fn from_bytes(bytes: u64) -> Size {
        Size { raw: bytes }
    }

    #[inline]
    pub fn bytes(self) -> u64 {
        self.raw
    }

    #[inline]
    pub fn bytes_usize(self) -> usize {
        self.raw as usize
    }

    #[inline]
    pub fn bits(self) -> u64 {
        self.raw.checked_mul(8).expect("size in bits overflowed u64")
    }

    #[inline]
    pub fn align_to(self, align: Align) -> Size {
        let mask = align.bytes() - 1;
        Size::from_bytes((self.bytes() + mask) & !mask)
    }

    #[inline]
    pub fn is_aligned(self, align: Align) -> bool {
        let mask = align.bytes() - 1;
        self.bytes() & mask == 0
    }
}

impl fmt::Debug for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Size({} bytes)", self.bytes())
    }
}

impl Add for Size {
    type Output = Size;
    #[inline]
    fn add(self, other: Size) -> Size {
        Size::from_bytes(self.bytes() + other.bytes())
    }
}

impl Sub for Size {
    type Output = Size;
    #[inline]
    fn sub(self, other: Size) -> Size {
        Size::from_bytes(self.bytes() - other.bytes())
    }
}

impl Mul<u64> for Size {
    type Output = Size;
    #[inline]
    fn mul(self, count: u64) -> Size {
        Size::from_bytes(self.bytes().checked_mul(count).expect("size overflowed u64"))
    }
}

impl AddAssign for Size {
    #[inline]
    fn add_assign(&mut self, other: Size) {
        *self = *self + other;
    }
}

/// Alignment of a type in bytes (always a power of two).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Align {
    pow2: u8,
}

impl Align {
    pub const ONE: Align = Align { pow2: 0 };

    #[inline]
    pub fn from_bits(bits: u64) -> Result<Align, String> {
        Align::from_bytes(Size::from_bits(bits).bytes())
    }

    #[inline]
    pub fn from_bytes(align: u64) -> Result<Align, String> {
        // Treat an alignment of 0 bytes like 1-byte alignment.
        if align == 0 {
            return Ok(Align::ONE);
        }
        if !align.is_power_of_two() {
            return Err(format!("`{align}` is not a power of 2"));
        }
        if align > 1 << 29 {
            return Err(format!("`{align}` is too large"));
        }
        Ok(Align { pow2: align.trailing_zeros() as u8 })
    }

    #[inline]
    pub fn bytes(self) -> u64 {
        1 << self.pow2
    }

    #[inline]
    pub fn bits(self) -> u64 {
        self.bytes() * 8
    }

    #[inline]
    pub fn max(self, other: Align) -> Align {
        if self.pow2 >= other.pow2 { self } else { other }
    }

    #[inline]
    pub fn min(self, other: Align) -> Align {
        if self.pow2 <= other.pow2 { self } else { other }
    }
}

impl fmt::Debug for Align {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Align({} bytes)", self.bytes())
    }
}

/// A pair of ABI-mandated and preferred alignments.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct AbiAndPrefAlign {
    pub abi: Align,
    pub pref: Align,
}

impl AbiAndPrefAlign {
    #[inline]
    pub fn new(align: Align) -> AbiAndPrefAlign {
        AbiAndPrefAlign { abi: align, pref: align }
    }
}

/// An identifier for an address space.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct AddressSpace(pub u32);

impl AddressSpace {
    /// The default address space, corresponding to data space.
    pub const DATA: AddressSpace = AddressSpace(0);
}

/// Everything needed to compute sizes and alignments on a concrete x86
/// target. Both supported architectures are little-endian, so endianness is
/// not represented.
#[derive(Clone, Debug)]
pub struct TargetDataLayout {
    pub i1_align: AbiAndPrefAlign,
    pub i8_align: AbiAndPrefAlign,
    pub i16_align: AbiAndPrefAlign,
    pub i32_align: AbiAndPrefAlign,
    pub i64_align: AbiAndPrefAlign,
    pub i128_align: AbiAndPrefAlign,
    pub f16_align: AbiAndPrefAlign,
    pub f32_align: AbiAndPrefAlign,
    pub f64_align: AbiAndPrefAlign,
    pub f128_align: AbiAndPrefAlign,
    /// Storage size of `x86_fp80` (12 bytes on 32-bit Linux, 16 elsewhere).
    pub f80_size: Size,
    pub f80_align: AbiAndPrefAlign,
    pub pointer_size: Size,
    pub pointer_align: AbiAndPrefAlign,
    pub aggregate_align: AbiAndPrefAlign,

    /// Alignments for vector types.
    pub vector_align: Vec<(Size, AbiAndPrefAlign)>,
}

impl TargetDataLayout {
    /// Data layout for x86-64 System V targets.
    pub fn x86_64() -> TargetDataLayout {
        let align = |bits| AbiAndPrefAlign::new(Align::from_bits(bits).unwrap());
        TargetDataLayout {
            i1_align: align(8),
            i8_align: align(8),
            i16_align: align(16),
            i32_align: align(32),
            i64_align: align(64),
            i128_align: align(128),
            f16_align: align(16),
            f32_align: align(32),
            f64_align: align(64),
            f128_align: align(128),
            f80_size: Size::from_bytes(16),
            f80_align: align(128),
            pointer_size: Size::from_bytes(8),
            pointer_align: align(64),
            aggregate_align: AbiAndPrefAlign {
                abi: Align::ONE,
                pref: Align::from_bits(64).unwrap(),
            },
            vector_align: vec![
                (Size::from_bits(64), align(64)),
                (Size::from_bits(128), align(128)),
                (Size::from_bits(256), align(256)),
                (Size::from_bits(512), align(512)),
            ],
        }
    }

    /// Data layout for i386 targets. Darwin pads `x86_fp80` to 16 bytes;
    /// everything else uses the 12-byte form.
    pub fn x86_32(darwin: bool) -> TargetDataLayout {
        let align = |bits| AbiAndPrefAlign::new(Align::from_bits(bits).unwrap());
        TargetDataLayout {
            i1_align: align(8),
            i8_align: align(8),
            i16_align: align(16),
            i32_align: align(32),
            i64_align: AbiAndPrefAlign {
                abi: Align::from_bits(32).unwrap(),
                pref: Align::from_bits(64).unwrap(),
            },
            i128_align: AbiAndPrefAlign {
                abi: Align::from_bits(32).unwrap(),
                pref: Align::from_bits(64).unwrap(),
            },
            f16_align: align(16),
            f32_align: align(32),
            f64_align: AbiAndPrefAlign {
                abi: Align::from_bits(32).unwrap(),
                pref: Align::from_bits(64).unwrap(),
            },
            f128_align: align(128),
            f80_size: if darwin { Size::from_bytes(16) } else { Size::from_bytes(12) },
            f80_align: if darwin { align(128) } else { align(32) },
            pointer_size: Size::from_bytes(4),
            pointer_align: align(32),
            aggregate_align: AbiAndPrefAlign {
                abi: Align::ONE,
                pref: Align::from_bits(32).unwrap(),
            },
            vector_align: vec![
                (Size::from_bits(64), align(64)),
                (Size::from_bits(128), align(128)),
            ],
        }
    }

    #[inline]
    pub fn vector_align(&self, vec_size: Size) -> AbiAndPrefAlign {
        for &(size, align) in &self.vector_align {
            if size == vec_size {
                return align;
            }
        }
        // Default to natural alignment, which is what LLVM does.
        // That is, use the size, rounded up to a power of 2.
        AbiAndPrefAlign::new(Align::from_bytes(vec_size.bytes().next_power_of_two()).unwrap())
    }
}

pub trait HasDataLayout {
    fn data_layout(&self) -> &TargetDataLayout;
}

impl HasDataLayout for TargetDataLayout {
    #[inline]
    fn data_layout(&self) -> &TargetDataLayout {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_rounding_and_alignment() {
        assert_eq!(Size::from_bits(1).bytes(), 1);
        assert_eq!(Size::from_bits(8).bytes(), 1);
        assert_eq!(Size::from_bits(9).bytes(), 2);
        let a8 = Align::from_bytes(8).unwrap();
        assert_eq!(Size::from_bytes(9).align_to(a8).bytes(), 16);
        assert!(Size::from_bytes(16).is_aligned(a8));
        assert!(!Size::from_bytes(12).is_aligned(a8));
    }

    #[test]
    fn align_rejects_non_powers_of_two() {
        assert!(Align::from_bytes(3).is_err());
        assert_eq!(Align::from_bytes(0).unwrap(), Align::ONE);
        assert_eq!(Align::from_bytes(16).unwrap().bits(), 128);
    }

    #[test]
    fn pointer_widths() {
        assert_eq!(TargetDataLayout::x86_64().pointer_size.bytes(), 8);
        assert_eq!(TargetDataLayout::x86_32(false).pointer_size.bytes(), 4);
        assert_eq!(TargetDataLayout::x86_32(false).f80_size.bytes(), 12);
        assert_eq!(TargetDataLayout::x86_32(true).f80_size.bytes(), 16);
    }
}
