//! Virtual addresses and page geometry.
//!
//! Every address handed across a kernel API boundary is wrapped in the [`Va`]
//! newtype. Constructing a [`Va`] validates that the address is canonical, so
//! code receiving one never needs to re-check; the raw `usize` only reappears
//! at the very edges (arithmetic, logging).

/// The size of a memory page, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Log2 of [`PAGE_SIZE`].
///
/// ```
/// # use edos::addressing::PAGE_SHIFT;
/// let frame_number = 0x5678 >> PAGE_SHIFT;
/// assert_eq!(frame_number, 5);
/// ```
pub const PAGE_SHIFT: usize = 12;

/// Mask selecting the byte offset within a page.
pub const PAGE_MASK: usize = 0xfff;

/// A virtual address.
///
/// A [`Va`] is guaranteed canonical: the upper bits are either all zero (a
/// user address) or all one (a kernel address). Any other bit pattern is
/// rejected at construction time.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Va(usize);

impl Va {
    /// Creates a new virtual address if the address is valid.
    ///
    /// This method checks whether the given address falls within the valid
    /// virtual address range. If it does, a `Some(Va)` is returned;
    /// otherwise, `None` is returned.
    ///
    /// # Arguments
    /// - `addr`: A `usize` representing the virtual address.
    ///
    /// # Returns
    /// - `Some(Va)`: If the address is within the valid virtual memory range.
    /// - `None`: If the address is invalid.
    #[inline(always)]
    pub const fn new(addr: usize) -> Option<Self> {
        match addr & 0xffff_8000_0000_0000 {
            m if m == 0xffff_8000_0000_0000 || m == 0 => Some(Self(addr)),
            _ => None,
        }
    }

    /// Returns the raw `usize` representation of the virtual address.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Aligns the virtual address down to the nearest page boundary.
    #[inline]
    pub const fn page_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Aligns the virtual address up to the nearest page boundary.
    #[inline]
    pub const fn page_up(self) -> Self {
        Self((self.0 + PAGE_MASK) & !PAGE_MASK)
    }

    /// Extracts the offset within the memory page from the virtual address.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0 & PAGE_MASK
    }
}

impl core::fmt::Debug for Va {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Va({:#x})", self.0)
    }
}

macro_rules! impl_arith {
    ($t: ty) => {
        impl core::ops::Add<usize> for $t {
            type Output = Self;

            fn add(self, other: usize) -> Self::Output {
                Self(self.0 + other)
            }
        }
        impl core::ops::AddAssign<usize> for $t {
            fn add_assign(&mut self, other: usize) {
                self.0 = self.0 + other
            }
        }
        impl core::ops::Sub<usize> for $t {
            type Output = Self;

            fn sub(self, other: usize) -> Self::Output {
                Self(self.0 - other)
            }
        }
        impl core::ops::Sub<Self> for $t {
            type Output = usize;

            fn sub(self, other: Self) -> Self::Output {
                self.0 - other.0
            }
        }
        impl core::ops::SubAssign<usize> for $t {
            fn sub_assign(&mut self, other: usize) {
                self.0 = self.0 - other
            }
        }
    };
}
impl_arith!(Va);
