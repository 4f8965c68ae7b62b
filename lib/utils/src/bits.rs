//! Bit-field helpers for 32-bit control registers.

/// Mask of the `width` low bits. A width of 32 or more yields a full mask.
#[inline]
#[must_use]
pub const fn mask_of(width: u32) -> u32 {
    if width >= u32::BITS {
        u32::MAX
    } else {
        (1 << width) - 1
    }
}

/// Mask of the field `[shift + width - 1 : shift]`.
#[inline]
#[must_use]
pub const fn field_mask(shift: u32, width: u32) -> u32 {
    if shift >= u32::BITS {
        0
    } else {
        mask_of(width) << shift
    }
}

/// Extract the field `[shift + width - 1 : shift]` from `value`.
#[inline]
#[must_use]
pub const fn extract(value: u32, shift: u32, width: u32) -> u32 {
    if shift >= u32::BITS {
        0
    } else {
        (value >> shift) & mask_of(width)
    }
}

/// Replace the field `[shift + width - 1 : shift]` of `value` with `field`.
/// Bits of `field` beyond `width` are dropped.
#[inline]
#[must_use]
pub const fn insert(value: u32, shift: u32, width: u32, field: u32) -> u32 {
    let mask = field_mask(shift, width);
    (value & !mask) | ((field << shift) & mask)
}

/// Whether `field` can be stored in `width` bits.
#[inline]
#[must_use]
pub const fn fits(field: u32, width: u32) -> bool {
    field & !mask_of(width) == 0
}

/// Whether the field `[shift + width - 1 : shift]` is non-empty and lies inside a
/// 32-bit word.
#[inline]
#[must_use]
pub const fn field_in_word(shift: u32, width: u32) -> bool {
    width > 0 && shift < u32::BITS && width <= u32::BITS - shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks() {
        assert_eq!(mask_of(0), 0);
        assert_eq!(mask_of(3), 0b111);
        assert_eq!(mask_of(32), u32::MAX);
        assert_eq!(field_mask(4, 2), 0b11_0000);
    }

    #[test]
    fn insert_keeps_other_bits() {
        let value = 0xFFFF_0000;
        assert_eq!(insert(value, 0, 3, 0b101), 0xFFFF_0005);
        assert_eq!(insert(value, 16, 4, 0), 0xFFF0_0000);
        assert_eq!(extract(0x0000_0A00, 8, 4), 0xA);
    }

    #[test]
    fn fits_width() {
        assert!(fits(7, 3));
        assert!(!fits(8, 3));
        assert!(fits(0, 0));
    }

    #[test]
    fn fields_must_lie_inside_the_word() {
        assert!(field_in_word(0, 32));
        assert!(field_in_word(31, 1));
        assert!(!field_in_word(31, 2));
        assert!(!field_in_word(32, 1));
        assert!(!field_in_word(4, 0));
    }
}
