//! Macros for defining identifier newtypes and their packed bit fields.

#[macro_export]
macro_rules! impl_basic {
    ($name: ident, $type: ty) => {
        impl core::convert::From<$type> for $name {
            fn from(value: $type) -> Self {
                $name { inner: value }
            }
        }
        impl core::convert::From<$name> for $type {
            fn from(value: $name) -> $type {
                value.inner
            }
        }
        impl $name {
            pub const fn from_const(value: $type) -> Self {
                $name { inner: value }
            }
            pub const fn into_const(self) -> $type {
                self.inner
            }
        }
    };
}

/// Defines a copyable, ordered identifier newtype, printed in hexadecimal.
#[macro_export]
macro_rules! define_id {
    ($(#[$meta: meta])* $name: ident, $type: ty) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[repr(transparent)]
        pub struct $name {
            inner: $type,
        }

        $crate::impl_basic!($name, $type);

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.inner)
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{:#010x}", self.inner)
            }
        }
    };
}

/// Generates `field()` getters and `with_field(value)` builders for bit fields packed
/// into a `u32` identifier defined with [define_id].
#[macro_export]
macro_rules! id_fields {
    ($name: ident { $($field: ident : $shift: expr, $width: expr;)+ }) => {
        $crate::paste::paste! {
            impl $name {
                $(
                    #[inline]
                    #[must_use]
                    pub const fn $field(self) -> u32 {
                        $crate::bits::extract(self.inner, $shift, $width)
                    }

                    #[inline]
                    #[must_use]
                    pub const fn [<with_ $field>](self, value: u32) -> Self {
                        $name {
                            inner: $crate::bits::insert(self.inner, $shift, $width, value),
                        }
                    }
                )+
            }
        }
    };
}

#[cfg(test)]
mod tests {
    define_id!(
        /// Test identifier.
        TestId,
        u32
    );

    id_fields!(TestId {
        high: 16, 16;
        low: 0, 8;
    });

    #[test]
    fn fields_round_trip_through_builders() {
        let id = TestId::from_const(0).with_high(0xBEEF).with_low(0x42);
        assert_eq!(id.high(), 0xBEEF);
        assert_eq!(id.low(), 0x42);
        assert_eq!(u32::from(id), 0xBEEF_0042);
    }

    #[test]
    fn builder_truncates_to_width() {
        let id = TestId::from(0).with_low(0x1FF);
        assert_eq!(id.low(), 0xFF);
        assert_eq!(id.high(), 0);
    }
}
