//! # Internal Macros
//!
//! ## le_accessors!
//!
//! Generates getter and setter methods for struct fields stored as zerocopy
//! little-endian wrappers (`U16`, `U32`, `U64`). All on-disk headers in this
//! crate are `Unaligned` structs built from these wrappers so they can be
//! referenced in place inside a page slice of any alignment.
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::little_endian::{U16, U32};
//!
//! #[repr(C)]
//! struct SlotHeader {
//!     parent: U32,
//!     flags: U16,
//! }
//!
//! impl SlotHeader {
//!     le_accessors! {
//!         parent: u32 => U32,
//!         flags: u16 => U16,
//!     }
//! }
//!
//! // Generates parent(), set_parent(u32), flags(), set_flags(u16).
//! ```

/// Generates getter and setter methods for zerocopy little-endian fields.
#[macro_export]
macro_rules! le_accessors {
    ($($field:ident : $native:ty => $wrapper:ident),* $(,)?) => {
        $(
            ::paste::paste! {
                #[inline]
                pub fn $field(&self) -> $native {
                    self.$field.get()
                }

                #[inline]
                pub fn [<set_ $field>](&mut self, val: $native) {
                    self.$field = ::zerocopy::little_endian::$wrapper::new(val);
                }
            }
        )*
    };
}
