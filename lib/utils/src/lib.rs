#![cfg_attr(not(test), no_std)]
extern crate alloc;

pub mod bits;
pub mod macros;
pub mod table;

#[doc(hidden)]
pub use paste;
