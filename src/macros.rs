//! # Internal Macros
//!
//! This module provides internal macros for reducing boilerplate in MasonDB.
//!
//! ## le_accessors!
//!
//! Generates getter and setter methods for header-struct fields stored as
//! zerocopy little-endian wrapper types. One arm covers every width: the
//! getter goes through `.get()` and the setter through the wrapper's
//! `From<native>` impl, so the field list only names the native type.
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::little_endian::{U16, U64};
//!
//! #[repr(C)]
//! struct PageHeader {
//!     n_recs: U16,
//!     index_id: U64,
//! }
//!
//! impl PageHeader {
//!     le_accessors! {
//!         n_recs: u16,
//!         index_id: u64,
//!     }
//! }
//!
//! // Generates:
//! // pub fn n_recs(&self) -> u16 { self.n_recs.get() }
//! // pub fn set_n_recs(&mut self, val: u16) { self.n_recs = val.into(); }
//! // pub fn index_id(&self) -> u64 { self.index_id.get() }
//! // pub fn set_index_id(&mut self, val: u64) { self.index_id = val.into(); }
//! ```

/// Generates getter and setter methods for zerocopy little-endian fields.
#[macro_export]
macro_rules! le_accessors {
    ($($field:ident : $native:ty),* $(,)?) => {
        $(
            ::paste::paste! {
                #[inline]
                pub fn $field(&self) -> $native {
                    self.$field.get()
                }

                #[inline]
                pub fn [<set_ $field>](&mut self, val: $native) {
                    self.$field = val.into();
                }
            }
        )*
    };
}
