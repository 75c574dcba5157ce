//! Core types and traits for the burrow arena allocators.
//!
//! This is the leaf crate with zero internal dependencies. It defines the
//! vocabulary every other burrow crate speaks: arena [`Offset`]s,
//! generation-tagged [`Tid`]s, the [`AllocError`] taxonomy, and the
//! [`PageSource`] / [`WordMemory`] traits that mark the boundary toward
//! the host memory substrate.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod id;
pub mod traits;

pub use error::AllocError;
pub use id::{Offset, Tid};
pub use traits::{PageSource, WordMemory};
