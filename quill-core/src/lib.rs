//! # quill-core: Operational Transformation engine for Quill
//!
//! Pure text algebra, no I/O. Every edit to a document is an [`Operation`]:
//! an ordered run of retain / insert / delete components that covers the
//! whole base text exactly once.
//!
//! ## Architecture
//!
//! ```text
//!   base text ──┬── op A ──► text·A ── transform(B, A) ──┐
//!               │                                        ├──► same text
//!               └── op B ──► text·B ── transform(A, B) ──┘
//! ```
//!
//! ## Modules
//!
//! - [`operation`]: component model, canonical builder, `apply`, cursor shifting
//! - [`transform`]: concurrent rebasing with deterministic insert tie-break
//! - [`error`]: contract errors raised by the engine
//!
//! Offsets and lengths count `char`s, not bytes.

pub mod error;
pub mod operation;
pub mod transform;

pub use error::OtError;
pub use operation::{Component, Operation};
pub use transform::{transform, transform_pair, Priority};
