//! Container expansion: recognizing archives inside scanned blocks and
//! registering their contents as new virtual scan targets.
//!
//! # Scope
//! Each submodule owns one container format end to end: the wire signature,
//! the finder stage that watches the block stream for it, and the virtual
//! target type whose stream decodes the container's payload.
//!
//! # Design Notes
//! - Signature hits in arbitrary bytes are expected; every parse failure is
//!   treated as a false positive and suppressed, never surfaced.
//! - Finders absorb one end-of-target sentinel per child target they
//!   register, so exactly one sentinel (the outermost target's) ever reaches
//!   the matcher.

pub mod gzip;
pub mod zip;
