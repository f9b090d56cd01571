//! Error types for m4a-header.

use crate::atom::AtomType;
use thiserror::Error;

/// Result type for m4a-header operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for m4a-header operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed frame size table supplied by the caller.
    #[error("invalid frame table: {0}")]
    InvalidFrameTable(&'static str),

    /// Attempted to set an empty payload on an atom.
    #[error("atom {0}: payload must not be empty")]
    EmptyPayload(AtomType),

    /// Attempted to set a payload on an atom that already has children.
    #[error("atom {0}: already has children, cannot set a payload")]
    ChildrenPresent(AtomType),

    /// Attempted to add a child to an atom that already has a payload.
    #[error("atom {0}: already has a payload, cannot add children")]
    PayloadPresent(AtomType),

    /// Required atom missing after building the fixed tree.
    ///
    /// Indicates a construction defect, never a caller error.
    #[error("missing required atom: {0}")]
    MissingAtom(&'static str),
}
