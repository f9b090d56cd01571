//! m4a-header: M4A/MP4 container header assembly for AAC-LC streams.
//!
//! This crate builds the complete ISO-base-media file header for a
//! single AAC-LC audio track. The caller supplies the stream parameters
//! it already knows (sample rate, channel count, per-frame byte sizes,
//! target bitrate) and writes the returned header bytes to disk followed
//! immediately by the raw encoded frames; the result is a playable .m4a
//! file.
//!
//! # Modules
//!
//! - `atom` - generic box-tree primitive (typed, length-prefixed nodes)
//! - `header` - the fixed one-track layout, derived fields, late patches
//! - `error` - error types
//!
//! # Architecture
//!
//! The header describes exactly one audio track stored as one chunk.
//! Because the chunk offset inside the sample table equals the total
//! header length, which in turn depends on every box, assembly is
//! two-pass: build the full tree, measure it, patch the stco offset and
//! the declared mdat size, then emit.
//!
//! ```
//! let frame_sizes = [2, 200, 205, 198]; // first entry: 2-byte priming frame
//! let header = m4a_header::build_header(44100, 2, &frame_sizes, 128_000).unwrap();
//! assert_eq!(&header[4..8], b"ftyp");
//! // write `header`, then the raw AAC frames, to produce the .m4a file
//! ```

pub mod atom;
pub mod error;
mod esds;
pub mod header;

pub use atom::{Atom, AtomType};
pub use error::{Error, Result};
pub use header::{build_header, M4aHeader};
