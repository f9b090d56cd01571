//! MP4 atom (box) tree primitive.
//!
//! An atom is one length-prefixed, typed node of the container format:
//! either a leaf carrying payload bytes or an internal node carrying
//! ordered child atoms. The header assembler builds every structural
//! element of the file header out of these.

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};

/// Four-character atom type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomType(pub [u8; 4]);

impl AtomType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MDAT: Self = Self(*b"mdat");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const SMHD: Self = Self(*b"smhd");
    pub const DINF: Self = Self(*b"dinf");
    pub const DREF: Self = Self(*b"dref");
    pub const URL: Self = Self(*b"url ");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const MP4A: Self = Self(*b"mp4a");
    pub const ESDS: Self = Self(*b"esds");
    pub const STTS: Self = Self(*b"stts");
    pub const STSC: Self = Self(*b"stsc");
    pub const STSZ: Self = Self(*b"stsz");
    pub const STCO: Self = Self(*b"stco");

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl fmt::Display for AtomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Atom content: a leaf payload or ordered children, never both.
///
/// `Empty` is a freshly constructed atom that has not been given content
/// yet; it serializes as a bare header (the `mdat` placeholder relies on
/// this).
#[derive(Debug, Clone)]
enum AtomContent {
    Empty,
    Payload(Vec<u8>),
    Children(Vec<Atom>),
}

/// One node of the header's box tree.
#[derive(Debug, Clone)]
pub struct Atom {
    atom_type: AtomType,
    /// `Some((version, flags))` adds the 4-byte full-box prefix
    /// (1 byte version + 3 bytes flags) to the serialized form.
    version_flags: Option<(u8, u32)>,
    content: AtomContent,
}

impl Atom {
    /// Create an empty atom of the given type.
    pub fn new(atom_type: AtomType) -> Self {
        Self {
            atom_type,
            version_flags: None,
            content: AtomContent::Empty,
        }
    }

    /// Create an empty full atom with a version and 24-bit flags.
    pub fn full(atom_type: AtomType, version: u8, flags: u32) -> Self {
        Self {
            atom_type,
            version_flags: Some((version, flags)),
            content: AtomContent::Empty,
        }
    }

    /// The atom's type code.
    pub fn atom_type(&self) -> AtomType {
        self.atom_type
    }

    /// Serialized size in bytes, including the header.
    pub fn size(&self) -> u32 {
        let mut size = 8u32;
        if self.version_flags.is_some() {
            size += 4;
        }
        match &self.content {
            AtomContent::Empty => {}
            AtomContent::Payload(payload) => size += payload.len() as u32,
            AtomContent::Children(children) => {
                size += children.iter().map(Atom::size).sum::<u32>()
            }
        }
        size
    }

    /// Set this atom's payload, making it a leaf.
    ///
    /// Fails if the atom already has children, or if `payload` is empty.
    pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) -> Result<()> {
        let payload = payload.into();
        if payload.is_empty() {
            return Err(Error::EmptyPayload(self.atom_type));
        }
        if matches!(self.content, AtomContent::Children(_)) {
            return Err(Error::ChildrenPresent(self.atom_type));
        }
        self.content = AtomContent::Payload(payload);
        Ok(())
    }

    /// Append a child atom. Insertion order is serialization order.
    ///
    /// Fails if the atom already has a payload.
    pub fn add_child(&mut self, child: Atom) -> Result<()> {
        match &mut self.content {
            AtomContent::Payload(_) => Err(Error::PayloadPresent(self.atom_type)),
            AtomContent::Children(children) => {
                children.push(child);
                Ok(())
            }
            AtomContent::Empty => {
                self.content = AtomContent::Children(vec![child]);
                Ok(())
            }
        }
    }

    /// The leaf payload, if any.
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.content {
            AtomContent::Payload(payload) => Some(payload),
            _ => None,
        }
    }

    /// Mutable access to the leaf payload, if any.
    pub fn payload_mut(&mut self) -> Option<&mut Vec<u8>> {
        match &mut self.content {
            AtomContent::Payload(payload) => Some(payload),
            _ => None,
        }
    }

    /// Find a descendant by a dot-separated type path, e.g.
    /// `"trak.mdia.minf.stbl.stco"`.
    pub fn find(&self, path: &str) -> Option<&Atom> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let AtomContent::Children(children) = &self.content else {
            return None;
        };
        let child = children.iter().find(|c| c.atom_type.as_str() == head)?;
        match rest {
            Some(rest) => child.find(rest),
            None => Some(child),
        }
    }

    /// Mutable variant of [`find`](Self::find).
    pub fn find_mut(&mut self, path: &str) -> Option<&mut Atom> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let AtomContent::Children(children) = &mut self.content else {
            return None;
        };
        let child = children
            .iter_mut()
            .find(|c| c.atom_type.as_str() == head)?;
        match rest {
            Some(rest) => child.find_mut(rest),
            None => Some(child),
        }
    }

    /// Serialize this atom (and its descendants) into `buf`.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u32(self.size());
        buf.put_slice(&self.atom_type.0);
        if let Some((version, flags)) = self.version_flags {
            buf.put_u8(version);
            buf.put_slice(&flags.to_be_bytes()[1..]);
        }
        match &self.content {
            AtomContent::Empty => {}
            AtomContent::Payload(payload) => buf.put_slice(payload),
            AtomContent::Children(children) => {
                for child in children {
                    child.write_to(buf);
                }
            }
        }
    }

    /// Serialize this atom to a fresh byte buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.size() as usize);
        self.write_to(&mut buf);
        buf.to_vec()
    }
}

/// Hex dump of the serialized atom, 8 bytes per line.
impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.serialize();
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                if i % 8 == 0 {
                    writeln!(f, ",")?;
                } else {
                    write!(f, ", ")?;
                }
            }
            write!(f, "0x{b:02X}")?;
        }
        writeln!(f)
    }
}
