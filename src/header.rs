//! One-track AAC audio header assembly.
//!
//! Builds the fixed ftyp/moov/mdat tree for an M4A file from the
//! caller's stream parameters, measures it, patches the two fields that
//! depend on the total header length (the stco chunk offset and the
//! declared mdat size), and emits the final byte buffer. The caller
//! writes the raw AAC frames immediately after, in the same order and
//! sizes as the frame table.

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::atom::{Atom, AtomType};
use crate::error::{Error, Result};
use crate::esds;

/// Samples per AAC-LC frame per channel.
const SAMPLES_PER_FRAME: u32 = 1024;
/// Movie timescale; mvhd/tkhd durations are in milliseconds.
const MOVIE_TIMESCALE: u32 = 1000;
/// Byte size of the sample-less priming frame every AAC encoder emits first.
const PRIMING_FRAME_SIZE: u32 = 2;
/// Seconds between the container's 1904-01-01 epoch and the Unix epoch.
const EPOCH_OFFSET_SECS: i64 = (66 * 365 + 16) * 86400;

/// Build an M4A header for the given stream parameters.
///
/// `frame_sizes` lists the byte size of every encoded frame in stream
/// order; the first entry must be the 2-byte priming frame. `bitrate` is
/// embedded as descriptive metadata only.
///
/// One-shot convenience over [`M4aHeader::build`].
pub fn build_header(
    sample_rate: u32,
    channels: u16,
    frame_sizes: &[u32],
    bitrate: u32,
) -> Result<Vec<u8>> {
    M4aHeader::build(sample_rate, channels, frame_sizes, bitrate).map(M4aHeader::into_bytes)
}

/// A finished M4A header together with the quantities derived to build it.
#[derive(Debug, Clone)]
pub struct M4aHeader {
    bytes: Vec<u8>,
    sample_count: u32,
    duration_ms: u32,
    total_stream_size: u64,
}

impl M4aHeader {
    /// Build the header. See [`build_header`] for the input contract.
    pub fn build(
        sample_rate: u32,
        channels: u16,
        frame_sizes: &[u32],
        bitrate: u32,
    ) -> Result<Self> {
        if frame_sizes.len() < 2 {
            return Err(Error::InvalidFrameTable(
                "need the priming frame and at least one audio frame",
            ));
        }
        if frame_sizes[0] != PRIMING_FRAME_SIZE {
            return Err(Error::InvalidFrameTable(
                "first entry must be the 2-byte priming frame",
            ));
        }
        Assembler::new(sample_rate, channels, frame_sizes, bitrate).assemble()
    }

    /// The header bytes. The raw AAC stream belongs immediately after.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the header, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Header length in bytes; also the file offset of the first frame.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// A built header is never empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Total samples per channel carried by the stream (the priming
    /// frame contributes none).
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Stream duration in milliseconds, rounded up.
    pub fn duration_ms(&self) -> u32 {
        self.duration_ms
    }

    /// Byte size of the AAC stream the caller is expected to append.
    pub fn total_stream_size(&self) -> u64 {
        self.total_stream_size
    }
}

/// Hex dump of the header, 32 bytes per line in 4-byte groups.
impl fmt::Display for M4aHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.bytes.iter().enumerate() {
            if i > 0 && i % 32 == 0 {
                writeln!(f)?;
            } else if i > 0 && i % 4 == 0 {
                write!(f, " ")?;
            }
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

/// Per-call assembly state: the caller's parameters plus the derived
/// quantities every box below reads from.
struct Assembler<'a> {
    sample_rate: u32,
    channels: u16,
    frame_sizes: &'a [u32],
    bitrate: u32,
    max_frame_size: u32,
    total_stream_size: u64,
    /// Seconds since 1904-01-01, low 32 bits; used for both creation and
    /// modification time.
    timestamp: u32,
    sample_count: u32,
    duration_ms: u32,
}

impl<'a> Assembler<'a> {
    fn new(sample_rate: u32, channels: u16, frame_sizes: &'a [u32], bitrate: u32) -> Self {
        let max_frame_size = frame_sizes.iter().copied().max().unwrap_or(0);
        let total_stream_size = frame_sizes.iter().map(|&s| s as u64).sum();
        let timestamp = (chrono::Utc::now().timestamp() + EPOCH_OFFSET_SECS) as u32;
        let sample_count = SAMPLES_PER_FRAME * (frame_sizes.len() as u32 - 1);
        // Round up so the declared duration never under-reports the samples.
        let duration_ms = ((sample_count as u64 * 1000).div_ceil(sample_rate as u64)) as u32;
        Self {
            sample_rate,
            channels,
            frame_sizes,
            bitrate,
            max_frame_size,
            total_stream_size,
            timestamp,
            sample_count,
            duration_ms,
        }
    }

    fn assemble(self) -> Result<M4aHeader> {
        let ftyp = self.ftyp()?;
        let mut moov = self.moov()?;

        // The header is ftyp + moov + the 8-byte mdat header, and the raw
        // stream follows it directly, so this length is also the offset of
        // the one and only chunk.
        let header_len = ftyp.size() + moov.size() + 8;

        let stco = moov
            .find_mut("trak.mdia.minf.stbl.stco")
            .ok_or(Error::MissingAtom("stco"))?;
        let payload = stco.payload_mut().ok_or(Error::MissingAtom("stco"))?;
        let at = payload.len() - 4;
        payload[at..].copy_from_slice(&header_len.to_be_bytes());

        let mut buf = BytesMut::with_capacity(header_len as usize);
        ftyp.write_to(&mut buf);
        moov.write_to(&mut buf);
        Atom::new(AtomType::MDAT).write_to(&mut buf);

        // The mdat placeholder carries no payload bytes here; its declared
        // size covers the stream the caller appends after the header.
        let declared_mdat = 8u32.wrapping_add(self.total_stream_size as u32);
        let at = buf.len() - 8;
        buf[at..at + 4].copy_from_slice(&declared_mdat.to_be_bytes());

        tracing::debug!(
            header_len,
            sample_count = self.sample_count,
            duration_ms = self.duration_ms,
            total_stream_size = self.total_stream_size,
            "assembled M4A header"
        );

        Ok(M4aHeader {
            bytes: buf.to_vec(),
            sample_count: self.sample_count,
            duration_ms: self.duration_ms,
            total_stream_size: self.total_stream_size,
        })
    }

    fn ftyp(&self) -> Result<Atom> {
        let mut atom = Atom::new(AtomType::FTYP);
        let mut buf = BytesMut::with_capacity(20);
        buf.put_slice(b"M4A "); // major brand
        buf.put_u32(0); // minor version
        buf.put_slice(b"M4A "); // compatible brands
        buf.put_slice(b"mp42");
        buf.put_slice(b"isom");
        atom.set_payload(buf)?;
        Ok(atom)
    }

    fn moov(&self) -> Result<Atom> {
        let mut atom = Atom::new(AtomType::MOOV);
        atom.add_child(self.mvhd()?)?;
        atom.add_child(self.trak()?)?;
        Ok(atom)
    }

    fn mvhd(&self) -> Result<Atom> {
        let mut atom = Atom::full(AtomType::MVHD, 0, 0);
        let mut buf = BytesMut::with_capacity(96);
        buf.put_u32(self.timestamp); // creation time
        buf.put_u32(self.timestamp); // modification time
        buf.put_u32(MOVIE_TIMESCALE); // duration below is in ms
        buf.put_u32(self.duration_ms);
        buf.put_u32(0x0001_0000); // rate = 1.0
        buf.put_u16(0x0100); // volume = 1.0
        buf.put_bytes(0, 10); // reserved
        put_unity_matrix(&mut buf);
        buf.put_bytes(0, 24); // pre-defined
        buf.put_u32(2); // next track ID
        atom.set_payload(buf)?;
        Ok(atom)
    }

    fn trak(&self) -> Result<Atom> {
        let mut atom = Atom::new(AtomType::TRAK);
        atom.add_child(self.tkhd()?)?;
        atom.add_child(self.mdia()?)?;
        Ok(atom)
    }

    fn tkhd(&self) -> Result<Atom> {
        // Flags: track enabled, in movie, and in preview.
        let mut atom = Atom::full(AtomType::TKHD, 0, 0x07);
        let mut buf = BytesMut::with_capacity(80);
        buf.put_u32(self.timestamp); // creation time
        buf.put_u32(self.timestamp); // modification time
        buf.put_u32(1); // track ID
        buf.put_u32(0); // reserved
        buf.put_u32(self.duration_ms);
        buf.put_bytes(0, 8); // reserved
        buf.put_u16(0); // layer
        buf.put_u16(0); // alternate group
        buf.put_u16(0x0100); // volume = 1.0
        buf.put_u16(0); // reserved
        put_unity_matrix(&mut buf);
        buf.put_u32(0); // width (audio)
        buf.put_u32(0); // height (audio)
        atom.set_payload(buf)?;
        Ok(atom)
    }

    fn mdia(&self) -> Result<Atom> {
        let mut atom = Atom::new(AtomType::MDIA);
        atom.add_child(self.mdhd()?)?;
        atom.add_child(self.hdlr()?)?;
        atom.add_child(self.minf()?)?;
        Ok(atom)
    }

    fn mdhd(&self) -> Result<Atom> {
        let mut atom = Atom::full(AtomType::MDHD, 0, 0);
        let mut buf = BytesMut::with_capacity(20);
        buf.put_u32(self.timestamp); // creation time
        buf.put_u32(self.timestamp); // modification time
        // Timescale is the sampling rate, so the duration is in samples.
        buf.put_u32(self.sample_rate);
        buf.put_u32(self.sample_count);
        buf.put_u16(0); // language
        buf.put_u16(0); // pre-defined
        atom.set_payload(buf)?;
        Ok(atom)
    }

    fn hdlr(&self) -> Result<Atom> {
        let mut atom = Atom::full(AtomType::HDLR, 0, 0);
        let mut buf = BytesMut::with_capacity(32);
        buf.put_u32(0); // pre-defined
        buf.put_slice(b"soun"); // handler type
        buf.put_bytes(0, 12); // reserved
        buf.put_slice(b"SoundHandle\0"); // debug name
        atom.set_payload(buf)?;
        Ok(atom)
    }

    fn minf(&self) -> Result<Atom> {
        let mut atom = Atom::new(AtomType::MINF);
        atom.add_child(self.smhd()?)?;
        atom.add_child(self.dinf()?)?;
        atom.add_child(self.stbl()?)?;
        Ok(atom)
    }

    fn smhd(&self) -> Result<Atom> {
        let mut atom = Atom::full(AtomType::SMHD, 0, 0);
        // Balance (center) + reserved.
        atom.set_payload(vec![0u8; 4])?;
        Ok(atom)
    }

    fn dinf(&self) -> Result<Atom> {
        let mut atom = Atom::new(AtomType::DINF);
        atom.add_child(self.dref()?)?;
        Ok(atom)
    }

    fn dref(&self) -> Result<Atom> {
        let mut atom = Atom::full(AtomType::DREF, 0, 0);
        // Flag 0x01: data is self-contained in this file.
        let url = Atom::full(AtomType::URL, 0, 0x01);
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u32(1); // entry count
        url.write_to(&mut buf);
        atom.set_payload(buf)?;
        Ok(atom)
    }

    fn stbl(&self) -> Result<Atom> {
        let mut atom = Atom::new(AtomType::STBL);
        atom.add_child(self.stsd()?)?;
        atom.add_child(self.stts()?)?;
        atom.add_child(self.stsc()?)?;
        atom.add_child(self.stsz()?)?;
        atom.add_child(self.stco()?)?;
        Ok(atom)
    }

    fn stsd(&self) -> Result<Atom> {
        let mut atom = Atom::full(AtomType::STSD, 0, 0);
        let mp4a = self.mp4a()?;
        let mut buf = BytesMut::with_capacity(4 + mp4a.size() as usize);
        buf.put_u32(1); // entry count
        mp4a.write_to(&mut buf);
        atom.set_payload(buf)?;
        Ok(atom)
    }

    fn mp4a(&self) -> Result<Atom> {
        let mut atom = Atom::new(AtomType::MP4A);
        let esds = self.esds_atom()?;
        let mut buf = BytesMut::with_capacity(28 + esds.size() as usize);
        buf.put_bytes(0, 6); // reserved
        buf.put_u16(1); // data reference index
        buf.put_bytes(0, 8); // reserved
        buf.put_u16(self.channels);
        buf.put_u16(16); // sample size in bits
        buf.put_u16(0); // pre-defined
        buf.put_u16(0); // reserved
        // Sample rate as 16.16 fixed point.
        buf.put_u16(self.sample_rate as u16);
        buf.put_u16(0);
        esds.write_to(&mut buf);
        atom.set_payload(buf)?;
        Ok(atom)
    }

    fn esds_atom(&self) -> Result<Atom> {
        let mut atom = Atom::full(AtomType::ESDS, 0, 0);
        atom.set_payload(esds::es_descriptor(
            self.sample_rate,
            self.channels,
            self.max_frame_size,
            self.bitrate,
        ))?;
        Ok(atom)
    }

    fn stts(&self) -> Result<Atom> {
        let mut atom = Atom::full(AtomType::STTS, 0, 0);
        let audio_frames = self.frame_sizes.len() as u32 - 1;
        let mut buf = BytesMut::with_capacity(20);
        buf.put_u32(2); // entry count
        buf.put_u32(1); // the priming frame carries no samples
        buf.put_u32(0);
        buf.put_u32(audio_frames);
        buf.put_u32(SAMPLES_PER_FRAME);
        atom.set_payload(buf)?;
        Ok(atom)
    }

    fn stsc(&self) -> Result<Atom> {
        let mut atom = Atom::full(AtomType::STSC, 0, 0);
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u32(1); // entry count
        buf.put_u32(1); // first chunk
        buf.put_u32(self.frame_sizes.len() as u32); // samples per chunk
        buf.put_u32(1); // sample description index
        atom.set_payload(buf)?;
        Ok(atom)
    }

    fn stsz(&self) -> Result<Atom> {
        let mut atom = Atom::full(AtomType::STSZ, 0, 0);
        let mut buf = BytesMut::with_capacity(8 + 4 * self.frame_sizes.len());
        buf.put_u32(0); // sample size 0: every frame lists its own
        buf.put_u32(self.frame_sizes.len() as u32);
        for &size in self.frame_sizes {
            buf.put_u32(size);
        }
        atom.set_payload(buf)?;
        Ok(atom)
    }

    fn stco(&self) -> Result<Atom> {
        let mut atom = Atom::full(AtomType::STCO, 0, 0);
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u32(1); // entry count
        buf.put_u32(0); // chunk offset, patched once the length is known
        atom.set_payload(buf)?;
        Ok(atom)
    }
}

fn put_unity_matrix(buf: &mut BytesMut) {
    for v in [
        0x0001_0000u32,
        0,
        0,
        0,
        0x0001_0000,
        0,
        0,
        0,
        0x4000_0000,
    ] {
        buf.put_u32(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    /// Offset of the first atom with the given type code.
    fn find_atom(bytes: &[u8], fourcc: &[u8; 4]) -> usize {
        bytes
            .windows(4)
            .position(|w| w == fourcc)
            .map(|p| p - 4) // back up over the size field
            .unwrap_or_else(|| panic!("atom {:?} not found", fourcc))
    }

    fn be_u32(bytes: &[u8], at: usize) -> u32 {
        u32::from_be_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn test_reference_scenario() {
        let header = M4aHeader::build(44100, 2, &[2, 200, 205, 198], 128_000).unwrap();
        assert_eq!(header.sample_count(), 3072);
        assert_eq!(header.duration_ms(), 70);
        assert_eq!(header.total_stream_size(), 605);

        let bytes = header.bytes();

        // The patched chunk offset equals the header length.
        let stco = find_atom(bytes, b"stco");
        assert_eq!(be_u32(bytes, stco), 20); // 8 header + 4 vf + 8 payload
        assert_eq!(be_u32(bytes, stco + 12), 1); // entry count
        assert_eq!(be_u32(bytes, stco + 16), bytes.len() as u32);

        // mdat is the trailing 8-byte placeholder declaring the stream size.
        let mdat = bytes.len() - 8;
        assert_eq!(&bytes[mdat + 4..], b"mdat");
        assert_eq!(be_u32(bytes, mdat), 8 + 605);

        // stsz lists each frame size verbatim.
        let stsz = find_atom(bytes, b"stsz");
        assert_eq!(be_u32(bytes, stsz + 12), 0); // variable sizes
        assert_eq!(be_u32(bytes, stsz + 16), 4); // sample count
        for (i, expect) in [2u32, 200, 205, 198].into_iter().enumerate() {
            assert_eq!(be_u32(bytes, stsz + 20 + 4 * i), expect);
        }

        // stts: the priming frame, then three 1024-sample frames.
        let stts = find_atom(bytes, b"stts");
        assert_eq!(be_u32(bytes, stts + 12), 2);
        assert_eq!(be_u32(bytes, stts + 16), 1);
        assert_eq!(be_u32(bytes, stts + 20), 0);
        assert_eq!(be_u32(bytes, stts + 24), 3);
        assert_eq!(be_u32(bytes, stts + 28), 1024);

        // stsc: one chunk holding all four frames.
        let stsc = find_atom(bytes, b"stsc");
        assert_eq!(be_u32(bytes, stsc + 12), 1);
        assert_eq!(be_u32(bytes, stsc + 16), 1);
        assert_eq!(be_u32(bytes, stsc + 20), 4);
        assert_eq!(be_u32(bytes, stsc + 24), 1);
    }

    #[test]
    fn test_header_starts_with_ftyp() {
        let bytes = build_header(44100, 2, &[2, 100], 64_000).unwrap();
        assert_eq!(be_u32(&bytes, 0), 28);
        assert_eq!(&bytes[4..8], b"ftyp");
        assert_eq!(&bytes[8..12], b"M4A ");
        assert_eq!(&bytes[16..28], b"M4A mp42isom");
        assert_eq!(&bytes[32..36], b"moov");
    }

    #[test]
    fn test_header_length_is_ftyp_moov_mdat() {
        let bytes = build_header(48000, 1, &[2, 300, 301], 96_000).unwrap();
        let ftyp_size = be_u32(&bytes, 0);
        let moov_size = be_u32(&bytes, ftyp_size as usize);
        assert_eq!(bytes.len() as u32, ftyp_size + moov_size + 8);
    }

    #[test]
    fn test_too_short_table_rejected() {
        assert_matches!(
            build_header(44100, 2, &[], 128_000),
            Err(Error::InvalidFrameTable(_))
        );
        assert_matches!(
            build_header(44100, 2, &[2], 128_000),
            Err(Error::InvalidFrameTable(_))
        );
    }

    #[test]
    fn test_bad_priming_frame_rejected() {
        assert_matches!(
            build_header(44100, 2, &[3, 1, 1], 128_000),
            Err(Error::InvalidFrameTable(_))
        );
    }

    #[test]
    fn test_unlisted_sample_rate_builds_with_44100_config() {
        let bytes = build_header(50000, 2, &[2, 150, 150], 128_000).unwrap();
        // AudioSpecificConfig for index 4 (44100 Hz), stereo: 0x12 0x10.
        assert!(bytes
            .windows(4)
            .any(|w| w == [0x05, 0x02, 0x12, 0x10]));
        // The mdhd/mp4a rate fields still carry the caller's value.
        let mdhd = find_atom(&bytes, b"mdhd");
        assert_eq!(be_u32(&bytes, mdhd + 20), 50000);
    }

    #[test]
    fn test_duration_never_under_reports() {
        for rate in [8000u32, 22050, 44100, 48000, 96000] {
            let header = M4aHeader::build(rate, 2, &[2, 10, 10, 10], 128_000).unwrap();
            assert!(header.duration_ms() as u64 * rate as u64 >= 3 * 1024 * 1000);
        }
    }

    #[test]
    fn test_mdhd_duration_is_in_samples() {
        let header = M4aHeader::build(44100, 2, &[2, 50, 60, 70, 80], 128_000).unwrap();
        let bytes = header.bytes();
        let mdhd = find_atom(bytes, b"mdhd");
        assert_eq!(be_u32(bytes, mdhd + 20), 44100); // timescale
        assert_eq!(be_u32(bytes, mdhd + 24), 4 * 1024); // duration in samples
    }

    #[test]
    fn test_mvhd_duration_is_in_milliseconds() {
        let header = M4aHeader::build(32000, 1, &[2, 50, 60], 64_000).unwrap();
        let bytes = header.bytes();
        let mvhd = find_atom(bytes, b"mvhd");
        assert_eq!(be_u32(bytes, mvhd + 20), 1000); // timescale
        assert_eq!(be_u32(bytes, mvhd + 24), header.duration_ms());
    }

    #[test]
    fn test_display_hex_dump_shape() {
        let header = M4aHeader::build(44100, 2, &[2, 10], 64_000).unwrap();
        let dump = header.to_string();
        let first_line = dump.lines().next().unwrap();
        // 32 bytes per line, space-separated 4-byte groups.
        assert_eq!(first_line.len(), 8 * 8 + 7);
        assert!(first_line.starts_with("0000001C 66747970")); // size + "ftyp"
    }
}
