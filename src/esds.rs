//! ES_Descriptor encoding for the esds box (ISO/IEC 14496-1).
//!
//! The descriptor carried by the esds box is a fixed-shape nested
//! structure: an ES_Descriptor containing a DecoderConfigDescriptor
//! (AAC-LC object type, audio stream type, decode-buffer size, bitrates,
//! and a bit-packed AudioSpecificConfig) followed by an
//! SLConfigDescriptor.

use bytes::{BufMut, BytesMut};

/// Sampling frequencies addressable by the AudioSpecificConfig 4-bit
/// index, in table order.
pub(crate) const SAMPLING_FREQUENCIES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Table index of 44100 Hz, used when the requested rate is not listed.
const FALLBACK_FREQUENCY_INDEX: u8 = 4;

/// 4-bit AudioSpecificConfig index for `sample_rate`.
///
/// Rates absent from the table are remapped to 44100 Hz rather than
/// rejected; the remap is logged but callers see no error.
pub(crate) fn frequency_index(sample_rate: u32) -> u8 {
    match SAMPLING_FREQUENCIES.iter().position(|&f| f == sample_rate) {
        Some(index) => index as u8,
        None => {
            tracing::warn!(
                sample_rate,
                "sample rate not in the AudioSpecificConfig table, defaulting to 44100 Hz"
            );
            FALLBACK_FREQUENCY_INDEX
        }
    }
}

/// Decode-buffer size: the smallest multiple of 256 that is at least 768
/// and can hold two of the largest frames.
fn decoder_buffer_size(max_frame_size: u32) -> u32 {
    let mut size = 0x300u32;
    while size < 2 * max_frame_size {
        size += 0x100;
    }
    size
}

/// Serialize the ES_Descriptor carried by the esds box payload.
pub(crate) fn es_descriptor(
    sample_rate: u32,
    channels: u16,
    max_frame_size: u32,
    bitrate: u32,
) -> Vec<u8> {
    let index = frequency_index(sample_rate);
    let buffer_size = decoder_buffer_size(max_frame_size);

    let mut buf = BytesMut::with_capacity(27);
    // ES_Descriptor: tag, length, ES_ID, stream priority.
    buf.put_slice(&[0x03, 0x19, 0x00, 0x00, 0x00]);
    // DecoderConfigDescriptor: tag, length, objectTypeIndication
    // (ISO/IEC 14496-3 audio), streamType (AudioStream).
    buf.put_slice(&[0x04, 0x11, 0x40, 0x15]);
    // bufferSizeDB is 24 bits.
    buf.put_slice(&buffer_size.to_be_bytes()[1..]);
    buf.put_u32(bitrate); // maxBitrate
    buf.put_u32(bitrate); // avgBitrate
    // AudioSpecificConfig: tag, length, then AAC-LC (object type 2) with
    // the frequency index split across the two config bytes and the
    // channel configuration in bits 3-6 of the second.
    buf.put_slice(&[0x05, 0x02]);
    buf.put_u8(0x10 | ((index >> 1) & 0x07));
    buf.put_u8(((index & 1) << 7) | ((channels as u8 & 0x0F) << 3));
    // SLConfigDescriptor: tag, length, predefined for MP4 files.
    buf.put_slice(&[0x06, 0x01, 0x02]);
    buf.to_vec()
}
