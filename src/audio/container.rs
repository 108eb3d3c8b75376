//! Length-prefixed audio frame container.
//!
//! The on-disk layout is a bare sequence of frames, each a little-endian
//! `u16` byte count followed by that many bytes of opaque pre-encoded
//! audio. End-of-file is only legal between frames.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("container truncated: expected {expected} more bytes, got {got}")]
    Truncated { expected: usize, got: usize },
    #[error("frame of {0} bytes does not fit a u16 length prefix")]
    Oversize(usize),
}

/// Decode a whole container into its ordered frame sequence.
///
/// EOF exactly at the start of a length prefix terminates the stream
/// cleanly; EOF anywhere else (inside a prefix or a payload) means the
/// container is malformed and nothing is returned.
pub fn read_frames<R: Read>(mut reader: R) -> Result<Vec<Bytes>, ContainerError> {
    let mut frames = Vec::new();

    loop {
        let mut prefix = [0u8; 2];
        match reader.read_exact(&mut prefix[..1]) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(frames),
            Err(e) => return Err(e.into()),
        }
        match reader.read_exact(&mut prefix[1..]) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(ContainerError::Truncated {
                    expected: 2,
                    got: 1,
                });
            }
            Err(e) => return Err(e.into()),
        }
        let len = u16::from_le_bytes(prefix) as usize;

        let mut payload = Vec::with_capacity(len);
        let got = (&mut reader).take(len as u64).read_to_end(&mut payload)?;
        if got < len {
            return Err(ContainerError::Truncated { expected: len, got });
        }
        frames.push(Bytes::from(payload));
    }
}

/// Encode frames back into the container layout; the inverse of
/// [`read_frames`].
pub fn write_frames<W: Write>(mut writer: W, frames: &[Bytes]) -> Result<(), ContainerError> {
    for frame in frames {
        let len = u16::try_from(frame.len()).map_err(|_| ContainerError::Oversize(frame.len()))?;
        writer.write_u16::<LittleEndian>(len)?;
        writer.write_all(frame)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_two_frames() {
        let raw = [0x03, 0x00, b'a', b'b', b'c', 0x02, 0x00, b'x', b'y'];
        let frames = read_frames(&raw[..]).unwrap();
        assert_eq!(frames, vec![Bytes::from_static(b"abc"), Bytes::from_static(b"xy")]);
    }

    #[test]
    fn empty_input_is_a_valid_empty_container() {
        let frames = read_frames(&[][..]).unwrap();
        assert!(frames.is_empty());
    }

    #[test]
    fn zero_length_frames_are_preserved() {
        let raw = [0x00, 0x00, 0x01, 0x00, b'q'];
        let frames = read_frames(&raw[..]).unwrap();
        assert_eq!(frames, vec![Bytes::new(), Bytes::from_static(b"q")]);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let raw = [0x03, 0x00, b'a', b'b'];
        match read_frames(&raw[..]) {
            Err(ContainerError::Truncated { expected: 3, got: 2 }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn split_length_prefix_is_rejected() {
        let raw = [0x03, 0x00, b'a', b'b', b'c', 0x02];
        match read_frames(&raw[..]) {
            Err(ContainerError::Truncated { expected: 2, got: 1 }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn round_trips_the_original_byte_stream() {
        let raw = [
            0x03, 0x00, b'a', b'b', b'c', 0x00, 0x00, 0x02, 0x00, b'x', b'y',
        ];
        let frames = read_frames(&raw[..]).unwrap();
        let mut out = Vec::new();
        write_frames(&mut out, &frames).unwrap();
        assert_eq!(out, raw);
    }

    #[test]
    fn oversize_frame_is_rejected_on_encode() {
        let big = Bytes::from(vec![0u8; u16::MAX as usize + 1]);
        match write_frames(Vec::new(), &[big]) {
            Err(ContainerError::Oversize(len)) => assert_eq!(len, u16::MAX as usize + 1),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
