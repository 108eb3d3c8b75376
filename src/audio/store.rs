//! Shared read-only store of decoded audio frames.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use bytes::Bytes;

use crate::audio::container::{ContainerError, read_frames};

/// The decoded clip: an ordered frame sequence, loaded once at startup
/// and shared read-only by every playback invocation. A failed decode
/// never produces a store, so a store always holds a complete clip.
#[derive(Debug)]
pub struct FrameStore {
    frames: Box<[Bytes]>,
}

impl FrameStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ContainerError> {
        let file = File::open(path)?;
        let frames = read_frames(BufReader::new(file))?;
        Ok(Self::from_frames(frames))
    }

    pub fn from_frames(frames: Vec<Bytes>) -> Self {
        Self {
            frames: frames.into_boxed_slice(),
        }
    }

    /// The full sequence, in playback order.
    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
