//! Physical memory of the emulated machine, carved into frames.

use alloc::vec;
use alloc::vec::Vec;

use crate::types::FrameNumber;

/// Main memory: `num_frames * page_size` bytes
#[derive(Debug, Clone)]
pub struct PhysicalMemory {
    bytes: Vec<u8>,
    page_size: usize,
}

impl PhysicalMemory {
    /// Zeroed memory; the geometry must come from a validated `VmConfig`
    pub fn new(num_frames: usize, page_size: usize) -> Self {
        Self {
            bytes: vec![0; num_frames * page_size],
            page_size,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn num_frames(&self) -> usize {
        if self.page_size == 0 {
            0
        } else {
            self.bytes.len() / self.page_size
        }
    }

    /// Contents of one frame
    pub fn frame(&self, frame: FrameNumber) -> Option<&[u8]> {
        let start = frame.byte_offset(self.page_size);
        self.bytes.get(start..start + self.page_size)
    }

    pub fn frame_mut(&mut self, frame: FrameNumber) -> Option<&mut [u8]> {
        let start = frame.byte_offset(self.page_size);
        self.bytes.get_mut(start..start + self.page_size)
    }

    /// Read `buf.len()` bytes at physical address `paddr`
    pub fn read(&self, paddr: usize, buf: &mut [u8]) -> bool {
        match self.bytes.get(paddr..paddr + buf.len()) {
            Some(src) => {
                buf.copy_from_slice(src);
                true
            }
            None => false,
        }
    }

    /// Write `data` at physical address `paddr`
    pub fn write(&mut self, paddr: usize, data: &[u8]) -> bool {
        match self.bytes.get_mut(paddr..paddr + data.len()) {
            Some(dst) => {
                dst.copy_from_slice(data);
                true
            }
            None => false,
        }
    }
}
