//! MetalBuffer - Metal implementation of the RawBuffer trait

use std::any::Any;

use kraken_gpu::device::RawBuffer;
use kraken_gpu::error::{Error, Result};

/// Shared-storage Metal buffer; CPU reads and writes go straight through
/// the mapped contents pointer
pub struct MetalBuffer {
    buffer: metal::Buffer,
}

unsafe impl Send for MetalBuffer {}
unsafe impl Sync for MetalBuffer {}

impl MetalBuffer {
    pub(crate) fn new(buffer: metal::Buffer) -> Self {
        Self { buffer }
    }

    pub(crate) fn raw(&self) -> &metal::Buffer {
        &self.buffer
    }
}

impl RawBuffer for MetalBuffer {
    fn len(&self) -> u64 {
        self.buffer.length()
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let end = offset + data.len() as u64;
        if end > self.buffer.length() {
            return Err(Error::InvalidResource(format!(
                "write past end of buffer ({} > {})",
                end,
                self.buffer.length()
            )));
        }
        unsafe {
            let contents = (self.buffer.contents() as *mut u8).add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), contents, data.len());
        }
        Ok(())
    }

    fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let end = offset + len;
        if end > self.buffer.length() {
            return Err(Error::InvalidResource("read past end of buffer".to_string()));
        }
        let mut out = vec![0u8; len as usize];
        unsafe {
            let contents = (self.buffer.contents() as *const u8).add(offset as usize);
            std::ptr::copy_nonoverlapping(contents, out.as_mut_ptr(), len as usize);
        }
        Ok(out)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
