/// Sequential little-endian reader over a received payload.
///
/// The cursor owns the payload it was handed; the transport keeps no
/// reference to it after delivery.
#[derive(Debug, Clone)]
pub struct PayloadCursor {
    data: Vec<u8>,
    offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CursorError {
    #[error("unexpected end of payload: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },
}

impl PayloadCursor {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, offset: 0 }
    }

    pub fn position(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8], CursorError> {
        if len > self.remaining() {
            return Err(CursorError::UnexpectedEnd {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let start = self.offset;
        self.offset += len;
        Ok(&self.data[start..self.offset])
    }

    fn read_array<const L: usize>(&mut self) -> Result<[u8; L], CursorError> {
        let mut out = [0u8; L];
        out.copy_from_slice(self.read_bytes(L)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CursorError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CursorError> {
        self.read_array().map(u16::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32, CursorError> {
        self.read_array().map(u32::from_le_bytes)
    }

    pub fn read_u64(&mut self) -> Result<u64, CursorError> {
        self.read_array().map(u64::from_le_bytes)
    }

    pub fn read_i64(&mut self) -> Result<i64, CursorError> {
        self.read_array().map(i64::from_le_bytes)
    }

    pub fn read_f32(&mut self) -> Result<f32, CursorError> {
        self.read_array().map(f32::from_le_bytes)
    }

    /// Consumes the cursor and returns everything not yet read.
    pub fn into_remaining(mut self) -> Vec<u8> {
        self.data.split_off(self.offset)
    }
}
