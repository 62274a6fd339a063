use anyhow::{Result, anyhow};

/// Little-endian cursor over instruction payloads.
pub struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let [val] = self.read_bytes_array::<1>()?;
        Ok(val)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_bytes_array::<8>()?))
    }

    pub fn read_bytes_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        if self.remaining() < N {
            return Err(anyhow!(
                "Read past end of buffer: need {} bytes at offset {}, {} left",
                N,
                self.offset,
                self.remaining()
            ));
        }
        let mut array = [0u8; N];
        array.copy_from_slice(&self.data[self.offset..self.offset + N]);
        self.offset += N;
        Ok(array)
    }
}
