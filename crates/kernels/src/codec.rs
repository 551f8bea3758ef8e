//! Little-endian blob encoding for implementation parameters.

use crate::config::{BackendKind, DeviceInfo};
use crate::error::{DispatchError, Result};
use implmap_ir::{AxisConvention, DataType, TensorLayout};

#[derive(Debug, Default, Clone)]
pub struct BlobWriter {
    buf: Vec<u8>,
}

impl BlobWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.put_u8(u8::from(value));
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_usize(&mut self, value: usize) {
        self.put_u64(value as u64);
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_str(&mut self, value: &str) {
        self.put_u32(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn put_u16s(&mut self, values: &[u16]) {
        self.put_u32(values.len() as u32);
        for &value in values {
            self.put_u16(value);
        }
    }

    pub fn put_usizes(&mut self, values: &[usize]) {
        self.put_u32(values.len() as u32);
        for &value in values {
            self.put_usize(value);
        }
    }

    pub fn put_dtype(&mut self, dtype: DataType) {
        self.put_u8(dtype.code());
    }

    pub fn put_layout(&mut self, layout: &TensorLayout) {
        self.put_dtype(layout.dtype);
        self.put_u8(layout.convention.code());
        self.put_usizes(&layout.shape);
    }

    pub fn put_device(&mut self, device: &DeviceInfo) {
        self.put_str(&device.name);
        self.put_u16(device.backend.code());
        self.put_usize(device.max_work_group_size);
        self.put_bool(device.supports_fp16);
    }
}

/// Cursor over a record blob. Every short read is a cache corruption.
#[derive(Debug)]
pub struct BlobReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BlobReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Fails unless the whole blob was consumed.
    pub fn finish(self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(DispatchError::corruption(format!(
                "{} trailing byte(s) in record blob",
                self.remaining()
            )));
        }
        Ok(())
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(DispatchError::corruption(format!(
                "truncated record: need {} byte(s) at offset {}, have {}",
                len,
                self.pos,
                self.remaining()
            )));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn get_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DispatchError::corruption(format!(
                "invalid bool byte {other}"
            ))),
        }
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn get_usize(&mut self) -> Result<usize> {
        let value = self.get_u64()?;
        usize::try_from(value)
            .map_err(|_| DispatchError::corruption(format!("value {value} overflows usize")))
    }

    fn get_len(&mut self, elem_size: usize) -> Result<usize> {
        let len = self.get_u32()? as usize;
        if len.saturating_mul(elem_size) > self.remaining() {
            return Err(DispatchError::corruption(format!(
                "length prefix {} exceeds remaining {} byte(s)",
                len,
                self.remaining()
            )));
        }
        Ok(len)
    }

    pub fn get_str(&mut self) -> Result<String> {
        let len = self.get_len(1)?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|err| DispatchError::corruption(format!("invalid utf-8 string: {err}")))
    }

    pub fn get_u16s(&mut self) -> Result<Vec<u16>> {
        let len = self.get_len(2)?;
        (0..len).map(|_| self.get_u16()).collect()
    }

    pub fn get_usizes(&mut self) -> Result<Vec<usize>> {
        let len = self.get_len(8)?;
        (0..len).map(|_| self.get_usize()).collect()
    }

    pub fn get_dtype(&mut self) -> Result<DataType> {
        let code = self.get_u8()?;
        DataType::from_code(code)
            .ok_or_else(|| DispatchError::corruption(format!("unknown data type code {code}")))
    }

    pub fn get_layout(&mut self) -> Result<TensorLayout> {
        let dtype = self.get_dtype()?;
        let code = self.get_u8()?;
        let convention = AxisConvention::from_code(code).ok_or_else(|| {
            DispatchError::corruption(format!("unknown axis convention code {code}"))
        })?;
        let shape = self.get_usizes()?;
        Ok(TensorLayout {
            dtype,
            shape,
            convention,
        })
    }

    pub fn get_device(&mut self) -> Result<DeviceInfo> {
        let name = self.get_str()?;
        let code = self.get_u16()?;
        let backend = BackendKind::from_code(code)
            .ok_or_else(|| DispatchError::corruption(format!("unknown backend code {code}")))?;
        let max_work_group_size = self.get_usize()?;
        let supports_fp16 = self.get_bool()?;
        Ok(DeviceInfo {
            name,
            backend,
            max_work_group_size,
            supports_fp16,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_reads_are_corruption() {
        let mut writer = BlobWriter::new();
        writer.put_u16s(&[1, 2, 3]);
        let bytes = writer.into_bytes();

        let mut reader = BlobReader::new(&bytes[..bytes.len() - 1]);
        let err = reader.get_u16s().unwrap_err();
        assert!(err.is_cache_corruption());
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut writer = BlobWriter::new();
        writer.put_u32(7);
        writer.put_u8(0);
        let bytes = writer.into_bytes();

        let mut reader = BlobReader::new(&bytes);
        assert_eq!(reader.get_u32().unwrap(), 7);
        assert!(reader.finish().is_err());
    }

    #[test]
    fn oversized_length_prefix_is_rejected_before_allocation() {
        let mut writer = BlobWriter::new();
        writer.put_u32(u32::MAX);
        let bytes = writer.into_bytes();
        let mut reader = BlobReader::new(&bytes);
        assert!(reader.get_usizes().unwrap_err().is_cache_corruption());
    }

    #[test]
    fn device_and_layout_decode_in_write_order() {
        let device = DeviceInfo::ocl("test-gpu");
        let layout = TensorLayout::new(DataType::F16, vec![1, 3, 4, 4]).to_native();

        let mut writer = BlobWriter::new();
        writer.put_device(&device);
        writer.put_layout(&layout);
        let bytes = writer.into_bytes();

        let mut reader = BlobReader::new(&bytes);
        assert_eq!(reader.get_device().unwrap(), device);
        assert_eq!(reader.get_layout().unwrap(), layout);
        reader.finish().unwrap();
    }
}
