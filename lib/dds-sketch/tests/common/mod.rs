//! An independent decoder for the sketch wire format, used to check the encoder against the format rather than against
//! itself.

use std::collections::BTreeMap;

#[derive(Debug, PartialEq)]
pub struct DecodedSketch {
    pub version: u8,
    pub gamma: f64,
    pub sum: f64,
    pub count: u64,
    pub buckets: BTreeMap<i32, u64>,
}

#[derive(Debug, PartialEq)]
pub enum DecodeError {
    Truncated,
    VarintTooLong,
    KeyOutOfRange,
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.data.len() < len {
            return Err(DecodeError::Truncated);
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    fn read_f64(&mut self) -> Result<f64, DecodeError> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(buf))
    }

    fn read_varint(&mut self) -> Result<u64, DecodeError> {
        let mut value = 0u64;
        for i in 0..10 {
            let byte = self.take(1)?[0];
            value |= u64::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DecodeError::VarintTooLong)
    }
}

pub fn decode(data: &[u8]) -> Result<DecodedSketch, DecodeError> {
    let mut reader = Reader { data };

    let version = reader.take(1)?[0];
    let gamma = reader.read_f64()?;
    let sum = reader.read_f64()?;
    let count = reader.read_varint()?;

    let mut buckets = BTreeMap::new();
    let mut prev_key = 0i64;
    while !reader.data.is_empty() {
        let key = prev_key + reader.read_varint()? as i64;
        let key = i32::try_from(key).map_err(|_| DecodeError::KeyOutOfRange)?;
        let bucket_count = reader.read_varint()?;
        buckets.insert(key, bucket_count);
        prev_key = i64::from(key);
    }

    Ok(DecodedSketch {
        version,
        gamma,
        sum,
        count,
        buckets,
    })
}

pub fn decode_hex(data: &str) -> Result<DecodedSketch, DecodeError> {
    let bytes = hex::decode(data).map_err(|_| DecodeError::Truncated)?;
    decode(&bytes)
}
