//! Telemetry batches and their on-disk encoding.
//!
//! A batch is an ordered list of already-serialized records. Position is the
//! record's identity: partial-acceptance errors name records by index.
//!
//! Blobs hold batches as newline-delimited records. Each record is written
//! followed by `\n` and decoding splits on `\n`. Records are opaque bytes: any
//! byte other than `\n` survives the round trip unchanged, `\r` and invalid
//! UTF-8 included.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("record {index} contains a newline")]
    EmbeddedNewline { index: usize },

    #[error("record {index} is empty")]
    EmptyRecord { index: usize },

    #[error("payload holds no records")]
    NoRecords,
}

/// Ordered sequence of opaque serialized records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryBatch {
    records: Vec<Vec<u8>>,
}

impl TelemetryBatch {
    /// Build a batch, rejecting records that would not survive encoding.
    pub fn new(records: Vec<Vec<u8>>) -> Result<Self, CodecError> {
        for (index, record) in records.iter().enumerate() {
            if record.is_empty() {
                return Err(CodecError::EmptyRecord { index });
            }
            if record.contains(&b'\n') {
                return Err(CodecError::EmbeddedNewline { index });
            }
        }
        Ok(TelemetryBatch { records })
    }

    /// Build a batch from string records.
    pub fn from_strings<I, S>(records: I) -> Result<Self, CodecError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(records.into_iter().map(|s| s.into().into_bytes()).collect())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Vec<u8>] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.records.get(index).map(Vec::as_slice)
    }

    /// The records at `indices`, in the order given. Out-of-range indices
    /// are skipped.
    pub fn subset(&self, indices: &[usize]) -> TelemetryBatch {
        TelemetryBatch {
            records: indices
                .iter()
                .filter_map(|&i| self.records.get(i).cloned())
                .collect(),
        }
    }

    /// Total payload size once encoded.
    pub fn encoded_len(&self) -> usize {
        self.records.iter().map(|r| r.len() + 1).sum()
    }

    /// Encode as newline-delimited records.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        for record in &self.records {
            out.extend_from_slice(record);
            out.push(b'\n');
        }
        out
    }

    /// Decode a stored payload. Inverse of [`encode`](Self::encode).
    ///
    /// Empty lines are skipped since `new` never admits an empty record.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let records: Vec<Vec<u8>> = bytes
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .map(<[u8]>::to_vec)
            .collect();
        if records.is_empty() {
            return Err(CodecError::NoRecords);
        }
        Ok(TelemetryBatch { records })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn batch(n: usize) -> TelemetryBatch {
        TelemetryBatch::from_strings((0..n).map(|i| format!("{{\"seq\":{}}}", i))).unwrap()
    }

    #[test]
    fn test_encode_is_newline_terminated() {
        let b = TelemetryBatch::from_strings(["a", "bc"]).unwrap();
        assert_eq!(b.encode(), b"a\nbc\n");
        assert_eq!(b.encoded_len(), 5);
    }

    #[test]
    fn test_decode_skips_blank_lines() {
        let b = TelemetryBatch::decode(b"\n{\"a\":1}\n\n{\"b\":2}").unwrap();
        assert_eq!(b.len(), 2);
        assert_eq!(b.get(0), Some(&b"{\"a\":1}"[..]));
        assert_eq!(b.get(1), Some(&b"{\"b\":2}"[..]));
    }

    #[test]
    fn test_decode_rejects_empty_payload() {
        assert_eq!(TelemetryBatch::decode(b""), Err(CodecError::NoRecords));
        assert_eq!(TelemetryBatch::decode(b"\n\n"), Err(CodecError::NoRecords));
    }

    #[test]
    fn test_binary_and_carriage_return_records_survive() {
        let b = TelemetryBatch::new(vec![
            vec![0xff, 0xfe, b'x'],
            b"abc\r".to_vec(),
            b"\r".to_vec(),
            b"ok".to_vec(),
        ])
        .unwrap();
        let decoded = TelemetryBatch::decode(&b.encode()).unwrap();
        assert_eq!(decoded, b);
        assert_eq!(decoded.get(1), Some(&b"abc\r"[..]));
    }

    #[test]
    fn test_new_rejects_unencodable_records() {
        assert_eq!(
            TelemetryBatch::from_strings(["fine", "two\nlines"]),
            Err(CodecError::EmbeddedNewline { index: 1 })
        );
        assert_eq!(
            TelemetryBatch::from_strings(["", "x"]),
            Err(CodecError::EmptyRecord { index: 0 })
        );
    }

    #[test]
    fn test_subset_preserves_order_and_skips_out_of_range() {
        let b = batch(10);
        let sub = b.subset(&[3, 7, 42]);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.get(0), b.get(3));
        assert_eq!(sub.get(1), b.get(7));
    }

    #[test]
    fn test_decode_inverts_encode() {
        let b = batch(5);
        assert_eq!(TelemetryBatch::decode(&b.encode()).unwrap(), b);
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode_for_any_bytes(
            records in proptest::collection::vec(
                proptest::collection::vec(any::<u8>().prop_filter("newline", |b| *b != b'\n'), 1..64),
                1..20,
            )
        ) {
            let b = TelemetryBatch::new(records).unwrap();
            prop_assert_eq!(TelemetryBatch::decode(&b.encode()).unwrap(), b);
        }
    }
}
