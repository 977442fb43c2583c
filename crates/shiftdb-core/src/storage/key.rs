//! Key encoding and timestamp helpers shared by the sled trees.

use rkyv::util::AlignedVec;

/// Encode an ordering sequence as a big-endian key.
///
/// Big-endian encoding makes lexicographic order match numeric order, so
/// tree iteration yields entries in sequence order.
pub fn sequence_key(sequence: u64) -> [u8; 8] {
    sequence.to_be_bytes()
}

/// Decode a big-endian sequence key.
pub fn decode_sequence_key(bytes: &[u8]) -> Option<u64> {
    let buf: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(buf))
}

/// Copy stored bytes into an aligned buffer for rkyv access.
pub(crate) fn aligned_copy(bytes: &[u8]) -> AlignedVec {
    let mut aligned = AlignedVec::new();
    aligned.extend_from_slice(bytes);
    aligned
}

/// Get the current timestamp in microseconds since Unix epoch.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_key_ordering() {
        let keys: Vec<_> = [1u64, 2, 255, 256, 65536].iter().map(|s| sequence_key(*s)).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(decode_sequence_key(&sequence_key(256)), Some(256));
        assert_eq!(decode_sequence_key(&[1, 2, 3]), None);
    }

    #[test]
    fn test_current_timestamp() {
        let ts1 = current_timestamp();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let ts2 = current_timestamp();
        assert!(ts2 > ts1);
    }
}
