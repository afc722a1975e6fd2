//! # Logical Tuples
//!
//! A [`Tuple`] is the unit the bulk loader consumes: an order-preserving key
//! plus an opaque payload. Node pointers reuse the same shape with a 4-byte
//! child page number as payload.
//!
//! Oversize payloads are converted in place: [`Tuple::convert_big`] moves the
//! payload tail out into a [`BigRec`] and leaves a reference placeholder the
//! blob writer fills in later. [`Tuple::convert_back_big`] restores the
//! original payload, so the caller's tuple is unchanged whatever the insert
//! outcome.

use crate::config::{EXTERN_LOCAL_PREFIX, EXTERN_REF_SIZE, REC_INFO_MIN_REC};

use super::RowFormat;

/// A logical index entry: key bytes, payload bytes, record info bits.
#[derive(Debug, Clone)]
pub struct Tuple {
    key: Vec<u8>,
    payload: Vec<u8>,
    info_bits: u8,
    ext: bool,
}

/// Payload bytes moved off-page by [`Tuple::convert_big`], waiting to be
/// written to blob pages.
#[derive(Debug)]
pub struct BigRec {
    tail: Vec<u8>,
}

impl BigRec {
    pub fn tail(&self) -> &[u8] {
        &self.tail
    }

    pub fn total_len(&self) -> u64 {
        self.tail.len() as u64
    }
}

impl Tuple {
    pub fn new(key: Vec<u8>, payload: Vec<u8>) -> Tuple {
        Tuple {
            key,
            payload,
            info_bits: 0,
            ext: false,
        }
    }

    /// Builds a node pointer: the child's first key paired with its page
    /// number.
    pub fn node_pointer(key: Vec<u8>, child_page_no: u32) -> Tuple {
        Tuple::new(key, child_page_no.to_le_bytes().to_vec())
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn info_bits(&self) -> u8 {
        self.info_bits
    }

    pub fn is_ext(&self) -> bool {
        self.ext
    }

    pub fn set_min_rec(&mut self) {
        self.info_bits |= REC_INFO_MIN_REC;
    }

    pub fn has_min_rec(&self) -> bool {
        self.info_bits & REC_INFO_MIN_REC != 0
    }

    /// Reads a node pointer's child page number back out of the payload.
    pub fn child_page_no(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.payload.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    /// Moves the payload tail out for external storage. The in-tuple payload
    /// becomes the format's local prefix plus a zeroed reference slot.
    /// Returns `None` when splitting cannot shrink the record (the payload
    /// is already no larger than what would remain).
    pub fn convert_big(&mut self, format: RowFormat) -> Option<BigRec> {
        let prefix_len = match format {
            RowFormat::Redundant => EXTERN_LOCAL_PREFIX,
            RowFormat::Dynamic | RowFormat::Compressed => 0,
        };

        if self.ext || self.payload.len() <= prefix_len + EXTERN_REF_SIZE {
            return None;
        }

        let tail = self.payload.split_off(prefix_len);
        self.payload.extend_from_slice(&[0u8; EXTERN_REF_SIZE]);
        self.ext = true;

        Some(BigRec { tail })
    }

    /// Restores the payload moved out by [`Tuple::convert_big`].
    pub fn convert_back_big(&mut self, big: BigRec) {
        debug_assert!(self.ext);
        self.payload.truncate(self.payload.len() - EXTERN_REF_SIZE);
        self.payload.extend_from_slice(&big.tail);
        self.ext = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_pointer_round_trips_child() {
        let np = Tuple::node_pointer(b"key".to_vec(), 4711);
        assert_eq!(np.child_page_no(), Some(4711));
    }

    #[test]
    fn min_rec_flag_sets_info_bits() {
        let mut t = Tuple::new(b"a".to_vec(), vec![]);
        assert!(!t.has_min_rec());
        t.set_min_rec();
        assert_eq!(t.info_bits() & REC_INFO_MIN_REC, REC_INFO_MIN_REC);
    }

    #[test]
    fn convert_big_dynamic_keeps_only_the_reference() {
        let payload: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        let mut t = Tuple::new(b"k".to_vec(), payload.clone());

        let big = t.convert_big(RowFormat::Dynamic).unwrap();
        assert_eq!(t.payload().len(), EXTERN_REF_SIZE);
        assert_eq!(big.tail(), payload.as_slice());
        assert!(t.is_ext());

        t.convert_back_big(big);
        assert_eq!(t.payload(), payload.as_slice());
        assert!(!t.is_ext());
    }

    #[test]
    fn convert_big_redundant_keeps_local_prefix() {
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let mut t = Tuple::new(b"k".to_vec(), payload.clone());

        let big = t.convert_big(RowFormat::Redundant).unwrap();
        assert_eq!(t.payload().len(), EXTERN_LOCAL_PREFIX + EXTERN_REF_SIZE);
        assert_eq!(&t.payload()[..EXTERN_LOCAL_PREFIX], &payload[..EXTERN_LOCAL_PREFIX]);
        assert_eq!(big.tail(), &payload[EXTERN_LOCAL_PREFIX..]);

        t.convert_back_big(big);
        assert_eq!(t.payload(), payload.as_slice());
    }

    #[test]
    fn convert_big_refuses_small_payloads() {
        let mut t = Tuple::new(b"k".to_vec(), vec![0u8; 16]);
        assert!(t.convert_big(RowFormat::Dynamic).is_none());
    }
}
