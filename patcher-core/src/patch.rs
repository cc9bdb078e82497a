use std::collections::BTreeMap;

use crate::address::AddressTranslator;
use crate::Result;

/// A run of bytes to be written at a physical file offset.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ByteEdit {
    offset: usize,
    bytes: Vec<u8>,
}

impl ByteEdit {
    pub fn new(offset: usize, bytes: Vec<u8>) -> Self {
        Self { offset, bytes }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn end(&self) -> usize {
        self.offset + self.bytes.len()
    }
}

/// Ordered list of edits. Edits are played back in insertion order, so a
/// later edit wins every byte it shares with an earlier one.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PatchSet {
    edits: Vec<ByteEdit>,
}

impl PatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, offset: usize, bytes: impl Into<Vec<u8>>) {
        self.edits.push(ByteEdit::new(offset, bytes.into()));
    }

    pub fn push_at(
        &mut self,
        translator: &AddressTranslator,
        addr: u32,
        bytes: impl Into<Vec<u8>>,
    ) -> Result<()> {
        let offset = translator.translate(addr)?;
        self.push(offset, bytes);
        Ok(())
    }

    pub fn push_word_at(&mut self, translator: &AddressTranslator, addr: u32, value: u16) -> Result<()> {
        self.push_at(translator, addr, value.to_le_bytes())
    }

    pub fn merge(&mut self, other: PatchSet) {
        self.edits.extend(other.edits);
    }

    pub fn edits(&self) -> &[ByteEdit] {
        &self.edits
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ByteEdit> {
        self.edits.iter()
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn byte_count(&self) -> usize {
        self.edits.iter().map(|e| e.bytes.len()).sum()
    }

    /// Resolved view of the set: the final value of every touched byte.
    pub fn overlay(&self) -> BTreeMap<usize, u8> {
        let mut out = BTreeMap::new();
        for edit in &self.edits {
            for (i, &b) in edit.bytes.iter().enumerate() {
                out.insert(edit.offset + i, b);
            }
        }
        out
    }
}

impl<'a> IntoIterator for &'a PatchSet {
    type Item = &'a ByteEdit;
    type IntoIter = std::slice::Iter<'a, ByteEdit>;

    fn into_iter(self) -> Self::IntoIter {
        self.edits.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_edits_win_per_byte() {
        let mut set = PatchSet::new();
        set.push(0, vec![1, 1, 1, 1]);
        set.push(2, vec![9, 9, 9]);
        set.push(1, vec![5]);

        let overlay = set.overlay();
        let bytes: Vec<(usize, u8)> = overlay.into_iter().collect();
        assert_eq!(bytes, vec![(0, 1), (1, 5), (2, 9), (3, 9), (4, 9)]);
    }

    #[test]
    fn merge_keeps_both_orders() {
        let mut a = PatchSet::new();
        a.push(10, vec![1]);
        a.push(20, vec![2]);
        let mut b = PatchSet::new();
        b.push(10, vec![3]);

        a.merge(b);
        let offsets: Vec<usize> = a.iter().map(|e| e.offset()).collect();
        assert_eq!(offsets, vec![10, 20, 10]);
        assert_eq!(a.overlay()[&10], 3);
        assert_eq!(a.byte_count(), 3);
    }

    #[test]
    fn push_word_translates_and_is_little_endian() {
        let t = AddressTranslator::exhirom();
        let mut set = PatchSet::new();
        set.push_word_at(&t, 0x30_8000, 0xBEEF).unwrap();
        assert_eq!(set.edits()[0], ByteEdit::new(0x40_0000, vec![0xEF, 0xBE]));
        assert!(set.push_at(&t, 0x3F_0000, vec![0]).is_err());
        assert_eq!(set.len(), 1);
    }
}
