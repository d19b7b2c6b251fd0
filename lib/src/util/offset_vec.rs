use std::fmt::{Debug, Error, Formatter};
use std::iter::{DoubleEndedIterator, Enumerate, Extend, FromIterator};
use std::ops::Sub;
use std::result::Result;
use std::slice::Iter;
use std::vec::IntoIter as VecIntoIter;

/// Elements with a width (eg. when used in an `OffsetVec`)
pub trait Width {
    fn width(&self) -> usize;
}

/// A vector of elements of different logical "widths", where offsets into the vector are given in
/// terms of the sum of the widths of the previous elements (as opposed to the number of preceding
/// elements).
///
/// Stack map frames are the main user: a `long` on the operand stack is one frame entry but
/// occupies two words, and a `double` local is one entry but occupies two local variable slots.
/// The constant pool has the same shape (indexing starts at 1, some constants take two indices).
#[derive(Clone)]
pub struct OffsetVec<T: Sized> {
    /// Entries, along with their offset
    entries: Vec<(Offset, T)>,

    /// Offset of the next element to be added (starts at 1 for the constant pool)
    offset_len: Offset,
}

/// Offset into an `OffsetVec` (or, more generally, a position measured in bytes or slots)
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Offset(pub usize);

impl Sub for Offset {
    type Output = isize;

    fn sub(self, other: Offset) -> isize {
        (self.0 as isize) - (other.0 as isize)
    }
}

impl<T: Sized + Width> OffsetVec<T> {
    /// New empty offset vector
    pub fn new() -> OffsetVec<T> {
        OffsetVec {
            entries: vec![],
            offset_len: Offset(0),
        }
    }

    /// New empty offset vector, with a custom starting offset
    pub fn new_starting_at(initial_offset: Offset) -> OffsetVec<T> {
        OffsetVec {
            entries: vec![],
            offset_len: initial_offset,
        }
    }

    /// Number of entries (not the sum of their widths)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Are there no entries?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Offset of the next element to be added
    pub fn offset_len(&self) -> Offset {
        self.offset_len
    }

    /// Add an entry to the back, returning the offset at which it was placed
    pub fn push(&mut self, slot: T) -> Offset {
        let offset = self.offset_len;
        self.offset_len.0 += slot.width();
        self.entries.push((offset, slot));

        offset
    }

    /// Remove an entry from the back
    pub fn pop(&mut self) -> Option<(Offset, usize, T)> {
        self.entries.pop().map(|(off, elem)| {
            self.offset_len = off;
            (off, self.entries.len(), elem)
        })
    }

    /// Last entry, if there is one
    pub fn last(&self) -> Option<&T> {
        self.entries.last().map(|(_, elem)| elem)
    }

    /// Get an entry (and its index) by its offset in the vector
    ///
    /// Note: this uses binary search to find the offset
    pub fn get_offset(&self, offset: Offset) -> OffsetResult<T> {
        match self.entries.binary_search_by_key(&offset, |(off, _)| *off) {
            Err(insert_at) if insert_at == self.entries.len() => OffsetResult::TooLarge,
            Err(insert_at) => OffsetResult::InvalidOffset(insert_at),
            Ok(found_idx) => OffsetResult::Ok(found_idx, &self.entries[found_idx].1),
        }
    }

    /// Rewrite every entry in place
    ///
    /// The replacement must have the same width as the element it replaces, otherwise the
    /// offsets of later entries would be wrong.
    pub fn map_in_place(&mut self, mut update: impl FnMut(&T) -> Option<T>) {
        for (_, elem) in self.entries.iter_mut() {
            if let Some(replacement) = update(elem) {
                debug_assert_eq!(replacement.width(), elem.width());
                *elem = replacement;
            }
        }
    }

    pub fn iter<'a>(&'a self) -> OffsetVecIter<'a, T> {
        self.into_iter()
    }
}

impl<A: PartialEq> PartialEq for OffsetVec<A> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<A: Eq> Eq for OffsetVec<A> {}

impl<A: Width> Default for OffsetVec<A> {
    fn default() -> Self {
        OffsetVec::new()
    }
}

pub enum OffsetResult<'a, T> {
    /// Element was accessed
    Ok(usize, &'a T),

    /// Offset was invalid, and falls in the middle of the element at this index
    InvalidOffset(usize),

    /// Offset is too big
    TooLarge,
}

impl<'a, T> OffsetResult<'a, T> {
    /// Convert to an `Option` and keep only the value found
    pub fn ok(&self) -> Option<&'a T> {
        match self {
            OffsetResult::Ok(_, found) => Some(found),
            OffsetResult::InvalidOffset(_) | OffsetResult::TooLarge => None,
        }
    }
}

/// Iterator for owned `OffsetVec`
pub struct OffsetVecIntoIter<T>(Enumerate<VecIntoIter<(Offset, T)>>);

impl<T> Iterator for OffsetVecIntoIter<T> {
    type Item = (Offset, usize, T);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(idx, (off, elem))| (off, idx, elem))
    }
}

impl<T> DoubleEndedIterator for OffsetVecIntoIter<T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.0
            .next_back()
            .map(|(idx, (off, elem))| (off, idx, elem))
    }
}

impl<T> IntoIterator for OffsetVec<T> {
    type Item = (Offset, usize, T);
    type IntoIter = OffsetVecIntoIter<T>;

    fn into_iter(self) -> OffsetVecIntoIter<T> {
        OffsetVecIntoIter(self.entries.into_iter().enumerate())
    }
}

/// Iterator for borrowed `OffsetVec`
pub struct OffsetVecIter<'a, T>(Enumerate<Iter<'a, (Offset, T)>>);

impl<'a, T> Iterator for OffsetVecIter<'a, T> {
    type Item = (Offset, usize, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(idx, (off, elem))| (*off, idx, elem))
    }
}

impl<'a, T> DoubleEndedIterator for OffsetVecIter<'a, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.0
            .next_back()
            .map(|(idx, (off, elem))| (*off, idx, elem))
    }
}

impl<'a, T> IntoIterator for &'a OffsetVec<T> {
    type Item = (Offset, usize, &'a T);
    type IntoIter = OffsetVecIter<'a, T>;

    fn into_iter(self) -> OffsetVecIter<'a, T> {
        OffsetVecIter(self.entries.iter().enumerate())
    }
}

impl<T: Width> FromIterator<T> for OffsetVec<T> {
    fn from_iter<A: IntoIterator<Item = T>>(elems: A) -> Self {
        let mut offset_vec = OffsetVec::new();
        for elem in elems {
            offset_vec.push(elem);
        }
        offset_vec
    }
}

impl<T: Width> Extend<T> for OffsetVec<T> {
    fn extend<U: IntoIterator<Item = T>>(&mut self, iter: U) {
        for elem in iter {
            self.push(elem);
        }
    }
}

impl<T: Debug> Debug for OffsetVec<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        let mut list = f.debug_list();
        for (off, elem) in &self.entries {
            list.entry(&format_args!("#{} = {:?}", off.0, elem));
        }
        list.finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Copy, Clone, Eq, PartialEq, Debug)]
    enum Word {
        Single(u8),
        Double(u8),
    }

    impl Width for Word {
        fn width(&self) -> usize {
            match self {
                Word::Single(_) => 1,
                Word::Double(_) => 2,
            }
        }
    }

    #[test]
    fn offsets_count_words_not_entries() {
        let words: OffsetVec<Word> = vec![Word::Single(1), Word::Double(2), Word::Single(3)]
            .into_iter()
            .collect();
        assert_eq!(words.len(), 3);
        assert_eq!(words.offset_len(), Offset(4));
        assert_eq!(
            words.into_iter().collect::<Vec<_>>(),
            vec![
                (Offset(0), 0, Word::Single(1)),
                (Offset(1), 1, Word::Double(2)),
                (Offset(3), 2, Word::Single(3)),
            ]
        );
    }

    #[test]
    fn pop_restores_offset() {
        let mut words: OffsetVec<Word> = OffsetVec::new();
        words.push(Word::Single(1));
        words.push(Word::Double(2));
        assert_eq!(words.pop(), Some((Offset(1), 1, Word::Double(2))));
        assert_eq!(words.offset_len(), Offset(1));
        assert_eq!(words.last(), Some(&Word::Single(1)));
    }

    #[test]
    fn lookup_by_offset() {
        let mut pool: OffsetVec<Word> = OffsetVec::new_starting_at(Offset(1));
        pool.push(Word::Double(7));
        pool.push(Word::Single(8));
        assert_eq!(pool.get_offset(Offset(1)).ok(), Some(&Word::Double(7)));
        assert!(matches!(pool.get_offset(Offset(2)), OffsetResult::InvalidOffset(1)));
        assert_eq!(pool.get_offset(Offset(3)).ok(), Some(&Word::Single(8)));
        assert!(matches!(pool.get_offset(Offset(4)), OffsetResult::TooLarge));
    }

    #[test]
    fn map_in_place_keeps_offsets() {
        let mut words: OffsetVec<Word> = vec![Word::Single(1), Word::Double(2), Word::Single(1)]
            .into_iter()
            .collect();
        words.map_in_place(|w| match w {
            Word::Single(1) => Some(Word::Single(9)),
            _ => None,
        });
        assert_eq!(
            words.iter().map(|(off, _, w)| (off, *w)).collect::<Vec<_>>(),
            vec![
                (Offset(0), Word::Single(9)),
                (Offset(1), Word::Double(2)),
                (Offset(3), Word::Single(9)),
            ]
        );
    }
}
