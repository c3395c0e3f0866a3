use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Ordered collection of document codes with change tracking.
///
/// Libraries store their document set as one opaque serialized column, so
/// in-place mutation is invisible to the persistence layer. Every mutating
/// operation here raises an internal dirty flag; the store flushes the list
/// (and bumps the library's `date_last_modified`) only when the flag is set,
/// then clears it with `take_dirty`.
///
/// Duplicates are allowed and insertion order is preserved.
#[derive(Debug, Clone, Default)]
pub struct BibcodeList {
    items: Vec<String>,
    dirty: bool,
}

impl BibcodeList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a document code at the end. Marks dirty.
    pub fn append(&mut self, bibcode: impl Into<String>) {
        self.items.push(bibcode.into());
        self.dirty = true;
    }

    /// Removes the first occurrence of `bibcode`.
    ///
    /// Fails with `NotFound` if absent; the dirty flag is untouched on
    /// failure.
    pub fn remove(&mut self, bibcode: &str) -> Result<()> {
        let position = self
            .items
            .iter()
            .position(|item| item == bibcode)
            .ok_or(Error::NotFound)?;
        self.items.remove(position);
        self.dirty = true;
        Ok(())
    }

    /// Appends every element of `bibcodes`, preserving their relative order.
    ///
    /// Marks dirty even when the input is empty; callers rely on the flush
    /// that follows.
    pub fn extend<I>(&mut self, bibcodes: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.items.extend(bibcodes);
        self.dirty = true;
    }

    /// Removes each element of `bibcodes` by repeated single-element
    /// `remove`. The first missing element fails with `NotFound`; removals
    /// made before the failure are kept, leaving the list partially
    /// modified.
    pub fn shorten<'a, I>(&mut self, bibcodes: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for bibcode in bibcodes {
            self.remove(bibcode)?;
        }
        Ok(())
    }

    /// Adds the values not already present.
    ///
    /// The input is deduplicated (first occurrence wins) and values already
    /// in the list are discarded; the remainder is handed to `extend`
    /// unconditionally, so the list is marked dirty even when nothing new
    /// was added.
    pub fn upsert<I>(&mut self, bibcodes: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut fresh: Vec<String> = Vec::new();
        for bibcode in bibcodes {
            if !self.items.contains(&bibcode) && !fresh.contains(&bibcode) {
                fresh.push(bibcode);
            }
        }
        self.extend(fresh);
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns the dirty flag and clears it.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    #[must_use]
    pub fn contains(&self, bibcode: &str) -> bool {
        self.items.iter().any(|item| item == bibcode)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.items.iter()
    }
}

/// Wraps a plain sequence without marking it dirty. Anything that is not a
/// sequence of strings is rejected at compile time.
impl From<Vec<String>> for BibcodeList {
    fn from(items: Vec<String>) -> Self {
        Self {
            items,
            dirty: false,
        }
    }
}

impl FromIterator<String> for BibcodeList {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl PartialEq for BibcodeList {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl Serialize for BibcodeList {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.items.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BibcodeList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Vec::<String>::deserialize(deserializer).map(Self::from)
    }
}
