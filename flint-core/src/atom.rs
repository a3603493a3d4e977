// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Interning table for opaque byte blobs (versions, architectures, license
//! strings, repository tags). Handles compare by pointer, not by value.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// An interned blob. Cheap to clone and compare: equality is handle identity.
#[derive(Clone)]
pub struct Handle(Rc<[u8]>);

impl Handle {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Handle {}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) => write!(f, "Handle({s:?})"),
            None => write!(f, "Handle({:?})", self.0),
        }
    }
}

/// Table of interned blobs. Not `Send`/`Sync`: the whole database is
/// single-threaded within a transaction, so a plain `Rc`/`RefCell` pair is
/// enough and avoids paying for atomics nothing else here needs.
#[derive(Default)]
pub struct Table {
    interned: RefCell<HashMap<Box<[u8]>, Handle>>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `blob`, returning the existing handle if an equal blob is
    /// already present.
    pub fn atomize(&self, blob: impl Into<Box<[u8]>>) -> Handle {
        let blob = blob.into();
        if let Some(existing) = self.interned.borrow().get(blob.as_ref()) {
            return existing.clone();
        }
        self.insert(blob)
    }

    /// Same as [`Table::atomize`], but always works from a borrowed slice,
    /// duplicating the bytes only when a new entry is actually inserted.
    pub fn atomize_dup(&self, blob: &[u8]) -> Handle {
        if let Some(existing) = self.interned.borrow().get(blob) {
            return existing.clone();
        }
        self.insert(Box::from(blob))
    }

    pub fn atomize_str(&self, s: &str) -> Handle {
        self.atomize(s.as_bytes())
    }

    fn insert(&self, blob: Box<[u8]>) -> Handle {
        let handle = Handle(Rc::from(blob.clone()));
        self.interned.borrow_mut().insert(blob, handle.clone());
        handle
    }

    pub fn len(&self) -> usize {
        self.interned.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomize_dedupes_equal_blobs() {
        let table = Table::new();
        let a = table.atomize_str("1.2.3-1");
        let b = table.atomize_str("1.2.3-1");
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn atomize_distinguishes_different_blobs() {
        let table = Table::new();
        let a = table.atomize_str("1.2.3-1");
        let b = table.atomize_str("1.2.3-2");
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn atomize_dup_only_copies_on_insert() {
        let table = Table::new();
        let source = b"x86_64".to_vec();
        let a = table.atomize_dup(&source);
        let b = table.atomize_dup(&source);
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }
}
