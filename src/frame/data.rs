// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::Word;
use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder};

/// A view on big-endian register values.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Data<'d> {
    pub(crate) data: &'d [u8],
    pub(crate) quantity: usize,
}

impl<'d> Data<'d> {
    /// Serialize `words` into `target` and view them.
    ///
    /// Fails with [`Error::BufferSize`] if `words` is empty or `target` too short.
    pub fn from_words(words: &[u16], target: &'d mut [u8]) -> Result<Self> {
        let bytes = target
            .get_mut(..words.len() * 2)
            .filter(|bytes| !bytes.is_empty())
            .ok_or(Error::BufferSize)?;
        BigEndian::write_u16_into(words, bytes);
        Ok(Self {
            data: bytes,
            quantity: words.len(),
        })
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.quantity
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.quantity == 0
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<Word> {
        if idx >= self.quantity {
            return None;
        }
        self.data
            .get(idx * 2..idx * 2 + 2)
            .map(BigEndian::read_u16)
    }

    #[must_use]
    pub const fn payload(&self) -> &'d [u8] {
        self.data
    }

    /// Values backed by the payload.
    const fn available(&self) -> usize {
        let stored = self.data.len() / 2;
        if stored < self.quantity {
            stored
        } else {
            self.quantity
        }
    }
}

#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataIter<'d> {
    data: Data<'d>,
    pos: usize,
}

impl Iterator for DataIter<'_> {
    type Item = Word;

    fn next(&mut self) -> Option<Word> {
        let word = self.data.get(self.pos)?;
        self.pos += 1;
        Some(word)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.data.available().saturating_sub(self.pos);
        (left, Some(left))
    }
}

impl ExactSizeIterator for DataIter<'_> {}

impl<'d> IntoIterator for Data<'d> {
    type Item = Word;
    type IntoIter = DataIter<'d>;

    fn into_iter(self) -> DataIter<'d> {
        DataIter { data: self, pos: 0 }
    }
}
