// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::Coil;
use crate::util::packed_coils_len;

/// A view on packed coil states.
///
/// Bit 0 of the first byte holds the first coil.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coils<'c> {
    pub(crate) data: &'c [u8],
    pub(crate) quantity: usize,
}

impl<'c> Coils<'c> {
    #[must_use]
    pub const fn len(&self) -> usize {
        self.quantity
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.quantity == 0
    }

    /// Bytes occupied on the wire.
    #[must_use]
    pub const fn packed_len(&self) -> usize {
        packed_coils_len(self.quantity)
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<Coil> {
        if idx >= self.quantity {
            return None;
        }
        self.data
            .get(idx / 8)
            .map(|byte| byte & (1 << (idx % 8)) != 0)
    }

    #[must_use]
    pub const fn payload(&self) -> &'c [u8] {
        self.data
    }

    /// Coils backed by the payload.
    const fn available(&self) -> usize {
        let stored = self.data.len() * 8;
        if stored < self.quantity {
            stored
        } else {
            self.quantity
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoilsIter<'c> {
    coils: Coils<'c>,
    pos: usize,
}

impl Iterator for CoilsIter<'_> {
    type Item = Coil;

    fn next(&mut self) -> Option<Coil> {
        let coil = self.coils.get(self.pos)?;
        self.pos += 1;
        Some(coil)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.coils.available().saturating_sub(self.pos);
        (left, Some(left))
    }
}

impl ExactSizeIterator for CoilsIter<'_> {}

impl<'c> IntoIterator for Coils<'c> {
    type Item = Coil;
    type IntoIter = CoilsIter<'c>;

    fn into_iter(self) -> CoilsIter<'c> {
        CoilsIter {
            coils: self,
            pos: 0,
        }
    }
}
