// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounds checked access to PDU fields

use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder};

pub(crate) struct ReadCursor<'a> {
    bytes: &'a [u8],
}

impl<'a> ReadCursor<'a> {
    pub(crate) const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        let (first, rest) = self.bytes.split_first().ok_or(Error::BufferSize)?;
        self.bytes = rest;
        Ok(*first)
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16> {
        self.read(2).map(BigEndian::read_u16)
    }

    pub(crate) fn read(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.bytes.len() < count {
            return Err(Error::BufferSize);
        }
        let (head, rest) = self.bytes.split_at(count);
        self.bytes = rest;
        Ok(head)
    }
}

pub(crate) struct WriteCursor<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> WriteCursor<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) const fn position(&self) -> usize {
        self.pos
    }

    /// Reserve the next `count` bytes.
    pub(crate) fn advance(&mut self, count: usize) -> Result<&mut [u8]> {
        let end = self.pos.checked_add(count).ok_or(Error::BufferSize)?;
        let bytes = self.buf.get_mut(self.pos..end).ok_or(Error::BufferSize)?;
        self.pos = end;
        Ok(bytes)
    }

    pub(crate) fn write_u8(&mut self, value: u8) -> Result<()> {
        self.advance(1)?[0] = value;
        Ok(())
    }

    pub(crate) fn write_u16(&mut self, value: u16) -> Result<()> {
        BigEndian::write_u16(self.advance(2)?, value);
        Ok(())
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.advance(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }
}
