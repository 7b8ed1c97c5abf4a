// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serial line link layer
//!
//! The framers in this module own a caller supplied [`FrameBuffer`] and drive
//! a non-blocking [`Stream`] from [`Framer::poll`]. Timing is derived from a
//! [`Clock`] only, so the same code runs from a main loop or from interrupt
//! handlers.

use crate::{SlaveId, error::*};

#[cfg(feature = "ascii")]
pub mod ascii;
#[cfg(feature = "rtu")]
pub mod rtu;

/// Value of the monotonic system tick counter. It wraps at `u32::MAX`.
pub type SystemTick = u32;

/// A non-blocking character stream, e.g. a UART with RS-485 direction control.
pub trait Stream {
    /// Read up to `buf.len()` characters. Returns the number of characters read.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Drop up to `max` pending characters. Returns the number of dropped characters.
    fn discard(&mut self, max: usize) -> Result<usize>;

    /// Write up to `buf.len()` characters. Returns the number of characters accepted.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Drive the transmitter enable line.
    fn set_transmit_enable(&mut self, enable: bool);

    /// `true` as soon as every written character has left the shift register.
    fn write_complete(&mut self) -> bool;

    /// Indicates receive and transmit activity, e.g. to drive status LEDs.
    fn communication_status(&mut self, _rx: bool, _tx: bool) {}
}

impl<T: Stream + ?Sized> Stream for &mut T {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }
    fn discard(&mut self, max: usize) -> Result<usize> {
        (**self).discard(max)
    }
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }
    fn set_transmit_enable(&mut self, enable: bool) {
        (**self).set_transmit_enable(enable);
    }
    fn write_complete(&mut self) -> bool {
        (**self).write_complete()
    }
    fn communication_status(&mut self, rx: bool, tx: bool) {
        (**self).communication_status(rx, tx);
    }
}

/// A monotonic tick source.
pub trait Clock {
    /// Current tick count.
    fn ticks(&self) -> SystemTick;

    /// Duration of a single tick in microseconds.
    fn micros_per_tick(&self) -> u32;
}

impl<T: Clock + ?Sized> Clock for &T {
    fn ticks(&self) -> SystemTick {
        (**self).ticks()
    }
    fn micros_per_tick(&self) -> u32 {
        (**self).micros_per_tick()
    }
}

impl<T: Clock + ?Sized> Clock for &mut T {
    fn ticks(&self) -> SystemTick {
        (**self).ticks()
    }
    fn micros_per_tick(&self) -> u32 {
        (**self).micros_per_tick()
    }
}

/// Ticks elapsed since `since`, robust against counter wraparound.
#[must_use]
pub const fn elapsed(now: SystemTick, since: SystemTick) -> SystemTick {
    now.wrapping_sub(since)
}

/// Convert microseconds into ticks, rounding up.
///
/// Returns `None` if the clock reports zero microseconds per tick.
#[must_use]
pub const fn us_to_ticks(us: u64, micros_per_tick: u32) -> Option<SystemTick> {
    if micros_per_tick == 0 {
        return None;
    }
    let ticks = us.div_ceil(micros_per_tick as u64);
    if ticks > SystemTick::MAX as u64 {
        Some(SystemTick::MAX)
    } else {
        Some(ticks as SystemTick)
    }
}

/// Convert milliseconds into ticks, rounding up.
#[must_use]
pub const fn ms_to_ticks(ms: u32, micros_per_tick: u32) -> Option<SystemTick> {
    us_to_ticks(ms as u64 * 1000, micros_per_tick)
}

/// The party that currently holds a [`FrameBuffer`].
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// The framer is idle, receiving or transmitting.
    Link,
    /// A received frame is handed to the application.
    Received,
    /// The application reserved the buffer to build an outgoing frame.
    Reserved,
}

/// Fixed capacity frame storage shared between a framer and the application.
///
/// Holds the PDU only. Station and frame address are kept beside it.
#[derive(Debug)]
pub struct FrameBuffer<B> {
    buf: B,
    len: usize,
    station_address: SlaveId,
    frame_address: SlaveId,
    owner: Owner,
}

impl<B> FrameBuffer<B>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    /// Wrap `buf` as frame storage for a node with `station_address`.
    ///
    /// A station address of `0` accepts frames for any address.
    pub fn new(buf: B, station_address: SlaveId) -> Self {
        Self {
            buf,
            len: 0,
            station_address,
            frame_address: 0,
            owner: Owner::Link,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.as_ref().len()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn owner(&self) -> Owner {
        self.owner
    }

    /// The received PDU, available while a frame is ready.
    #[must_use]
    pub fn pdu(&self) -> Option<&[u8]> {
        match self.owner {
            Owner::Received => Some(&self.buf.as_ref()[..self.len]),
            Owner::Link | Owner::Reserved => None,
        }
    }

    /// The whole storage for building a PDU, available after a successful `begin_send`.
    pub fn pdu_mut(&mut self) -> Option<&mut [u8]> {
        match self.owner {
            Owner::Reserved => Some(self.buf.as_mut()),
            Owner::Link | Owner::Received => None,
        }
    }

    /// Set the length of the outgoing PDU.
    pub fn set_len(&mut self, len: usize) -> Result<()> {
        if self.owner != Owner::Reserved {
            return Err(Error::Busy);
        }
        if len > self.capacity() {
            return Err(Error::BufferSize);
        }
        self.len = len;
        Ok(())
    }

    #[must_use]
    pub const fn station_address(&self) -> SlaveId {
        self.station_address
    }

    pub fn set_station_address(&mut self, address: SlaveId) {
        self.station_address = address;
    }

    /// Source address of a received frame or destination of an outgoing one.
    #[must_use]
    pub const fn frame_address(&self) -> SlaveId {
        self.frame_address
    }

    pub fn set_frame_address(&mut self, address: SlaveId) {
        self.frame_address = address;
    }

    /// `true` if a frame for `address` has to be processed by this node.
    #[must_use]
    pub(crate) const fn accepts(&self, address: SlaveId) -> bool {
        self.station_address == 0
            || address == self.station_address
            || address == crate::BROADCAST_ADDRESS
    }

    pub fn into_inner(self) -> B {
        self.buf
    }

    pub(crate) fn set_owner(&mut self, owner: Owner) {
        self.owner = owner;
    }

    pub(crate) fn clear(&mut self) {
        self.len = 0;
    }

    /// Append a received byte. Returns `false` if the buffer is full.
    pub(crate) fn feed_byte(&mut self, byte: u8) -> bool {
        let len = self.len;
        match self.buf.as_mut().get_mut(len) {
            Some(slot) => {
                *slot = byte;
                self.len += 1;
                true
            }
            None => false,
        }
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    pub(crate) fn byte(&self, idx: usize) -> Option<u8> {
        self.buf.as_ref()[..self.len].get(idx).copied()
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.buf.as_ref()[..self.len]
    }
}

/// The link layer contract shared by the RTU and the ASCII framer.
///
/// After every call to a mutating method the framer must be polled again.
pub trait Framer {
    type Buffer: AsRef<[u8]> + AsMut<[u8]>;

    /// Drive the state machine.
    ///
    /// Returns the number of ticks until the next required call,
    /// or `0` if no timeout is pending.
    fn poll(&mut self) -> SystemTick;

    /// Reserve the buffer for an outgoing frame.
    ///
    /// Succeeds only while the framer is idle or holds a ready frame.
    fn begin_send(&mut self) -> bool;

    /// Transmit the reserved buffer to [`FrameBuffer::frame_address`].
    fn send(&mut self) -> Result<()>;

    /// Release a ready or reserved buffer without transmitting.
    fn finished(&mut self);

    fn is_idle(&self) -> bool;

    fn is_frame_ready(&self) -> bool;

    fn frame_buffer(&self) -> &FrameBuffer<Self::Buffer>;

    fn frame_buffer_mut(&mut self) -> &mut FrameBuffer<Self::Buffer>;

    fn frame_address(&self) -> SlaveId {
        self.frame_buffer().frame_address()
    }

    fn set_frame_address(&mut self, address: SlaveId) {
        self.frame_buffer_mut().set_frame_address(address);
    }

    fn station_address(&self) -> SlaveId {
        self.frame_buffer().station_address()
    }
}
