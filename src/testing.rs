// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted stream and clock doubles for driving the state machines in tests.

use crate::{
    error::*,
    link::{Clock, Stream, SystemTick},
};
use core::cell::Cell;

const QUEUE_LEN: usize = 1024;

#[derive(Debug)]
pub(crate) struct MockStream {
    rx: [u8; QUEUE_LEN],
    rx_len: usize,
    rx_pos: usize,
    tx: [u8; QUEUE_LEN],
    tx_len: usize,
    pub(crate) tx_enabled: bool,
    pub(crate) tx_enable_toggles: usize,
    pub(crate) write_done: bool,
    pub(crate) write_chunk: usize,
    pub(crate) fail_read: bool,
    pub(crate) fail_write: bool,
    /// Written characters show up on the receive side, like a half-duplex bus.
    pub(crate) echo: bool,
    pub(crate) status: (bool, bool),
}

impl MockStream {
    pub(crate) fn new() -> Self {
        Self {
            rx: [0; QUEUE_LEN],
            rx_len: 0,
            rx_pos: 0,
            tx: [0; QUEUE_LEN],
            tx_len: 0,
            tx_enabled: false,
            tx_enable_toggles: 0,
            write_done: true,
            write_chunk: QUEUE_LEN,
            fail_read: false,
            fail_write: false,
            echo: false,
            status: (false, false),
        }
    }

    /// Queue characters for reception.
    pub(crate) fn push_rx(&mut self, data: &[u8]) {
        if self.rx_pos == self.rx_len {
            self.rx_pos = 0;
            self.rx_len = 0;
        }
        let end = self.rx_len + data.len();
        self.rx[self.rx_len..end].copy_from_slice(data);
        self.rx_len = end;
    }

    pub(crate) fn pending_rx(&self) -> usize {
        self.rx_len - self.rx_pos
    }

    /// Everything written since the last call of [`MockStream::clear_tx`].
    pub(crate) fn tx(&self) -> &[u8] {
        &self.tx[..self.tx_len]
    }

    pub(crate) fn clear_tx(&mut self) {
        self.tx_len = 0;
    }

    /// Move the written characters into the receive queue of `other`.
    pub(crate) fn transfer_to(&mut self, other: &mut MockStream) {
        other.push_rx(&self.tx[..self.tx_len]);
        self.tx_len = 0;
    }
}

impl Stream for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.fail_read {
            return Err(Error::Transport);
        }
        let cnt = buf.len().min(self.pending_rx());
        buf[..cnt].copy_from_slice(&self.rx[self.rx_pos..self.rx_pos + cnt]);
        self.rx_pos += cnt;
        Ok(cnt)
    }

    fn discard(&mut self, max: usize) -> Result<usize> {
        if self.fail_read {
            return Err(Error::Transport);
        }
        let cnt = max.min(self.pending_rx());
        self.rx_pos += cnt;
        Ok(cnt)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.fail_write {
            return Err(Error::Transport);
        }
        let cnt = buf.len().min(self.write_chunk);
        self.tx[self.tx_len..self.tx_len + cnt].copy_from_slice(&buf[..cnt]);
        self.tx_len += cnt;
        if self.echo {
            self.push_rx(&buf[..cnt]);
        }
        Ok(cnt)
    }

    fn set_transmit_enable(&mut self, enable: bool) {
        if enable != self.tx_enabled {
            self.tx_enable_toggles += 1;
        }
        self.tx_enabled = enable;
    }

    fn write_complete(&mut self) -> bool {
        self.write_done
    }

    fn communication_status(&mut self, rx: bool, tx: bool) {
        self.status = (rx, tx);
    }
}

#[derive(Debug)]
pub(crate) struct MockClock {
    now: Cell<SystemTick>,
    micros_per_tick: u32,
}

impl MockClock {
    pub(crate) const fn new(micros_per_tick: u32) -> Self {
        Self {
            now: Cell::new(0),
            micros_per_tick,
        }
    }

    pub(crate) fn set(&self, now: SystemTick) {
        self.now.set(now);
    }

    pub(crate) fn advance(&self, ticks: SystemTick) {
        self.now.set(self.now.get().wrapping_add(ticks));
    }
}

impl Clock for MockClock {
    fn ticks(&self) -> SystemTick {
        self.now.get()
    }

    fn micros_per_tick(&self) -> u32 {
        self.micros_per_tick
    }
}

/// Byte patterns for frame tests.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Pattern {
    Zeros,
    Ones,
    Counting,
    /// Xorshift sequence from the given seed.
    Noise(u32),
}

impl Pattern {
    pub(crate) fn all(seed: u32) -> [Self; 4] {
        [Self::Zeros, Self::Ones, Self::Counting, Self::Noise(seed)]
    }

    pub(crate) fn fill(self, buf: &mut [u8]) {
        let mut state = match self {
            Self::Noise(seed) => seed.wrapping_mul(0x9E37_79B9) | 1,
            _ => 0,
        };
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = match self {
                Self::Zeros => 0x00,
                Self::Ones => 0xFF,
                Self::Counting => i as u8,
                Self::Noise(_) => {
                    state ^= state << 13;
                    state ^= state >> 17;
                    state ^= state << 5;
                    (state >> 24) as u8
                }
            };
        }
    }
}
