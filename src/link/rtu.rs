// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus RTU framer
//!
//! Frame boundaries are detected by line silence only: a gap longer than
//! 1.5 character times inside a frame invalidates it, a gap of 3.5 character
//! times terminates it.

use super::*;
use crate::codec::{
    MAX_PDU_LEN,
    rtu::{CRC_INIT, CrcFn, crc16_update},
};

/// Bits per character on the line: start, 8 data, parity or second stop, stop.
const BITS_PER_CHAR: u64 = 11;

/// Fixed inter-character timeout for baud rates above 19200.
const MIN_T1P5_US: u64 = 750;

/// Fixed inter-frame delay for baud rates above 19200.
const MIN_T3P5_US: u64 = 1750;

/// Lower bound of every timeout to survive clock quantization.
const MIN_TICKS: SystemTick = 2;

/// Upper bound of characters drained per call while discarding.
const DISCARD_CHUNK: usize = 64;

/// RTU timing and checksum configuration.
#[derive(Debug, Clone, Copy)]
pub struct RtuConfig {
    pub baud_rate: u32,
    /// Overrides the derived T3.5 if not `0`.
    pub inter_frame_delay_us: u32,
    /// Overrides the derived T1.5 if not `0`.
    pub inter_char_delay_us: u32,
    pub crc: CrcFn,
}

impl Default for RtuConfig {
    fn default() -> Self {
        Self {
            baud_rate: 19200,
            inter_frame_delay_us: 0,
            inter_char_delay_us: 0,
            crc: crc16_update,
        }
    }
}

impl RtuConfig {
    /// Calculate `(T1.5, T3.5)` in ticks.
    fn timing(&self, micros_per_tick: u32) -> Result<(SystemTick, SystemTick)> {
        if self.baud_rate == 0 {
            return Err(Error::Timing);
        }
        let baud = u64::from(self.baud_rate);
        let t1p5_us = match self.inter_char_delay_us {
            0 => (15 * BITS_PER_CHAR * 100_000).div_ceil(baud).max(MIN_T1P5_US),
            us => u64::from(us),
        };
        let t3p5_us = match self.inter_frame_delay_us {
            0 => (35 * BITS_PER_CHAR * 100_000).div_ceil(baud).max(MIN_T3P5_US),
            us => u64::from(us),
        };
        let (Some(t1p5), Some(t3p5)) = (
            us_to_ticks(t1p5_us, micros_per_tick),
            us_to_ticks(t3p5_us, micros_per_tick),
        ) else {
            return Err(Error::Timing);
        };
        Ok((t1p5.max(MIN_TICKS), t3p5.max(MIN_TICKS)))
    }
}

/// State of the [`RtuFramer`].
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Fatal: the timing configuration is unusable.
    Exception,
    /// Discard characters until the line is silent for T3.5.
    Dump,
    Idle,
    FrameReady,
    Queue,
    /// Characters arrived while the application held a ready frame.
    Collision,
    Receive,
    TxAddr,
    TxPdu,
    TxCrc,
    /// Wait until the last character has left the transmitter.
    TxDrain,
    /// Keep the bus silent for T3.5 after transmission.
    TxWait,
}

/// Modbus RTU link layer state machine.
#[derive(Debug)]
pub struct RtuFramer<S, C, B> {
    stream: S,
    clock: C,
    buffer: FrameBuffer<B>,
    config: RtuConfig,
    state: State,
    t1p5: SystemTick,
    t3p5: SystemTick,
    last_activity: SystemTick,
    rx_address: SlaveId,
    // running CRC and its values one and two characters ago
    crc: u16,
    crc_lag: [u16; 2],
    tx_pos: usize,
    tx_crc: [u8; 2],
}

impl<S, C, B> RtuFramer<S, C, B>
where
    S: Stream,
    C: Clock,
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    /// Create a framer and derive its timing from `config`.
    ///
    /// The framer starts in [`State::Exception`] if the timing is unusable.
    /// Use [`RtuFramer::try_new`] to get the error instead.
    pub fn new(stream: S, clock: C, buffer: FrameBuffer<B>, config: RtuConfig) -> Self {
        let mut framer = Self {
            stream,
            clock,
            buffer,
            config,
            state: State::Idle,
            t1p5: MIN_TICKS,
            t3p5: MIN_TICKS,
            last_activity: 0,
            rx_address: 0,
            crc: CRC_INIT,
            crc_lag: [CRC_INIT; 2],
            tx_pos: 0,
            tx_crc: [0; 2],
        };
        if let Err(_err) = framer.setup(config) {
            #[cfg(feature = "log")]
            log::debug!("RTU framer starts in the exception state: {_err}");
        }
        framer
    }

    /// Like [`RtuFramer::new`] but fails with [`Error::Timing`] on unusable timing.
    pub fn try_new(stream: S, clock: C, buffer: FrameBuffer<B>, config: RtuConfig) -> Result<Self> {
        let framer = Self::new(stream, clock, buffer, config);
        if framer.state == State::Exception {
            return Err(Error::Timing);
        }
        Ok(framer)
    }

    /// (Re)configure timing and checksum.
    ///
    /// Aborts any frame in progress and leaves the framer idle on success,
    /// or in [`State::Exception`] on failure.
    pub fn setup(&mut self, config: RtuConfig) -> Result<()> {
        self.buffer.set_owner(Owner::Link);
        self.buffer.clear();
        match config.timing(self.clock.micros_per_tick()) {
            Ok((t1p5, t3p5)) => {
                self.config = config;
                self.t1p5 = t1p5;
                self.t3p5 = t3p5;
                self.last_activity = self.clock.ticks();
                self.state = State::Idle;
                Ok(())
            }
            Err(err) => {
                #[cfg(feature = "log")]
                log::error!("Unusable RTU timing at {} baud: {err}", config.baud_rate);
                self.state = State::Exception;
                Err(err)
            }
        }
    }

    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Inter-character and inter-frame timeout in ticks.
    #[must_use]
    pub const fn timing(&self) -> (SystemTick, SystemTick) {
        (self.t1p5, self.t3p5)
    }

    #[must_use]
    pub const fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_parts(self) -> (S, C, FrameBuffer<B>) {
        (self.stream, self.clock, self.buffer)
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0];
        match self.stream.read(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    fn update_crc(&mut self, byte: u8) {
        self.crc_lag = [self.crc, self.crc_lag[0]];
        self.crc = (self.config.crc)(self.crc, byte);
    }

    fn enter_dump(&mut self, now: SystemTick) {
        self.buffer.clear();
        self.buffer.set_owner(Owner::Link);
        self.last_activity = now;
        self.state = State::Dump;
    }

    fn enter_idle(&mut self) {
        self.buffer.clear();
        self.buffer.set_owner(Owner::Link);
        self.stream.communication_status(false, false);
        self.state = State::Idle;
    }

    fn begin_receive(&mut self, address: u8, now: SystemTick) {
        self.buffer.clear();
        self.rx_address = address;
        self.crc = CRC_INIT;
        self.crc_lag = [CRC_INIT; 2];
        self.update_crc(address);
        self.last_activity = now;
        self.stream.communication_status(true, false);
        self.state = State::Receive;
    }

    fn complete_frame(&mut self) {
        let len = self.buffer.len();
        // function code and CRC
        if len < 3 {
            #[cfg(feature = "log")]
            log::warn!("Drop RTU frame of {} byte(s)", len + 1);
            self.enter_idle();
            return;
        }
        let expected = self.crc_lag[1];
        let actual = match (self.buffer.byte(len - 2), self.buffer.byte(len - 1)) {
            (Some(lo), Some(hi)) => u16::from_le_bytes([lo, hi]),
            _ => !expected,
        };
        if expected != actual {
            #[cfg(feature = "log")]
            log::warn!("Drop RTU frame: {}", Error::Crc(expected, actual));
            self.enter_idle();
            return;
        }
        if !self.buffer.accepts(self.rx_address) {
            #[cfg(feature = "log")]
            log::debug!("Ignore RTU frame for slave {}", self.rx_address);
            self.enter_idle();
            return;
        }
        self.buffer.truncate(len - 2);
        self.buffer.set_frame_address(self.rx_address);
        self.buffer.set_owner(Owner::Received);
        self.stream.communication_status(false, false);
        #[cfg(feature = "log")]
        log::debug!(
            "RTU frame from slave {} ready ({} byte PDU)",
            self.rx_address,
            len - 2
        );
        self.state = State::FrameReady;
    }

    fn abort_transmission(&mut self, now: SystemTick) {
        #[cfg(feature = "log")]
        log::error!("Abort RTU transmission: {}", Error::Transport);
        self.stream.set_transmit_enable(false);
        self.stream.communication_status(false, false);
        self.enter_dump(now);
    }

    /// Silence remaining until `timeout` expires, `None` once it did.
    const fn remaining(&self, now: SystemTick, timeout: SystemTick) -> Option<SystemTick> {
        let gap = elapsed(now, self.last_activity);
        if gap >= timeout {
            None
        } else {
            Some(timeout - gap)
        }
    }

    /// Drain pending characters. Returns `true` if there were any.
    fn drain(&mut self) -> Result<bool> {
        Ok(self.stream.discard(DISCARD_CHUNK)? > 0)
    }

    /// Drain pending characters where a failing stream changes nothing.
    fn discard_input(&mut self) -> bool {
        match self.drain() {
            Ok(any) => any,
            Err(_err) => {
                #[cfg(feature = "log")]
                log::debug!("Failed to discard RTU input in state {:?}: {_err}", self.state);
                false
            }
        }
    }

    /// Execute a single transition.
    ///
    /// Returns `None` if the state changed and another step is required,
    /// otherwise the ticks until the next required poll.
    fn step(&mut self, now: SystemTick) -> Option<SystemTick> {
        match self.state {
            State::Exception => Some(0),
            State::Idle => match self.read_byte() {
                Ok(Some(address)) => {
                    self.begin_receive(address, now);
                    None
                }
                Ok(None) => Some(0),
                Err(_err) => {
                    #[cfg(feature = "log")]
                    log::error!("RTU receive failed: {_err}");
                    self.enter_dump(now);
                    Some(self.t3p5)
                }
            },
            State::Receive => {
                let gap = elapsed(now, self.last_activity);
                if gap >= self.t3p5 {
                    self.complete_frame();
                    return None;
                }
                match self.read_byte() {
                    Ok(Some(byte)) => {
                        if gap > self.t1p5 {
                            #[cfg(feature = "log")]
                            log::warn!("Drop RTU frame: inter-character timeout after {gap} ticks");
                            self.enter_dump(now);
                            return None;
                        }
                        self.update_crc(byte);
                        if !self.buffer.feed_byte(byte) {
                            #[cfg(feature = "log")]
                            log::warn!("Drop RTU frame: buffer overflow");
                            self.enter_dump(now);
                            return None;
                        }
                        self.last_activity = now;
                        None
                    }
                    Ok(None) if gap < self.t1p5 => Some(self.t1p5 - gap),
                    Ok(None) => Some(self.t3p5 - gap),
                    Err(_err) => {
                        #[cfg(feature = "log")]
                        log::error!("RTU receive failed: {_err}");
                        self.enter_dump(now);
                        Some(self.t3p5)
                    }
                }
            }
            State::Dump => {
                if !matches!(self.drain(), Ok(false)) {
                    self.last_activity = now;
                    return Some(self.t3p5);
                }
                match self.remaining(now, self.t3p5) {
                    Some(ticks) => Some(ticks),
                    None => {
                        self.enter_idle();
                        None
                    }
                }
            }
            State::FrameReady => {
                if self.discard_input() {
                    #[cfg(feature = "log")]
                    log::warn!("RTU collision: data received while a frame is pending");
                    self.last_activity = now;
                    self.state = State::Collision;
                    return Some(self.t3p5);
                }
                Some(0)
            }
            State::Collision => {
                if !matches!(self.drain(), Ok(false)) {
                    self.last_activity = now;
                    return Some(self.t3p5);
                }
                match self.remaining(now, self.t3p5) {
                    Some(ticks) => Some(ticks),
                    None => {
                        self.state = State::FrameReady;
                        None
                    }
                }
            }
            State::Queue => {
                // unsolicited characters are dropped until the application sends
                self.discard_input();
                Some(0)
            }
            State::TxAddr => match self.stream.write(&[self.buffer.frame_address()]) {
                Ok(0) => Some(1),
                Ok(_) => {
                    let address = self.buffer.frame_address();
                    self.crc = (self.config.crc)(CRC_INIT, address);
                    self.tx_pos = 0;
                    self.state = State::TxPdu;
                    None
                }
                Err(_) => {
                    self.abort_transmission(now);
                    None
                }
            },
            State::TxPdu => {
                let pending = &self.buffer.as_slice()[self.tx_pos..];
                match self.stream.write(pending) {
                    Ok(0) => Some(1),
                    Ok(cnt) => {
                        let crc_fn = self.config.crc;
                        self.crc = pending[..cnt]
                            .iter()
                            .fold(self.crc, |crc, b| crc_fn(crc, *b));
                        self.tx_pos += cnt;
                        if self.tx_pos >= self.buffer.len() {
                            self.tx_crc = self.crc.to_le_bytes();
                            self.tx_pos = 0;
                            self.state = State::TxCrc;
                        }
                        None
                    }
                    Err(_) => {
                        self.abort_transmission(now);
                        None
                    }
                }
            }
            State::TxCrc => match self.stream.write(&self.tx_crc[self.tx_pos..]) {
                Ok(0) => Some(1),
                Ok(cnt) => {
                    self.tx_pos += cnt;
                    if self.tx_pos >= self.tx_crc.len() {
                        self.state = State::TxDrain;
                    }
                    None
                }
                Err(_) => {
                    self.abort_transmission(now);
                    None
                }
            },
            State::TxDrain => {
                // echo of our own characters on half-duplex lines
                self.discard_input();
                if !self.stream.write_complete() {
                    return Some(1);
                }
                self.stream.set_transmit_enable(false);
                self.buffer.clear();
                self.last_activity = now;
                #[cfg(feature = "log")]
                log::debug!("RTU frame to slave {} sent", self.buffer.frame_address());
                self.state = State::TxWait;
                None
            }
            State::TxWait => match self.remaining(now, self.t3p5) {
                Some(ticks) => {
                    self.discard_input();
                    Some(ticks)
                }
                None => {
                    self.enter_idle();
                    None
                }
            },
        }
    }
}

impl<S, C, B> Framer for RtuFramer<S, C, B>
where
    S: Stream,
    C: Clock,
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    type Buffer = B;

    fn poll(&mut self) -> SystemTick {
        let now = self.clock.ticks();
        loop {
            if let Some(ticks) = self.step(now) {
                return ticks;
            }
        }
    }

    fn begin_send(&mut self) -> bool {
        match self.state {
            State::Idle | State::FrameReady => {
                self.buffer.set_owner(Owner::Reserved);
                self.state = State::Queue;
                true
            }
            _ => false,
        }
    }

    fn send(&mut self) -> Result<()> {
        if self.state != State::Queue {
            return Err(Error::Busy);
        }
        let len = self.buffer.len();
        if len == 0 || len > MAX_PDU_LEN {
            return Err(Error::BufferSize);
        }
        self.buffer.set_owner(Owner::Link);
        self.tx_pos = 0;
        self.stream.set_transmit_enable(true);
        self.stream.communication_status(false, true);
        #[cfg(feature = "log")]
        log::debug!(
            "Send RTU frame to slave {} ({len} byte PDU)",
            self.buffer.frame_address()
        );
        self.state = State::TxAddr;
        Ok(())
    }

    fn finished(&mut self) {
        match self.state {
            // a partially received frame is abandoned as well
            State::FrameReady
            | State::Queue
            | State::Idle
            | State::Receive
            | State::Collision => self.enter_idle(),
            State::Exception
            | State::Dump
            | State::TxAddr
            | State::TxPdu
            | State::TxCrc
            | State::TxDrain
            | State::TxWait => {}
        }
    }

    fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    fn is_frame_ready(&self) -> bool {
        self.state == State::FrameReady
    }

    fn frame_buffer(&self) -> &FrameBuffer<B> {
        &self.buffer
    }

    fn frame_buffer_mut(&mut self) -> &mut FrameBuffer<B> {
        &mut self.buffer
    }
}
