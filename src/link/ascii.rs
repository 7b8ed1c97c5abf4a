// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus ASCII framer

use super::*;
use crate::codec::{
    MAX_PDU_LEN,
    ascii::{CR, FRAME_START, LF, hex_digit, hex_value},
};

/// Default mid-frame character timeout.
pub const DEFAULT_TIMEOUT_MS: u32 = 1000;

/// State of the [`AsciiFramer`].
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Fatal: the timeout cannot be expressed in ticks.
    Exception,
    Idle,
    FrameReady,
    Queue,
    /// Characters arrived while the application held a ready frame.
    Collision,
    RxAddrHigh,
    RxAddrLow,
    RxPduHigh,
    RxPduLow,
    RxCr,
    TxSof,
    TxAddrHigh,
    TxAddrLow,
    TxPduHigh,
    TxPduLow,
    TxLrcHigh,
    TxLrcLow,
    TxCr,
    TxLf,
    /// Wait until the last character has left the transmitter.
    TxWait,
}

impl State {
    const fn is_receiving(self) -> bool {
        matches!(
            self,
            Self::RxAddrHigh | Self::RxAddrLow | Self::RxPduHigh | Self::RxPduLow | Self::RxCr
        )
    }
}

/// Modbus ASCII link layer state machine.
#[derive(Debug)]
pub struct AsciiFramer<S, C, B> {
    stream: S,
    clock: C,
    buffer: FrameBuffer<B>,
    state: State,
    timeout: SystemTick,
    last_activity: SystemTick,
    rx_address: SlaveId,
    high_nibble: u8,
    sum: u8,
    tx_pos: usize,
}

impl<S, C, B> AsciiFramer<S, C, B>
where
    S: Stream,
    C: Clock,
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    /// Create a framer with the default mid-frame timeout.
    ///
    /// The framer starts in [`State::Exception`] if `clock` cannot express
    /// the timeout. Use [`AsciiFramer::try_new`] to get the error instead.
    pub fn new(stream: S, clock: C, buffer: FrameBuffer<B>) -> Self {
        let mut framer = Self {
            stream,
            clock,
            buffer,
            state: State::Idle,
            timeout: 0,
            last_activity: 0,
            rx_address: 0,
            high_nibble: 0,
            sum: 0,
            tx_pos: 0,
        };
        if let Err(_err) = framer.set_timeout(DEFAULT_TIMEOUT_MS) {
            #[cfg(feature = "log")]
            log::debug!("ASCII framer starts in the exception state: {_err}");
        }
        framer
    }

    /// Like [`AsciiFramer::new`] but fails with [`Error::Timing`] instead of
    /// entering the exception state.
    pub fn try_new(stream: S, clock: C, buffer: FrameBuffer<B>) -> Result<Self> {
        let framer = Self::new(stream, clock, buffer);
        if framer.state == State::Exception {
            return Err(Error::Timing);
        }
        Ok(framer)
    }

    /// Set the maximum silence between two characters of a frame.
    ///
    /// Aborts any frame in progress and leaves the framer idle on success,
    /// or in [`State::Exception`] on failure.
    pub fn set_timeout(&mut self, ms: u32) -> Result<()> {
        self.buffer.set_owner(Owner::Link);
        self.buffer.clear();
        match ms_to_ticks(ms, self.clock.micros_per_tick()) {
            Some(ticks) if ticks > 0 => {
                self.timeout = ticks;
                self.state = State::Idle;
                Ok(())
            }
            _ => {
                #[cfg(feature = "log")]
                log::error!("Unusable ASCII timeout of {ms} ms");
                self.state = State::Exception;
                Err(Error::Timing)
            }
        }
    }

    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Mid-frame timeout in ticks.
    #[must_use]
    pub const fn timeout(&self) -> SystemTick {
        self.timeout
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

    fn read_char(&mut self) -> Result<Option<u8>> {
        let mut c = [0];
        match self.stream.read(&mut c)? {
            0 => Ok(None),
            _ => Ok(Some(c[0])),
        }
    }

    fn write_char(&mut self, c: u8, next: State, now: SystemTick) -> Option<SystemTick> {
        match self.stream.write(&[c]) {
            Ok(0) => Some(1),
            Ok(_) => {
                self.state = next;
                None
            }
            Err(_err) => {
                #[cfg(feature = "log")]
                log::error!("Abort ASCII transmission: {_err}");
                self.stream.set_transmit_enable(false);
                self.last_activity = now;
                self.enter_idle();
                None
            }
        }
    }

    fn enter_idle(&mut self) {
        self.buffer.clear();
        self.buffer.set_owner(Owner::Link);
        self.stream.communication_status(false, false);
        self.state = State::Idle;
    }

    fn drop_frame(&mut self, _reason: &str) {
        #[cfg(feature = "log")]
        log::warn!("Drop ASCII frame: {_reason}");
        self.enter_idle();
    }

    fn begin_receive(&mut self, now: SystemTick) {
        self.buffer.clear();
        self.buffer.set_owner(Owner::Link);
        self.sum = 0;
        self.last_activity = now;
        self.stream.communication_status(true, false);
        self.state = State::RxAddrHigh;
    }

    fn complete_frame(&mut self) {
        let len = self.buffer.len();
        let (Some(actual), true) = (self.buffer.byte(len.wrapping_sub(1)), len >= 2) else {
            self.drop_frame("too short");
            return;
        };
        // the LRC byte itself was added to the sum as well
        let expected = self.sum.wrapping_sub(actual).wrapping_neg();
        if expected != actual {
            #[cfg(feature = "log")]
            log::warn!("Drop ASCII frame: {}", Error::Lrc(expected, actual));
            self.enter_idle();
            return;
        }
        if !self.buffer.accepts(self.rx_address) {
            #[cfg(feature = "log")]
            log::debug!("Ignore ASCII frame for slave {}", self.rx_address);
            self.enter_idle();
            return;
        }
        self.buffer.truncate(len - 1);
        self.buffer.set_frame_address(self.rx_address);
        self.buffer.set_owner(Owner::Received);
        self.stream.communication_status(false, false);
        #[cfg(feature = "log")]
        log::debug!(
            "ASCII frame from slave {} ready ({} byte PDU)",
            self.rx_address,
            len - 1
        );
        self.state = State::FrameReady;
    }

    /// Handle a single received character of a frame in progress.
    fn receive(&mut self, c: u8, now: SystemTick) {
        self.last_activity = now;
        if c == FRAME_START {
            #[cfg(feature = "log")]
            log::warn!("Restart ASCII frame on unexpected start character");
            self.begin_receive(now);
            return;
        }
        match self.state {
            State::RxCr => {
                if c == LF {
                    self.complete_frame();
                } else {
                    self.drop_frame("missing LF");
                }
            }
            State::RxPduHigh if c == CR => {
                self.state = State::RxCr;
            }
            state => {
                let Ok(value) = hex_value(c) else {
                    self.drop_frame("malformed hex digit");
                    return;
                };
                match state {
                    State::RxAddrHigh => {
                        self.high_nibble = value;
                        self.state = State::RxAddrLow;
                    }
                    State::RxAddrLow => {
                        self.rx_address = (self.high_nibble << 4) | value;
                        self.sum = self.rx_address;
                        self.state = State::RxPduHigh;
                    }
                    State::RxPduHigh => {
                        self.high_nibble = value;
                        self.state = State::RxPduLow;
                    }
                    _ => {
                        let byte = (self.high_nibble << 4) | value;
                        if self.buffer.feed_byte(byte) {
                            self.sum = self.sum.wrapping_add(byte);
                            self.state = State::RxPduHigh;
                        } else {
                            self.drop_frame("buffer overflow");
                        }
                    }
                }
            }
        }
    }

    fn remaining(&self, now: SystemTick) -> Option<SystemTick> {
        let gap = elapsed(now, self.last_activity);
        if gap >= self.timeout {
            None
        } else {
            Some(self.timeout - gap)
        }
    }

    fn step(&mut self, now: SystemTick) -> Option<SystemTick> {
        match self.state {
            State::Exception => Some(0),
            State::Idle => match self.read_char() {
                Ok(Some(FRAME_START)) => {
                    self.begin_receive(now);
                    None
                }
                // everything outside of a frame is noise
                Ok(Some(_)) => None,
                Ok(None) => Some(0),
                Err(_err) => {
                    #[cfg(feature = "log")]
                    log::error!("ASCII receive failed: {_err}");
                    Some(0)
                }
            },
            State::RxAddrHigh
            | State::RxAddrLow
            | State::RxPduHigh
            | State::RxPduLow
            | State::RxCr => {
                let Some(remaining) = self.remaining(now) else {
                    self.drop_frame("character timeout");
                    return None;
                };
                match self.read_char() {
                    Ok(Some(c)) => {
                        self.receive(c, now);
                        None
                    }
                    Ok(None) => Some(remaining),
                    Err(_err) => {
                        #[cfg(feature = "log")]
                        log::error!("ASCII receive failed: {_err}");
                        self.enter_idle();
                        None
                    }
                }
            }
            State::FrameReady => match self.read_char() {
                Ok(Some(_)) => {
                    #[cfg(feature = "log")]
                    log::warn!("ASCII collision: data received while a frame is pending");
                    self.last_activity = now;
                    self.state = State::Collision;
                    None
                }
                Ok(None) | Err(_) => Some(0),
            },
            State::Collision => match self.read_char() {
                Ok(Some(LF)) => {
                    self.state = State::FrameReady;
                    None
                }
                Ok(Some(_)) | Err(_) => {
                    self.last_activity = now;
                    None
                }
                Ok(None) => match self.remaining(now) {
                    Some(ticks) => Some(ticks),
                    None => {
                        self.state = State::FrameReady;
                        None
                    }
                },
            },
            State::Queue => {
                // unsolicited characters are dropped until the application sends
                while let Ok(Some(_)) = self.read_char() {}
                Some(0)
            }
            State::TxSof => self.write_char(FRAME_START, State::TxAddrHigh, now),
            State::TxAddrHigh => {
                let c = hex_digit(self.buffer.frame_address() >> 4);
                self.write_char(c, State::TxAddrLow, now)
            }
            State::TxAddrLow => {
                let c = hex_digit(self.buffer.frame_address());
                self.write_char(c, State::TxPduHigh, now)
            }
            State::TxPduHigh => match self.buffer.byte(self.tx_pos) {
                Some(byte) => self.write_char(hex_digit(byte >> 4), State::TxPduLow, now),
                None => {
                    self.state = State::TxLrcHigh;
                    None
                }
            },
            State::TxPduLow => {
                let byte = self.buffer.byte(self.tx_pos).unwrap_or_default();
                let step = self.write_char(hex_digit(byte), State::TxPduHigh, now);
                if self.state == State::TxPduHigh {
                    self.sum = self.sum.wrapping_add(byte);
                    self.tx_pos += 1;
                }
                step
            }
            State::TxLrcHigh => {
                let c = hex_digit(self.sum.wrapping_neg() >> 4);
                self.write_char(c, State::TxLrcLow, now)
            }
            State::TxLrcLow => {
                let c = hex_digit(self.sum.wrapping_neg());
                self.write_char(c, State::TxCr, now)
            }
            State::TxCr => self.write_char(CR, State::TxLf, now),
            State::TxLf => self.write_char(LF, State::TxWait, now),
            State::TxWait => {
                // echo of our own characters on half-duplex lines
                while let Ok(Some(_)) = self.read_char() {}
                if !self.stream.write_complete() {
                    return Some(1);
                }
                self.stream.set_transmit_enable(false);
                #[cfg(feature = "log")]
                log::debug!("ASCII frame to slave {} sent", self.buffer.frame_address());
                self.enter_idle();
                None
            }
        }
    }
}

impl<S, C, B> Framer for AsciiFramer<S, C, B>
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
        self.sum = self.buffer.frame_address();
        self.stream.set_transmit_enable(true);
        self.stream.communication_status(false, true);
        #[cfg(feature = "log")]
        log::debug!(
            "Send ASCII frame to slave {} ({len} byte PDU)",
            self.buffer.frame_address()
        );
        self.state = State::TxSof;
        Ok(())
    }

    fn finished(&mut self) {
        match self.state {
            State::FrameReady | State::Queue | State::Idle | State::Collision => self.enter_idle(),
            state if state.is_receiving() => self.enter_idle(),
            _ => {}
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
