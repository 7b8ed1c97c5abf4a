// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus master (client) engine
//!
//! The engine tracks exactly one outstanding transaction. Decoded replies
//! are forwarded to a [`MasterHandler`].

use crate::{
    codec::{MAX_PDU_LEN, check_quantity, cursor::WriteCursor, response_pdu_len},
    error::*,
    frame::*,
    link::{Clock, Framer, SystemTick, elapsed, ms_to_ticks},
    util::{pack_coils, packed_coils_len},
};

/// Timeouts of the [`Master`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterConfig {
    /// Maximum time to wait for a reply.
    pub response_timeout_ms: u32,
    /// Bus silence after a broadcast request.
    pub turnaround_delay_ms: u32,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 200,
            turnaround_delay_ms: 1000,
        }
    }
}

/// State of the [`Master`].
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    WaitingForReply,
    ProcessingReply,
    WaitingTurnaroundReply,
    /// A failed transaction has to be acknowledged, see [`Master::acknowledge_error`].
    ProcessingError,
}

/// Application callbacks for decoded replies.
///
/// Every method returns `true` if the reply was accepted. A rejected reply
/// moves the engine into [`State::ProcessingError`].
pub trait MasterHandler {
    fn read_coils_rsp(&mut self, _address: u16, _coils: Coils<'_>) -> bool {
        true
    }

    fn read_discrete_inputs_rsp(&mut self, _address: u16, _inputs: Coils<'_>) -> bool {
        true
    }

    fn read_holding_registers_rsp(&mut self, _address: u16, _values: Data<'_>) -> bool {
        true
    }

    fn read_input_registers_rsp(&mut self, _address: u16, _values: Data<'_>) -> bool {
        true
    }

    fn write_single_coil_rsp(&mut self, _address: u16, _value: bool) -> bool {
        true
    }

    fn write_single_register_rsp(&mut self, _address: u16) -> bool {
        true
    }

    fn write_multiple_coils_rsp(&mut self, _address: u16, _n: u16) -> bool {
        true
    }

    fn write_multiple_registers_rsp(&mut self, _address: u16, _n: u16) -> bool {
        true
    }

    /// Defaults to the write acknowledgement followed by the read result.
    fn read_write_multiple_registers_rsp(
        &mut self,
        read_address: u16,
        values: Data<'_>,
        write_address: u16,
        write_n: u16,
    ) -> bool {
        self.write_multiple_registers_rsp(write_address, write_n)
            && self.read_holding_registers_rsp(read_address, values)
    }

    /// The slave did not reply in time. Return `true` to recover.
    fn response_time_out(&mut self) -> bool {
        true
    }

    fn exception_response(&mut self, _function: FunctionCode, _exception: Exception) -> bool {
        true
    }
}

/// Mirrors holding register reads into a local register image.
#[derive(Debug)]
pub struct HoldingRegisters<'r> {
    registers: &'r mut [u16],
}

impl<'r> HoldingRegisters<'r> {
    pub fn new(registers: &'r mut [u16]) -> Self {
        Self { registers }
    }

    #[must_use]
    pub fn registers(&self) -> &[u16] {
        self.registers
    }

    fn range(&self, address: u16, n: usize) -> Option<core::ops::Range<usize>> {
        let start = usize::from(address);
        let end = start.checked_add(n)?;
        (end <= self.registers.len()).then_some(start..end)
    }
}

impl MasterHandler for HoldingRegisters<'_> {
    fn read_holding_registers_rsp(&mut self, address: u16, values: Data<'_>) -> bool {
        let Some(range) = self.range(address, values.len()) else {
            return false;
        };
        for (register, value) in self.registers[range].iter_mut().zip(values) {
            *register = value;
        }
        true
    }

    fn write_multiple_registers_rsp(&mut self, address: u16, n: u16) -> bool {
        self.range(address, usize::from(n)).is_some()
    }
}

/// Context of the outstanding request.
#[derive(Debug, Clone, Copy)]
struct Transaction {
    slave: SlaveId,
    function: FunctionCode,
    read_address: Address,
    read_quantity: Quantity,
    write_address: Address,
    write_quantity: Quantity,
}

impl Transaction {
    const fn new(slave: SlaveId, function: FunctionCode) -> Self {
        Self {
            slave,
            function,
            read_address: 0,
            read_quantity: 0,
            write_address: 0,
            write_quantity: 0,
        }
    }

    const fn read(mut self, address: Address, quantity: Quantity) -> Self {
        self.read_address = address;
        self.read_quantity = quantity;
        self
    }

    const fn write(mut self, address: Address, quantity: Quantity) -> Self {
        self.write_address = address;
        self.write_quantity = quantity;
        self
    }
}

/// Modbus master request/response engine.
#[derive(Debug)]
pub struct Master<F, H, C> {
    framer: F,
    handler: H,
    clock: C,
    state: State,
    response_timeout: SystemTick,
    turnaround_delay: SystemTick,
    timer: SystemTick,
    transaction: Transaction,
}

impl<F, H, C> Master<F, H, C>
where
    F: Framer,
    H: MasterHandler,
    C: Clock,
{
    /// Create an idle master.
    ///
    /// Fails with [`Error::Timing`] if the clock reports zero microseconds per tick.
    pub fn new(framer: F, handler: H, clock: C, config: MasterConfig) -> Result<Self> {
        let micros_per_tick = clock.micros_per_tick();
        let (Some(response_timeout), Some(turnaround_delay)) = (
            ms_to_ticks(config.response_timeout_ms, micros_per_tick),
            ms_to_ticks(config.turnaround_delay_ms, micros_per_tick),
        ) else {
            return Err(Error::Timing);
        };
        Ok(Self {
            framer,
            handler,
            clock,
            state: State::Idle,
            response_timeout,
            turnaround_delay,
            timer: 0,
            transaction: Transaction::new(0, FunctionCode::Custom(0)),
        })
    }

    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub const fn framer(&self) -> &F {
        &self.framer
    }

    pub fn framer_mut(&mut self) -> &mut F {
        &mut self.framer
    }

    #[must_use]
    pub const fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Leave [`State::ProcessingError`]. Returns `false` in any other state.
    pub fn acknowledge_error(&mut self) -> bool {
        if self.state == State::ProcessingError {
            self.state = State::Idle;
            true
        } else {
            false
        }
    }

    /// Drive the framer and the engine timeouts.
    ///
    /// Returns the ticks until the next required call or `0` if nothing is pending.
    pub fn poll(&mut self) -> SystemTick {
        let mut link = self.framer.poll();
        if self.framer.is_frame_ready() {
            self.process_frame();
            link = self.framer.poll();
        }
        let now = self.clock.ticks();
        let engine = match self.state {
            State::WaitingForReply => {
                let waited = elapsed(now, self.timer);
                if waited > self.response_timeout {
                    #[cfg(feature = "log")]
                    log::warn!(
                        "Slave {} did not reply within {} ticks",
                        self.transaction.slave,
                        self.response_timeout
                    );
                    self.state = if self.handler.response_time_out() {
                        State::Idle
                    } else {
                        State::ProcessingError
                    };
                    0
                } else {
                    (self.response_timeout - waited).saturating_add(1)
                }
            }
            State::WaitingTurnaroundReply => {
                let waited = elapsed(now, self.timer);
                if waited >= self.turnaround_delay {
                    #[cfg(feature = "log")]
                    log::debug!("Broadcast turnaround delay elapsed");
                    self.state = State::Idle;
                    0
                } else {
                    self.turnaround_delay - waited
                }
            }
            State::Idle | State::ProcessingReply | State::ProcessingError => 0,
        };
        match (link, engine) {
            (0, ticks) | (ticks, 0) => ticks,
            (link, engine) => link.min(engine),
        }
    }

    /// Modbus function `0x01`.
    pub fn read_coils_req(&mut self, slave: SlaveId, address: u16, n: u16) -> Result<()> {
        check_quantity(n, MAX_READ_COILS)?;
        let transaction = Transaction::new(slave, FunctionCode::ReadCoils).read(address, n);
        self.transmit_request(transaction, Request::ReadCoils(address, n))
    }

    /// Modbus function `0x02`.
    pub fn read_discrete_inputs_req(&mut self, slave: SlaveId, address: u16, n: u16) -> Result<()> {
        check_quantity(n, MAX_READ_COILS)?;
        let transaction =
            Transaction::new(slave, FunctionCode::ReadDiscreteInputs).read(address, n);
        self.transmit_request(transaction, Request::ReadDiscreteInputs(address, n))
    }

    /// Modbus function `0x03`.
    pub fn read_holding_registers_req(
        &mut self,
        slave: SlaveId,
        address: u16,
        n: u16,
    ) -> Result<()> {
        check_quantity(n, MAX_READ_REGISTERS)?;
        let transaction =
            Transaction::new(slave, FunctionCode::ReadHoldingRegisters).read(address, n);
        self.transmit_request(transaction, Request::ReadHoldingRegisters(address, n))
    }

    /// Modbus function `0x04`.
    pub fn read_input_registers_req(&mut self, slave: SlaveId, address: u16, n: u16) -> Result<()> {
        check_quantity(n, MAX_READ_REGISTERS)?;
        let transaction =
            Transaction::new(slave, FunctionCode::ReadInputRegisters).read(address, n);
        self.transmit_request(transaction, Request::ReadInputRegisters(address, n))
    }

    /// Modbus function `0x05`.
    pub fn write_single_coil_req(&mut self, slave: SlaveId, address: u16, value: bool) -> Result<()> {
        let transaction = Transaction::new(slave, FunctionCode::WriteSingleCoil).write(address, 1);
        self.transmit_request(transaction, Request::WriteSingleCoil(address, value))
    }

    /// Modbus function `0x06`.
    pub fn write_single_register_req(
        &mut self,
        slave: SlaveId,
        address: u16,
        value: u16,
    ) -> Result<()> {
        let transaction =
            Transaction::new(slave, FunctionCode::WriteSingleRegister).write(address, 1);
        self.transmit_request(transaction, Request::WriteSingleRegister(address, value))
    }

    /// Modbus function `0x0F`.
    pub fn write_multiple_coils_req<I>(
        &mut self,
        slave: SlaveId,
        address: u16,
        values: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = bool>,
        I::IntoIter: ExactSizeIterator,
    {
        let values = values.into_iter();
        let n = quantity_of(&values)?;
        check_quantity(n, MAX_WRITE_COILS)?;
        let byte_count = packed_coils_len(usize::from(n));
        let transaction =
            Transaction::new(slave, FunctionCode::WriteMultipleCoils).write(address, n);
        self.transmit(transaction, 6 + byte_count, |pdu| {
            let mut cursor = WriteCursor::new(pdu);
            cursor.write_u8(FunctionCode::WriteMultipleCoils.value())?;
            cursor.write_u16(address)?;
            cursor.write_u16(n)?;
            cursor.write_u8(byte_count as u8)?;
            pack_coils(values.take(usize::from(n)), cursor.advance(byte_count)?)?;
            Ok(cursor.position())
        })
    }

    /// Modbus function `0x10`.
    pub fn write_multiple_registers_req<I>(
        &mut self,
        slave: SlaveId,
        address: u16,
        values: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = u16>,
        I::IntoIter: ExactSizeIterator,
    {
        let values = values.into_iter();
        let n = quantity_of(&values)?;
        check_quantity(n, MAX_WRITE_REGISTERS)?;
        let transaction =
            Transaction::new(slave, FunctionCode::WriteMultipleRegisters).write(address, n);
        self.transmit(transaction, 6 + usize::from(n) * 2, |pdu| {
            let mut cursor = WriteCursor::new(pdu);
            cursor.write_u8(FunctionCode::WriteMultipleRegisters.value())?;
            cursor.write_u16(address)?;
            cursor.write_u16(n)?;
            cursor.write_u8((n * 2) as u8)?;
            for value in values {
                cursor.write_u16(value)?;
            }
            Ok(cursor.position())
        })
    }

    /// Modbus function `0x17`.
    pub fn read_write_multiple_registers_req<I>(
        &mut self,
        slave: SlaveId,
        read_address: u16,
        read_n: u16,
        write_address: u16,
        values: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = u16>,
        I::IntoIter: ExactSizeIterator,
    {
        let values = values.into_iter();
        let write_n = quantity_of(&values)?;
        check_quantity(read_n, MAX_READ_REGISTERS)?;
        check_quantity(write_n, MAX_READ_WRITE_REGISTERS)?;
        let transaction = Transaction::new(slave, FunctionCode::ReadWriteMultipleRegisters)
            .read(read_address, read_n)
            .write(write_address, write_n);
        self.transmit(transaction, 10 + usize::from(write_n) * 2, |pdu| {
            let mut cursor = WriteCursor::new(pdu);
            cursor.write_u8(FunctionCode::ReadWriteMultipleRegisters.value())?;
            cursor.write_u16(read_address)?;
            cursor.write_u16(read_n)?;
            cursor.write_u16(write_address)?;
            cursor.write_u16(write_n)?;
            cursor.write_u8((write_n * 2) as u8)?;
            for value in values {
                cursor.write_u16(value)?;
            }
            Ok(cursor.position())
        })
    }

    fn transmit_request(&mut self, transaction: Transaction, request: Request<'_>) -> Result<()> {
        self.transmit(transaction, request.pdu_len(), |pdu| request.encode(pdu))
    }

    /// Reserve the framer buffer, encode a PDU of `pdu_len` bytes and send it.
    ///
    /// Neither the engine nor the framer changes if this fails.
    fn transmit<E>(&mut self, transaction: Transaction, pdu_len: usize, encode: E) -> Result<()>
    where
        E: FnOnce(&mut [u8]) -> Result<usize>,
    {
        if self.state != State::Idle {
            return Err(Error::Busy);
        }
        if pdu_len > MAX_PDU_LEN || pdu_len > self.framer.frame_buffer().capacity() {
            return Err(Error::BufferSize);
        }
        if !self.framer.begin_send() {
            return Err(Error::Busy);
        }
        if let Err(err) = self.encode_and_send(transaction.slave, pdu_len, encode) {
            self.framer.finished();
            return Err(err);
        }
        self.timer = self.clock.ticks();
        self.transaction = transaction;
        self.state = if transaction.slave == BROADCAST_ADDRESS {
            State::WaitingTurnaroundReply
        } else {
            State::WaitingForReply
        };
        Ok(())
    }

    fn encode_and_send<E>(&mut self, slave: SlaveId, pdu_len: usize, encode: E) -> Result<()>
    where
        E: FnOnce(&mut [u8]) -> Result<usize>,
    {
        let buffer = self.framer.frame_buffer_mut();
        let pdu = buffer.pdu_mut().ok_or(Error::Busy)?;
        let len = encode(&mut pdu[..pdu_len])?;
        buffer.set_len(len)?;
        buffer.set_frame_address(slave);
        self.framer.send()
    }

    fn process_frame(&mut self) {
        let now = self.clock.ticks();
        let Some(pdu) = self.framer.frame_buffer().pdu() else {
            self.framer.finished();
            return;
        };
        if pdu.is_empty() || self.state != State::WaitingForReply {
            #[cfg(feature = "log")]
            log::debug!("Drop unexpected frame in state {:?}", self.state);
            self.framer.finished();
            return;
        }
        let source = self.framer.frame_address();
        if source != self.transaction.slave {
            #[cfg(feature = "log")]
            log::warn!(
                "Drop frame from slave {source} while waiting for slave {}",
                self.transaction.slave
            );
            self.timer = now;
            self.framer.finished();
            return;
        }
        self.state = State::ProcessingReply;
        let accepted = dispatch(&mut self.handler, &self.transaction, pdu);
        self.state = if accepted {
            State::Idle
        } else {
            State::ProcessingError
        };
        self.framer.finished();
    }
}

fn quantity_of<I: ExactSizeIterator>(values: &I) -> Result<Quantity> {
    Quantity::try_from(values.len()).map_err(|_| Error::Quantity(Quantity::MAX))
}

/// Decode a reply and forward it to `handler`.
fn dispatch<H: MasterHandler>(handler: &mut H, transaction: &Transaction, pdu: &[u8]) -> bool {
    let expected = transaction.function.value();
    if pdu[0] & 0x80 != 0 {
        if pdu[0] & 0x7F != expected {
            #[cfg(feature = "log")]
            log::warn!("Exception for function 0x{:0>2X} does not match the request", pdu[0] & 0x7F);
            return false;
        }
        if pdu.len() != 2 {
            #[cfg(feature = "log")]
            log::warn!("Exception reply of {} bytes", pdu.len());
            return false;
        }
        // codes without a name are passed on as `Exception::Unknown`
        return match ExceptionResponse::try_from(pdu) {
            Ok(ExceptionResponse {
                function,
                exception,
            }) => {
                #[cfg(feature = "log")]
                log::debug!("Slave {} replied with exception: {exception}", transaction.slave);
                handler.exception_response(function, exception)
            }
            Err(_err) => {
                #[cfg(feature = "log")]
                log::warn!("Invalid exception response: {_err}");
                false
            }
        };
    }
    if pdu[0] != expected || !matches!(response_pdu_len(pdu), Ok(Some(len)) if len == pdu.len()) {
        #[cfg(feature = "log")]
        log::warn!("Unexpected reply to function 0x{expected:0>2X}: {pdu:X?}");
        return false;
    }
    let response = match Response::try_from(pdu) {
        Ok(response) => response,
        Err(_err) => {
            #[cfg(feature = "log")]
            log::warn!("Failed to decode reply: {_err}");
            return false;
        }
    };
    let Transaction {
        read_address,
        read_quantity,
        write_address,
        write_quantity,
        ..
    } = *transaction;
    let read_n = usize::from(read_quantity);
    match response {
        Response::ReadCoils(coils) | Response::ReadDiscreteInputs(coils) => {
            if coils.packed_len() != packed_coils_len(read_n) {
                return false;
            }
            let coils = Coils {
                data: coils.data,
                quantity: read_n,
            };
            if transaction.function == FunctionCode::ReadCoils {
                handler.read_coils_rsp(read_address, coils)
            } else {
                handler.read_discrete_inputs_rsp(read_address, coils)
            }
        }
        Response::ReadHoldingRegisters(values) => {
            values.len() == read_n && handler.read_holding_registers_rsp(read_address, values)
        }
        Response::ReadInputRegisters(values) => {
            values.len() == read_n && handler.read_input_registers_rsp(read_address, values)
        }
        Response::WriteSingleCoil(address, value) => {
            address == write_address && handler.write_single_coil_rsp(address, value)
        }
        Response::WriteSingleRegister(address, _) => {
            address == write_address && handler.write_single_register_rsp(address)
        }
        Response::WriteMultipleCoils(address, n) => {
            address == write_address
                && n == write_quantity
                && handler.write_multiple_coils_rsp(address, n)
        }
        Response::WriteMultipleRegisters(address, n) => {
            address == write_address
                && n == write_quantity
                && handler.write_multiple_registers_rsp(address, n)
        }
        Response::ReadWriteMultipleRegisters(values) => {
            values.len() == read_n
                && handler.read_write_multiple_registers_rsp(
                    read_address,
                    values,
                    write_address,
                    write_quantity,
                )
        }
    }
}
