// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus slave (server) dispatcher

use crate::{
    codec::{MAX_PDU_LEN, check_quantity, request_pdu_len},
    error::*,
    frame::*,
    link::{Framer, SystemTick},
    util::packed_coils_len,
};

/// Application callbacks for incoming requests.
///
/// Addresses and quantities are range checked against the Modbus limits
/// before a method is called. Invalid addresses should be reported as
/// [`Exception::IllegalDataAddress`], internal failures as
/// [`Exception::ServerDeviceFailure`].
pub trait SlaveHandler {
    /// Fill `packed` with `n` coil states, LSB of the first byte first.
    ///
    /// `packed` is zeroed and holds exactly the bytes needed for `n` coils.
    fn read_coils(&mut self, _address: u16, _n: u16, _packed: &mut [u8]) -> Result<(), Exception> {
        Err(Exception::IllegalFunction)
    }

    /// Same layout as [`SlaveHandler::read_coils`].
    fn read_discrete_inputs(
        &mut self,
        _address: u16,
        _n: u16,
        _packed: &mut [u8],
    ) -> Result<(), Exception> {
        Err(Exception::IllegalFunction)
    }

    fn read_holding_registers(&mut self, _address: u16, _values: &mut [u16]) -> Result<(), Exception> {
        Err(Exception::IllegalFunction)
    }

    fn read_input_registers(&mut self, _address: u16, _values: &mut [u16]) -> Result<(), Exception> {
        Err(Exception::IllegalFunction)
    }

    fn write_single_coil(&mut self, address: u16, value: bool) -> Result<(), Exception> {
        let packed = [u8::from(value)];
        let coils = Coils {
            data: &packed,
            quantity: 1,
        };
        self.write_multiple_coils(address, coils)
    }

    fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), Exception> {
        let bytes = value.to_be_bytes();
        let data = Data {
            data: &bytes,
            quantity: 1,
        };
        self.write_multiple_registers(address, data)
    }

    fn write_multiple_coils(&mut self, _address: u16, _coils: Coils<'_>) -> Result<(), Exception> {
        Err(Exception::IllegalFunction)
    }

    fn write_multiple_registers(&mut self, _address: u16, _values: Data<'_>) -> Result<(), Exception> {
        Err(Exception::IllegalFunction)
    }

    /// The write is performed before the read.
    fn read_write_multiple_registers(
        &mut self,
        read_address: u16,
        read_values: &mut [u16],
        write_address: u16,
        write_values: Data<'_>,
    ) -> Result<(), Exception> {
        self.write_multiple_registers(write_address, write_values)?;
        self.read_holding_registers(read_address, read_values)
    }
}

impl<H: SlaveHandler + ?Sized> SlaveHandler for &mut H {
    fn read_coils(&mut self, address: u16, n: u16, packed: &mut [u8]) -> Result<(), Exception> {
        (**self).read_coils(address, n, packed)
    }

    fn read_discrete_inputs(&mut self, address: u16, n: u16, packed: &mut [u8]) -> Result<(), Exception> {
        (**self).read_discrete_inputs(address, n, packed)
    }

    fn read_holding_registers(&mut self, address: u16, values: &mut [u16]) -> Result<(), Exception> {
        (**self).read_holding_registers(address, values)
    }

    fn read_input_registers(&mut self, address: u16, values: &mut [u16]) -> Result<(), Exception> {
        (**self).read_input_registers(address, values)
    }

    fn write_single_coil(&mut self, address: u16, value: bool) -> Result<(), Exception> {
        (**self).write_single_coil(address, value)
    }

    fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), Exception> {
        (**self).write_single_register(address, value)
    }

    fn write_multiple_coils(&mut self, address: u16, coils: Coils<'_>) -> Result<(), Exception> {
        (**self).write_multiple_coils(address, coils)
    }

    fn write_multiple_registers(&mut self, address: u16, values: Data<'_>) -> Result<(), Exception> {
        (**self).write_multiple_registers(address, values)
    }

    fn read_write_multiple_registers(
        &mut self,
        read_address: u16,
        read_values: &mut [u16],
        write_address: u16,
        write_values: Data<'_>,
    ) -> Result<(), Exception> {
        (**self).read_write_multiple_registers(read_address, read_values, write_address, write_values)
    }
}

/// Answers requests received by its framer.
#[derive(Debug)]
pub struct Slave<F, H> {
    framer: F,
    handler: H,
}

impl<F, H> Slave<F, H>
where
    F: Framer,
    H: SlaveHandler,
{
    pub const fn new(framer: F, handler: H) -> Self {
        Self { framer, handler }
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

    pub fn into_parts(self) -> (F, H) {
        (self.framer, self.handler)
    }

    /// Drive the framer and answer a ready request.
    ///
    /// Returns the ticks until the next required call or `0` if nothing is pending.
    pub fn poll(&mut self) -> SystemTick {
        let ticks = self.framer.poll();
        if !self.framer.is_frame_ready() {
            return ticks;
        }
        self.process_frame();
        self.framer.poll()
    }

    fn process_frame(&mut self) {
        let mut request = [0; MAX_PDU_LEN];
        let len = match self.framer.frame_buffer().pdu() {
            Some(pdu) if !pdu.is_empty() && pdu.len() <= MAX_PDU_LEN && pdu[0] < 0x80 => {
                request[..pdu.len()].copy_from_slice(pdu);
                pdu.len()
            }
            _ => {
                #[cfg(feature = "log")]
                log::warn!("Drop malformed request");
                self.framer.finished();
                return;
            }
        };
        let request = &request[..len];
        let mut reply = [0; MAX_PDU_LEN];
        let result = dispatch(&mut self.handler, request, &mut reply);
        if self.framer.frame_address() == BROADCAST_ADDRESS {
            #[cfg(feature = "log")]
            {
                if let Err(exception) = result {
                    log::debug!("Broadcast request failed: {exception}");
                }
            }
            self.framer.finished();
            return;
        }
        if !self.framer.begin_send() {
            self.framer.finished();
            return;
        }
        let function = FunctionCode::new(request[0]);
        let reply = result.map(|len| &reply[..len]);
        if let Err(_err) = self.send_reply(function, reply) {
            #[cfg(feature = "log")]
            log::error!("Failed to send reply: {_err}");
            self.framer.finished();
        }
    }

    fn send_reply(
        &mut self,
        function: FunctionCode,
        reply: core::result::Result<&[u8], Exception>,
    ) -> Result<()> {
        let buffer = self.framer.frame_buffer_mut();
        let pdu = buffer.pdu_mut().ok_or(Error::Busy)?;
        let len = match reply {
            Ok(reply) => {
                pdu.get_mut(..reply.len())
                    .ok_or(Error::BufferSize)?
                    .copy_from_slice(reply);
                reply.len()
            }
            Err(exception) => {
                #[cfg(feature = "log")]
                log::debug!("Reply to function {function} with exception: {exception}");
                ExceptionResponse {
                    function,
                    exception,
                }
                .encode(pdu)?
            }
        };
        buffer.set_len(len)?;
        self.framer.send()
    }
}

const fn quantity(n: u16, max: u16) -> core::result::Result<(), Exception> {
    match check_quantity(n, max) {
        Ok(()) => Ok(()),
        Err(_) => Err(Exception::IllegalDataValue),
    }
}

/// Decode `pdu`, call the handler and encode the reply PDU into `reply`.
fn dispatch<H: SlaveHandler>(
    handler: &mut H,
    pdu: &[u8],
    reply: &mut [u8],
) -> core::result::Result<usize, Exception> {
    match request_pdu_len(pdu) {
        Ok(Some(len)) if len == pdu.len() => {}
        Err(Error::FnCode(_)) => return Err(Exception::IllegalFunction),
        _ => return Err(Exception::IllegalDataValue),
    }
    let request = Request::try_from(pdu).map_err(|err| match err {
        Error::FnCode(_) => Exception::IllegalFunction,
        _ => Exception::IllegalDataValue,
    })?;
    let mut registers = [0; MAX_READ_REGISTERS as usize];
    let mut payload = [0; MAX_PDU_LEN];
    let response = match request {
        Request::ReadCoils(address, n) | Request::ReadDiscreteInputs(address, n) => {
            quantity(n, MAX_READ_COILS)?;
            let packed = &mut payload[..packed_coils_len(usize::from(n))];
            if matches!(request, Request::ReadCoils(..)) {
                handler.read_coils(address, n, packed)?;
            } else {
                handler.read_discrete_inputs(address, n, packed)?;
            }
            let coils = Coils {
                data: packed,
                quantity: usize::from(n),
            };
            if matches!(request, Request::ReadCoils(..)) {
                Response::ReadCoils(coils)
            } else {
                Response::ReadDiscreteInputs(coils)
            }
        }
        Request::ReadHoldingRegisters(address, n) => {
            quantity(n, MAX_READ_REGISTERS)?;
            let values = &mut registers[..usize::from(n)];
            handler.read_holding_registers(address, values)?;
            Response::ReadHoldingRegisters(register_values(values, &mut payload)?)
        }
        Request::ReadInputRegisters(address, n) => {
            quantity(n, MAX_READ_REGISTERS)?;
            let values = &mut registers[..usize::from(n)];
            handler.read_input_registers(address, values)?;
            Response::ReadInputRegisters(register_values(values, &mut payload)?)
        }
        Request::WriteSingleCoil(address, value) => {
            handler.write_single_coil(address, value)?;
            Response::WriteSingleCoil(address, value)
        }
        Request::WriteSingleRegister(address, value) => {
            handler.write_single_register(address, value)?;
            Response::WriteSingleRegister(address, value)
        }
        Request::WriteMultipleCoils(address, coils) => {
            let n = coils.len() as u16;
            quantity(n, MAX_WRITE_COILS)?;
            handler.write_multiple_coils(address, coils)?;
            Response::WriteMultipleCoils(address, n)
        }
        Request::WriteMultipleRegisters(address, values) => {
            let n = values.len() as u16;
            quantity(n, MAX_WRITE_REGISTERS)?;
            handler.write_multiple_registers(address, values)?;
            Response::WriteMultipleRegisters(address, n)
        }
        Request::ReadWriteMultipleRegisters(read_address, n, write_address, values) => {
            quantity(n, MAX_READ_REGISTERS)?;
            quantity(values.len() as u16, MAX_READ_WRITE_REGISTERS)?;
            let read_values = &mut registers[..usize::from(n)];
            handler.read_write_multiple_registers(read_address, read_values, write_address, values)?;
            Response::ReadWriteMultipleRegisters(register_values(read_values, &mut payload)?)
        }
    };
    response.encode(reply).map_err(|_err| {
        #[cfg(feature = "log")]
        log::error!("Failed to encode reply: {_err}");
        Exception::ServerDeviceFailure
    })
}

fn register_values<'d>(
    values: &[u16],
    payload: &'d mut [u8],
) -> core::result::Result<Data<'d>, Exception> {
    Data::from_words(values, payload).map_err(|_| Exception::ServerDeviceFailure)
}

#[cfg(all(test, feature = "rtu", feature = "ascii"))]
mod tests {
    use super::*;
    use crate::{
        codec::{ascii, rtu},
        link::{
            FrameBuffer,
            ascii::AsciiFramer,
            rtu::{RtuConfig, RtuFramer},
        },
        master::{HoldingRegisters, Master, MasterConfig, State as MasterState},
        testing::{MockClock, MockStream},
    };

    const T3P5: SystemTick = 2006;

    #[derive(Debug, Default)]
    struct Device {
        registers: [u16; 8],
        coils: [bool; 16],
        writes: usize,
        fail: Option<Exception>,
    }

    impl Device {
        fn range(&self, address: u16, n: usize, len: usize) -> Result<core::ops::Range<usize>, Exception> {
            let start = usize::from(address);
            if start + n > len {
                return Err(Exception::IllegalDataAddress);
            }
            Ok(start..start + n)
        }
    }

    impl SlaveHandler for Device {
        fn read_coils(&mut self, address: u16, n: u16, packed: &mut [u8]) -> Result<(), Exception> {
            let range = self.range(address, usize::from(n), self.coils.len())?;
            crate::util::pack_coils(self.coils[range].iter().copied(), packed)
                .map_err(|_| Exception::ServerDeviceFailure)?;
            Ok(())
        }

        fn read_holding_registers(&mut self, address: u16, values: &mut [u16]) -> Result<(), Exception> {
            if let Some(exception) = self.fail {
                return Err(exception);
            }
            let range = self.range(address, values.len(), self.registers.len())?;
            values.copy_from_slice(&self.registers[range]);
            Ok(())
        }

        fn write_multiple_coils(&mut self, address: u16, coils: Coils<'_>) -> Result<(), Exception> {
            let range = self.range(address, coils.len(), self.coils.len())?;
            for (dst, src) in self.coils[range].iter_mut().zip(coils) {
                *dst = src;
            }
            self.writes += 1;
            Ok(())
        }

        fn write_multiple_registers(&mut self, address: u16, values: Data<'_>) -> Result<(), Exception> {
            let range = self.range(address, values.len(), self.registers.len())?;
            for (dst, src) in self.registers[range].iter_mut().zip(values) {
                *dst = src;
            }
            self.writes += 1;
            Ok(())
        }
    }

    /// Implements nothing.
    struct Nothing;

    impl SlaveHandler for Nothing {}

    fn rtu_framer(clock: &MockClock, station: SlaveId) -> RtuFramer<MockStream, &MockClock, [u8; 256]> {
        RtuFramer::new(
            MockStream::new(),
            clock,
            FrameBuffer::new([0; 256], station),
            RtuConfig::default(),
        )
    }

    /// Send an RTU request to `slave` and return the reply PDU, if any.
    fn request<H: SlaveHandler>(
        slave: &mut Slave<RtuFramer<MockStream, &MockClock, [u8; 256]>, H>,
        clock: &MockClock,
        address: SlaveId,
        pdu: &[u8],
    ) -> Option<([u8; 256], usize)> {
        let adu = &mut [0; 256];
        let len = rtu::encode_adu(address, pdu, adu).unwrap();
        slave.framer_mut().stream_mut().push_rx(&adu[..len]);
        slave.poll();
        clock.advance(T3P5);
        slave.poll();
        let tx = slave.framer().stream().tx();
        if tx.is_empty() {
            return None;
        }
        let frame = rtu::decode_adu(tx).unwrap();
        assert_eq!(frame.slave, address);
        let mut reply = [0; 256];
        reply[..frame.pdu.len()].copy_from_slice(frame.pdu);
        let len = frame.pdu.len();
        slave.framer_mut().stream_mut().clear_tx();
        clock.advance(T3P5);
        slave.poll();
        assert!(slave.framer().is_idle());
        Some((reply, len))
    }

    #[test]
    fn read_holding_registers() {
        let clock = MockClock::new(1);
        let mut device = Device::default();
        device.registers[..2].copy_from_slice(&[0x1234, 0x5678]);
        let mut slave = Slave::new(rtu_framer(&clock, 1), device);
        let (reply, len) = request(&mut slave, &clock, 1, &[0x03, 0x00, 0x00, 0x00, 0x02]).unwrap();
        assert_eq!(&reply[..len], &[0x03, 0x04, 0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn handler_exceptions_are_replied() {
        let clock = MockClock::new(1);
        let mut slave = Slave::new(rtu_framer(&clock, 1), Device::default());
        let (reply, len) = request(&mut slave, &clock, 1, &[0x03, 0x00, 0x07, 0x00, 0x02]).unwrap();
        assert_eq!(&reply[..len], &[0x83, 0x02]);

        slave.handler_mut().fail = Some(Exception::ServerDeviceBusy);
        let (reply, len) = request(&mut slave, &clock, 1, &[0x03, 0x00, 0x00, 0x00, 0x01]).unwrap();
        assert_eq!(&reply[..len], &[0x83, 0x06]);
    }

    #[test]
    fn invalid_quantities() {
        let clock = MockClock::new(1);
        let mut slave = Slave::new(rtu_framer(&clock, 1), Device::default());
        let requests: [&[u8]; 4] = [
            &[0x03, 0x00, 0x00, 0x00, 0x00],
            &[0x03, 0x00, 0x00, 0x00, 0x7E],
            &[0x01, 0x00, 0x00, 0x07, 0xD1],
            &[0x10, 0x00, 0x00, 0x00, 0x00, 0x00],
        ];
        for pdu in requests {
            let (reply, len) = request(&mut slave, &clock, 1, pdu).unwrap();
            assert_eq!(&reply[..len], &[pdu[0] | 0x80, 0x03], "{pdu:X?}");
        }
        assert_eq!(slave.handler().writes, 0);
    }

    #[test]
    fn truncated_request() {
        let clock = MockClock::new(1);
        let mut slave = Slave::new(rtu_framer(&clock, 1), Device::default());
        let (reply, len) = request(&mut slave, &clock, 1, &[0x03, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(&reply[..len], &[0x83, 0x03]);
        let (reply, len) = request(&mut slave, &clock, 1, &[0x10, 0x00, 0x00, 0x00, 0x01, 0x02, 0x12]).unwrap();
        assert_eq!(&reply[..len], &[0x90, 0x03]);
    }

    #[test]
    fn unknown_function() {
        let clock = MockClock::new(1);
        let mut slave = Slave::new(rtu_framer(&clock, 1), Device::default());
        let (reply, len) = request(&mut slave, &clock, 1, &[0x2B, 0x0E, 0x01, 0x00]).unwrap();
        assert_eq!(&reply[..len], &[0xAB, 0x01]);
        // not a valid request
        assert!(request(&mut slave, &clock, 1, &[0x83, 0x02]).is_none());
        assert!(slave.framer().is_idle());
    }

    #[test]
    fn default_handler_rejects_everything() {
        let clock = MockClock::new(1);
        let mut slave = Slave::new(rtu_framer(&clock, 1), Nothing);
        let requests: [&[u8]; 5] = [
            &[0x01, 0x00, 0x00, 0x00, 0x01],
            &[0x04, 0x00, 0x00, 0x00, 0x01],
            &[0x05, 0x00, 0x00, 0xFF, 0x00],
            &[0x06, 0x00, 0x00, 0x00, 0x01],
            &[0x17, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x02, 0x00, 0x01],
        ];
        for pdu in requests {
            let (reply, len) = request(&mut slave, &clock, 1, pdu).unwrap();
            assert_eq!(&reply[..len], &[pdu[0] | 0x80, 0x01]);
        }
    }

    #[test]
    fn single_writes_use_multi_writes() {
        let clock = MockClock::new(1);
        let mut slave = Slave::new(rtu_framer(&clock, 1), Device::default());
        let (reply, len) = request(&mut slave, &clock, 1, &[0x06, 0x00, 0x05, 0x00, 0xFF]).unwrap();
        assert_eq!(&reply[..len], &[0x06, 0x00, 0x05, 0x00, 0xFF]);
        assert_eq!(slave.handler().registers[5], 0x00FF);

        let (reply, len) = request(&mut slave, &clock, 1, &[0x05, 0x00, 0x03, 0xFF, 0x00]).unwrap();
        assert_eq!(&reply[..len], &[0x05, 0x00, 0x03, 0xFF, 0x00]);
        assert!(slave.handler().coils[3]);
        assert_eq!(slave.handler().writes, 2);

        // illegal coil value
        let (reply, len) = request(&mut slave, &clock, 1, &[0x05, 0x00, 0x03, 0x12, 0x34]).unwrap();
        assert_eq!(&reply[..len], &[0x85, 0x03]);
    }

    #[test]
    fn multi_writes_reply_address_and_quantity() {
        let clock = MockClock::new(1);
        let mut slave = Slave::new(rtu_framer(&clock, 1), Device::default());
        let (reply, len) = request(
            &mut slave,
            &clock,
            1,
            &[0x10, 0x00, 0x02, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02],
        )
        .unwrap();
        assert_eq!(&reply[..len], &[0x10, 0x00, 0x02, 0x00, 0x02]);
        assert_eq!(slave.handler().registers[2..4], [0x000A, 0x0102]);

        let (reply, len) = request(
            &mut slave,
            &clock,
            1,
            &[0x0F, 0x00, 0x01, 0x00, 0x0A, 0x02, 0xCD, 0x01],
        )
        .unwrap();
        assert_eq!(&reply[..len], &[0x0F, 0x00, 0x01, 0x00, 0x0A]);
        assert_eq!(
            slave.handler().coils[1..11],
            [true, false, true, true, false, false, true, true, true, false]
        );
        assert_eq!(slave.handler().writes, 2);
    }

    #[test]
    fn reply_that_does_not_fit_is_a_device_failure() {
        let mut device = Device::default();
        let reply = &mut [0; 5];
        assert_eq!(
            dispatch(&mut device, &[0x03, 0x00, 0x00, 0x00, 0x02], reply),
            Err(Exception::ServerDeviceFailure)
        );
        assert_eq!(dispatch(&mut device, &[0x03, 0x00, 0x00, 0x00, 0x01], reply), Ok(4));
        assert_eq!(reply[..4], [0x03, 0x02, 0x00, 0x00]);
    }

    #[test]
    fn read_coils() {
        let clock = MockClock::new(1);
        let mut device = Device::default();
        device.coils[..10].copy_from_slice(&[
            true, false, true, true, false, false, true, true, true, false,
        ]);
        let mut slave = Slave::new(rtu_framer(&clock, 1), device);
        let (reply, len) = request(&mut slave, &clock, 1, &[0x01, 0x00, 0x00, 0x00, 0x0A]).unwrap();
        assert_eq!(&reply[..len], &[0x01, 0x02, 0xCD, 0x01]);
    }

    #[test]
    fn read_write_multiple_registers_writes_first() {
        let clock = MockClock::new(1);
        let mut slave = Slave::new(rtu_framer(&clock, 1), Device::default());
        let (reply, len) = request(
            &mut slave,
            &clock,
            1,
            &[0x17, 0x00, 0x01, 0x00, 0x02, 0x00, 0x02, 0x00, 0x01, 0x02, 0xAB, 0xCD],
        )
        .unwrap();
        assert_eq!(&reply[..len], &[0x17, 0x04, 0x00, 0x00, 0xAB, 0xCD]);
    }

    #[test]
    fn broadcasts_are_not_answered() {
        let clock = MockClock::new(1);
        let mut slave = Slave::new(rtu_framer(&clock, 1), Device::default());
        assert!(request(&mut slave, &clock, 0, &[0x06, 0x00, 0x01, 0x00, 0x03]).is_none());
        assert_eq!(slave.handler().registers[1], 3);
        assert!(slave.framer().is_idle());
        assert!(request(&mut slave, &clock, 0, &[0x03, 0x00, 0x00, 0x00, 0x01]).is_none());
        assert!(slave.framer().is_idle());
    }

    #[test]
    fn frames_for_other_stations_are_ignored() {
        let clock = MockClock::new(1);
        let mut slave = Slave::new(rtu_framer(&clock, 1), Device::default());
        assert!(request(&mut slave, &clock, 2, &[0x06, 0x00, 0x01, 0x00, 0x03]).is_none());
        assert_eq!(slave.handler().writes, 0);
    }

    #[test]
    fn handler_by_reference() {
        let clock = MockClock::new(1);
        let mut device = Device::default();
        {
            let mut slave = Slave::new(rtu_framer(&clock, 1), &mut device);
            request(&mut slave, &clock, 1, &[0x06, 0x00, 0x02, 0x12, 0x34]).unwrap();
        }
        assert_eq!(device.registers[2], 0x1234);
    }

    /// Shuttle characters between both ends until the master is done.
    fn exchange<FM, FS, H, SH>(
        master: &mut Master<FM, H, &MockClock>,
        slave: &mut Slave<FS, SH>,
        clock: &MockClock,
        mut link: impl FnMut(&mut FM, &mut FS),
    ) where
        FM: Framer,
        FS: Framer,
        H: crate::master::MasterHandler,
        SH: SlaveHandler,
    {
        for _ in 0..100 {
            master.poll();
            link(master.framer_mut(), slave.framer_mut());
            slave.poll();
            link(master.framer_mut(), slave.framer_mut());
            if master.state() != MasterState::WaitingForReply
                && master.state() != MasterState::WaitingTurnaroundReply
            {
                return;
            }
            clock.advance(500);
        }
        panic!("no reply");
    }

    fn rtu_link(
        m: &mut RtuFramer<MockStream, &MockClock, [u8; 256]>,
        s: &mut RtuFramer<MockStream, &MockClock, [u8; 256]>,
    ) {
        m.stream_mut().transfer_to(s.stream_mut());
        s.stream_mut().transfer_to(m.stream_mut());
    }

    #[test]
    fn rtu_master_and_slave() {
        let clock = MockClock::new(1);
        let mut device = Device::default();
        device.registers[..3].copy_from_slice(&[1, 2, 3]);
        let mut slave = Slave::new(rtu_framer(&clock, 7), device);
        let local = &mut [0u16; 8];
        let mut master = Master::new(
            rtu_framer(&clock, 0),
            HoldingRegisters::new(local),
            &clock,
            MasterConfig::default(),
        )
        .unwrap();

        master.read_holding_registers_req(7, 0, 3).unwrap();
        exchange(&mut master, &mut slave, &clock, rtu_link);
        assert_eq!(master.state(), MasterState::Idle);
        assert_eq!(&master.handler().registers()[..4], &[1, 2, 3, 0]);

        master
            .write_multiple_registers_req(7, 4, [0xAAAA, 0xBBBB])
            .unwrap();
        exchange(&mut master, &mut slave, &clock, rtu_link);
        assert_eq!(master.state(), MasterState::Idle);
        assert_eq!(&slave.handler().registers[4..6], &[0xAAAA, 0xBBBB]);

        master
            .read_write_multiple_registers_req(7, 3, 3, 3, [0xCCCC])
            .unwrap();
        exchange(&mut master, &mut slave, &clock, rtu_link);
        assert_eq!(master.state(), MasterState::Idle);
        assert_eq!(
            &master.handler().registers()[3..6],
            &[0xCCCC, 0xAAAA, 0xBBBB]
        );

        // out of range on the slave side
        master.read_holding_registers_req(7, 7, 2).unwrap();
        exchange(&mut master, &mut slave, &clock, rtu_link);
        assert_eq!(master.state(), MasterState::Idle);
        assert_eq!(master.handler().registers()[7], 0);
    }

    #[test]
    fn rtu_broadcast() {
        let clock = MockClock::new(1);
        let mut slave = Slave::new(rtu_framer(&clock, 7), Device::default());
        let local = &mut [0u16; 1];
        let mut master = Master::new(
            rtu_framer(&clock, 0),
            HoldingRegisters::new(local),
            &clock,
            MasterConfig {
                turnaround_delay_ms: 10,
                ..Default::default()
            },
        )
        .unwrap();
        master.write_single_register_req(0, 2, 0x0102).unwrap();
        exchange(&mut master, &mut slave, &clock, rtu_link);
        assert_eq!(master.state(), MasterState::Idle);
        assert_eq!(slave.handler().registers[2], 0x0102);
        assert!(slave.framer().stream().tx().is_empty());
        assert!(master.framer().stream().pending_rx() == 0);
    }

    #[test]
    fn ascii_master_and_slave() {
        type Ascii<'c> = AsciiFramer<MockStream, &'c MockClock, [u8; 256]>;
        fn ascii_link(m: &mut Ascii<'_>, s: &mut Ascii<'_>) {
            m.stream_mut().transfer_to(s.stream_mut());
            s.stream_mut().transfer_to(m.stream_mut());
        }

        let clock = MockClock::new(1);
        let mut device = Device::default();
        device.coils[1] = true;
        let mut slave = Slave::new(
            AsciiFramer::new(MockStream::new(), &clock, FrameBuffer::new([0; 256], 0x11)),
            device,
        );
        let local = &mut [0u16; 4];
        let mut master = Master::new(
            AsciiFramer::new(MockStream::new(), &clock, FrameBuffer::new([0; 256], 0)),
            HoldingRegisters::new(local),
            &clock,
            MasterConfig::default(),
        )
        .unwrap();

        master.write_single_coil_req(0x11, 3, true).unwrap();
        master.poll();
        let sent = master.framer().stream().tx();
        let pdu = &mut [0; 253];
        let frame = ascii::decode_adu(sent, pdu).unwrap();
        assert_eq!(frame.slave, 0x11);
        assert_eq!(frame.pdu, &[0x05, 0x00, 0x03, 0xFF, 0x00]);

        exchange(&mut master, &mut slave, &clock, ascii_link);
        assert_eq!(master.state(), MasterState::Idle);
        assert!(slave.handler().coils[3]);
        assert!(slave.handler().coils[1]);
    }
}
