// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! PDU encoding and decoding shared by all serial line framings.

use crate::{error::*, frame::*, util::*};

pub(crate) mod cursor;

#[cfg(feature = "ascii")]
pub mod ascii;
#[cfg(feature = "rtu")]
pub mod rtu;

use self::cursor::{ReadCursor, WriteCursor};

/// Largest PDU carried by a serial line ADU.
pub const MAX_PDU_LEN: usize = 253;

/// A PDU extracted from a checked serial line ADU.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame<'a> {
    pub slave: SlaveId,
    pub pdu: &'a [u8],
}

/// Read a byte count and the `expected` bytes it announces.
fn read_counted<'a>(cursor: &mut ReadCursor<'a>, expected: usize) -> Result<&'a [u8]> {
    let count = cursor.read_u8()?;
    if usize::from(count) != expected {
        return Err(Error::ByteCount(count));
    }
    cursor.read(expected)
}

/// Write the byte count and the first `count` bytes of `payload`.
fn write_counted(cursor: &mut WriteCursor<'_>, payload: &[u8], count: usize) -> Result<()> {
    let bytes = payload.get(..count).ok_or(Error::BufferSize)?;
    let count = u8::try_from(count).map_err(|_| Error::BufferSize)?;
    cursor.write_u8(count)?;
    cursor.write_bytes(bytes)
}

fn read_coil_states<'a>(cursor: &mut ReadCursor<'a>) -> Result<Coils<'a>> {
    let count = cursor.read_u8()?;
    let data = cursor.read(usize::from(count))?;
    // the reply does not tell how many of the bits were requested
    Ok(Coils {
        data,
        quantity: data.len() * 8,
    })
}

fn read_register_values<'a>(cursor: &mut ReadCursor<'a>) -> Result<Data<'a>> {
    let count = cursor.read_u8()?;
    if count % 2 != 0 {
        return Err(Error::ByteCount(count));
    }
    let data = cursor.read(usize::from(count))?;
    Ok(Data {
        data,
        quantity: data.len() / 2,
    })
}

/// Read the function code and reject the ones outside the supported subset.
fn read_function(cursor: &mut ReadCursor<'_>) -> Result<FunctionCode> {
    match FunctionCode::new(cursor.read_u8()?) {
        FunctionCode::Custom(code) => Err(Error::FnCode(code)),
        function => Ok(function),
    }
}

/// Check the encoded size before anything is written.
fn sized_buffer(buf: &mut [u8], len: usize) -> Result<&mut [u8]> {
    if len > MAX_PDU_LEN {
        return Err(Error::BufferSize);
    }
    buf.get_mut(..len).ok_or(Error::BufferSize)
}

impl<'r> TryFrom<&'r [u8]> for Request<'r> {
    type Error = Error;

    fn try_from(pdu: &'r [u8]) -> Result<Self> {
        let mut cursor = ReadCursor::new(pdu);
        let function = read_function(&mut cursor)?;
        let address = cursor.read_u16()?;
        let request = match function {
            FunctionCode::ReadCoils => Self::ReadCoils(address, cursor.read_u16()?),
            FunctionCode::ReadDiscreteInputs => Self::ReadDiscreteInputs(address, cursor.read_u16()?),
            FunctionCode::ReadHoldingRegisters => {
                Self::ReadHoldingRegisters(address, cursor.read_u16()?)
            }
            FunctionCode::ReadInputRegisters => Self::ReadInputRegisters(address, cursor.read_u16()?),
            FunctionCode::WriteSingleCoil => {
                Self::WriteSingleCoil(address, decode_coil(cursor.read_u16()?)?)
            }
            FunctionCode::WriteSingleRegister => {
                Self::WriteSingleRegister(address, cursor.read_u16()?)
            }
            FunctionCode::WriteMultipleCoils => {
                let quantity = usize::from(cursor.read_u16()?);
                let data = read_counted(&mut cursor, packed_coils_len(quantity))?;
                Self::WriteMultipleCoils(address, Coils { data, quantity })
            }
            FunctionCode::WriteMultipleRegisters => {
                let quantity = usize::from(cursor.read_u16()?);
                let data = read_counted(&mut cursor, quantity * 2)?;
                Self::WriteMultipleRegisters(address, Data { data, quantity })
            }
            FunctionCode::ReadWriteMultipleRegisters => {
                let read_quantity = cursor.read_u16()?;
                let write_address = cursor.read_u16()?;
                let quantity = usize::from(cursor.read_u16()?);
                let data = read_counted(&mut cursor, quantity * 2)?;
                Self::ReadWriteMultipleRegisters(
                    address,
                    read_quantity,
                    write_address,
                    Data { data, quantity },
                )
            }
            FunctionCode::Custom(code) => return Err(Error::FnCode(code)),
        };
        Ok(request)
    }
}

impl<'r> TryFrom<&'r [u8]> for Response<'r> {
    type Error = Error;

    fn try_from(pdu: &'r [u8]) -> Result<Self> {
        let mut cursor = ReadCursor::new(pdu);
        let response = match read_function(&mut cursor)? {
            FunctionCode::ReadCoils => Self::ReadCoils(read_coil_states(&mut cursor)?),
            FunctionCode::ReadDiscreteInputs => {
                Self::ReadDiscreteInputs(read_coil_states(&mut cursor)?)
            }
            FunctionCode::ReadHoldingRegisters => {
                Self::ReadHoldingRegisters(read_register_values(&mut cursor)?)
            }
            FunctionCode::ReadInputRegisters => {
                Self::ReadInputRegisters(read_register_values(&mut cursor)?)
            }
            FunctionCode::ReadWriteMultipleRegisters => {
                Self::ReadWriteMultipleRegisters(read_register_values(&mut cursor)?)
            }
            FunctionCode::WriteSingleCoil => {
                let address = cursor.read_u16()?;
                Self::WriteSingleCoil(address, decode_coil(cursor.read_u16()?)?)
            }
            FunctionCode::WriteSingleRegister => {
                let address = cursor.read_u16()?;
                Self::WriteSingleRegister(address, cursor.read_u16()?)
            }
            FunctionCode::WriteMultipleCoils => {
                let address = cursor.read_u16()?;
                Self::WriteMultipleCoils(address, cursor.read_u16()?)
            }
            FunctionCode::WriteMultipleRegisters => {
                let address = cursor.read_u16()?;
                Self::WriteMultipleRegisters(address, cursor.read_u16()?)
            }
            FunctionCode::Custom(code) => return Err(Error::FnCode(code)),
        };
        Ok(response)
    }
}

impl TryFrom<&[u8]> for ExceptionResponse {
    type Error = Error;

    fn try_from(pdu: &[u8]) -> Result<Self> {
        let mut cursor = ReadCursor::new(pdu);
        let code = cursor.read_u8()?;
        if code & 0x80 == 0 {
            return Err(Error::ExceptionFnCode(code));
        }
        let exception = Exception::new(cursor.read_u8()?);
        Ok(Self {
            function: FunctionCode::new(code & 0x7F),
            exception,
        })
    }
}

impl Request<'_> {
    /// Encode the request PDU into `buf`, returning the number of bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut cursor = WriteCursor::new(sized_buffer(buf, self.pdu_len())?);
        cursor.write_u8(self.function().value())?;
        match *self {
            Self::ReadCoils(address, quantity)
            | Self::ReadDiscreteInputs(address, quantity)
            | Self::ReadHoldingRegisters(address, quantity)
            | Self::ReadInputRegisters(address, quantity) => {
                cursor.write_u16(address)?;
                cursor.write_u16(quantity)?;
            }
            Self::WriteSingleCoil(address, state) => {
                cursor.write_u16(address)?;
                cursor.write_u16(encode_coil(state))?;
            }
            Self::WriteSingleRegister(address, value) => {
                cursor.write_u16(address)?;
                cursor.write_u16(value)?;
            }
            Self::WriteMultipleCoils(address, coils) => {
                cursor.write_u16(address)?;
                cursor.write_u16(coils.len() as u16)?;
                write_counted(&mut cursor, coils.payload(), coils.packed_len())?;
            }
            Self::WriteMultipleRegisters(address, values) => {
                cursor.write_u16(address)?;
                cursor.write_u16(values.len() as u16)?;
                write_counted(&mut cursor, values.payload(), values.len() * 2)?;
            }
            Self::ReadWriteMultipleRegisters(read_address, read_quantity, write_address, values) => {
                cursor.write_u16(read_address)?;
                cursor.write_u16(read_quantity)?;
                cursor.write_u16(write_address)?;
                cursor.write_u16(values.len() as u16)?;
                write_counted(&mut cursor, values.payload(), values.len() * 2)?;
            }
        }
        Ok(cursor.position())
    }
}

impl Response<'_> {
    /// Encode the reply PDU into `buf`, returning the number of bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut cursor = WriteCursor::new(sized_buffer(buf, self.pdu_len())?);
        cursor.write_u8(self.function().value())?;
        match *self {
            Self::ReadCoils(coils) | Self::ReadDiscreteInputs(coils) => {
                write_counted(&mut cursor, coils.payload(), coils.packed_len())?;
            }
            Self::ReadHoldingRegisters(values)
            | Self::ReadInputRegisters(values)
            | Self::ReadWriteMultipleRegisters(values) => {
                write_counted(&mut cursor, values.payload(), values.len() * 2)?;
            }
            Self::WriteSingleCoil(address, state) => {
                cursor.write_u16(address)?;
                cursor.write_u16(encode_coil(state))?;
            }
            Self::WriteSingleRegister(address, value)
            | Self::WriteMultipleCoils(address, value)
            | Self::WriteMultipleRegisters(address, value) => {
                cursor.write_u16(address)?;
                cursor.write_u16(value)?;
            }
        }
        Ok(cursor.position())
    }
}

impl ExceptionResponse {
    /// Encode the exception PDU into `buf`, returning the number of bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut cursor = WriteCursor::new(sized_buffer(buf, 2)?);
        cursor.write_u8(self.function.value() | 0x80)?;
        cursor.write_u8(self.exception.code())?;
        Ok(cursor.position())
    }
}

/// Length of the request PDU starting with `pdu`.
///
/// Returns `Ok(None)` as long as the byte count field has not been received.
pub const fn request_pdu_len(pdu: &[u8]) -> Result<Option<usize>> {
    let &[function, ..] = pdu else {
        return Ok(None);
    };
    // offset of the byte count field, its value follows the header
    let count_at = match function {
        0x01..=0x06 => return Ok(Some(5)),
        0x0F | 0x10 => 5,
        0x17 => 9,
        _ => return Err(Error::FnCode(function)),
    };
    if pdu.len() > count_at {
        Ok(Some(count_at + 1 + pdu[count_at] as usize))
    } else {
        Ok(None)
    }
}

/// Length of the reply PDU starting with `pdu`, exceptions included.
///
/// Returns `Ok(None)` as long as the byte count field has not been received.
pub const fn response_pdu_len(pdu: &[u8]) -> Result<Option<usize>> {
    let &[function, ..] = pdu else {
        return Ok(None);
    };
    match function {
        0x05 | 0x06 | 0x0F | 0x10 => Ok(Some(5)),
        0x01..=0x04 | 0x17 if pdu.len() > 1 => Ok(Some(2 + pdu[1] as usize)),
        0x01..=0x04 | 0x17 => Ok(None),
        0x81..=0xFF => Ok(Some(2)),
        _ => Err(Error::FnCode(function)),
    }
}

/// Check a request quantity against the `1..=max` range of its function.
pub(crate) const fn check_quantity(quantity: Quantity, max: Quantity) -> Result<()> {
    if quantity == 0 || quantity > max {
        return Err(Error::Quantity(quantity));
    }
    Ok(())
}
