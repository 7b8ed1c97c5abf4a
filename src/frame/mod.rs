// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Protocol data units of the serial line function subset

use core::fmt;

mod coils;
mod data;

pub use self::{coils::*, data::*};

/// Function code of a PDU.
///
/// Only the functions exchanged by [`Master`](crate::Master) and
/// [`Slave`](crate::Slave) have a name. Every other code is kept verbatim.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCode {
    /// `0x01`
    ReadCoils,
    /// `0x02`
    ReadDiscreteInputs,
    /// `0x03`
    ReadHoldingRegisters,
    /// `0x04`
    ReadInputRegisters,
    /// `0x05`
    WriteSingleCoil,
    /// `0x06`
    WriteSingleRegister,
    /// `0x0F`
    WriteMultipleCoils,
    /// `0x10`
    WriteMultipleRegisters,
    /// `0x17`
    ReadWriteMultipleRegisters,
    /// Any code without a dedicated variant.
    Custom(u8),
}

/// Named function codes and their wire values.
const FUNCTION_CODES: [(FunctionCode, u8); 9] = [
    (FunctionCode::ReadCoils, 0x01),
    (FunctionCode::ReadDiscreteInputs, 0x02),
    (FunctionCode::ReadHoldingRegisters, 0x03),
    (FunctionCode::ReadInputRegisters, 0x04),
    (FunctionCode::WriteSingleCoil, 0x05),
    (FunctionCode::WriteSingleRegister, 0x06),
    (FunctionCode::WriteMultipleCoils, 0x0F),
    (FunctionCode::WriteMultipleRegisters, 0x10),
    (FunctionCode::ReadWriteMultipleRegisters, 0x17),
];

impl FunctionCode {
    #[must_use]
    pub fn new(value: u8) -> Self {
        FUNCTION_CODES
            .iter()
            .find(|(_, code)| *code == value)
            .map_or(Self::Custom(value), |(function, _)| *function)
    }

    #[must_use]
    pub fn value(self) -> u8 {
        if let Self::Custom(code) = self {
            return code;
        }
        FUNCTION_CODES
            .iter()
            .find(|(function, _)| *function == self)
            .map_or(0, |(_, code)| *code)
    }
}

impl From<u8> for FunctionCode {
    fn from(value: u8) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:0>2X}", self.value())
    }
}

/// Station (slave) address. `0` is the broadcast address.
pub type SlaveId = u8;

/// The broadcast station address.
pub const BROADCAST_ADDRESS: SlaveId = 0;

pub(crate) type Address = u16;

/// `true` is sent as `0xFF00`, `false` as `0x0000`.
pub(crate) type Coil = bool;

pub(crate) type Word = u16;

pub(crate) type Quantity = u16;

/// Maximum number of coils or discrete inputs per read request.
pub const MAX_READ_COILS: Quantity = 2000;
/// Maximum number of registers per read request.
pub const MAX_READ_REGISTERS: Quantity = 125;
/// Maximum number of coils per write request.
pub const MAX_WRITE_COILS: Quantity = 1968;
/// Maximum number of registers per write request.
pub const MAX_WRITE_REGISTERS: Quantity = 123;
/// Maximum number of registers written by a read/write multiple request.
pub const MAX_READ_WRITE_REGISTERS: Quantity = 121;

/// A decoded master request.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'r> {
    ReadCoils(Address, Quantity),
    ReadDiscreteInputs(Address, Quantity),
    ReadHoldingRegisters(Address, Quantity),
    ReadInputRegisters(Address, Quantity),
    WriteSingleCoil(Address, Coil),
    WriteSingleRegister(Address, Word),
    WriteMultipleCoils(Address, Coils<'r>),
    WriteMultipleRegisters(Address, Data<'r>),
    /// Read address and quantity, then write address and values.
    ReadWriteMultipleRegisters(Address, Quantity, Address, Data<'r>),
}

impl Request<'_> {
    #[must_use]
    pub const fn function(&self) -> FunctionCode {
        match self {
            Self::ReadCoils(..) => FunctionCode::ReadCoils,
            Self::ReadDiscreteInputs(..) => FunctionCode::ReadDiscreteInputs,
            Self::ReadHoldingRegisters(..) => FunctionCode::ReadHoldingRegisters,
            Self::ReadInputRegisters(..) => FunctionCode::ReadInputRegisters,
            Self::WriteSingleCoil(..) => FunctionCode::WriteSingleCoil,
            Self::WriteSingleRegister(..) => FunctionCode::WriteSingleRegister,
            Self::WriteMultipleCoils(..) => FunctionCode::WriteMultipleCoils,
            Self::WriteMultipleRegisters(..) => FunctionCode::WriteMultipleRegisters,
            Self::ReadWriteMultipleRegisters(..) => FunctionCode::ReadWriteMultipleRegisters,
        }
    }

    /// Encoded size including the function code.
    #[must_use]
    pub const fn pdu_len(&self) -> usize {
        match self {
            Self::WriteMultipleCoils(_, coils) => 6 + coils.packed_len(),
            Self::WriteMultipleRegisters(_, values) => 6 + 2 * values.len(),
            Self::ReadWriteMultipleRegisters(.., values) => 10 + 2 * values.len(),
            _ => 5,
        }
    }
}

/// A decoded slave reply other than an exception.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response<'r> {
    ReadCoils(Coils<'r>),
    ReadDiscreteInputs(Coils<'r>),
    ReadHoldingRegisters(Data<'r>),
    ReadInputRegisters(Data<'r>),
    WriteSingleCoil(Address, Coil),
    WriteSingleRegister(Address, Word),
    /// Echoed start address and quantity.
    WriteMultipleCoils(Address, Quantity),
    /// Echoed start address and quantity.
    WriteMultipleRegisters(Address, Quantity),
    ReadWriteMultipleRegisters(Data<'r>),
}

impl Response<'_> {
    #[must_use]
    pub const fn function(&self) -> FunctionCode {
        match self {
            Self::ReadCoils(_) => FunctionCode::ReadCoils,
            Self::ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,
            Self::ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            Self::ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            Self::WriteSingleCoil(..) => FunctionCode::WriteSingleCoil,
            Self::WriteSingleRegister(..) => FunctionCode::WriteSingleRegister,
            Self::WriteMultipleCoils(..) => FunctionCode::WriteMultipleCoils,
            Self::WriteMultipleRegisters(..) => FunctionCode::WriteMultipleRegisters,
            Self::ReadWriteMultipleRegisters(_) => FunctionCode::ReadWriteMultipleRegisters,
        }
    }

    /// Encoded size including the function code.
    #[must_use]
    pub const fn pdu_len(&self) -> usize {
        match self {
            Self::ReadCoils(coils) | Self::ReadDiscreteInputs(coils) => 2 + coils.packed_len(),
            Self::ReadHoldingRegisters(values)
            | Self::ReadInputRegisters(values)
            | Self::ReadWriteMultipleRegisters(values) => 2 + 2 * values.len(),
            _ => 5,
        }
    }
}

/// Exception code of a slave reply.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetDevice,
    /// A code the Modbus application protocol does not define.
    Unknown(u8),
}

impl Exception {
    #[must_use]
    pub const fn new(code: u8) -> Self {
        match code {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x04 => Self::ServerDeviceFailure,
            0x05 => Self::Acknowledge,
            0x06 => Self::ServerDeviceBusy,
            0x08 => Self::MemoryParityError,
            0x0A => Self::GatewayPathUnavailable,
            0x0B => Self::GatewayTargetDevice,
            other => Self::Unknown(other),
        }
    }

    /// The code sent on the wire.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::IllegalFunction => 0x01,
            Self::IllegalDataAddress => 0x02,
            Self::IllegalDataValue => 0x03,
            Self::ServerDeviceFailure => 0x04,
            Self::Acknowledge => 0x05,
            Self::ServerDeviceBusy => 0x06,
            Self::MemoryParityError => 0x08,
            Self::GatewayPathUnavailable => 0x0A,
            Self::GatewayTargetDevice => 0x0B,
            Self::Unknown(code) => code,
        }
    }
}

impl From<u8> for Exception {
    fn from(code: u8) -> Self {
        Self::new(code)
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::IllegalFunction => "Illegal function",
            Self::IllegalDataAddress => "Illegal data address",
            Self::IllegalDataValue => "Illegal data value",
            Self::ServerDeviceFailure => "Server device failure",
            Self::Acknowledge => "Acknowledge",
            Self::ServerDeviceBusy => "Server device busy",
            Self::MemoryParityError => "Memory parity error",
            Self::GatewayPathUnavailable => "Gateway path unavailable",
            Self::GatewayTargetDevice => "Gateway target device failed to respond",
            Self::Unknown(code) => return write!(f, "Unknown exception 0x{code:0>2X}"),
        };
        f.write_str(text)
    }
}

/// A slave reply carrying an [`Exception`].
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub function: FunctionCode,
    pub exception: Exception,
}
