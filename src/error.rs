// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use core::fmt;

/// modbus-serial Error
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Invalid coil value
    CoilValue(u16),
    /// Invalid buffer size
    BufferSize,
    /// Invalid function code
    FnCode(u8),
    /// Invalid exception function code
    ExceptionFnCode(u8),
    /// Invalid CRC
    Crc(u16, u16),
    /// Invalid LRC
    Lrc(u8, u8),
    /// Invalid byte count
    ByteCount(u8),
    /// Quantity out of the range allowed for the function
    Quantity(u16),
    /// Character is not a hexadecimal digit
    HexDigit(u8),
    /// The master or the framer is not ready to accept a new request
    Busy,
    /// The character stream reported a failure
    Transport,
    /// Character timing cannot be derived from the configuration
    Timing,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Error::*;

        match self {
            CoilValue(v) => write!(f, "Invalid coil value: {v}"),
            BufferSize => write!(f, "Invalid buffer size"),
            FnCode(fn_code) => write!(f, "Invalid function code: 0x{fn_code:0>2X}"),
            ExceptionFnCode(code) => write!(f, "Invalid exception function code: 0x{code:0>2X}"),
            Crc(expected, actual) => write!(
                f,
                "Invalid CRC: expected = 0x{expected:0>4X}, actual = 0x{actual:0>4X}"
            ),
            Lrc(expected, actual) => write!(
                f,
                "Invalid LRC: expected = 0x{expected:0>2X}, actual = 0x{actual:0>2X}"
            ),
            ByteCount(cnt) => write!(f, "Invalid byte count: {cnt}"),
            Quantity(n) => write!(f, "Invalid quantity: {n}"),
            HexDigit(c) => write!(f, "Invalid hex digit: 0x{c:0>2X}"),
            Busy => write!(f, "Busy"),
            Transport => write!(f, "Transport failure"),
            Timing => write!(f, "Invalid timing configuration"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type used throughout this crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;
