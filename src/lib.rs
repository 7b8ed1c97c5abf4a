// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#![doc = include_str!("../README.md")]
#![no_std]

#[cfg(feature = "std")]
extern crate std;

mod codec;
mod error;
mod frame;
pub mod link;
pub mod master;
pub mod slave;
pub mod util;

#[cfg(test)]
mod testing;

#[cfg(feature = "ascii")]
pub use codec::ascii;
#[cfg(feature = "rtu")]
pub use codec::rtu;
pub use codec::{DecodedFrame, MAX_PDU_LEN, request_pdu_len, response_pdu_len};
pub use error::*;
pub use frame::*;
pub use link::{Clock, FrameBuffer, Framer, Owner, Stream, SystemTick};
pub use master::{HoldingRegisters, Master, MasterConfig, MasterHandler};
pub use slave::{Slave, SlaveHandler};
