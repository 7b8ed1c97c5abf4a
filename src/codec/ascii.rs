// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus ASCII checksum, hex and ADU helpers

use super::{DecodedFrame, MAX_PDU_LEN};
use crate::{SlaveId, error::*};

/// Start of frame marker.
pub const FRAME_START: u8 = b':';
/// First end of frame character.
pub const CR: u8 = b'\r';
/// Second end of frame character.
pub const LF: u8 = b'\n';

/// The maximum size of a MODBUS ASCII frame: `:`, address, PDU, LRC, CR LF.
pub const MAX_FRAME_LEN: usize = 1 + 2 * (1 + MAX_PDU_LEN + 1) + 2;

/// Calculate the LRC (Longitudinal Redundancy Check) of `data`.
///
/// This is the two's complement of the 8 bit sum of all bytes.
#[must_use]
pub fn lrc(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |sum, x| sum.wrapping_add(*x))
        .wrapping_neg()
}

/// Upper case hex character of the lower nibble of `nibble`.
#[must_use]
pub const fn hex_digit(nibble: u8) -> u8 {
    match nibble & 0x0F {
        n @ 0..=9 => b'0' + n,
        n => b'A' + n - 10,
    }
}

/// Value of a single hex character.
pub const fn hex_value(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => Err(Error::HexDigit(c)),
    }
}

fn write_hex(byte: u8, buf: &mut [u8]) {
    buf[0] = hex_digit(byte >> 4);
    buf[1] = hex_digit(byte);
}

fn read_hex(chars: &[u8]) -> Result<u8> {
    Ok((hex_value(chars[0])? << 4) | hex_value(chars[1])?)
}

/// Encode an ASCII ADU into `buf` and return the number of characters.
pub fn encode_adu(slave: SlaveId, pdu: &[u8], buf: &mut [u8]) -> Result<usize> {
    if pdu.is_empty() || pdu.len() > MAX_PDU_LEN {
        return Err(Error::BufferSize);
    }
    let len = 1 + 2 * (pdu.len() + 2) + 2;
    if buf.len() < len {
        return Err(Error::BufferSize);
    }
    buf[0] = FRAME_START;
    write_hex(slave, &mut buf[1..3]);
    for (i, byte) in pdu.iter().enumerate() {
        write_hex(*byte, &mut buf[3 + i * 2..5 + i * 2]);
    }
    let sum = pdu.iter().fold(slave, |sum, x| sum.wrapping_add(*x));
    write_hex(sum.wrapping_neg(), &mut buf[len - 4..len - 2]);
    buf[len - 2] = CR;
    buf[len - 1] = LF;
    Ok(len)
}

/// Decode a complete ASCII ADU into `pdu_buf` and verify its LRC.
pub fn decode_adu<'b>(adu: &[u8], pdu_buf: &'b mut [u8]) -> Result<DecodedFrame<'b>> {
    // `:`, address, function code, LRC, CR LF
    if adu.len() < 9 || adu.len() > MAX_FRAME_LEN || adu.len() % 2 == 0 {
        return Err(Error::BufferSize);
    }
    if adu[0] != FRAME_START {
        return Err(Error::HexDigit(adu[0]));
    }
    if adu[adu.len() - 2] != CR || adu[adu.len() - 1] != LF {
        return Err(Error::BufferSize);
    }
    let hex = &adu[1..adu.len() - 2];
    let pdu_len = hex.len() / 2 - 2;
    if pdu_buf.len() < pdu_len {
        return Err(Error::BufferSize);
    }
    let slave = read_hex(&hex[..2])?;
    let mut sum = slave;
    for (i, chars) in hex[2..hex.len() - 2].chunks_exact(2).enumerate() {
        let byte = read_hex(chars)?;
        sum = sum.wrapping_add(byte);
        pdu_buf[i] = byte;
    }
    let actual = read_hex(&hex[hex.len() - 2..])?;
    let expected = sum.wrapping_neg();
    if actual != expected {
        return Err(Error::Lrc(expected, actual));
    }
    Ok(DecodedFrame {
        slave,
        pdu: &pdu_buf[..pdu_len],
    })
}
