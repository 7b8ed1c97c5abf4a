// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus RTU checksum and ADU helpers

use super::DecodedFrame;
use crate::{SlaveId, error::*};
use byteorder::{ByteOrder, LittleEndian};

// [MODBUS over Serial Line Specification and Implementation Guide V1.02](http://modbus.org/docs/Modbus_over_serial_line_V1_02.pdf), page 13
// "The maximum size of a MODBUS RTU frame is 256 bytes."
pub const MAX_FRAME_LEN: usize = 256;

/// Initial value of the CRC register.
pub const CRC_INIT: u16 = 0xFFFF;

/// Feeds one byte into a running CRC register and returns the new value.
pub type CrcFn = fn(u16, u8) -> u16;

/// Update the CRC register with a single byte (Modbus polynomial `0xA001`).
#[must_use]
pub const fn crc16_update(mut crc: u16, byte: u8) -> u16 {
    crc ^= byte as u16;
    let mut i = 0;
    while i < 8 {
        // if we followed clippy's suggestion to move out the crc >>= 1, the condition may not be met any more
        // the recommended action therefore makes no sense and it is better to allow this lint
        #[allow(clippy::branches_sharing_code)]
        if (crc & 0x0001) != 0 {
            crc >>= 1;
            crc ^= 0xA001;
        } else {
            crc >>= 1;
        }
        i += 1;
    }
    crc
}

/// Calculate the CRC (Cyclic Redundancy Check) sum.
///
/// The register value is transmitted low byte first.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(CRC_INIT, |crc, x| crc16_update(crc, *x))
}

/// Encode an RTU ADU (address, PDU and CRC) into `buf`.
pub fn encode_adu(slave: SlaveId, pdu: &[u8], buf: &mut [u8]) -> Result<usize> {
    let len = pdu.len() + 3;
    if pdu.is_empty() || len > MAX_FRAME_LEN || buf.len() < len {
        return Err(Error::BufferSize);
    }
    buf[0] = slave;
    buf[1..=pdu.len()].copy_from_slice(pdu);
    let crc = crc16(&buf[..=pdu.len()]);
    LittleEndian::write_u16(&mut buf[pdu.len() + 1..len], crc);
    Ok(len)
}

/// Decode a complete RTU ADU and verify its trailing CRC.
#[allow(clippy::similar_names)]
pub fn decode_adu(adu: &[u8]) -> Result<DecodedFrame<'_>> {
    if adu.len() < 4 || adu.len() > MAX_FRAME_LEN {
        return Err(Error::BufferSize);
    }
    let (adu_buf, crc_buf) = adu.split_at(adu.len() - 2);
    let expected_crc = LittleEndian::read_u16(crc_buf);
    let actual_crc = crc16(adu_buf);
    if expected_crc != actual_crc {
        return Err(Error::Crc(expected_crc, actual_crc));
    }
    let (slave_id, pdu) = adu_buf.split_at(1);
    Ok(DecodedFrame {
        slave: slave_id[0],
        pdu,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codec::MAX_PDU_LEN, testing::Pattern};

    /// Decode `adu` and encode the result again, expecting the same bytes.
    fn assert_reencodes(adu: &[u8], slave: SlaveId, pdu: &[u8]) {
        let frame = decode_adu(adu).unwrap();
        assert_eq!(frame.slave, slave);
        assert_eq!(frame.pdu, pdu);
        let again = &mut [0; MAX_FRAME_LEN];
        let len = encode_adu(frame.slave, frame.pdu, again).unwrap();
        assert_eq!(&again[..len], adu);
    }

    #[test]
    fn test_calc_crc16() {
        let msg = &[0x01, 0x03, 0x08, 0x2B, 0x00, 0x02];
        assert_eq!(crc16(msg), 0x63B6);

        let msg = &[0x01, 0x03, 0x04, 0x00, 0x20, 0x00, 0x00];
        assert_eq!(crc16(msg), 0xF9FB);
    }

    #[test]
    fn crc_residue_of_a_complete_frame_is_zero() {
        let frame = &[0x01, 0x03, 0x04, 0x89, 0x02, 0x42, 0xC7, 0x00, 0x9D];
        assert_eq!(crc16(frame), 0);
    }

    #[test]
    fn incremental_update_matches_block_crc() {
        let msg = [0x11, 0x06, 0x00, 0x01, 0x00, 0x03];
        let mut crc = CRC_INIT;
        for b in msg {
            crc = crc16_update(crc, b);
        }
        assert_eq!(crc, crc16(&msg));
    }

    #[test]
    fn encode_read_holding_registers_request() {
        let buf = &mut [0; 8];
        let len = encode_adu(0x01, &[0x03, 0x00, 0x00, 0x00, 0x02], buf).unwrap();
        assert_eq!(len, 8);
        assert_eq!(buf, &[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]);
    }

    #[test]
    fn encode_into_too_small_buffer() {
        let buf = &mut [0; 7];
        assert_eq!(
            encode_adu(0x01, &[0x03, 0x00, 0x00, 0x00, 0x02], buf)
                .err()
                .unwrap(),
            Error::BufferSize
        );
        assert!(encode_adu(0x01, &[], &mut [0; 8]).is_err());
    }

    #[test]
    fn decode_usual_rtu_response_frame() {
        let buf = &[
            0x01, // slave address
            0x03, // function code
            0x04, // byte count
            0x89, //
            0x02, //
            0x42, //
            0xC7, //
            0x00, // crc
            0x9D, // crc
        ];
        let DecodedFrame { slave, pdu } = decode_adu(buf).unwrap();
        assert_eq!(slave, 0x01);
        assert_eq!(pdu, &[0x03, 0x04, 0x89, 0x02, 0x42, 0xC7]);
    }

    #[test]
    fn decode_frame_with_invalid_crc() {
        let buf = &[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0C];
        assert_eq!(
            decode_adu(buf).err().unwrap(),
            Error::Crc(0x0CC4, 0x0BC4)
        );
    }

    #[test]
    fn decode_too_short_frame() {
        assert_eq!(
            decode_adu(&[0x01, 0x03, 0x00]).err().unwrap(),
            Error::BufferSize
        );
    }

    #[test]
    fn every_pdu_length_and_pattern_survives_decode_and_encode() {
        let pdu = &mut [0; MAX_PDU_LEN];
        let adu = &mut [0; MAX_FRAME_LEN];
        for len in 1..=MAX_PDU_LEN {
            for pattern in Pattern::all(len as u32) {
                pattern.fill(&mut pdu[..len]);
                let slave = (len % 248) as SlaveId;
                let adu_len = encode_adu(slave, &pdu[..len], adu).unwrap();
                assert_eq!(adu_len, len + 3);
                assert_eq!(crc16(&adu[..adu_len]), 0);
                assert_reencodes(&adu[..adu_len], slave, &pdu[..len]);
            }
        }
        assert!(encode_adu(1, &[0; MAX_PDU_LEN + 1], &mut [0; 512]).is_err());
    }

    #[test]
    fn every_address_and_pdu_length_survives_decode_and_encode() {
        let pdu = &mut [0; MAX_PDU_LEN];
        let adu = &mut [0; MAX_FRAME_LEN];
        for slave in 0..=247 {
            for len in 1..=MAX_PDU_LEN {
                Pattern::Noise((u32::from(slave) << 8) | len as u32).fill(&mut pdu[..len]);
                let adu_len = encode_adu(slave, &pdu[..len], adu).unwrap();
                assert_reencodes(&adu[..adu_len], slave, &pdu[..len]);
            }
        }
    }

    #[test]
    fn single_bit_errors_are_detected() {
        let frame = [0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B];
        for byte in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame;
                corrupted[byte] ^= 1 << bit;
                assert!(decode_adu(&corrupted).is_err());
            }
        }
    }
}
