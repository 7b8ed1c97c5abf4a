// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Coil helpers

use crate::{
    error::{Error, Result},
    frame::Coil,
};

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

/// Field value of a single coil write.
#[must_use]
pub const fn encode_coil(state: Coil) -> u16 {
    if state { COIL_ON } else { COIL_OFF }
}

/// Coil state of a single coil write. Any other value than `0xFF00` or `0x0000` is invalid.
pub const fn decode_coil(value: u16) -> Result<Coil> {
    match value {
        COIL_ON => Ok(true),
        COIL_OFF => Ok(false),
        _ => Err(Error::CoilValue(value)),
    }
}

/// Bytes needed for `count` packed coils.
#[must_use]
pub const fn packed_coils_len(count: usize) -> usize {
    count.div_ceil(8)
}

/// Pack coil states into `bytes`, bit 0 of the first byte first.
///
/// Unused bits of the last byte are cleared. Returns the number of bytes
/// written.
pub fn pack_coils<I>(coils: I, bytes: &mut [u8]) -> Result<usize>
where
    I: IntoIterator<Item = Coil>,
    I::IntoIter: ExactSizeIterator,
{
    let coils = coils.into_iter();
    let len = packed_coils_len(coils.len());
    let packed = bytes.get_mut(..len).ok_or(Error::BufferSize)?;
    packed.fill(0);
    for (idx, _) in coils.enumerate().filter(|(_, on)| *on) {
        packed[idx / 8] |= 1 << (idx % 8);
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_coil_values() {
        assert_eq!(encode_coil(true), 0xFF00);
        assert_eq!(encode_coil(false), 0x0000);
        assert_eq!(decode_coil(0xFF00), Ok(true));
        assert_eq!(decode_coil(0x0000), Ok(false));
        for value in [0x0001, 0x00FF, 0xFFFF, 0x1200] {
            assert_eq!(decode_coil(value), Err(Error::CoilValue(value)));
        }
    }

    #[test]
    fn packed_length() {
        assert_eq!(packed_coils_len(0), 0);
        assert_eq!(packed_coils_len(1), 1);
        assert_eq!(packed_coils_len(8), 1);
        assert_eq!(packed_coils_len(9), 2);
        assert_eq!(packed_coils_len(2000), 250);
    }

    #[test]
    fn pack_write_multiple_coils_example() {
        // 10 coils starting at 0x13: CD 01
        let states = [true, false, true, true, false, false, true, true, true, false];
        let buf = &mut [0xAA; 3];
        assert_eq!(pack_coils(states, buf), Ok(2));
        assert_eq!(buf, &[0xCD, 0x01, 0xAA]);
    }

    #[test]
    fn pack_clears_stale_bits() {
        let buf = &mut [0xFF];
        assert_eq!(pack_coils([false, true], buf), Ok(1));
        assert_eq!(buf, &[0b10]);
        assert_eq!(pack_coils([false; 0], buf), Ok(0));
        assert_eq!(buf, &[0b10]);
    }

    #[test]
    fn pack_needs_space() {
        assert_eq!(pack_coils([true; 9], &mut [0]), Err(Error::BufferSize));
        assert_eq!(pack_coils([true], &mut []), Err(Error::BufferSize));
    }
}
