use crate::{PatcherError, Result};

/// complement-lo, complement-hi, checksum-lo, checksum-hi
pub const CHECKSUM_FIELD_LEN: usize = 4;

fn largest_power_of_two(n: usize) -> usize {
    1usize << (usize::BITS - 1 - n.leading_zeros())
}

/// Mirror-sum over the image. A tail shorter than the leading power-of-two
/// block is counted as many times as the hardware would mirror it to fill
/// that block.
pub fn mirror_sum(buf: &[u8]) -> u16 {
    if buf.is_empty() {
        return 0;
    }

    let mask = largest_power_of_two(buf.len());
    let part1 = buf[..mask]
        .iter()
        .fold(0u32, |acc, &b| (acc + b as u32) & 0xFFFF);

    let mut part2 = 0u32;
    let mut remaining = buf.len() - mask;
    if remaining > 0 {
        part2 = mirror_sum(&buf[mask..]) as u32;
        while remaining < mask {
            remaining += remaining;
            part2 = (part2 + part2) & 0xFFFF;
        }
    }

    ((part1 + part2) & 0xFFFF) as u16
}

/// Computes the checksum over `buf` as it stands and stores it, with its
/// complement, at `offset`.
pub fn write_checksum(buf: &mut [u8], offset: usize) -> Result<u16> {
    let end = offset + CHECKSUM_FIELD_LEN;
    if end > buf.len() {
        return Err(PatcherError::EditOutOfBounds {
            offset,
            len: CHECKSUM_FIELD_LEN,
            image_len: buf.len(),
        });
    }

    let sum = mirror_sum(buf);
    let complement = sum ^ 0xFFFF;
    let [c_lo, c_hi] = complement.to_le_bytes();
    let [s_lo, s_hi] = sum.to_le_bytes();
    buf[offset..end].copy_from_slice(&[c_lo, c_hi, s_lo, s_hi]);

    Ok(sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_image_sums_to_zero() {
        let mut buf = vec![0u8; 0x8000];
        assert_eq!(mirror_sum(&buf), 0);

        let sum = write_checksum(&mut buf, 0x7FDC).unwrap();
        assert_eq!(sum, 0);
        assert_eq!(&buf[0x7FDC..0x7FE0], &[0xFF, 0xFF, 0x00, 0x00]);
    }

    #[test]
    fn short_tail_is_mirrored() {
        assert_eq!(mirror_sum(&[1, 2, 3]), 9);
        assert_eq!(mirror_sum(&[1; 7]), 12);

        let mut buf = vec![1u8; 8];
        buf.extend_from_slice(&[2, 2, 2, 2]);
        assert_eq!(mirror_sum(&buf), 8 + 16);
    }

    #[test]
    fn power_of_two_is_plain_sum() {
        let buf: Vec<u8> = (0..=255u8).collect();
        assert_eq!(mirror_sum(&buf), (0..=255u32).sum::<u32>() as u16);
    }

    #[test]
    fn sum_wraps_at_sixteen_bits() {
        let buf = vec![0xFFu8; 0x400];
        assert_eq!(mirror_sum(&buf), ((0xFFu32 * 0x400) & 0xFFFF) as u16);
    }

    #[test]
    fn field_must_fit() {
        let mut buf = vec![0u8; 8];
        assert!(write_checksum(&mut buf, 5).is_err());
        assert!(write_checksum(&mut buf, 4).is_ok());
    }
}
