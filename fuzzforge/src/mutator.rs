//! Bytewise mutation engine (`spec.md` §4.3).
//!
//! `Mutator::mutate` is the only public entry point. Each call picks one of
//! the eight transformations uniformly at random and applies it; a
//! transformation that is ill-defined on the current input (e.g. deleting a
//! range from an empty string) is silently skipped and another is drawn.
//! Mutations carry no state across calls.

use rand::Rng;

/// Maximum length of a freshly inserted/duplicated byte run.
const MAX_INSERT_LEN: usize = 10;

/// The "interesting" integers table, per width, used by transformation 8.
const INTERESTING_8: [i8; 5] = [0, 1, -1, i8::MIN, i8::MAX];
const INTERESTING_16: [i16; 5] = [0, 1, -1, i16::MIN, i16::MAX];
const INTERESTING_32: [i32; 5] = [0, 1, -1, i32::MIN, i32::MAX];
const INTERESTING_64: [i64; 5] = [0, 1, -1, i64::MIN, i64::MAX];

const NUM_TRANSFORMS: u32 = 8;

pub struct Mutator;

impl Mutator {
    /// Produces a fresh byte string, usually (but not guaranteed to be)
    /// different from `sample`. Callers must tolerate an unchanged result.
    pub fn mutate<R: Rng + ?Sized>(sample: &[u8], rng: &mut R) -> Vec<u8> {
        // Bound the number of skip-and-redraw attempts so that a
        // degenerate RNG (or a future ninth transform with a narrower
        // precondition) can't spin forever; falling through just returns
        // the input unchanged, which callers already tolerate.
        for _ in 0..NUM_TRANSFORMS * 4 {
            if let Some(out) = Self::try_one(sample, rng) {
                return out;
            }
        }
        sample.to_vec()
    }

    fn try_one<R: Rng + ?Sized>(sample: &[u8], rng: &mut R) -> Option<Vec<u8>> {
        match rng.gen_range(0..NUM_TRANSFORMS) {
            0 => remove_range(sample, rng),
            1 => Some(insert_range(sample, rng)),
            2 => duplicate_range(sample, rng),
            3 => copy_range(sample, rng),
            4 => flip_bit(sample, rng),
            5 => set_byte(sample, rng),
            6 => add_delta(sample, rng),
            7 => overwrite_interesting_int(sample, rng),
            _ => unreachable!(),
        }
    }
}

fn random_bytes<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Vec<u8> {
    (0..len).map(|_| rng.gen::<u8>()).collect()
}

/// 1. Remove a contiguous range of bytes: pick a start and a length in
/// `[1, remaining]`, delete.
fn remove_range<R: Rng + ?Sized>(sample: &[u8], rng: &mut R) -> Option<Vec<u8>> {
    if sample.is_empty() {
        return None;
    }
    let start = rng.gen_range(0..sample.len());
    let max_len = sample.len() - start;
    let len = rng.gen_range(1..=max_len);

    let mut out = Vec::with_capacity(sample.len() - len);
    out.extend_from_slice(&sample[..start]);
    out.extend_from_slice(&sample[start + len..]);
    Some(out)
}

/// 2. Insert a contiguous run of `[1, MAX_INSERT_LEN]` random bytes at a
/// random insertion point.
fn insert_range<R: Rng + ?Sized>(sample: &[u8], rng: &mut R) -> Vec<u8> {
    let at = rng.gen_range(0..=sample.len());
    let len = rng.gen_range(1..=MAX_INSERT_LEN);

    let mut out = Vec::with_capacity(sample.len() + len);
    out.extend_from_slice(&sample[..at]);
    out.extend(random_bytes(rng, len));
    out.extend_from_slice(&sample[at..]);
    out
}

/// 3. Duplicate a contiguous byte range at another position.
fn duplicate_range<R: Rng + ?Sized>(sample: &[u8], rng: &mut R) -> Option<Vec<u8>> {
    if sample.is_empty() {
        return None;
    }
    let start = rng.gen_range(0..sample.len());
    let len = rng.gen_range(1..=sample.len() - start);
    let chunk = sample[start..start + len].to_vec();

    let at = rng.gen_range(0..=sample.len());
    let mut out = Vec::with_capacity(sample.len() + len);
    out.extend_from_slice(&sample[..at]);
    out.extend_from_slice(&chunk);
    out.extend_from_slice(&sample[at..]);
    Some(out)
}

/// 4. Copy a contiguous byte range over another position (overwrite, length
/// preserved).
fn copy_range<R: Rng + ?Sized>(sample: &[u8], rng: &mut R) -> Option<Vec<u8>> {
    if sample.len() < 2 {
        return None;
    }
    let src_start = rng.gen_range(0..sample.len());
    let max_len = sample.len() - src_start;
    let len = rng.gen_range(1..=max_len);
    let chunk = sample[src_start..src_start + len].to_vec();

    let dst_start = rng.gen_range(0..=sample.len() - len);
    let mut out = sample.to_vec();
    out[dst_start..dst_start + len].copy_from_slice(&chunk);
    Some(out)
}

/// 5. Flip exactly one bit at a uniformly random bit index.
fn flip_bit<R: Rng + ?Sized>(sample: &[u8], rng: &mut R) -> Option<Vec<u8>> {
    if sample.is_empty() {
        return None;
    }
    let bit = rng.gen_range(0..sample.len() * 8);
    let mut out = sample.to_vec();
    out[bit / 8] ^= 1 << (bit % 8);
    Some(out)
}

/// 6. Set a single byte to a uniformly random value (may, with probability
/// 1/256, leave it unchanged).
fn set_byte<R: Rng + ?Sized>(sample: &[u8], rng: &mut R) -> Option<Vec<u8>> {
    if sample.is_empty() {
        return None;
    }
    let idx = rng.gen_range(0..sample.len());
    let mut out = sample.to_vec();
    out[idx] = rng.gen::<u8>();
    Some(out)
}

/// 7. Add a signed delta in `[-35, 35] \ {0}` to a single byte, modulo 256.
fn add_delta<R: Rng + ?Sized>(sample: &[u8], rng: &mut R) -> Option<Vec<u8>> {
    if sample.is_empty() {
        return None;
    }
    let idx = rng.gen_range(0..sample.len());
    let delta = loop {
        let d = rng.gen_range(-35i16..=35i16);
        if d != 0 {
            break d;
        }
    };
    let mut out = sample.to_vec();
    out[idx] = (out[idx] as i16 + delta).rem_euclid(256) as u8;
    Some(out)
}

/// 8. Overwrite with a known "interesting" 8/16/32/64-bit integer, encoded
/// little- or big-endian, at a random aligned offset.
fn overwrite_interesting_int<R: Rng + ?Sized>(sample: &[u8], rng: &mut R) -> Option<Vec<u8>> {
    let widths: [usize; 4] = [1, 2, 4, 8];
    let available: Vec<usize> = widths.into_iter().filter(|&w| w <= sample.len()).collect();
    if available.is_empty() {
        return None;
    }
    let width = available[rng.gen_range(0..available.len())];
    let aligned_offsets = sample.len() - width + 1;
    let offset = (rng.gen_range(0..aligned_offsets) / width) * width;
    let big_endian = rng.gen_bool(0.5);

    let bytes: Vec<u8> = match width {
        1 => {
            let v = INTERESTING_8[rng.gen_range(0..INTERESTING_8.len())];
            vec![v as u8]
        }
        2 => {
            let v = INTERESTING_16[rng.gen_range(0..INTERESTING_16.len())];
            if big_endian {
                v.to_be_bytes().to_vec()
            } else {
                v.to_le_bytes().to_vec()
            }
        }
        4 => {
            let v = INTERESTING_32[rng.gen_range(0..INTERESTING_32.len())];
            if big_endian {
                v.to_be_bytes().to_vec()
            } else {
                v.to_le_bytes().to_vec()
            }
        }
        8 => {
            let v = INTERESTING_64[rng.gen_range(0..INTERESTING_64.len())];
            if big_endian {
                v.to_be_bytes().to_vec()
            } else {
                v.to_le_bytes().to_vec()
            }
        }
        _ => unreachable!(),
    };

    let mut out = sample.to_vec();
    out[offset..offset + width].copy_from_slice(&bytes);
    Some(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(1234)
    }

    #[test]
    fn mutate_never_panics_on_empty_input() {
        let mut rng = rng();
        for _ in 0..200 {
            let _ = Mutator::mutate(&[], &mut rng);
        }
    }

    #[test]
    fn mutate_produces_valid_byte_strings() {
        let mut rng = rng();
        let sample = b"hello world, this is a sample input".to_vec();
        for _ in 0..500 {
            let out = Mutator::mutate(&sample, &mut rng);
            assert!(out.len() < sample.len() + MAX_INSERT_LEN + 1);
        }
    }

    #[test]
    fn remove_range_shortens_by_exactly_the_chosen_length() {
        let mut rng = rng();
        let sample = b"0123456789".to_vec();
        for _ in 0..100 {
            if let Some(out) = remove_range(&sample, &mut rng) {
                assert!(out.len() < sample.len());
            }
        }
    }

    #[test]
    fn insert_range_lengthens_by_one_to_max_insert_len() {
        let mut rng = rng();
        let sample = b"abc".to_vec();
        for _ in 0..100 {
            let out = insert_range(&sample, &mut rng);
            let grew = out.len() - sample.len();
            assert!((1..=MAX_INSERT_LEN).contains(&grew));
        }
    }

    #[test]
    fn flip_bit_changes_exactly_one_bit() {
        let mut rng = rng();
        let sample = vec![0u8; 8];
        for _ in 0..100 {
            let out = flip_bit(&sample, &mut rng).unwrap();
            let diff_bits: u32 = sample
                .iter()
                .zip(out.iter())
                .map(|(a, b)| (a ^ b).count_ones())
                .sum();
            assert_eq!(diff_bits, 1);
        }
    }

    #[test]
    fn interesting_int_overwrite_touches_only_its_window() {
        let mut rng = rng();
        let sample = vec![0xAAu8; 16];
        for _ in 0..200 {
            let out = overwrite_interesting_int(&sample, &mut rng).unwrap();
            let diff_positions: Vec<usize> = (0..sample.len())
                .filter(|&i| sample[i] != out[i])
                .collect();
            if let (Some(&first), Some(&last)) = (diff_positions.first(), diff_positions.last()) {
                assert!(last - first < 8);
            }
        }
    }

    #[test]
    fn add_delta_never_applies_zero() {
        let mut rng = rng();
        let sample = vec![100u8];
        let mut saw_change = false;
        for _ in 0..50 {
            let out = add_delta(&sample, &mut rng).unwrap();
            if out != sample {
                saw_change = true;
            }
        }
        assert!(saw_change);
    }
}
