//! Inverse discrete wavelet transforms (ISO/IEC 15444-1 Annex F).
//!
//! Each resolution arrives as one buffer of its full size with the HL, LH
//! and HH coefficients already interleaved (F.3.3); the lower resolution is
//! slotted into the even positions before filtering rows, then columns.

/// Samples of padding on each side of a line: the 9-7 filter reaches four
/// samples past the edge.
const BUFFER_PADDING: usize = 4;

/// Coefficients of one resolution, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Level<T> {
    pub width: usize,
    pub height: usize,
    pub items: Vec<T>,
}

/// A one-dimensional synthesis filter.
pub trait Wavelet {
    type Sample: Copy + Default;

    /// Runs the lifting steps over `x[offset..offset + length]`, which must be
    /// symmetrically extended by [`extend`] beforehand.
    fn filter(x: &mut [Self::Sample], offset: usize, length: usize);

    /// Single-sample line starting at an odd coordinate (F.3.4, F.3.5).
    fn halve(value: Self::Sample) -> Self::Sample;

    /// Sample for a dequantized coefficient.
    fn from_coefficient(value: f64) -> Self::Sample;
}

/// Reversible 5-3 integer filter (F.3.8.1).
pub struct Reversible53;

impl Wavelet for Reversible53 {
    type Sample = i32;

    fn filter(x: &mut [i32], offset: usize, length: usize) {
        let len = length >> 1;
        let mut j = offset;
        // Sums are taken in i64; out-of-range results wrap.
        for _ in 0..=len {
            let update = (x[j - 1] as i64 + x[j + 1] as i64 + 2) >> 2;
            x[j] = (x[j] as i64 - update) as i32;
            j += 2;
        }
        let mut j = offset + 1;
        for _ in 0..len {
            let predict = (x[j - 1] as i64 + x[j + 1] as i64) >> 1;
            x[j] = (x[j] as i64 + predict) as i32;
            j += 2;
        }
    }

    fn halve(value: i32) -> i32 {
        value / 2
    }

    fn from_coefficient(value: f64) -> i32 {
        value as i32
    }
}

/// Irreversible 9-7 filter (F.3.8.2), with the K scaling folded into the
/// first lifting step.
pub struct Irreversible97;

const ALPHA: f32 = -1.586_134_3;
const BETA: f32 = -0.052_980_117;
const GAMMA: f32 = 0.882_911_1;
const DELTA: f32 = 0.443_506_87;
const K: f32 = 1.230_174_1;

/// `x[j] = scale * x[j] - weight * (x[j - 1] + x[j + 1])` on `count`
/// positions two apart, starting at `start`.
fn lift(x: &mut [f32], start: usize, count: usize, scale: f32, weight: f32) {
    let mut j = start;
    for _ in 0..count {
        x[j] = scale * x[j] - weight * (x[j - 1] + x[j + 1]);
        j += 2;
    }
}

impl Wavelet for Irreversible97 {
    type Sample = f32;

    fn filter(x: &mut [f32], offset: usize, length: usize) {
        let len = length >> 1;

        let mut j = offset - 3;
        for _ in 0..len + 4 {
            x[j] *= 1.0 / K;
            j += 2;
        }
        lift(x, offset - 2, len + 3, K, DELTA);
        lift(x, offset - 1, len + 2, 1.0, GAMMA);
        lift(x, offset, len + 1, 1.0, BETA);
        if len != 0 {
            lift(x, offset + 1, len, 1.0, ALPHA);
        }
    }

    fn halve(value: f32) -> f32 {
        value * 0.5
    }

    fn from_coefficient(value: f64) -> f32 {
        value as f32
    }
}

/// Whole-sample symmetric extension by four samples on each side (F.3.7).
/// Both sides are written in step so that lines shorter than the extension
/// keep mirroring already extended samples.
pub fn extend<T: Copy>(buffer: &mut [T], offset: usize, size: usize) {
    let mut i1 = offset - 1;
    let mut j1 = offset + 1;
    let mut i2 = offset + size - 2;
    let mut j2 = offset + size;
    for _ in 0..3 {
        buffer[i1] = buffer[j1];
        i1 -= 1;
        j1 += 1;
        buffer[j2] = buffer[i2];
        j2 += 1;
        i2 -= 1;
    }
    buffer[i1] = buffer[j1];
    buffer[j2] = buffer[i2];
}

/// One synthesis step: `ll` into the even samples of `level`, then HOR_SR and
/// VER_SR. `u0`/`v0` are the tile-component origin.
pub fn iterate<W: Wavelet>(
    ll: &Level<W::Sample>,
    mut level: Level<W::Sample>,
    u0: u32,
    v0: u32,
) -> Level<W::Sample> {
    let (width, height) = (level.width, level.height);
    let items = &mut level.items;

    let mut k = 0;
    for i in 0..ll.height {
        let mut l = i * 2 * width;
        for _ in 0..ll.width {
            items[l] = ll.items[k];
            k += 1;
            l += 2;
        }
    }

    if width == 1 {
        if u0 & 1 != 0 {
            for value in items.iter_mut().take(height) {
                *value = W::halve(*value);
            }
        }
    } else if width > 1 {
        let mut row = vec![W::Sample::default(); width + 2 * BUFFER_PADDING];
        for line in items.chunks_exact_mut(width) {
            row[BUFFER_PADDING..BUFFER_PADDING + width].copy_from_slice(line);
            extend(&mut row, BUFFER_PADDING, width);
            W::filter(&mut row, BUFFER_PADDING, width);
            line.copy_from_slice(&row[BUFFER_PADDING..BUFFER_PADDING + width]);
        }
    }

    if height == 1 {
        if v0 & 1 != 0 {
            for value in items.iter_mut().take(width) {
                *value = W::halve(*value);
            }
        }
    } else if height > 1 {
        let mut column = vec![W::Sample::default(); height + 2 * BUFFER_PADDING];
        for u in 0..width {
            for v in 0..height {
                column[BUFFER_PADDING + v] = items[v * width + u];
            }
            extend(&mut column, BUFFER_PADDING, height);
            W::filter(&mut column, BUFFER_PADDING, height);
            for v in 0..height {
                items[v * width + u] = column[BUFFER_PADDING + v];
            }
        }
    }

    level
}

/// Reconstructs the full-resolution plane from the LL band (`levels[0]`)
/// and one interleaved buffer per higher resolution.
pub fn synthesize<W: Wavelet>(
    levels: Vec<Level<W::Sample>>,
    u0: u32,
    v0: u32,
) -> Option<Level<W::Sample>> {
    let mut levels = levels.into_iter();
    let mut ll = levels.next()?;
    for level in levels {
        ll = iterate::<W>(&ll, level, u0, v0);
    }
    Some(ll)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Forward 5-3 lifting with the same symmetric extension, interleaved
    /// output (low at even, high at odd positions).
    fn forward53(x: &[i32]) -> Vec<i32> {
        let n = x.len() as isize;
        let mirror = |i: isize| -> usize {
            let i = if i < 0 { -i } else { i };
            (if i >= n { 2 * (n - 1) - i } else { i }) as usize
        };
        let mut y = x.to_vec();
        for i in (1..n).step_by(2) {
            y[i as usize] = x[i as usize] - ((x[mirror(i - 1)] + x[mirror(i + 1)]) >> 1);
        }
        let d = y.clone();
        for i in (0..n).step_by(2) {
            y[i as usize] = x[i as usize] + ((d[mirror(i - 1)] + d[mirror(i + 1)] + 2) >> 2);
        }
        y
    }

    fn inverse53(y: &[i32]) -> Vec<i32> {
        let mut buffer = vec![0; y.len() + 2 * BUFFER_PADDING];
        buffer[BUFFER_PADDING..BUFFER_PADDING + y.len()].copy_from_slice(y);
        extend(&mut buffer, BUFFER_PADDING, y.len());
        Reversible53::filter(&mut buffer, BUFFER_PADDING, y.len());
        buffer[BUFFER_PADDING..BUFFER_PADDING + y.len()].to_vec()
    }

    #[test]
    fn test_extend_mirrors_without_repeating_the_edge() {
        let mut buffer = vec![0; 13];
        buffer[4..9].copy_from_slice(&[1, 2, 3, 4, 5]);
        extend(&mut buffer, 4, 5);
        assert_eq!(buffer, vec![5, 4, 3, 2, 1, 2, 3, 4, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_extend_short_line() {
        let mut buffer = vec![0; 10];
        buffer[4..6].copy_from_slice(&[7, 9]);
        extend(&mut buffer, 4, 2);
        assert_eq!(buffer, vec![7, 9, 7, 9, 7, 9, 7, 9, 7, 9]);
    }

    #[test]
    fn test_reversible_filter_is_lossless() {
        let signals: [&[i32]; 4] = [
            &[10, -3, 255, 0, 17, 42, -128, 99],
            &[1, 2, 3, 4, 5],
            &[-7, 300],
            &[0, 0, 1, 0, 0, 0, 1, 200, -200],
        ];
        for signal in signals {
            assert_eq!(inverse53(&forward53(signal)), signal.to_vec());
        }
    }

    #[test]
    fn test_reversible_filter_extreme_coefficients() {
        let mut x = vec![i32::MAX; 12];
        Reversible53::filter(&mut x, 4, 4);
        assert_eq!(
            &x[4..8],
            &[1_073_741_823, -1_073_741_826, 1_073_741_823, -1_073_741_826]
        );
    }

    #[test]
    fn test_constant_plane_survives_one_level() {
        let ll = Level {
            width: 2,
            height: 2,
            items: vec![10; 4],
        };
        let level = Level {
            width: 4,
            height: 3,
            items: vec![0; 12],
        };
        let out = iterate::<Reversible53>(&ll, level, 0, 0);
        assert_eq!(out.items, vec![10; 12]);

        let ll = Level {
            width: 2,
            height: 2,
            items: vec![10.0f32; 4],
        };
        let level = Level {
            width: 4,
            height: 3,
            items: vec![0.0; 12],
        };
        let out = iterate::<Irreversible97>(&ll, level, 0, 0);
        assert!(out.items.iter().all(|v| (v - 10.0).abs() < 1e-3));
    }

    #[test]
    fn test_single_column_halves_at_odd_origin() {
        let ll = Level {
            width: 1,
            height: 1,
            items: vec![9],
        };
        let level = Level {
            width: 1,
            height: 1,
            items: vec![0],
        };
        assert_eq!(iterate::<Reversible53>(&ll, level.clone(), 0, 0).items, vec![9]);
        // odd along both axes: halved twice
        assert_eq!(iterate::<Reversible53>(&ll, level, 1, 1).items, vec![2]);
    }

    #[test]
    fn test_synthesize_without_levels_returns_ll() {
        let ll = Level {
            width: 2,
            height: 1,
            items: vec![3, 4],
        };
        let out = synthesize::<Reversible53>(vec![ll.clone()], 0, 0).unwrap();
        assert_eq!(out, ll);
        assert!(synthesize::<Reversible53>(Vec::new(), 0, 0).is_none());
    }
}
