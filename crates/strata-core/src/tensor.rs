// Tensor — primitive operations on flattened rank-3 maps
//
// Every function here works on plain `f64` slices laid out as
// `[channel][row][col]`, channels outermost (see `MapGeometry`). The caller
// supplies side length and channel count; the functions validate them against
// the slice lengths and return an `Error` instead of indexing out of bounds.
//
// CONVOLUTION (forward):
//
//   out[or][oc] = Σ_ch Σ_fr Σ_fc  in[ch][or*step - pad + fr][oc*step - pad + fc]
//                                * filter[ch][fr][fc]
//
//   Coordinates outside [0, in_side) read as zero (implicit padding). Channels
//   are summed, so one filter always yields a single-channel map of side
//
//     out_side = (in_side + 2*pad - filter_side) / step + 1
//
//   and the difference must be an exact multiple of the step.
//
// BACKWARD AS A CONVOLUTION:
//
//   A strided convolution's gradient is itself a unit-stride convolution once
//   the output gradient is dilated by (step - 1) zeros:
//
//     d_filter = convolve(input, dilate(grad), pad)
//     d_input  = crop(convolve(dilate(grad), rot180(filter), filter_side - 1), pad)
//
//   `back_convolve` computes the same two gradients by direct scattering.

use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{ensure_len, Error, Result};
use crate::geometry::MapGeometry;

// Initialization

/// A tensor of `len` elements, all equal to `value`.
pub fn constant(value: f64, len: usize) -> Vec<f64> {
    vec![value; len]
}

/// A tensor of `len` samples from `N(0, std²)`.
pub fn gaussian<R: Rng + ?Sized>(std: f64, len: usize, rng: &mut R) -> Vec<f64> {
    (0..len)
        .map(|_| rng.sample::<f64, _>(StandardNormal) * std)
        .collect()
}

// Element-wise arithmetic (in place on the first operand)

/// `a += b`
pub fn sum(a: &mut [f64], b: &[f64]) -> Result<()> {
    ensure_len("sum: unequal tensor sizes", a.len(), b.len())?;
    a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
    Ok(())
}

/// `a -= b`
pub fn difference(a: &mut [f64], b: &[f64]) -> Result<()> {
    ensure_len("difference: unequal tensor sizes", a.len(), b.len())?;
    a.iter_mut().zip(b).for_each(|(x, y)| *x -= y);
    Ok(())
}

/// `a *= b` element-wise.
pub fn product(a: &mut [f64], b: &[f64]) -> Result<()> {
    ensure_len("product: unequal tensor sizes", a.len(), b.len())?;
    a.iter_mut().zip(b).for_each(|(x, y)| *x *= y);
    Ok(())
}

/// `a *= s`
pub fn scale(a: &mut [f64], s: f64) {
    a.iter_mut().for_each(|x| *x *= s);
}

/// Sum of all elements.
pub fn total(a: &[f64]) -> f64 {
    a.iter().sum()
}

// Reshaping operations

/// Insert `factor` zero rows and columns between adjacent elements of every
/// channel. A map of side `s` becomes side `s * (factor + 1) - 1`.
pub fn dilate(input: &[f64], in_side: usize, channels: usize, factor: usize) -> Result<Vec<f64>> {
    let src = MapGeometry::new(in_side, channels);
    src.check("dilate: input", input)?;
    if in_side == 0 {
        return Ok(Vec::new());
    }
    let stride = factor + 1;
    let dst = MapGeometry::new(in_side * stride - 1, channels);
    let mut out = vec![0.0; dst.len()];
    for ch in 0..channels {
        for ir in 0..in_side {
            for ic in 0..in_side {
                out[dst.index(ch, ir * stride, ic * stride)] = input[src.index(ch, ir, ic)];
            }
        }
    }
    Ok(out)
}

/// Transpose every channel of a square map in place.
pub fn transpose(data: &mut [f64], side: usize, channels: usize) -> Result<()> {
    let g = MapGeometry::new(side, channels);
    g.check("transpose: input", data)?;
    for ch in 0..channels {
        for r in 0..side {
            for c in (r + 1)..side {
                data.swap(g.index(ch, r, c), g.index(ch, c, r));
            }
        }
    }
    Ok(())
}

/// Reverse the column order of every row of every channel in place.
pub fn reverse_columns(data: &mut [f64], side: usize, channels: usize) -> Result<()> {
    let g = MapGeometry::new(side, channels);
    g.check("reverse_columns: input", data)?;
    for row in data.chunks_exact_mut(side.max(1)) {
        row.reverse();
    }
    Ok(())
}

/// Rotate every channel by 180°, returning a new tensor.
///
/// Built as reverse-columns ∘ transpose ∘ reverse-columns ∘ transpose, each
/// pair being a 90° rotation.
pub fn rot180(input: &[f64], side: usize, channels: usize) -> Result<Vec<f64>> {
    let mut out = input.to_vec();
    transpose(&mut out, side, channels)?;
    reverse_columns(&mut out, side, channels)?;
    transpose(&mut out, side, channels)?;
    reverse_columns(&mut out, side, channels)?;
    Ok(out)
}

/// Remove `margin` rows and columns from every border of every channel.
pub fn crop(input: &[f64], side: usize, channels: usize, margin: usize) -> Result<Vec<f64>> {
    let src = MapGeometry::new(side, channels);
    src.check("crop: input", input)?;
    if 2 * margin > side {
        crate::bail!("crop: margin {margin} too large for side {side}");
    }
    let dst = MapGeometry::new(side - 2 * margin, channels);
    let mut out = Vec::with_capacity(dst.len());
    for ch in 0..channels {
        for r in 0..dst.side {
            let start = src.index(ch, r + margin, margin);
            out.extend_from_slice(&input[start..start + dst.side]);
        }
    }
    Ok(out)
}

// Convolution

/// Side length of `convolve`'s output, or the geometry error it would raise.
pub fn conv_output_side(in_side: usize, filter_side: usize, step: usize, pad: usize) -> Result<usize> {
    if step == 0 {
        return Err(Error::msg("convolution step must be at least 1"));
    }
    let padded_side = in_side + 2 * pad;
    if filter_side == 0 || filter_side > padded_side {
        return Err(Error::FilterTooLarge {
            filter_side,
            padded_side,
        });
    }
    let span = padded_side - filter_side;
    if span % step != 0 {
        return Err(Error::StepMismatch {
            in_side,
            pad,
            filter_side,
            step,
        });
    }
    Ok(span / step + 1)
}

/// Convolve a `channels`-deep input with a filter of the same depth.
///
/// Returns a single-channel map of side `conv_output_side(..)`.
pub fn convolve(
    input: &[f64],
    in_side: usize,
    filter: &[f64],
    filter_side: usize,
    channels: usize,
    step: usize,
    pad: usize,
) -> Result<Vec<f64>> {
    let ig = MapGeometry::new(in_side, channels);
    let fg = MapGeometry::new(filter_side, channels);
    ig.check("convolve: input", input)?;
    fg.check("convolve: filter", filter)?;
    let out_side = conv_output_side(in_side, filter_side, step, pad)?;

    let mut out = vec![0.0; out_side * out_side];
    for or in 0..out_side {
        let row0 = (or * step) as isize - pad as isize;
        for oc in 0..out_side {
            let col0 = (oc * step) as isize - pad as isize;
            let mut acc = 0.0;
            for fr in 0..filter_side {
                let ir = row0 + fr as isize;
                if ir < 0 || ir >= in_side as isize {
                    continue;
                }
                for fc in 0..filter_side {
                    let ic = col0 + fc as isize;
                    if ic < 0 || ic >= in_side as isize {
                        continue;
                    }
                    for ch in 0..channels {
                        acc += input[ig.index(ch, ir as usize, ic as usize)]
                            * filter[fg.index(ch, fr, fc)];
                    }
                }
            }
            out[or * out_side + oc] = acc;
        }
    }
    Ok(out)
}

/// Gradient of [`convolve`] with respect to its input and its filter.
///
/// `grad` is the gradient with respect to the single-channel output. Returns
/// `(d_input, d_filter)`, shaped like `input` and `filter`.
#[allow(clippy::too_many_arguments)]
pub fn back_convolve(
    grad: &[f64],
    input: &[f64],
    in_side: usize,
    filter: &[f64],
    filter_side: usize,
    channels: usize,
    step: usize,
    pad: usize,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let ig = MapGeometry::new(in_side, channels);
    let fg = MapGeometry::new(filter_side, channels);
    ig.check("back_convolve: input", input)?;
    fg.check("back_convolve: filter", filter)?;
    let out_side = conv_output_side(in_side, filter_side, step, pad)?;
    ensure_len("back_convolve: gradient", out_side * out_side, grad.len())?;

    let mut d_input = vec![0.0; ig.len()];
    let mut d_filter = vec![0.0; fg.len()];
    for or in 0..out_side {
        let row0 = (or * step) as isize - pad as isize;
        for oc in 0..out_side {
            let col0 = (oc * step) as isize - pad as isize;
            let g = grad[or * out_side + oc];
            for fr in 0..filter_side {
                let ir = row0 + fr as isize;
                if ir < 0 || ir >= in_side as isize {
                    continue;
                }
                for fc in 0..filter_side {
                    let ic = col0 + fc as isize;
                    if ic < 0 || ic >= in_side as isize {
                        continue;
                    }
                    for ch in 0..channels {
                        let xi = ig.index(ch, ir as usize, ic as usize);
                        let xf = fg.index(ch, fr, fc);
                        d_input[xi] += g * filter[xf];
                        d_filter[xf] += g * input[xi];
                    }
                }
            }
        }
    }
    Ok((d_input, d_filter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn seq(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    #[test]
    fn test_output_side_law() {
        assert_eq!(conv_output_side(4, 2, 1, 0).unwrap(), 3);
        assert_eq!(conv_output_side(5, 3, 2, 1).unwrap(), 3);
        assert_eq!(conv_output_side(10, 4, 2, 6).unwrap(), 10);
        assert_eq!(conv_output_side(3, 3, 1, 0).unwrap(), 1);
    }

    #[test]
    fn test_output_side_rejects_invalid() {
        assert!(matches!(
            conv_output_side(4, 2, 2, 0),
            Err(Error::StepMismatch { step: 2, .. })
        ));
        assert!(matches!(
            conv_output_side(2, 3, 1, 0),
            Err(Error::FilterTooLarge { .. })
        ));
        assert!(conv_output_side(4, 2, 0, 0).is_err());
    }

    #[test]
    fn test_convolve_known_values() {
        // 3x3 input, 2x2 filter, stride 1, no pad
        let input = seq(9); // [[0,1,2],[3,4,5],[6,7,8]]
        let filter = vec![1.0, 0.0, 0.0, -1.0];
        let out = convolve(&input, 3, &filter, 2, 1, 1, 0).unwrap();
        // x[r][c] - x[r+1][c+1] = -4 everywhere
        assert_eq!(out, vec![-4.0; 4]);
    }

    #[test]
    fn test_convolve_sums_channels() {
        let input = [constant(1.0, 4), constant(2.0, 4)].concat();
        let filter = [constant(1.0, 1), constant(10.0, 1)].concat();
        let out = convolve(&input, 2, &filter, 1, 2, 1, 0).unwrap();
        assert_eq!(out, vec![21.0; 4]);
    }

    #[test]
    fn test_convolve_with_padding() {
        let input = constant(1.0, 4);
        let filter = constant(1.0, 9);
        let out = convolve(&input, 2, &filter, 3, 1, 1, 1).unwrap();
        // every window covers the whole 2x2 input
        assert_eq!(out, vec![4.0; 4]);
    }

    #[test]
    fn test_convolve_with_stride() {
        let input = seq(25);
        let filter = constant(1.0, 1);
        let out = convolve(&input, 5, &filter, 1, 1, 2, 0).unwrap();
        assert_eq!(out, vec![0.0, 2.0, 4.0, 10.0, 12.0, 14.0, 20.0, 22.0, 24.0]);
    }

    #[test]
    fn test_zero_filter_gives_zero_output() {
        let mut rng = StdRng::seed_from_u64(7);
        let input = gaussian(1.0, 3 * 6 * 6, &mut rng);
        let out = convolve(&input, 6, &constant(0.0, 3 * 9), 3, 3, 1, 1).unwrap();
        assert_eq!(out.len(), 36);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_convolve_rejects_bad_lengths() {
        assert!(matches!(
            convolve(&seq(8), 3, &seq(4), 2, 1, 1, 0),
            Err(Error::LengthMismatch { .. })
        ));
        assert!(matches!(
            convolve(&seq(9), 3, &seq(3), 2, 1, 1, 0),
            Err(Error::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_elementwise_ops() {
        let mut a = vec![1.0, 2.0, 3.0];
        sum(&mut a, &[1.0, 1.0, 1.0]).unwrap();
        assert_eq!(a, vec![2.0, 3.0, 4.0]);
        difference(&mut a, &[2.0, 2.0, 2.0]).unwrap();
        assert_eq!(a, vec![0.0, 1.0, 2.0]);
        product(&mut a, &[5.0, 5.0, 0.5]).unwrap();
        assert_eq!(a, vec![0.0, 5.0, 1.0]);
        scale(&mut a, -2.0);
        assert_eq!(a, vec![0.0, -10.0, -2.0]);
        assert_eq!(total(&a), -12.0);
    }

    #[test]
    fn test_elementwise_length_mismatch() {
        let mut a = vec![1.0, 2.0];
        assert!(sum(&mut a, &[1.0]).is_err());
        assert!(difference(&mut a, &[1.0, 2.0, 3.0]).is_err());
        assert!(product(&mut a, &[]).is_err());
        assert_eq!(a, vec![1.0, 2.0]);
    }

    #[test]
    fn test_gaussian_stats() {
        let mut rng = StdRng::seed_from_u64(42);
        let v = gaussian(0.5, 20_000, &mut rng);
        let mean = total(&v) / v.len() as f64;
        let var = v.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / v.len() as f64;
        assert!(mean.abs() < 0.02, "mean {mean}");
        assert!((var.sqrt() - 0.5).abs() < 0.02, "std {}", var.sqrt());
    }

    #[test]
    fn test_dilate_known_values() {
        let out = dilate(&[1.0, 2.0, 3.0, 4.0], 2, 1, 1).unwrap();
        #[rustfmt::skip]
        let expected = vec![
            1.0, 0.0, 2.0,
            0.0, 0.0, 0.0,
            3.0, 0.0, 4.0,
        ];
        assert_eq!(out, expected);
    }

    #[test]
    fn test_dilate_factor_zero_is_copy() {
        let x = seq(18);
        assert_eq!(dilate(&x, 3, 2, 0).unwrap(), x);
    }

    #[test]
    fn test_transpose_and_reverse() {
        let mut x = seq(4); // [[0,1],[2,3]]
        transpose(&mut x, 2, 1).unwrap();
        assert_eq!(x, vec![0.0, 2.0, 1.0, 3.0]);
        reverse_columns(&mut x, 2, 1).unwrap();
        assert_eq!(x, vec![2.0, 0.0, 3.0, 1.0]);
    }

    #[test]
    fn test_rot180_known_values() {
        let x = seq(18);
        let r = rot180(&x, 3, 2).unwrap();
        let mut expected: Vec<f64> = (0..9).rev().map(|i| i as f64).collect();
        expected.extend((9..18).rev().map(|i| i as f64));
        assert_eq!(r, expected);
    }

    #[test]
    fn test_crop() {
        let x = seq(16);
        assert_eq!(crop(&x, 4, 1, 1).unwrap(), vec![5.0, 6.0, 9.0, 10.0]);
        assert_eq!(crop(&x, 4, 1, 0).unwrap(), x);
        assert!(crop(&x, 4, 1, 3).is_err());
    }

    #[test]
    fn test_back_convolve_matches_dilated_rotated_form() {
        let mut rng = StdRng::seed_from_u64(3);
        let (in_side, fs, ch, step, pad) = (7, 3, 2, 2, 1);
        let input = gaussian(1.0, ch * in_side * in_side, &mut rng);
        let filter = gaussian(1.0, ch * fs * fs, &mut rng);
        let os = conv_output_side(in_side, fs, step, pad).unwrap();
        let grad = gaussian(1.0, os * os, &mut rng);

        let (d_in, d_f) =
            back_convolve(&grad, &input, in_side, &filter, fs, ch, step, pad).unwrap();

        let dg = dilate(&grad, os, 1, step - 1).unwrap();
        let ds = os * step - (step - 1);
        let plane = in_side * in_side;
        let fplane = fs * fs;
        for c in 0..ch {
            let in_c = &input[c * plane..(c + 1) * plane];
            let df_c = convolve(in_c, in_side, &dg, ds, 1, 1, pad).unwrap();
            for (a, b) in df_c.iter().zip(&d_f[c * fplane..(c + 1) * fplane]) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-9);
            }

            let rot = rot180(&filter[c * fplane..(c + 1) * fplane], fs, 1).unwrap();
            let full = convolve(&dg, ds, &rot, fs, 1, 1, fs - 1).unwrap();
            let di_c = crop(&full, ds + fs - 1, 1, pad).unwrap();
            for (a, b) in di_c.iter().zip(&d_in[c * plane..(c + 1) * plane]) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-9);
            }
        }
    }

    proptest! {
        #[test]
        fn rot180_is_an_involution(
            side in 1usize..7,
            channels in 1usize..4,
            seed in any::<u64>(),
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let x = gaussian(1.0, side * side * channels, &mut rng);
            let once = rot180(&x, side, channels).unwrap();
            let twice = rot180(&once, side, channels).unwrap();
            prop_assert_eq!(twice, x);
        }

        #[test]
        fn dilation_is_inverted_by_subsampling(
            side in 1usize..6,
            channels in 1usize..4,
            factor in 0usize..4,
            seed in any::<u64>(),
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let x = gaussian(1.0, side * side * channels, &mut rng);
            let d = dilate(&x, side, channels, factor).unwrap();
            let stride = factor + 1;
            let dg = MapGeometry::new(side * stride - 1, channels);
            prop_assert_eq!(d.len(), dg.len());
            let mut back = Vec::with_capacity(x.len());
            for ch in 0..channels {
                for r in 0..side {
                    for c in 0..side {
                        back.push(d[dg.index(ch, r * stride, c * stride)]);
                    }
                }
            }
            prop_assert_eq!(back, x);
        }
    }
}
