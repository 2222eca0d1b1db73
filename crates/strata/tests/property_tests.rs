//! Property-based tests for the convolution layers.
//!
//! Geometries are drawn so that the output side is always exact; the layer's
//! hand-written backward is checked against `tensor::back_convolve`.

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use strata::prelude::*;
use strata::tensor;

// ── Strategies ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Geometry {
    input_side: usize,
    filter_side: usize,
    step: usize,
    pad: usize,
    channels: usize,
    filters: usize,
}

/// A convolution geometry whose padded span divides evenly by the step.
fn arb_geometry() -> impl Strategy<Value = Geometry> {
    (1usize..=4, 1usize..=3, 1usize..=4, 0usize..=2, 1usize..=3, 1usize..=3).prop_filter_map(
        "padding swallows the input",
        |(filter_side, step, out, pad, channels, filters)| {
            let padded = (out - 1) * step + filter_side;
            let input_side = padded.checked_sub(2 * pad).filter(|&s| s > 0)?;
            Some(Geometry {
                input_side,
                filter_side,
                step,
                pad,
                channels,
                filters,
            })
        },
    )
}

// ── Property tests ───────────────────────────────────────────────────────────

proptest! {
    /// Forward output has one exact map per filter.
    #[test]
    fn forward_output_has_one_map_per_filter(g in arb_geometry(), seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        let params = ForwardParams::new(g.input_side, g.filter_side, g.step, g.channels, g.pad);
        let out = tensor::conv_output_side(g.input_side, g.filter_side, g.step, g.pad).unwrap();
        let filters: Vec<Filter> = (0..g.filters)
            .map(|_| Filter::with_rng(g.filter_side, g.channels, g.step, &mut rng))
            .collect::<Result<_>>()
            .unwrap();
        let mut layer = Activation::new(filters, Pointwise::Identity);

        let x = tensor::gaussian(1.0, params.input_geometry().len(), &mut rng);
        let y = layer.forward_with(&x, &params).unwrap();
        prop_assert_eq!(y.len(), g.filters * out * out);
    }

    /// With an identity pointwise and a zero learning rate the input gradient
    /// is the per-filter sum of `back_convolve`, and no weight moves.
    #[test]
    fn input_gradient_matches_back_convolve(g in arb_geometry(), seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        let params = ForwardParams::new(g.input_side, g.filter_side, g.step, g.channels, g.pad);
        let out = tensor::conv_output_side(g.input_side, g.filter_side, g.step, g.pad).unwrap();
        let filters: Vec<Filter> = (0..g.filters)
            .map(|_| Filter::with_rng(g.filter_side, g.channels, g.step, &mut rng))
            .collect::<Result<_>>()
            .unwrap();
        let mut layer = Activation::new(filters.clone(), Pointwise::Identity);

        let x = tensor::gaussian(1.0, params.input_geometry().len(), &mut rng);
        layer.forward_with(&x, &params).unwrap();
        let loss = tensor::gaussian(1.0, g.filters * out * out, &mut rng);
        let dx = layer.backward_with(&loss, 0.0, &params, out).unwrap();

        let mut expected = vec![0.0; x.len()];
        for (k, f) in filters.iter().enumerate() {
            let slice = &loss[k * out * out..(k + 1) * out * out];
            let (di, _) = tensor::back_convolve(
                slice,
                &x,
                g.input_side,
                f.data(),
                g.filter_side,
                g.channels,
                g.step,
                g.pad,
            )
            .unwrap();
            tensor::sum(&mut expected, &di).unwrap();
        }

        prop_assert_eq!(dx.len(), expected.len());
        for (i, (a, b)) in dx.iter().zip(&expected).enumerate() {
            prop_assert!((a - b).abs() < 1e-9, "index {i}: layer {a}, back_convolve {b} for {g:?}");
        }
        prop_assert_eq!(layer.filters(), filters.as_slice());
    }
}
