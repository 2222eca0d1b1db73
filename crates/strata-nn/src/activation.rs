// Activation — pointwise function followed by a multi-filter convolution
//
// FORWARD:
//
//   a   = pointwise(x)                      (x: channels × s × s)
//   y_k = convolve(a, filter_k, step, pad)  (one map of side o per filter)
//   y   = y_0 ‖ y_1 ‖ … ‖ y_{n-1}           (n × o × o, filter order)
//
//   x and a are cached for the backward pass. The cache is overwritten by every
//   forward call and consumed by exactly one backward call.
//
// BACKWARD (per filter k, with g_k the slice of the incoming gradient):
//
//   1. step > 1:  g_k ← dilate(g_k, step - 1)   (now a stride-1 problem)
//   2. filter:    Δf_k[ch] = lr · convolve(a[ch], g_k, pad)
//   3. input:     da[ch]  += crop(convolve(g_k, rot180(f_k[ch]), side - 1), pad)
//   4. chain:     dx = pointwise'(x, a) ⊙ da
//
//   The input gradient uses the weights as they were during forward; filter
//   updates are applied after every gradient has been computed.
//
// HYPERPARAMETERS:
//
//   `forward_with` / `backward_with` take the geometry explicitly. `forward` /
//   `backward` (the ConvolutionLayer methods) use values stored by
//   `set_forward_params` / `set_backward_params` and fail if they were never set.

use strata_core::error::{ensure_len, Error, Result};
use strata_core::tensor;
use strata_core::MapGeometry;

use crate::filter::Filter;
use crate::layer::ConvolutionLayer;
use crate::pointwise::Pointwise;

/// Learning rate used until one is set explicitly.
pub const DEFAULT_LEARNING_RATE: f64 = 0.1;

/// Geometry of the forward convolution, shared by all filters of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForwardParams {
    /// Side length of the input map.
    pub input_size: usize,
    /// Side length of every filter.
    pub filter_size: usize,
    pub step: usize,
    /// Channels of the input map (and of every filter).
    pub channels: usize,
    pub pad: usize,
}

impl ForwardParams {
    pub fn new(input_size: usize, filter_size: usize, step: usize, channels: usize, pad: usize) -> Self {
        ForwardParams {
            input_size,
            filter_size,
            step,
            channels,
            pad,
        }
    }

    pub fn input_geometry(&self) -> MapGeometry {
        MapGeometry::new(self.input_size, self.channels)
    }

    /// Side length of each per-filter output map.
    pub fn output_size(&self) -> Result<usize> {
        tensor::conv_output_side(self.input_size, self.filter_size, self.step, self.pad)
    }
}

#[derive(Debug, Clone)]
struct ForwardCache {
    input: Vec<f64>,
    activated: Vec<f64>,
}

/// A convolutional activation layer.
///
/// All filters are expected to share one geometry; see [`Activation::forward_mixed`]
/// for the exception.
#[derive(Debug, Clone)]
pub struct Activation {
    filters: Vec<Filter>,
    pointwise: Pointwise,
    forward_params: Option<ForwardParams>,
    loss_size: Option<usize>,
    learning_rate: f64,
    pending: Option<ForwardCache>,
}

impl Activation {
    /// Create a layer without stored hyperparameters.
    pub fn new(filters: Vec<Filter>, pointwise: Pointwise) -> Self {
        Activation {
            filters,
            pointwise,
            forward_params: None,
            loss_size: None,
            learning_rate: DEFAULT_LEARNING_RATE,
            pending: None,
        }
    }

    /// Create a layer with preset forward and backward hyperparameters.
    pub fn with_hyperparams(
        filters: Vec<Filter>,
        pointwise: Pointwise,
        params: ForwardParams,
        loss_size: usize,
        learning_rate: f64,
    ) -> Self {
        let mut layer = Self::new(filters, pointwise);
        layer.set_forward_params(params);
        layer.set_backward_params(loss_size, learning_rate);
        layer
    }

    pub fn set_forward_params(&mut self, params: ForwardParams) {
        self.forward_params = Some(params);
    }

    pub fn set_backward_params(&mut self, loss_size: usize, learning_rate: f64) {
        self.loss_size = Some(loss_size);
        self.set_learning_rate(learning_rate);
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }
    pub fn filters_mut(&mut self) -> &mut [Filter] {
        &mut self.filters
    }
    pub fn pointwise(&self) -> Pointwise {
        self.pointwise
    }
    pub fn forward_params(&self) -> Option<ForwardParams> {
        self.forward_params
    }
    pub fn loss_size(&self) -> Option<usize> {
        self.loss_size
    }
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Whether a forward pass is waiting for its backward pass.
    pub fn has_pending_forward(&self) -> bool {
        self.pending.is_some()
    }

    pub fn num_parameters(&self) -> usize {
        self.filters.iter().map(|f| f.data().len()).sum()
    }

    /// Every filter must have the side and channel count named by `params`.
    fn check_filters(&self, context: &str, params: &ForwardParams) -> Result<()> {
        for (k, f) in self.filters.iter().enumerate() {
            if f.size() != params.filter_size || f.channels() != params.channels {
                return Err(Error::msg(format!(
                    "{context}: filter {k} is {}, expected [{}x{}x{}]",
                    f.geometry(),
                    params.channels,
                    params.filter_size,
                    params.filter_size
                )));
            }
        }
        Ok(())
    }

    /// Forward pass with explicit hyperparameters applied to every filter.
    pub fn forward_with(&mut self, input: &[f64], params: &ForwardParams) -> Result<Vec<f64>> {
        self.pending = None;
        params.input_geometry().check("activation forward: input", input)?;
        self.check_filters("activation forward", params)?;

        let activated = self.pointwise.forward(input);
        let mut out = Vec::new();
        for f in &self.filters {
            out.extend(tensor::convolve(
                &activated,
                params.input_size,
                f.data(),
                params.filter_size,
                params.channels,
                params.step,
                params.pad,
            )?);
        }
        tracing::trace!(
            pointwise = %self.pointwise,
            filters = self.filters.len(),
            out_len = out.len(),
            "activation forward"
        );
        self.pending = Some(ForwardCache {
            input: input.to_vec(),
            activated,
        });
        Ok(out)
    }

    /// Forward pass in which every filter uses its own side length and step.
    ///
    /// Filters of different sizes are accepted, but the concatenated output is
    /// then not a square multi-channel map and is generally unsuitable as the
    /// input of another convolution layer.
    pub fn forward_mixed(
        &mut self,
        input: &[f64],
        input_size: usize,
        channels: usize,
        pad: usize,
    ) -> Result<Vec<f64>> {
        self.pending = None;
        MapGeometry::new(input_size, channels).check("activation forward: input", input)?;
        let activated = self.pointwise.forward(input);
        let mut out = Vec::new();
        for f in &self.filters {
            out.extend(tensor::convolve(
                &activated,
                input_size,
                f.data(),
                f.size(),
                f.channels(),
                f.step(),
                pad,
            )?);
        }
        self.pending = Some(ForwardCache {
            input: input.to_vec(),
            activated,
        });
        Ok(out)
    }

    /// Backward pass with explicit hyperparameters.
    ///
    /// `loss` is the gradient w.r.t. the concatenated output (`filters ×
    /// loss_size²`). Updates the filters and returns the gradient w.r.t. the
    /// layer input.
    pub fn backward_with(
        &mut self,
        loss: &[f64],
        learning_rate: f64,
        params: &ForwardParams,
        loss_size: usize,
    ) -> Result<Vec<f64>> {
        let cache = self
            .pending
            .as_ref()
            .ok_or(Error::BackwardBeforeForward("activation"))?;
        self.check_filters("activation backward", params)?;

        let out_side = params.output_size()?;
        if loss_size != out_side {
            return Err(Error::msg(format!(
                "activation backward: gradient side {loss_size} does not match output side {out_side}"
            )));
        }
        let loss_plane = loss_size * loss_size;
        ensure_len(
            "activation backward: gradient",
            self.filters.len() * loss_plane,
            loss.len(),
        )?;
        let geom = params.input_geometry();
        geom.check("activation backward: cached map", &cache.activated)?;

        let (is, fs, step, pad) = (params.input_size, params.filter_size, params.step, params.pad);
        let plane = geom.plane();
        let fplane = fs * fs;
        let dilated_side = (loss_size - 1) * step + 1;
        let padded_side = is + 2 * pad;

        let mut d_activated = vec![0.0; geom.len()];
        let mut d_filters = Vec::with_capacity(self.filters.len());
        for (k, f) in self.filters.iter().enumerate() {
            let g = &loss[k * loss_plane..(k + 1) * loss_plane];
            let g = if step > 1 {
                tensor::dilate(g, loss_size, 1, step - 1)?
            } else {
                g.to_vec()
            };

            let mut df = Vec::with_capacity(f.data().len());
            for ch in 0..params.channels {
                let a = &cache.activated[ch * plane..(ch + 1) * plane];
                df.extend(tensor::convolve(a, is, &g, dilated_side, 1, 1, pad)?);
            }
            tensor::scale(&mut df, learning_rate);
            d_filters.push(df);

            for ch in 0..params.channels {
                let kernel = tensor::rot180(&f.data()[ch * fplane..(ch + 1) * fplane], fs, 1)?;
                let full = tensor::convolve(&g, dilated_side, &kernel, fs, 1, 1, fs - 1)?;
                let di = tensor::crop(&full, padded_side, 1, pad)?;
                tensor::sum(&mut d_activated[ch * plane..(ch + 1) * plane], &di)?;
            }
        }

        let grad = self
            .pointwise
            .backward(&cache.input, &cache.activated, &d_activated)?;

        for (f, df) in self.filters.iter_mut().zip(&d_filters) {
            f.update(df);
        }
        self.pending = None;
        tracing::trace!(
            pointwise = %self.pointwise,
            learning_rate,
            "activation backward"
        );
        Ok(grad)
    }
}

impl ConvolutionLayer for Activation {
    /// Forward pass using the stored forward hyperparameters.
    fn forward(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        let params = self
            .forward_params
            .ok_or(Error::MissingHyperparameters("forward hyperparameters"))?;
        self.forward_with(input, &params)
    }

    /// Backward pass using the stored hyperparameters and learning rate.
    fn backward(&mut self, loss: &[f64]) -> Result<Vec<f64>> {
        let params = self
            .forward_params
            .ok_or(Error::MissingHyperparameters("forward hyperparameters"))?;
        let loss_size = self
            .loss_size
            .ok_or(Error::MissingHyperparameters("backward hyperparameters"))?;
        self.backward_with(loss, self.learning_rate, &params, loss_size)
    }

    fn name(&self) -> &'static str {
        "Activation"
    }

    fn num_parameters(&self) -> usize {
        Activation::num_parameters(self)
    }
}
