// Filter — one convolution kernel and its geometry
//
// Weights are stored flattened as [channel][row][col] (side × side × channels)
// and initialized from N(0, σ²) with σ = sqrt(2 / (side² · channels)).
//
// UPDATE RULE:
//
//   The update subtracts the (already learning-rate-scaled) gradient from the
//   leading weights, bounded by min(side, gradient.len()). For a filter with
//   side² · channels > side this touches only the first `side` weights.

use rand::Rng;
use strata_core::error::{Error, Result};
use strata_core::MapGeometry;

use crate::init;

/// A square convolution kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    data: Vec<f64>,
    side: usize,
    channels: usize,
    step: usize,
}

fn check_geometry(size: usize, channels: usize, step: usize) -> Result<()> {
    if size == 0 || channels == 0 {
        return Err(Error::msg(format!(
            "filter must have a positive side and channel count, got side {size}, channels {channels}"
        )));
    }
    if step == 0 {
        return Err(Error::msg("filter step must be at least 1"));
    }
    Ok(())
}

impl Filter {
    /// Create a filter with Gaussian weights drawn from the thread RNG.
    pub fn new(size: usize, channels: usize, step: usize) -> Result<Self> {
        Self::with_rng(size, channels, step, &mut rand::thread_rng())
    }

    /// Create a filter with Gaussian weights drawn from `rng`.
    pub fn with_rng<R: Rng + ?Sized>(
        size: usize,
        channels: usize,
        step: usize,
        rng: &mut R,
    ) -> Result<Self> {
        check_geometry(size, channels, step)?;
        let len = size * size * channels;
        Ok(Filter {
            data: init::filter_weights(len, rng),
            side: size,
            channels,
            step,
        })
    }

    /// Create a filter from existing weights (e.g. for loading).
    pub fn from_weights(data: Vec<f64>, size: usize, channels: usize, step: usize) -> Result<Self> {
        check_geometry(size, channels, step)?;
        MapGeometry::new(size, channels).check("filter weights", &data)?;
        Ok(Filter {
            data,
            side: size,
            channels,
            step,
        })
    }

    /// Weight at `[channel][row][col]`.
    pub fn get(&self, row: usize, col: usize, channel: usize) -> f64 {
        self.data[self.geometry().index(channel, row, col)]
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }
    pub fn size(&self) -> usize {
        self.side
    }
    pub fn channels(&self) -> usize {
        self.channels
    }
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn geometry(&self) -> MapGeometry {
        MapGeometry::new(self.side, self.channels)
    }

    /// Subtract a learning-rate-scaled gradient from the leading weights.
    pub fn update(&mut self, gradient: &[f64]) {
        let n = self.side.min(gradient.len()).min(self.data.len());
        for (w, g) in self.data[..n].iter_mut().zip(gradient) {
            *w -= g;
        }
    }
}
