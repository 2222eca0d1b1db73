// ConvolutionLayer — the interface every convolutional layer implements
//
// A layer takes a flattened map and returns a flattened map (forward), and
// takes the gradient w.r.t. its output and returns the gradient w.r.t. its
// input (backward). Layers own all of their state: a backward call consumes
// what the matching forward call cached, so a layer instance is driven by one
// caller at a time through `&mut self`.
//
// The set of layer kinds is closed, so the network stores them in the `Layer`
// enum and dispatches with a match rather than through trait objects.

use strata_core::error::Result;

use crate::activation::Activation;
use crate::pool::Pool;

/// Forward/backward capability shared by all convolutional layers.
///
/// # Example
/// ```ignore
/// let mut pool = Pool::new(4, 1, 2, PoolKind::Max)?;
/// let y = pool.forward(&x)?;      // 16 -> 4 elements
/// let dx = pool.backward(&dy)?;   // 4 -> 16 elements
/// ```
pub trait ConvolutionLayer {
    /// Compute the flattened output map from the flattened input map.
    fn forward(&mut self, input: &[f64]) -> Result<Vec<f64>>;

    /// Compute the gradient w.r.t. the input from the gradient w.r.t. the
    /// output. Must follow a `forward` on the same instance.
    fn backward(&mut self, loss: &[f64]) -> Result<Vec<f64>>;

    /// Short human-readable name, used in logs.
    fn name(&self) -> &'static str;

    /// Number of trainable weights (default: none).
    fn num_parameters(&self) -> usize {
        0
    }
}

/// A convolutional layer of either kind.
#[derive(Debug, Clone)]
pub enum Layer {
    Activation(Activation),
    Pool(Pool),
}

impl Layer {
    pub fn as_activation(&self) -> Option<&Activation> {
        match self {
            Layer::Activation(a) => Some(a),
            Layer::Pool(_) => None,
        }
    }

    pub fn as_activation_mut(&mut self) -> Option<&mut Activation> {
        match self {
            Layer::Activation(a) => Some(a),
            Layer::Pool(_) => None,
        }
    }

    pub fn as_pool(&self) -> Option<&Pool> {
        match self {
            Layer::Pool(p) => Some(p),
            Layer::Activation(_) => None,
        }
    }
}

impl ConvolutionLayer for Layer {
    fn forward(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        match self {
            Layer::Activation(a) => a.forward(input),
            Layer::Pool(p) => p.forward(input),
        }
    }

    fn backward(&mut self, loss: &[f64]) -> Result<Vec<f64>> {
        match self {
            Layer::Activation(a) => a.backward(loss),
            Layer::Pool(p) => p.backward(loss),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Layer::Activation(a) => ConvolutionLayer::name(a),
            Layer::Pool(p) => ConvolutionLayer::name(p),
        }
    }

    fn num_parameters(&self) -> usize {
        match self {
            Layer::Activation(a) => a.num_parameters(),
            Layer::Pool(_) => 0,
        }
    }
}

impl From<Activation> for Layer {
    fn from(a: Activation) -> Self {
        Layer::Activation(a)
    }
}

impl From<Pool> for Layer {
    fn from(p: Pool) -> Self {
        Layer::Pool(p)
    }
}
