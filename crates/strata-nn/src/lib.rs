//! # strata-nn
//!
//! Convolutional layers and the network that chains them.
//!
//! Every layer implements the [`ConvolutionLayer`] trait:
//!
//! 1. **Activation** — pointwise function, then one convolution per [`Filter`]
//! 2. **Pool** — max, max-magnitude or average reduction over space or channels
//! 3. **Convolution** — an ordered stack of layers with a forward-before-backward guard
//!
//! Networks can be assembled by hand or planned from a [`NetworkConfig`],
//! which derives padding and channel counts from the requested layer sizes.

pub mod activation;
pub mod config;
pub mod filter;
pub mod init;
pub mod layer;
pub mod network;
pub mod pointwise;
pub mod pool;

pub use activation::{Activation, ForwardParams, DEFAULT_LEARNING_RATE};
pub use config::{LayerPlan, LayerSpec, NetworkConfig};
pub use filter::Filter;
pub use layer::{ConvolutionLayer, Layer};
pub use network::Convolution;
pub use pointwise::Pointwise;
pub use pool::{Pool, PoolKind};
