//! # Strata
//!
//! A convolutional layer engine built from scratch in Rust.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust
//! use strata::prelude::*;
//!
//! let config = NetworkConfig::new(8, 1)
//!     .activation(8, Pointwise::ReLU, 3, 1, 4)
//!     .pool(4, PoolKind::Max, 2);
//! let mut net = Convolution::from_config(&config)?;
//!
//! let y = net.forward(&vec![0.5; 64])?;
//! let dx = net.backward(&vec![1.0; y.len()])?;
//! assert_eq!(dx.len(), 64);
//! # Ok::<(), strata::Error>(())
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `strata-core` | Flattened map geometry, tensor primitives (convolve, dilate, rotate, crop), errors |
//! | `strata-nn` | Filters, pointwise functions, Activation and Pool layers, Convolution network, config |
//!
//! ## Modules
//!
//! - [`tensor`] — primitive operations on flattened maps
//! - [`checkpoint`] — save/load filter weights

/// Re-export core types.
pub use strata_core::{Error, ErrorKind, MapGeometry, Result};

/// Re-export tensor primitives.
pub mod tensor {
    pub use strata_core::tensor::*;
}

/// Re-export layers and networks.
pub mod nn {
    pub use strata_nn::*;
}

/// Checkpoint — save and load filter weights.
pub mod checkpoint;

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::nn::{
        Activation, Convolution, ConvolutionLayer, Filter, ForwardParams, Layer, LayerSpec,
        NetworkConfig, Pointwise, Pool, PoolKind,
    };
    pub use crate::{Error, MapGeometry, Result};
}
