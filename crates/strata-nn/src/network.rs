// Convolution — an ordered stack of convolutional layers
//
// Forward runs the layers first to last, feeding each output into the next
// layer. Backward runs them last to first with the gradient. The network is a
// two-state machine:
//
//   ready-for-forward ──forward──▶ ready-for-backward ──backward──▶ ready-for-forward
//
// Backward in ready-for-forward (a fresh network, or two backwards in a row)
// is a sequencing error. A failed forward or backward leaves the network in
// ready-for-forward.
//
// Convolution implements ConvolutionLayer itself, so networks can be nested.

use rand::Rng;
use strata_core::error::{Error, Result};

use crate::activation::Activation;
use crate::config::{LayerPlan, NetworkConfig};
use crate::filter::Filter;
use crate::layer::{ConvolutionLayer, Layer};
use crate::pool::Pool;

/// A chain of [`Layer`]s trained end to end.
#[derive(Debug, Clone, Default)]
pub struct Convolution {
    layers: Vec<Layer>,
    forward_executed: bool,
}

impl Convolution {
    pub fn new(layers: Vec<Layer>) -> Self {
        Convolution {
            layers,
            forward_executed: false,
        }
    }

    /// Append a layer. Returns self for chaining.
    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, layer: impl Into<Layer>) -> Self {
        self.layers.push(layer.into());
        self
    }

    /// Build a network from a configuration, drawing filters from the thread RNG.
    pub fn from_config(config: &NetworkConfig) -> Result<Self> {
        Self::from_config_with_rng(config, &mut rand::thread_rng())
    }

    /// Build a network from a configuration, drawing filters from `rng`.
    pub fn from_config_with_rng<R: Rng + ?Sized>(config: &NetworkConfig, rng: &mut R) -> Result<Self> {
        let plans = config.plan()?;
        let mut layers = Vec::with_capacity(plans.len());
        for (i, plan) in plans.into_iter().enumerate() {
            let layer = match plan {
                LayerPlan::Activation {
                    pointwise,
                    params,
                    filters,
                    loss_size,
                } => {
                    let bank = (0..filters)
                        .map(|_| Filter::with_rng(params.filter_size, params.channels, params.step, rng))
                        .collect::<Result<Vec<_>>>()?;
                    tracing::debug!(
                        index = i,
                        %pointwise,
                        input = %params.input_geometry(),
                        filters,
                        filter_size = params.filter_size,
                        step = params.step,
                        pad = params.pad,
                        "built activation layer"
                    );
                    Layer::Activation(Activation::with_hyperparams(
                        bank,
                        pointwise,
                        params,
                        loss_size,
                        config.learning_rate,
                    ))
                }
                LayerPlan::Pool { input, kind, factor } => {
                    let pool = Pool::new(input.side, input.channels, factor, kind)?;
                    tracing::debug!(
                        index = i,
                        %kind,
                        factor,
                        input = %input,
                        output = %pool.output_geometry(),
                        "built pool layer"
                    );
                    Layer::Pool(pool)
                }
            };
            layers.push(layer);
        }
        Ok(Self::new(layers))
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    /// Whether a forward pass has completed and awaits its backward pass.
    pub fn is_ready_for_backward(&self) -> bool {
        self.forward_executed
    }

    /// Set the learning rate of every activation layer.
    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        for layer in &mut self.layers {
            if let Some(a) = layer.as_activation_mut() {
                a.set_learning_rate(learning_rate);
            }
        }
    }

    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(|l| l.num_parameters()).sum()
    }
}

impl ConvolutionLayer for Convolution {
    fn forward(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        self.forward_executed = false;
        let mut out = input.to_vec();
        for layer in &mut self.layers {
            out = layer.forward(&out)?;
        }
        self.forward_executed = true;
        Ok(out)
    }

    fn backward(&mut self, loss: &[f64]) -> Result<Vec<f64>> {
        if !self.forward_executed {
            return Err(Error::BackwardBeforeForward("convolution"));
        }
        self.forward_executed = false;
        let mut grad = loss.to_vec();
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(&grad)?;
        }
        Ok(grad)
    }

    fn name(&self) -> &'static str {
        "Convolution"
    }

    fn num_parameters(&self) -> usize {
        Convolution::num_parameters(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::ForwardParams;
    use crate::pointwise::Pointwise;
    use crate::pool::PoolKind;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_config() -> NetworkConfig {
        NetworkConfig::new(6, 1)
            .activation(6, Pointwise::TanH, 3, 1, 2)
            .pool(3, PoolKind::Max, 2)
            .with_learning_rate(0.05)
    }

    #[test]
    fn test_fresh_network_rejects_backward() {
        let mut net = Convolution::from_config(&small_config()).unwrap();
        let err = net.backward(&[0.0; 18]).unwrap_err();
        assert!(err.is_sequencing());
    }

    #[test]
    fn test_forward_backward_cycle() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(3);
        let mut net = Convolution::from_config_with_rng(&small_config(), &mut rng)?;
        assert_eq!(net.len(), 2);
        assert_eq!(net.num_parameters(), 2 * 9);

        let x: Vec<f64> = (0..36).map(|i| (i as f64 * 0.1).cos()).collect();
        let y = net.forward(&x)?;
        assert_eq!(y.len(), 2 * 3 * 3);
        assert!(net.is_ready_for_backward());

        let dx = net.backward(&vec![1.0; y.len()])?;
        assert_eq!(dx.len(), 36);
        assert!(!net.is_ready_for_backward());
        assert!(net.backward(&vec![1.0; y.len()]).unwrap_err().is_sequencing());
        Ok(())
    }

    #[test]
    fn test_failed_forward_clears_ready_state() -> Result<()> {
        let mut net = Convolution::from_config(&small_config())?;
        net.forward(&[0.0; 36])?;
        assert!(net.forward(&[0.0; 35]).is_err());
        assert!(!net.is_ready_for_backward());
        Ok(())
    }

    #[test]
    fn test_set_learning_rate_reaches_activations() -> Result<()> {
        let mut net = Convolution::from_config(&small_config())?;
        net.set_learning_rate(0.5);
        let a = net.layers()[0].as_activation().unwrap();
        assert_eq!(a.learning_rate(), 0.5);
        assert!(net.layers()[1].as_pool().is_some());
        Ok(())
    }

    #[test]
    fn test_add_builds_chain() -> Result<()> {
        let f = Filter::from_weights(vec![2.0], 1, 1, 1)?;
        let a = Activation::with_hyperparams(
            vec![f],
            Pointwise::Identity,
            ForwardParams::new(2, 1, 1, 1, 0),
            2,
            0.0,
        );
        let mut net = Convolution::default()
            .add(Pool::new(4, 1, 2, PoolKind::Avg)?)
            .add(a);
        assert_eq!(net.layers()[1].name(), "Activation");

        let y = net.forward(&[1.0; 16])?;
        assert_eq!(y, vec![2.0; 4]);
        // avg pooling broadcasts, so each input receives 2 * 1
        let dx = net.backward(&[1.0; 4])?;
        assert_eq!(dx, vec![2.0; 16]);
        Ok(())
    }

    #[test]
    fn test_networks_nest_through_the_trait() -> Result<()> {
        let mut stages: Vec<Box<dyn ConvolutionLayer>> = vec![
            Box::new(Convolution::new(vec![Pool::new(4, 1, 2, PoolKind::Max)?.into()])),
            Box::new(Convolution::new(vec![Pool::new(2, 1, 2, PoolKind::Avg)?.into()])),
        ];
        let mut x: Vec<f64> = (0..16).map(|i| i as f64).collect();
        for stage in &mut stages {
            x = stage.forward(&x)?;
        }
        // max -> [5, 7, 13, 15], then mean
        assert_eq!(x, vec![10.0]);
        Ok(())
    }
}
