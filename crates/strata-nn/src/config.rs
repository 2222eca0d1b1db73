// NetworkConfig — declarative description of a convolution network
//
// A network is described by the side length of every map it produces plus one
// LayerSpec per layer:
//
//   layer_sizes = [s0, s1, ..., sN]      s0 is the input side
//   layers      = [L0, L1, ..., L(N-1)]  Li maps side s(i) to side s(i+1)
//
// Everything else is derived while planning:
//
//   Activation  pad      = ((s(i+1) - 1) * step + filter_size - s(i)) / 2
//               channels = number of filters
//   Pool        spatial kinds require s(i+1) = s(i) / factor
//               channel kinds require s(i+1) = s(i), channels /= factor
//
// A negative or odd pad numerator, or a pooling factor that does not divide
// its dimension, is a configuration error.
//
// Example (JSON):
//
//   {
//     "layer_sizes": [8, 8, 4],
//     "input_channels": 1,
//     "layers": [
//       { "type": "activation", "pointwise": "ReLU", "filter_size": 3, "step": 1, "filters": 4 },
//       { "type": "pool", "kind": "max", "factor": 2 }
//     ]
//   }

use serde::{Deserialize, Serialize};
use strata_core::error::{Error, Result};
use strata_core::MapGeometry;

use crate::activation::{ForwardParams, DEFAULT_LEARNING_RATE};
use crate::pointwise::Pointwise;
use crate::pool::PoolKind;

/// One layer of a [`NetworkConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Activation {
        #[serde(default)]
        pointwise: Pointwise,
        filter_size: usize,
        #[serde(default = "default_step")]
        step: usize,
        filters: usize,
    },
    Pool {
        kind: PoolKind,
        factor: usize,
    },
}

fn default_step() -> usize {
    1
}

fn default_learning_rate() -> f64 {
    DEFAULT_LEARNING_RATE
}

/// Layer sizes, layer descriptors and training settings for a network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Side length of the input followed by the output side of every layer.
    pub layer_sizes: Vec<usize>,
    pub layers: Vec<LayerSpec>,
    pub input_channels: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
}

/// A layer with its geometry fully resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerPlan {
    Activation {
        pointwise: Pointwise,
        params: ForwardParams,
        filters: usize,
        /// Output side, which is also the side of the incoming gradient.
        loss_size: usize,
    },
    Pool {
        input: MapGeometry,
        kind: PoolKind,
        factor: usize,
    },
}

impl NetworkConfig {
    /// Start a configuration for `input_side × input_side × input_channels` inputs.
    pub fn new(input_side: usize, input_channels: usize) -> Self {
        NetworkConfig {
            layer_sizes: vec![input_side],
            layers: Vec::new(),
            input_channels,
            learning_rate: DEFAULT_LEARNING_RATE,
        }
    }

    /// Append an activation layer producing maps of side `out_side`.
    pub fn activation(
        mut self,
        out_side: usize,
        pointwise: Pointwise,
        filter_size: usize,
        step: usize,
        filters: usize,
    ) -> Self {
        self.layer_sizes.push(out_side);
        self.layers.push(LayerSpec::Activation {
            pointwise,
            filter_size,
            step,
            filters,
        });
        self
    }

    /// Append a pooling layer producing maps of side `out_side`.
    pub fn pool(mut self, out_side: usize, kind: PoolKind, factor: usize) -> Self {
        self.layer_sizes.push(out_side);
        self.layers.push(LayerSpec::Pool { kind, factor });
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn input_geometry(&self) -> MapGeometry {
        MapGeometry::new(self.layer_sizes.first().copied().unwrap_or(0), self.input_channels)
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: NetworkConfig = serde_json::from_str(json)
            .map_err(|e| Error::msg(format!("invalid network config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::msg(format!("cannot serialize network config: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        self.plan().map(|_| ())
    }

    /// Resolve the geometry of every layer.
    pub fn plan(&self) -> Result<Vec<LayerPlan>> {
        if self.layer_sizes.len() != self.layers.len() + 1 {
            return Err(Error::msg(format!(
                "network config: {} layers need {} layer sizes, got {}",
                self.layers.len(),
                self.layers.len() + 1,
                self.layer_sizes.len()
            )));
        }
        if self.input_channels == 0 {
            return Err(Error::msg("network config: input channels must be at least 1"));
        }

        let mut current = self.input_geometry();
        let mut plans = Vec::with_capacity(self.layers.len());
        for (i, spec) in self.layers.iter().enumerate() {
            let out_side = self.layer_sizes[i + 1];
            if out_side == 0 {
                return Err(Error::msg(format!("layer {i}: output side must be at least 1")));
            }
            match *spec {
                LayerSpec::Activation {
                    pointwise,
                    filter_size,
                    step,
                    filters,
                } => {
                    if filters == 0 {
                        return Err(Error::msg(format!("layer {i}: activation needs at least one filter")));
                    }
                    if step == 0 {
                        return Err(Error::msg(format!("layer {i}: step must be at least 1")));
                    }
                    pointwise
                        .validate()
                        .map_err(|e| Error::msg(format!("layer {i}: {e}")))?;
                    let pad = auto_pad(current.side, out_side, filter_size, step)
                        .map_err(|e| Error::msg(format!("layer {i}: {e}")))?;
                    let params =
                        ForwardParams::new(current.side, filter_size, step, current.channels, pad);
                    let produced = params.output_size()?;
                    if produced != out_side {
                        return Err(Error::msg(format!(
                            "layer {i}: activation produces side {produced}, configured {out_side}"
                        )));
                    }
                    plans.push(LayerPlan::Activation {
                        pointwise,
                        params,
                        filters,
                        loss_size: out_side,
                    });
                    current = MapGeometry::new(out_side, filters);
                }
                LayerSpec::Pool { kind, factor } => {
                    let next = kind.output_geometry(current, factor)?;
                    if next.side != out_side {
                        return Err(Error::msg(format!(
                            "layer {i}: {kind} pooling by {factor} produces side {}, configured {out_side}",
                            next.side
                        )));
                    }
                    plans.push(LayerPlan::Pool {
                        input: current,
                        kind,
                        factor,
                    });
                    current = next;
                }
            }
        }
        Ok(plans)
    }
}

/// Padding that makes a `filter_size`/`step` convolution map `in_side` to
/// `out_side`.
pub fn auto_pad(in_side: usize, out_side: usize, filter_size: usize, step: usize) -> Result<usize> {
    let numerator =
        (out_side as i64 - 1) * step as i64 + filter_size as i64 - in_side as i64;
    if numerator < 0 {
        return Err(Error::msg(format!(
            "cannot reach side {out_side} from {in_side} with filter {filter_size} and step {step}: \
             the output would need negative padding"
        )));
    }
    if numerator % 2 != 0 {
        return Err(Error::msg(format!(
            "cannot reach side {out_side} from {in_side} with filter {filter_size} and step {step}: \
             padding would be uneven"
        )));
    }
    Ok((numerator / 2) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_pad() {
        assert_eq!(auto_pad(8, 8, 3, 1).unwrap(), 1);
        assert_eq!(auto_pad(4, 3, 2, 1).unwrap(), 0);
        assert_eq!(auto_pad(7, 4, 3, 2).unwrap(), 1);
        assert!(auto_pad(4, 2, 2, 1).is_err()); // negative
        assert!(auto_pad(4, 4, 2, 1).is_err()); // odd
    }

    #[test]
    fn test_plan_tracks_channels() -> Result<()> {
        let config = NetworkConfig::new(8, 3)
            .activation(8, Pointwise::ReLU, 3, 1, 4)
            .pool(8, PoolKind::MaxChannel, 2)
            .pool(4, PoolKind::Avg, 2);
        let plans = config.plan()?;
        assert_eq!(plans.len(), 3);
        match &plans[0] {
            LayerPlan::Activation { params, filters, .. } => {
                assert_eq!(*params, ForwardParams::new(8, 3, 1, 3, 1));
                assert_eq!(*filters, 4);
            }
            other => panic!("unexpected plan {other:?}"),
        }
        // the channel pool sees the pre-division channel count
        assert_eq!(
            plans[1],
            LayerPlan::Pool {
                input: MapGeometry::new(8, 4),
                kind: PoolKind::MaxChannel,
                factor: 2
            }
        );
        assert_eq!(
            plans[2],
            LayerPlan::Pool {
                input: MapGeometry::new(8, 2),
                kind: PoolKind::Avg,
                factor: 2
            }
        );
        Ok(())
    }

    #[test]
    fn test_plan_rejects_bad_configs() {
        // size count mismatch
        let mut config = NetworkConfig::new(4, 1).activation(3, Pointwise::Identity, 2, 1, 1);
        config.layer_sizes.push(2);
        assert!(config.validate().is_err());

        // spatial pool output must equal in / factor
        let config = NetworkConfig::new(4, 1).pool(4, PoolKind::Max, 2);
        assert!(config.validate().is_err());

        // factor does not divide the side
        let config = NetworkConfig::new(5, 1).pool(2, PoolKind::Avg, 2);
        assert!(matches!(config.validate(), Err(Error::PoolingFactor { .. })));

        // channel pool over a single channel
        let config = NetworkConfig::new(4, 1).pool(4, PoolKind::AvgChannel, 2);
        assert!(config.validate().is_err());

        // no filters
        let config = NetworkConfig::new(4, 1).activation(3, Pointwise::Identity, 2, 1, 0);
        assert!(config.validate().is_err());

        // strided output not reachable with symmetric padding
        let config = NetworkConfig::new(6, 1).activation(3, Pointwise::Identity, 3, 2, 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_plan_rejects_undefined_pointwise_parameters() -> Result<()> {
        let config =
            NetworkConfig::new(4, 1).activation(4, Pointwise::Sigmoid { base: -1.0 }, 3, 1, 1);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("layer 0"));

        let json = r#"{
            "layer_sizes": [4, 4],
            "input_channels": 1,
            "layers": [
                { "type": "activation", "pointwise": { "SELU": { "alpha": 1.5, "lambda": 2.0 } },
                  "filter_size": 3, "filters": 1 }
            ]
        }"#;
        NetworkConfig::from_json(json)?.validate()
    }

    #[test]
    fn test_json_roundtrip() -> Result<()> {
        let json = r#"{
            "layer_sizes": [8, 8, 4],
            "input_channels": 1,
            "layers": [
                { "type": "activation", "pointwise": "ReLU", "filter_size": 3, "filters": 4 },
                { "type": "pool", "kind": "max", "factor": 2 }
            ]
        }"#;
        let config = NetworkConfig::from_json(json)?;
        assert_eq!(config.learning_rate, DEFAULT_LEARNING_RATE);
        assert_eq!(
            config.layers[0],
            LayerSpec::Activation {
                pointwise: Pointwise::ReLU,
                filter_size: 3,
                step: 1,
                filters: 4
            }
        );
        let back = NetworkConfig::from_json(&config.to_json()?)?;
        assert_eq!(back, config);
        Ok(())
    }

    #[test]
    fn test_from_json_reports_parse_errors() {
        assert!(NetworkConfig::from_json("{").is_err());
        assert!(NetworkConfig::from_json(r#"{"layer_sizes": [4], "layers": []}"#).is_err());
    }
}
