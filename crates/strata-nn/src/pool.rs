// Pool — fixed-factor reduction over space or over channels
//
// SPATIAL KINDS (Max, MaxAbs, Avg):
//
//   Each channel is cut into non-overlapping f×f blocks. Input [c, s, s]
//   becomes [c, s/f, s/f].
//
// CHANNEL KINDS (MaxChannel, MaxAbsChannel, AvgChannel):
//
//   Each group of f consecutive channels is reduced at every spatial position.
//   Input [c, s, s] becomes [c/f, s, s].
//
// REDUCTIONS:
//
//   Max     largest value
//   MaxAbs  value with the largest magnitude, sign kept
//   Avg     arithmetic mean
//
//   Ties go to the first element of the window in scan order.
//
// BACKWARD:
//
//   Max kinds route each output gradient to the input index that won the
//   forward reduction and leave zero elsewhere. Average kinds copy each output
//   gradient to every input of its window without dividing by the window size.
//
//   The routing is recorded by forward and consumed by the next backward.

use std::fmt;

use serde::{Deserialize, Serialize};
use strata_core::error::{ensure_len, Error, Result};
use strata_core::MapGeometry;

use crate::layer::ConvolutionLayer;

/// Reduction rule of a [`Pool`] layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    Max,
    MaxAbs,
    Avg,
    MaxChannel,
    MaxAbsChannel,
    AvgChannel,
}

impl PoolKind {
    pub const ALL: [PoolKind; 6] = [
        PoolKind::Max,
        PoolKind::MaxAbs,
        PoolKind::Avg,
        PoolKind::MaxChannel,
        PoolKind::MaxAbsChannel,
        PoolKind::AvgChannel,
    ];

    /// Whether the reduction runs across channels rather than space.
    pub fn is_channel(&self) -> bool {
        matches!(
            self,
            PoolKind::MaxChannel | PoolKind::MaxAbsChannel | PoolKind::AvgChannel
        )
    }

    pub fn is_average(&self) -> bool {
        matches!(self, PoolKind::Avg | PoolKind::AvgChannel)
    }

    pub fn name(&self) -> &'static str {
        match self {
            PoolKind::Max => "max",
            PoolKind::MaxAbs => "max_abs",
            PoolKind::Avg => "avg",
            PoolKind::MaxChannel => "max_channel",
            PoolKind::MaxAbsChannel => "max_abs_channel",
            PoolKind::AvgChannel => "avg_channel",
        }
    }

    /// Output geometry for `input` pooled by `factor`, or the configuration
    /// error the layer constructor would raise.
    pub fn output_geometry(&self, input: MapGeometry, factor: usize) -> Result<MapGeometry> {
        if factor == 0 {
            return Err(Error::msg("pooling factor must be at least 1"));
        }
        if self.is_channel() {
            if input.channels % factor != 0 {
                return Err(Error::PoolingFactor {
                    factor,
                    axis: "channel count",
                    dim: input.channels,
                });
            }
            Ok(MapGeometry::new(input.side, input.channels / factor))
        } else {
            if input.side % factor != 0 {
                return Err(Error::PoolingFactor {
                    factor,
                    axis: "side length",
                    dim: input.side,
                });
            }
            Ok(MapGeometry::new(input.side / factor, input.channels))
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Routing {
    /// Average kinds: every window element receives the output gradient.
    Broadcast,
    /// Max kinds: winning input index per output element.
    Argmax(Vec<usize>),
}

/// A pooling layer with fixed geometry.
#[derive(Debug, Clone)]
pub struct Pool {
    input: MapGeometry,
    output: MapGeometry,
    factor: usize,
    kind: PoolKind,
    pending: Option<Routing>,
}

impl Pool {
    /// Pool a `size × size × channels` map by `factor`.
    pub fn new(size: usize, channels: usize, factor: usize, kind: PoolKind) -> Result<Self> {
        let input = MapGeometry::new(size, channels);
        let output = kind.output_geometry(input, factor)?;
        Ok(Pool {
            input,
            output,
            factor,
            kind,
            pending: None,
        })
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }
    pub fn factor(&self) -> usize {
        self.factor
    }
    pub fn input_geometry(&self) -> MapGeometry {
        self.input
    }
    pub fn output_geometry(&self) -> MapGeometry {
        self.output
    }

    pub fn has_pending_forward(&self) -> bool {
        self.pending.is_some()
    }

    /// Input indices reduced into output element `o`, in scan order.
    fn fill_window(&self, o: usize, window: &mut Vec<usize>) {
        window.clear();
        let f = self.factor;
        if self.kind.is_channel() {
            let plane = self.input.plane();
            let (group, pos) = (o / plane, o % plane);
            window.extend((0..f).map(|k| (group * f + k) * plane + pos));
        } else {
            let p = self.output.side;
            let ch = o / self.output.plane();
            let (pr, pc) = ((o / p) % p, o % p);
            for r in 0..f {
                for c in 0..f {
                    window.push(self.input.index(ch, pr * f + r, pc * f + c));
                }
            }
        }
    }
}

fn argmax_by(input: &[f64], window: &[usize], key: impl Fn(f64) -> f64) -> usize {
    let mut best = window[0];
    for &i in &window[1..] {
        if key(input[i]) > key(input[best]) {
            best = i;
        }
    }
    best
}

impl ConvolutionLayer for Pool {
    fn forward(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        self.input.check("pool forward: input", input)?;

        let n = self.output.len();
        let mut out = Vec::with_capacity(n);
        let mut window = Vec::with_capacity(self.factor * self.factor);
        let routing = if self.kind.is_average() {
            for o in 0..n {
                self.fill_window(o, &mut window);
                let total: f64 = window.iter().map(|&i| input[i]).sum();
                out.push(total / window.len() as f64);
            }
            Routing::Broadcast
        } else {
            let by_magnitude = matches!(self.kind, PoolKind::MaxAbs | PoolKind::MaxAbsChannel);
            let mut indices = Vec::with_capacity(n);
            for o in 0..n {
                self.fill_window(o, &mut window);
                let best = if by_magnitude {
                    argmax_by(input, &window, f64::abs)
                } else {
                    argmax_by(input, &window, |x| x)
                };
                out.push(input[best]);
                indices.push(best);
            }
            Routing::Argmax(indices)
        };

        tracing::trace!(kind = %self.kind, input = %self.input, output = %self.output, "pool forward");
        self.pending = Some(routing);
        Ok(out)
    }

    fn backward(&mut self, loss: &[f64]) -> Result<Vec<f64>> {
        let routing = self
            .pending
            .as_ref()
            .ok_or(Error::BackwardBeforeForward("pool"))?;
        ensure_len("pool backward: gradient", self.output.len(), loss.len())?;

        let mut grad = vec![0.0; self.input.len()];
        match routing {
            Routing::Argmax(indices) => {
                for (&i, &g) in indices.iter().zip(loss) {
                    grad[i] += g;
                }
            }
            Routing::Broadcast => {
                let mut window = Vec::with_capacity(self.factor * self.factor);
                for (o, &g) in loss.iter().enumerate() {
                    self.fill_window(o, &mut window);
                    for &i in &window {
                        grad[i] += g;
                    }
                }
            }
        }

        self.pending = None;
        tracing::trace!(kind = %self.kind, "pool backward");
        Ok(grad)
    }

    fn name(&self) -> &'static str {
        "Pool"
    }
}
