use ndarray::Array4;

use super::{ConnectState, Layer, LayerParam, Node, Visitor};
use crate::error::{NetErr, Result};

/// Reduction applied to each kernel window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Max,
    Sum,
    Avg,
}

/// Spatial downsampling over kernel windows with padding and stride.
///
/// Forward pads the input spatially with zeros, slides a
/// `kernel_height × kernel_width` window at `stride`, and reduces each
/// window; average pooling additionally scales by `1/(kh·kw)`. The pooled
/// result is retained in `states[0]` so backward can route gradients
/// without recomputing window reductions; `states[1]` is an input-shaped
/// scratch buffer for the propagated gradient. Both live for the life of
/// the connection and are resized on shape changes only.
pub struct PoolingLayer {
    kind: PoolKind,
    param: LayerParam,
}

/// Output spatial extent for one dimension.
///
/// Ceiling division over window starts, with the numerator clamped so a
/// window is never counted as starting beyond the padded input; without the
/// clamp, `stride > kernel` would yield one extra output cell whenever
/// `input + 2*pad - kernel` is not a multiple of `stride`.
pub fn pool_out_dim(input: usize, kernel: usize, pad: usize, stride: usize) -> usize {
    let padded = input + 2 * pad;
    (padded - kernel + stride - 1).min(padded - 1) / stride + 1
}

impl PoolingLayer {
    pub fn new(kind: PoolKind) -> Self {
        Self {
            kind,
            param: LayerParam::default(),
        }
    }

    fn check_config(&self, h: usize, w: usize) -> Result<()> {
        let p = &self.param;
        if p.kernel_height == 0 || p.kernel_width == 0 {
            return Err(self.config_err("kernel_height/kernel_width must be set"));
        }
        if p.stride == 0 {
            return Err(self.config_err("stride must be positive"));
        }
        if p.kernel_height > h + 2 * p.pad_y || p.kernel_width > w + 2 * p.pad_x {
            return Err(self.config_err("kernel size exceeds padded input"));
        }
        Ok(())
    }

    fn config_err(&self, msg: &str) -> NetErr {
        NetErr::Config {
            layer: "pooling",
            msg: msg.into(),
        }
    }
}

impl Layer for PoolingLayer {
    fn set_param(&mut self, name: &str, val: &str) {
        self.param.set_param(name, val);
    }

    fn init_connection(
        &mut self,
        nodes_in: &[Node],
        nodes_out: &mut [Node],
        state: &mut ConnectState,
    ) -> Result<()> {
        if nodes_in.len() != 1 || nodes_out.len() != 1 {
            return Err(self.config_err("only 1-1 connections are supported"));
        }
        let (n, c, h, w) = nodes_in[0].shape();
        self.check_config(h, w)?;

        let oh = pool_out_dim(h, self.param.kernel_height, self.param.pad_y, self.param.stride);
        let ow = pool_out_dim(w, self.param.kernel_width, self.param.pad_x, self.param.stride);
        nodes_out[0].data = Array4::zeros((n, c, oh, ow));

        state.states = vec![
            Array4::zeros((n, c, oh, ow)),
            Array4::zeros((n, c, h, w)),
        ];
        Ok(())
    }

    fn on_batch_size_changed(
        &mut self,
        nodes_in: &[Node],
        nodes_out: &[Node],
        state: &mut ConnectState,
    ) {
        state.states[0] = Array4::zeros(nodes_out[0].data.raw_dim());
        state.states[1] = Array4::zeros(nodes_in[0].data.raw_dim());
    }

    fn forward(
        &mut self,
        _is_train: bool,
        nodes_in: &mut [Node],
        nodes_out: &mut [Node],
        state: &mut ConnectState,
    ) -> Result<()> {
        let kh = self.param.kernel_height;
        let kw = self.param.kernel_width;
        let stride = self.param.stride;
        let py = self.param.pad_y as isize;
        let px = self.param.pad_x as isize;

        let input = &nodes_in[0].data;
        let (n, c, h, w) = input.dim();
        let pooled = &mut state.states[0];
        let (_, _, oh, ow) = pooled.dim();
        let scale = 1.0 / (kh * kw) as f32;

        for i in 0..n {
            for ch in 0..c {
                for oy in 0..oh {
                    for ox in 0..ow {
                        let y0 = (oy * stride) as isize - py;
                        let x0 = (ox * stride) as isize - px;
                        let mut acc = match self.kind {
                            PoolKind::Max => f32::NEG_INFINITY,
                            PoolKind::Sum | PoolKind::Avg => 0.0,
                        };
                        for ky in 0..kh {
                            for kx in 0..kw {
                                let y = y0 + ky as isize;
                                let x = x0 + kx as isize;
                                // padding contributes zeros
                                let v = if y >= 0 && x >= 0 && (y as usize) < h && (x as usize) < w
                                {
                                    input[[i, ch, y as usize, x as usize]]
                                } else {
                                    0.0
                                };
                                match self.kind {
                                    PoolKind::Max => acc = acc.max(v),
                                    PoolKind::Sum | PoolKind::Avg => acc += v,
                                }
                            }
                        }
                        if self.kind == PoolKind::Avg {
                            acc *= scale;
                        }
                        pooled[[i, ch, oy, ox]] = acc;
                    }
                }
            }
        }
        nodes_out[0].data.assign(pooled);
        Ok(())
    }

    fn backprop(
        &mut self,
        prop_grad: bool,
        nodes_in: &mut [Node],
        nodes_out: &mut [Node],
        state: &mut ConnectState,
    ) -> Result<()> {
        if !prop_grad {
            return Ok(());
        }
        let kh = self.param.kernel_height;
        let kw = self.param.kernel_width;
        let stride = self.param.stride;
        let py = self.param.pad_y as isize;
        let px = self.param.pad_x as isize;
        let scale = 1.0 / (kh * kw) as f32;

        {
            let input = &nodes_in[0].data;
            let (n, c, h, w) = input.dim();
            let upstream = &nodes_out[0].data;
            let (_, _, oh, ow) = upstream.dim();
            let (cached, rest) = state.states.split_at_mut(1);
            let pooled = &cached[0];
            let scratch = &mut rest[0];
            scratch.fill(0.0);

            for i in 0..n {
                for ch in 0..c {
                    for oy in 0..oh {
                        for ox in 0..ow {
                            let g = upstream[[i, ch, oy, ox]];
                            let y0 = (oy * stride) as isize - py;
                            let x0 = (ox * stride) as isize - px;
                            match self.kind {
                                // Route the whole gradient to the first
                                // position matching the cached window max; a
                                // padding cell that won the max drops it,
                                // which is the crop-after-unpool result.
                                PoolKind::Max => {
                                    let top = pooled[[i, ch, oy, ox]];
                                    'window: for ky in 0..kh {
                                        for kx in 0..kw {
                                            let y = y0 + ky as isize;
                                            let x = x0 + kx as isize;
                                            let inside = y >= 0
                                                && x >= 0
                                                && (y as usize) < h
                                                && (x as usize) < w;
                                            let v = if inside {
                                                input[[i, ch, y as usize, x as usize]]
                                            } else {
                                                0.0
                                            };
                                            if v == top {
                                                if inside {
                                                    scratch
                                                        [[i, ch, y as usize, x as usize]] += g;
                                                }
                                                break 'window;
                                            }
                                        }
                                    }
                                }
                                PoolKind::Sum | PoolKind::Avg => {
                                    let part = if self.kind == PoolKind::Avg {
                                        g * scale
                                    } else {
                                        g
                                    };
                                    for ky in 0..kh {
                                        for kx in 0..kw {
                                            let y = y0 + ky as isize;
                                            let x = x0 + kx as isize;
                                            if y >= 0
                                                && x >= 0
                                                && (y as usize) < h
                                                && (x as usize) < w
                                            {
                                                scratch
                                                    [[i, ch, y as usize, x as usize]] += part;
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        nodes_in[0].data.assign(&state.states[1]);
        Ok(())
    }

    fn apply_visitor(&mut self, _visitor: &mut dyn Visitor) {
        // no learnable parameters
    }
}
