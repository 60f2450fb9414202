use log::debug;
use ndarray::{Array2, ArrayView2};

use super::{SharedParam, Updater};
use crate::error::Result;
use crate::layer::Visitor;

/// Momentum SGD over one shared weight/gradient pair.
///
/// `weight += mom` where `mom = momentum·mom - lr·(grad + wd·weight)` and
/// the learning rate decays per round: `lr = eta · lr_decay^round`.
pub struct SgdUpdater {
    param: SharedParam,
    tag: &'static str,
    eta: f32,
    momentum: f32,
    wd: f32,
    lr_decay: f32,
    round: usize,
    mom: Array2<f32>,
}

impl SgdUpdater {
    pub fn new(param: SharedParam, tag: &'static str) -> Self {
        let shape = param.lock().shape();
        Self {
            param,
            tag,
            eta: 0.01,
            momentum: 0.0,
            wd: 0.0,
            lr_decay: 1.0,
            round: 0,
            mom: Array2::zeros(shape),
        }
    }

    fn lr(&self) -> f32 {
        self.eta * self.lr_decay.powi(self.round as i32)
    }

    fn step(&mut self, grad: ArrayView2<f32>, weight: &mut Array2<f32>) {
        let lr = self.lr();
        self.mom *= self.momentum;
        self.mom.scaled_add(-lr, &grad);
        self.mom.scaled_add(-lr * self.wd, weight);
        *weight += &self.mom;
    }
}

impl Updater for SgdUpdater {
    fn init(&mut self) {
        debug!(
            "sgd[{}]: eta={} momentum={} wd={} lr_decay={}",
            self.tag, self.eta, self.momentum, self.wd, self.lr_decay
        );
    }

    fn set_param(&mut self, name: &str, val: &str) {
        let Ok(v) = val.parse() else {
            return;
        };
        match name {
            "learning_rate" | "eta" => self.eta = v,
            "momentum" => self.momentum = v,
            "weight_decay" | "wd" => self.wd = v,
            "lr_decay" => self.lr_decay = v,
            _ => {}
        }
    }

    fn start_round(&mut self, round: usize) {
        self.round = round;
    }

    fn update(&mut self, _epoch: u64) -> Result<()> {
        let param = self.param.clone();
        let mut blk = param.lock();
        let grad = blk.grad.clone();
        self.step(grad.view(), &mut blk.weight);
        blk.grad.fill(0.0);
        Ok(())
    }

    fn update_with(&mut self, _epoch: u64, grad: ArrayView2<f32>) -> Result<()> {
        let param = self.param.clone();
        let mut blk = param.lock();
        self.step(grad, &mut blk.weight);
        Ok(())
    }

    fn apply_visitor(&mut self, visitor: &mut dyn Visitor) {
        let blk = self.param.lock();
        visitor.visit(self.tag, blk.weight.view(), blk.grad.view());
    }
}
