use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use log::debug;
use ndarray::ArrayView2;

use super::key::encode_data_key;
use super::store::ParamStore;
use super::{AsyncUpdater, SharedParam, Updater};
use crate::error::{NetErr, Result};
use crate::layer::{Node, Visitor};

/// One gradient push in flight on the communication channel.
struct PushTask {
    key: i32,
    epoch: u64,
    grad: Vec<f32>,
    done: mpsc::Sender<Result<()>>,
}

/// Asynchronous updater backed by a [`ParamStore`].
///
/// `after_backprop` snapshots the accumulated gradient and enqueues a push
/// task on a dedicated worker thread, so the store apply for layer `k`
/// overlaps the backward computation of layers `k-1..0` on the compute
/// thread. Each task carries its own completion channel: `update_wait`
/// joins exactly that task, never unrelated in-flight work. At most one
/// update per weight key may be outstanding.
///
/// The synchronous `update`/`update_with` entry points are disabled by
/// contract and always fail.
pub struct AsyncPsUpdater {
    key: i32,
    tag: &'static str,
    param: SharedParam,
    store: Arc<dyn ParamStore>,
    tx: Option<mpsc::Sender<PushTask>>,
    pending: Option<mpsc::Receiver<Result<()>>>,
    worker: Option<JoinHandle<()>>,
}

impl AsyncPsUpdater {
    /// Builds the updater for one layer weight and registers its key (and
    /// current value) with the store.
    pub fn for_layer(
        layer_index: i32,
        tag: &'static str,
        store: Arc<dyn ParamStore>,
        param: SharedParam,
    ) -> Result<Self> {
        let key = encode_data_key(layer_index, tag)?;
        {
            let blk = param.lock();
            store.init_key(key, blk.weight.as_slice().unwrap())?;
        }

        let (tx, rx) = mpsc::channel::<PushTask>();
        let apply_store = Arc::clone(&store);
        let worker = thread::spawn(move || {
            while let Ok(task) = rx.recv() {
                debug!("async[{}]: applying push from epoch {}", task.key, task.epoch);
                let res = apply_store.push(task.key, &task.grad);
                // the bracket owner may have dropped without waiting
                let _ = task.done.send(res);
            }
        });

        Ok(Self {
            key,
            tag,
            param,
            store,
            tx: Some(tx),
            pending: None,
            worker: Some(worker),
        })
    }

    pub fn key(&self) -> i32 {
        self.key
    }

    fn disabled() -> NetErr {
        NetErr::Usage("async updater: call after_backprop instead of update")
    }
}

impl Updater for AsyncPsUpdater {
    fn init(&mut self) {
        debug!("async[{}]: serving tag {} from parameter store", self.key, self.tag);
    }

    fn set_param(&mut self, _name: &str, _val: &str) {
        // hyperparameters live on the store side
    }

    fn start_round(&mut self, _round: usize) {}

    fn update(&mut self, _epoch: u64) -> Result<()> {
        Err(Self::disabled())
    }

    fn update_with(&mut self, _epoch: u64, _grad: ArrayView2<f32>) -> Result<()> {
        Err(Self::disabled())
    }

    fn apply_visitor(&mut self, visitor: &mut dyn Visitor) {
        let blk = self.param.lock();
        visitor.visit(self.tag, blk.weight.view(), blk.grad.view());
    }
}

impl AsyncUpdater for AsyncPsUpdater {
    fn before_all_forward(&mut self) -> Result<()> {
        let mut blk = self.param.lock();
        self.store.pull(self.key, blk.weight.as_slice_mut().unwrap())
    }

    fn before_backprop(&mut self, _nodes_in: &[Node], _nodes_out: &[Node]) {
        // the layer accumulates this weight's gradient itself; layers that
        // recover gradients from their nodes hook in here
    }

    fn after_backprop(&mut self, do_update: bool, epoch: u64) -> Result<()> {
        if !do_update {
            return Ok(());
        }
        if self.pending.is_some() {
            return Err(NetErr::Usage(
                "async updater: previous update still in flight, call update_wait first",
            ));
        }

        let grad = {
            let mut blk = self.param.lock();
            let snapshot = blk.grad.as_slice().unwrap().to_vec();
            blk.grad.fill(0.0);
            snapshot
        };

        let (done_tx, done_rx) = mpsc::channel();
        let task = PushTask {
            key: self.key,
            epoch,
            grad,
            done: done_tx,
        };
        self.tx
            .as_ref()
            .ok_or(NetErr::Usage("async updater worker already shut down"))?
            .send(task)
            .map_err(|_| NetErr::Usage("async updater worker disconnected"))?;
        self.pending = Some(done_rx);
        Ok(())
    }

    fn update_wait(&mut self) -> Result<()> {
        match self.pending.take() {
            None => Ok(()),
            Some(done) => done
                .recv()
                .map_err(|_| NetErr::Usage("async updater worker disconnected"))?,
        }
    }
}

impl Drop for AsyncPsUpdater {
    fn drop(&mut self) {
        // closing the channel stops the worker loop
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
