use std::collections::HashMap;

use log::debug;
use parking_lot::Mutex;
use rayon::prelude::*;

use super::key::decode_tag;
use crate::error::{NetErr, Result};

/// Integer-keyed parameter store the asynchronous updater talks to.
///
/// `push` hands the store a gradient and lets it apply the update
/// server-side; `pull` reads the current weight back. Values are flat `f32`
/// slices; the transport behind a remote implementation is its own concern
/// (including any retry policy — none exists in this core).
pub trait ParamStore: Send + Sync {
    /// Declares a key and its initial weight value.
    fn init_key(&self, key: i32, value: &[f32]) -> Result<()>;

    /// Sends a gradient for `key`; the store applies it to its weight.
    fn push(&self, key: i32, grad: &[f32]) -> Result<()>;

    /// Copies the current weight for `key` into `out`.
    fn pull(&self, key: i32, out: &mut [f32]) -> Result<()>;
}

const APPLY_CHUNK: usize = 1024;

/// In-process parameter store.
///
/// Serves single-process training and tests; applies pushed gradients as a
/// plain descent step (`w -= eta·g`) in parallel chunks.
pub struct LocalStore {
    eta: f32,
    entries: Mutex<HashMap<i32, Vec<f32>>>,
}

impl LocalStore {
    pub fn new(eta: f32) -> Self {
        Self {
            eta,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl ParamStore for LocalStore {
    fn init_key(&self, key: i32, value: &[f32]) -> Result<()> {
        // reject keys that do not address a known weight role
        decode_tag(key)?;
        debug!("store: init key {key} with {} params", value.len());
        self.entries.lock().insert(key, value.to_vec());
        Ok(())
    }

    fn push(&self, key: i32, grad: &[f32]) -> Result<()> {
        let mut entries = self.entries.lock();
        let weight = entries.get_mut(&key).ok_or(NetErr::InvalidKey { key })?;
        if weight.len() != grad.len() {
            return Err(NetErr::Usage("pushed gradient does not match weight size"));
        }
        let eta = self.eta;
        weight
            .par_chunks_mut(APPLY_CHUNK)
            .zip(grad.par_chunks(APPLY_CHUNK))
            .for_each(|(w_chunk, g_chunk)| {
                for (w, g) in w_chunk.iter_mut().zip(g_chunk) {
                    *w -= eta * g;
                }
            });
        Ok(())
    }

    fn pull(&self, key: i32, out: &mut [f32]) -> Result<()> {
        let entries = self.entries.lock();
        let weight = entries.get(&key).ok_or(NetErr::InvalidKey { key })?;
        if weight.len() != out.len() {
            return Err(NetErr::Usage("pull buffer does not match weight size"));
        }
        out.copy_from_slice(weight);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::updater::key::encode_data_key;

    #[test]
    fn push_applies_descent_step() {
        let store = LocalStore::new(0.1);
        let key = encode_data_key(3, "wmat").unwrap();
        store.init_key(key, &[1.0, 1.0, 1.0]).unwrap();
        store.push(key, &[1.0, 0.0, -1.0]).unwrap();

        let mut out = [0.0; 3];
        store.pull(key, &mut out).unwrap();
        assert_eq!(out, [0.9, 1.0, 1.1]);
    }

    #[test]
    fn unknown_and_reserved_keys_fail() {
        let store = LocalStore::new(0.1);
        assert!(matches!(
            store.push(0, &[1.0]),
            Err(NetErr::InvalidKey { key: 0 })
        ));
        assert!(matches!(
            store.pull(1, &mut [0.0]),
            Err(NetErr::InvalidKey { key: 1 })
        ));
        // key % 4 == 2 is reserved space, not a weight role
        assert!(matches!(
            store.init_key(2, &[1.0]),
            Err(NetErr::InvalidKey { key: 2 })
        ));
    }

    #[test]
    fn size_mismatches_are_usage_errors() {
        let store = LocalStore::new(0.1);
        store.init_key(0, &[0.0, 0.0]).unwrap();
        assert!(matches!(store.push(0, &[1.0]), Err(NetErr::Usage(_))));
        assert!(matches!(store.pull(0, &mut [0.0]), Err(NetErr::Usage(_))));
    }
}
