use std::fs;

use log::info;
use ndarray::{ArrayView2, ArrayView4, Ix1, Ix3};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use super::instances::InstVector;
use crate::error::{NetErr, Result};

/// Pixel bytes are rescaled by this at load time (0..255 maps into [0, 1)).
pub const PIXEL_SCALE: f32 = 1.0 / 256.0;

const IMAGE_MAGIC: u32 = 2051;
const LABEL_MAGIC: u32 = 2049;

// Base seed for the shuffle rng; `seed_data` offsets it.
const RAND_MAGIC: u64 = 0;

/// A borrowed, fixed-shape mini-batch view into the source's buffers.
///
/// Lifetime is bounded by the source; a batch cannot be retained past the
/// next `next()` call (the borrow checker enforces this).
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    /// batch × channel × height × width
    pub data: ArrayView4<'a, f32>,
    /// batch × label_width
    pub label: ArrayView2<'a, f32>,
    /// Stable instance identities for this batch, when the source tracks them.
    pub inst_index: Option<&'a [u32]>,
    pub batch_size: usize,
}

/// A lazy, restartable sequence of mini-batches over a dataset.
pub trait BatchSource {
    /// Configures the source; unrecognized keys are silently ignored.
    fn set_param(&mut self, name: &str, val: &str);

    /// One-time load (and optional shuffle). Must be called before `next`.
    fn init(&mut self) -> Result<()>;

    /// Resets the read cursor without reloading or reshuffling.
    fn before_first(&mut self);

    /// Advances by one batch; `None` signals end of epoch and leaves the
    /// source ready for `before_first`.
    fn next(&mut self) -> Option<Batch<'_>>;
}

/// Batch source over the MNIST binary format.
///
/// Both files are big-endian IDX: the image file carries
/// `magic(2051) | count | rows | cols` then `count*rows*cols` bytes, the
/// label file `magic(2049) | count` then `count` bytes. Instances live in an
/// [`InstVector`], so batch views are carved out of its arena without
/// copying.
pub struct MnistSource {
    batch_size: usize,
    shuffle: bool,
    silent: bool,
    flat: bool,
    inst_offset: u32,
    seed: u64,
    path_img: String,
    path_label: String,

    insts: InstVector,
    rows: usize,
    cols: usize,
    loc: usize,
}

impl MnistSource {
    pub fn new() -> Self {
        Self {
            batch_size: 0,
            shuffle: false,
            silent: false,
            flat: false,
            inst_offset: 0,
            seed: 0,
            path_img: String::new(),
            path_label: String::new(),
            insts: InstVector::new(),
            rows: 0,
            cols: 0,
            loc: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// Parses raw image and label payloads instead of reading files.
    pub fn load_parts(&mut self, img: &[u8], label: &[u8]) -> Result<()> {
        if self.batch_size == 0 {
            return Err(NetErr::Config {
                layer: "mnist",
                msg: "batch_size must be set before init".into(),
            });
        }
        self.load_images(img)?;
        self.load_labels(label)?;
        if self.shuffle {
            self.shuffle_instances();
        }
        self.loc = 0;
        if !self.silent {
            info!(
                "mnist: loaded {} images, shuffle={}, shape={}x{}x{}x{}",
                self.len(),
                self.shuffle,
                self.batch_size,
                1,
                self.rows,
                self.cols
            );
        }
        Ok(())
    }

    fn load_images(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < 16 {
            return Err(NetErr::Format {
                what: "mnist image header",
                expected: 16,
                got: data.len(),
            });
        }
        let magic = read_u32_be(data, 0);
        if magic != IMAGE_MAGIC {
            return Err(NetErr::BadMagic {
                what: "mnist image file",
                expected: IMAGE_MAGIC,
                got: magic,
            });
        }
        let count = read_u32_be(data, 4) as usize;
        let rows = read_u32_be(data, 8) as usize;
        let cols = read_u32_be(data, 12) as usize;
        let expected = 16 + count * rows * cols;
        if data.len() < expected {
            return Err(NetErr::Format {
                what: "mnist image payload",
                expected,
                got: data.len(),
            });
        }

        self.rows = rows;
        self.cols = cols;
        self.insts.clear();
        let pixels = rows * cols;
        for i in 0..count {
            self.insts
                .push(i as u32 + self.inst_offset, Ix3(1, rows, cols), Ix1(1));
            let src = &data[16 + i * pixels..16 + (i + 1) * pixels];
            let mut dst = self.insts.back_data_mut()?;
            let dst = dst.as_slice_mut().unwrap();
            for (d, &s) in dst.iter_mut().zip(src) {
                *d = s as f32 * PIXEL_SCALE;
            }
        }
        Ok(())
    }

    fn load_labels(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < 8 {
            return Err(NetErr::Format {
                what: "mnist label header",
                expected: 8,
                got: data.len(),
            });
        }
        let magic = read_u32_be(data, 0);
        if magic != LABEL_MAGIC {
            return Err(NetErr::BadMagic {
                what: "mnist label file",
                expected: LABEL_MAGIC,
                got: magic,
            });
        }
        let count = read_u32_be(data, 4) as usize;
        let expected = 8 + count;
        if data.len() < expected {
            return Err(NetErr::Format {
                what: "mnist label payload",
                expected,
                got: data.len(),
            });
        }
        if count != self.len() {
            return Err(NetErr::Format {
                what: "mnist label count",
                expected: self.len(),
                got: count,
            });
        }
        for i in 0..count {
            self.insts.label_mut_at(i)?.fill(data[8 + i] as f32);
        }
        Ok(())
    }

    /// Deterministic given the same `seed_data`: permutes instance order with
    /// a seeded rng and rewrites the arena through `InstVector::reorder`.
    fn shuffle_instances(&mut self) {
        let mut rng = StdRng::seed_from_u64(RAND_MAGIC + self.seed);
        let mut perm: Vec<usize> = (0..self.len()).collect();
        perm.shuffle(&mut rng);
        // perm is a permutation of 0..len by construction.
        self.insts.reorder(&perm).unwrap();
    }
}

impl Default for MnistSource {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchSource for MnistSource {
    fn set_param(&mut self, name: &str, val: &str) {
        match name {
            "batch_size" => {
                if let Ok(v) = val.parse() {
                    self.batch_size = v;
                }
            }
            "shuffle" => {
                if let Ok(v) = val.parse::<i32>() {
                    self.shuffle = v != 0;
                }
            }
            "silent" => {
                if let Ok(v) = val.parse::<i32>() {
                    self.silent = v != 0;
                }
            }
            "input_flat" => {
                if let Ok(v) = val.parse::<i32>() {
                    self.flat = v != 0;
                }
            }
            "index_offset" => {
                if let Ok(v) = val.parse() {
                    self.inst_offset = v;
                }
            }
            "path_img" => self.path_img = val.to_owned(),
            "path_label" => self.path_label = val.to_owned(),
            "seed_data" => {
                if let Ok(v) = val.parse() {
                    self.seed = v;
                }
            }
            _ => {}
        }
    }

    fn init(&mut self) -> Result<()> {
        let img = fs::read(&self.path_img)?;
        let label = fs::read(&self.path_label)?;
        self.load_parts(&img, &label)
    }

    fn before_first(&mut self) {
        self.loc = 0;
    }

    fn next(&mut self) -> Option<Batch<'_>> {
        let bs = self.batch_size;
        if self.loc + bs > self.len() {
            return None;
        }
        let loc = self.loc;
        self.loc += bs;

        let pixels = self.rows * self.cols;
        let data_slice = &self.insts.data_store().content()[loc * pixels..(loc + bs) * pixels];
        let shape = if self.flat {
            (bs, 1, 1, pixels)
        } else {
            (bs, 1, self.rows, self.cols)
        };
        let data = ArrayView4::from_shape(shape, data_slice).unwrap();
        let label_slice = &self.insts.label_store().content()[loc..loc + bs];
        let label = ArrayView2::from_shape((bs, 1), label_slice).unwrap();
        Some(Batch {
            data,
            label,
            inst_index: Some(&self.insts.indices()[loc..loc + bs]),
            batch_size: bs,
        })
    }
}

fn read_u32_be(data: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

/// Builds an image payload in the on-disk format (big-endian header + raw
/// row-major bytes). Intended for tests and tooling.
pub fn build_image_bytes(images: &[&[u8]], rows: u32, cols: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&IMAGE_MAGIC.to_be_bytes());
    buf.extend_from_slice(&(images.len() as u32).to_be_bytes());
    buf.extend_from_slice(&rows.to_be_bytes());
    buf.extend_from_slice(&cols.to_be_bytes());
    for img in images {
        buf.extend_from_slice(img);
    }
    buf
}

/// Builds a label payload in the on-disk format. Intended for tests and
/// tooling.
pub fn build_label_bytes(labels: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&LABEL_MAGIC.to_be_bytes());
    buf.extend_from_slice(&(labels.len() as u32).to_be_bytes());
    buf.extend_from_slice(labels);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_source(n: usize, batch_size: usize, extra: &[(&str, &str)]) -> MnistSource {
        let images: Vec<Vec<u8>> = (0..n).map(|i| vec![i as u8; 4]).collect();
        let refs: Vec<&[u8]> = images.iter().map(|v| v.as_slice()).collect();
        let img = build_image_bytes(&refs, 2, 2);
        let labels: Vec<u8> = (0..n).map(|i| (i % 10) as u8).collect();
        let lbl = build_label_bytes(&labels);

        let mut src = MnistSource::new();
        src.set_param("batch_size", &batch_size.to_string());
        src.set_param("silent", "1");
        for (k, v) in extra {
            src.set_param(k, v);
        }
        src.load_parts(&img, &lbl).unwrap();
        src
    }

    #[test]
    fn pixels_are_scaled_by_one_over_256() {
        let img = build_image_bytes(&[&[0, 128, 255, 64]], 2, 2);
        let lbl = build_label_bytes(&[3]);
        let mut src = MnistSource::new();
        src.set_param("batch_size", "1");
        src.set_param("silent", "1");
        src.load_parts(&img, &lbl).unwrap();

        let b = src.next().unwrap();
        assert_eq!(b.data[[0, 0, 0, 1]], 128.0 / 256.0);
        assert_eq!(b.data[[0, 0, 1, 0]], 255.0 / 256.0);
        assert_eq!(b.label[[0, 0]], 3.0);
    }

    #[test]
    fn truncated_payload_reports_byte_counts() {
        let mut img = build_image_bytes(&[&[0u8; 4], &[1u8; 4]], 2, 2);
        img.truncate(img.len() - 3);
        let lbl = build_label_bytes(&[0, 1]);
        let mut src = MnistSource::new();
        src.set_param("batch_size", "1");
        let err = src.load_parts(&img, &lbl).unwrap_err();
        match err {
            NetErr::Format {
                expected, got, ..
            } => {
                assert_eq!(expected, 24);
                assert_eq!(got, 21);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut img = build_image_bytes(&[&[0u8; 4]], 2, 2);
        img[3] = 9;
        let lbl = build_label_bytes(&[0]);
        let mut src = MnistSource::new();
        src.set_param("batch_size", "1");
        assert!(matches!(
            src.load_parts(&img, &lbl),
            Err(NetErr::BadMagic { .. })
        ));
    }

    #[test]
    fn epoch_yields_full_batches_then_none_then_restarts() {
        let mut src = make_source(25, 10, &[]);

        let first: Vec<f32> = src.next().unwrap().data.iter().copied().collect();
        assert!(src.next().is_some());
        assert!(src.next().is_none());

        src.before_first();
        let again: Vec<f32> = src.next().unwrap().data.iter().copied().collect();
        assert_eq!(first, again);
    }

    #[test]
    fn shuffle_is_a_seeded_bijection() {
        let plain = make_source(16, 4, &[]);
        let shuffled = make_source(16, 4, &[("shuffle", "1"), ("seed_data", "42")]);
        let shuffled_again = make_source(16, 4, &[("shuffle", "1"), ("seed_data", "42")]);

        let mut ids: Vec<u32> = shuffled.insts.indices().to_vec();
        assert_eq!(shuffled_again.insts.indices(), ids.as_slice());
        assert_ne!(plain.insts.indices(), ids.as_slice());

        ids.sort_unstable();
        let expect: Vec<u32> = (0..16).collect();
        assert_eq!(ids, expect);

        // Instance content travels with its identity.
        for i in 0..16 {
            let inst = shuffled.insts.at(i).unwrap();
            assert_eq!(inst.data[[0, 0, 0]], inst.index as f32 / 256.0);
        }
    }

    #[test]
    fn index_offset_shifts_identities() {
        let src = make_source(3, 1, &[("index_offset", "100")]);
        assert_eq!(src.insts.indices(), &[100, 101, 102]);
    }

    #[test]
    fn flat_mode_reshapes_batches() {
        let mut src = make_source(2, 2, &[("input_flat", "1")]);
        let b = src.next().unwrap();
        assert_eq!(b.data.dim(), (2, 1, 1, 4));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut src = MnistSource::new();
        src.set_param("no_such_key", "17");
        src.set_param("batch_size", "not a number");
        assert_eq!(src.batch_size, 0);
    }
}
