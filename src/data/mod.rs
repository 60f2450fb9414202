pub mod instances;
pub mod mnist;

pub use instances::{InstVector, Instance, TensorVector};
pub use mnist::{Batch, BatchSource, MnistSource};
