use ndarray::{ArrayView, ArrayView1, ArrayView3, ArrayViewMut, Dimension, Ix1, Ix3};

use crate::error::{NetErr, Result};

/// Memory-compact sequence of tensors that do not have to share a shape.
///
/// All elements live in one contiguous arena; a parallel offset table
/// (`len + 1` entries, starting at 0) and a shape table describe where each
/// tensor begins and how to view it. Access hands out views into the arena,
/// never copies. The trade is higher indexing cost for zero per-instance
/// allocation, which is what makes holding thousands of differently sized
/// instances in one pass viable.
#[derive(Debug, Clone)]
pub struct TensorVector<D: Dimension> {
    offset: Vec<usize>,
    content: Vec<f32>,
    shape: Vec<D>,
}

impl<D: Dimension> TensorVector<D> {
    pub fn new() -> Self {
        Self {
            offset: vec![0],
            content: Vec::new(),
            shape: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.shape.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shape.is_empty()
    }

    /// Appends a zero-initialized tensor of the given shape.
    ///
    /// The new slot is writable through [`TensorVector::back_mut`].
    pub fn push(&mut self, shape: D) {
        let end = self.offset[self.len()] + shape.size();
        self.shape.push(shape);
        self.offset.push(end);
        self.content.resize(end, 0.0);
    }

    /// Returns a borrowed view of the i-th tensor.
    pub fn get(&self, i: usize) -> Result<ArrayView<'_, f32, D>> {
        self.check(i)?;
        let slice = &self.content[self.offset[i]..self.offset[i + 1]];
        Ok(ArrayView::from_shape(self.shape[i].clone(), slice).unwrap())
    }

    /// Returns a mutable view of the i-th tensor.
    pub fn get_mut(&mut self, i: usize) -> Result<ArrayViewMut<'_, f32, D>> {
        self.check(i)?;
        let slice = &mut self.content[self.offset[i]..self.offset[i + 1]];
        Ok(ArrayViewMut::from_shape(self.shape[i].clone(), slice).unwrap())
    }

    pub fn back(&self) -> Result<ArrayView<'_, f32, D>> {
        self.get(self.len().wrapping_sub(1))
    }

    pub fn back_mut(&mut self) -> Result<ArrayViewMut<'_, f32, D>> {
        self.get_mut(self.len().wrapping_sub(1))
    }

    /// Resets to zero tensors without releasing the backing capacity.
    pub fn clear(&mut self) {
        self.offset.clear();
        self.offset.push(0);
        self.content.clear();
        self.shape.clear();
    }

    /// The raw contiguous arena. Element `i` spans
    /// `offset(i)..offset(i) + shape_i.size()`.
    pub fn content(&self) -> &[f32] {
        &self.content
    }

    pub fn content_mut(&mut self) -> &mut [f32] {
        &mut self.content
    }

    pub fn offset(&self, i: usize) -> usize {
        self.offset[i]
    }

    fn check(&self, i: usize) -> Result<()> {
        if i >= self.len() {
            return Err(NetErr::OutOfRange {
                index: i,
                len: self.len(),
            });
        }
        Ok(())
    }
}

impl<D: Dimension> Default for TensorVector<D> {
    fn default() -> Self {
        Self::new()
    }
}

/// One training instance, borrowed from an [`InstVector`].
#[derive(Debug)]
pub struct Instance<'a> {
    /// Stable identity: original dataset position plus a configurable offset.
    pub index: u32,
    pub data: ArrayView3<'a, f32>,
    pub label: ArrayView1<'a, f32>,
}

/// Holder of a sequence of training instances whose per-instance tensors may
/// each have a different shape.
///
/// Append-only during load, read-only during epochs; the owning batch source
/// serializes all access. A full re-shuffle pass goes through
/// [`InstVector::reorder`], which rewrites storage order but not content.
#[derive(Debug, Clone, Default)]
pub struct InstVector {
    index: Vec<u32>,
    data: TensorVector<Ix3>,
    label: TensorVector<Ix1>,
}

impl InstVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Appends a zero-filled instance; fill it through the `back_*` views.
    pub fn push(&mut self, index: u32, dshape: Ix3, lshape: Ix1) {
        self.index.push(index);
        self.data.push(dshape);
        self.label.push(lshape);
    }

    pub fn at(&self, i: usize) -> Result<Instance<'_>> {
        Ok(Instance {
            index: *self.index.get(i).ok_or(NetErr::OutOfRange {
                index: i,
                len: self.len(),
            })?,
            data: self.data.get(i)?,
            label: self.label.get(i)?,
        })
    }

    pub fn back(&self) -> Result<Instance<'_>> {
        self.at(self.len().wrapping_sub(1))
    }

    pub fn back_data_mut(&mut self) -> Result<ndarray::ArrayViewMut3<'_, f32>> {
        self.data.back_mut()
    }

    pub fn back_label_mut(&mut self) -> Result<ndarray::ArrayViewMut1<'_, f32>> {
        self.label.back_mut()
    }

    pub fn label_mut_at(&mut self, i: usize) -> Result<ndarray::ArrayViewMut1<'_, f32>> {
        self.label.get_mut(i)
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.data.clear();
        self.label.clear();
    }

    pub fn indices(&self) -> &[u32] {
        &self.index
    }

    pub fn data_store(&self) -> &TensorVector<Ix3> {
        &self.data
    }

    pub fn label_store(&self) -> &TensorVector<Ix1> {
        &self.label
    }

    /// Rewrites storage so instance `i` becomes the old instance `perm[i]`.
    ///
    /// Materializes reordered copies into temporaries and copies back: an
    /// O(N) full-buffer rewrite, not an in-place swap, so the identity array
    /// keeps recording where each instance came from. Only valid when `perm`
    /// is a permutation of `0..len`.
    pub fn reorder(&mut self, perm: &[usize]) -> Result<()> {
        if perm.len() != self.len() {
            return Err(NetErr::OutOfRange {
                index: perm.len(),
                len: self.len(),
            });
        }
        let mut index = Vec::with_capacity(self.len());
        let mut data = TensorVector::new();
        let mut label = TensorVector::new();
        for &src in perm {
            let inst = self.at(src)?;
            index.push(inst.index);
            data.push(inst.data.raw_dim());
            label.push(inst.label.raw_dim());
            data.back_mut()?.assign(&inst.data);
            label.back_mut()?.assign(&inst.label);
        }
        self.index = index;
        self.data = data;
        self.label = label;
        Ok(())
    }
}
