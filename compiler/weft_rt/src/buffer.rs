//! The buffer descriptor shared with emitted code.
//!
//! A [`BufferT`] describes up to four dimensions of strided data with a
//! host pointer, an opaque device handle, and the two dirty bits the
//! consistency protocol maintains. Unused dimensions have extent 1 and
//! stride 0. The layout is part of the ABI; emitted code indexes these
//! fields directly.

/// A buffer crossing the pipeline boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BufferT {
    /// Host data, or null when the buffer lives only on the device.
    pub host: *mut u8,
    /// Opaque device allocation handle; 0 when absent.
    pub dev: u64,
    /// The host copy has writes the device has not seen.
    pub host_dirty: bool,
    /// The device copy has writes the host has not seen.
    pub dev_dirty: bool,
    pub extent: [i32; 4],
    pub stride: [i32; 4],
    pub min: [i32; 4],
    pub elem_size: i32,
}

impl BufferT {
    /// A dense host buffer over `extents`, backed by `host`.
    pub fn dense(host: *mut u8, extents: &[i32], elem_size: i32) -> BufferT {
        let mut extent = [1i32; 4];
        let mut stride = [0i32; 4];
        let mut acc = 1i32;
        for (d, e) in extents.iter().enumerate().take(4) {
            extent[d] = *e;
            stride[d] = acc;
            acc *= *e;
        }
        BufferT {
            host,
            dev: 0,
            host_dirty: false,
            dev_dirty: false,
            extent,
            stride,
            min: [0; 4],
            elem_size,
        }
    }

    /// The number of used dimensions: one past the last dimension whose
    /// extent or stride differs from the unused defaults.
    pub fn dimensions(&self) -> usize {
        let mut dims = 0;
        for d in 0..4 {
            if self.extent[d] != 1 || self.stride[d] != 0 {
                dims = d + 1;
            }
        }
        dims.max(1)
    }

    /// Total bytes the descriptor spans, assuming positive strides.
    pub fn size_in_bytes(&self) -> usize {
        let mut elems = 1i64;
        for d in 0..4 {
            elems *= i64::from(self.extent[d].max(1));
        }
        usize::try_from(elems).unwrap_or(0) * usize::try_from(self.elem_size.max(1)).unwrap_or(1)
    }

    /// Invoke `chunk` once per maximal contiguous run of elements, with
    /// the element offset of the run and its length in elements.
    ///
    /// Multi-dimensional copies use this to turn a strided descriptor
    /// into a nest of dense chunk transfers: the innermost dimensions
    /// whose strides match a dense layout coalesce into one run, and the
    /// remaining dimensions iterate.
    pub fn for_each_contiguous_chunk(
        &self,
        mut chunk: impl FnMut(usize, usize) -> Result<(), i32>,
    ) -> Result<(), i32> {
        let dims = self.dimensions();

        // How many inner dimensions are dense.
        let mut run = 1i64;
        let mut dense_dims = 0;
        for d in 0..dims {
            if i64::from(self.stride[d]) == run {
                run *= i64::from(self.extent[d]);
                dense_dims = d + 1;
            } else {
                break;
            }
        }
        let run_len = usize::try_from(run).unwrap_or(0);

        // Iterate the remaining dimensions.
        let mut index = [0i32; 4];
        loop {
            let mut offset = 0i64;
            for d in dense_dims..dims {
                offset += i64::from(index[d]) * i64::from(self.stride[d]);
            }
            chunk(usize::try_from(offset).unwrap_or(0), run_len)?;

            // Advance the outer index vector.
            let mut d = dense_dims;
            loop {
                if d >= dims {
                    return Ok(());
                }
                index[d] += 1;
                if index[d] < self.extent[d] {
                    break;
                }
                index[d] = 0;
                d += 1;
            }
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn dense_descriptor_strides() {
        let b = BufferT::dense(std::ptr::null_mut(), &[8, 4], 2);
        assert_eq!(b.stride, [1, 8, 0, 0]);
        assert_eq!(b.extent, [8, 4, 1, 1]);
        assert_eq!(b.dimensions(), 2);
        assert_eq!(b.size_in_bytes(), 8 * 4 * 2);
    }

    #[test]
    fn dense_buffer_is_one_chunk() {
        let b = BufferT::dense(std::ptr::null_mut(), &[8, 4], 2);
        let mut chunks = Vec::new();
        b.for_each_contiguous_chunk(|off, len| {
            chunks.push((off, len));
            Ok(())
        })
        .unwrap();
        assert_eq!(chunks, vec![(0, 32)]);
    }

    #[test]
    fn padded_rows_chunk_per_row() {
        // 8 wide rows padded to a stride of 10.
        let mut b = BufferT::dense(std::ptr::null_mut(), &[8, 3], 2);
        b.stride[1] = 10;
        let mut chunks = Vec::new();
        b.for_each_contiguous_chunk(|off, len| {
            chunks.push((off, len));
            Ok(())
        })
        .unwrap();
        assert_eq!(chunks, vec![(0, 8), (10, 8), (20, 8)]);
    }

    #[test]
    fn chunk_errors_propagate() {
        let mut b = BufferT::dense(std::ptr::null_mut(), &[4, 2], 1);
        b.stride[1] = 8;
        let result = b.for_each_contiguous_chunk(|_, _| Err(-3));
        assert_eq!(result, Err(-3));
    }
}
