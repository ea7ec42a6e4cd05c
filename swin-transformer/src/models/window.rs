//! Window bookkeeping shared by the attention blocks.
//!
//! Everything here is pure indexing: splitting a feature map into square windows and
//! putting it back together, cyclic shifts of the spatial grid, the relative position
//! index that maps token pairs onto rows of the bias table, and the additive mask that
//! keeps shifted windows from attending across the wrap-around seam.

use std::sync::{Arc, Mutex, PoisonError};

use burn::{prelude::*, tensor::TensorData};

use crate::error::{SwinError, SwinResult};

/// Additive attention score used to exclude token pairs from different regions.
pub const MASKED_SCORE: f32 = -100.0;

/// Splits a `[batch, height, width, channels]` feature map into flattened windows.
///
/// # Returns
/// Tensor of shape `[batch * num_windows, window_size * window_size, channels]`, ordered
/// batch-major, then window row, then window column.
///
/// # Errors
/// `SwinError::Shape` if `height` or `width` is not a multiple of `window_size`.
pub fn window_partition<B: Backend>(
    x: Tensor<B, 4>,
    window_size: usize,
) -> SwinResult<Tensor<B, 3>> {
    let [b, h, w, c] = x.dims();
    check_window_grid(h, w, window_size)?;

    let (rows, cols) = (h / window_size, w / window_size);
    Ok(x.reshape([b, rows, window_size, cols, window_size, c])
        .permute([0, 1, 3, 2, 4, 5])
        .reshape([b * rows * cols, window_size * window_size, c]))
}

/// Inverse of [`window_partition`].
///
/// # Errors
/// `SwinError::Shape` if the window batch does not tile a `height x width` grid.
pub fn window_reverse<B: Backend>(
    windows: Tensor<B, 3>,
    window_size: usize,
    height: usize,
    width: usize,
) -> SwinResult<Tensor<B, 4>> {
    check_window_grid(height, width, window_size)?;
    let [total_windows, tokens, c] = windows.dims();
    let (rows, cols) = (height / window_size, width / window_size);

    if tokens != window_size * window_size || total_windows % (rows * cols) != 0 {
        return Err(SwinError::shape(
            format!(
                "[k * {}, {}, C] windows for a {height}x{width} grid",
                rows * cols,
                window_size * window_size
            ),
            format!("{:?}", windows.dims()),
        ));
    }
    let b = total_windows / (rows * cols);

    Ok(windows
        .reshape([b, rows, cols, window_size, window_size, c])
        .permute([0, 1, 3, 2, 4, 5])
        .reshape([b, height, width, c]))
}

fn check_window_grid(height: usize, width: usize, window_size: usize) -> SwinResult<()> {
    if window_size == 0 || height % window_size != 0 || width % window_size != 0 {
        return Err(SwinError::shape(
            format!("spatial dims divisible by window size {window_size}"),
            format!("{height}x{width}"),
        ));
    }
    Ok(())
}

/// Rolls a `[batch, height, width, channels]` map by `shift` along both spatial axes.
///
/// Element `i` moves to `(i + shift) mod len`, like `torch.roll`.
pub fn cyclic_shift<B: Backend>(x: Tensor<B, 4>, shift: i64) -> Tensor<B, 4> {
    x.roll(&[shift, shift], &[1, 2])
}

/// Computes the relative position index for a square window.
///
/// Entry `[i * n + j]` (with `n = window_size²`) is the bias-table row for the offset
/// between token `i` and token `j`:
/// `(Δrow + ws - 1) * (2ws - 1) + (Δcol + ws - 1)`, every value in
/// `0..(2ws - 1)²`.
pub fn relative_position_index(window_size: usize) -> Vec<i64> {
    let ws = window_size as i64;
    let span = 2 * ws - 1;
    let coords: Vec<(i64, i64)> = (0..ws)
        .flat_map(|row| (0..ws).map(move |col| (row, col)))
        .collect();

    coords
        .iter()
        .flat_map(|&(ri, ci)| {
            coords
                .iter()
                .map(move |&(rj, cj)| (ri - rj + ws - 1) * span + (ci - cj + ws - 1))
        })
        .collect()
}

/// Identifies one shift mask: the grid it covers and the window geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShiftMaskKey {
    pub height: usize,
    pub width: usize,
    pub window_size: usize,
    pub shift_size: usize,
}

impl ShiftMaskKey {
    pub const fn num_windows(&self) -> usize {
        (self.height / self.window_size) * (self.width / self.window_size)
    }

    /// Band of a coordinate along an axis of length `len`: the part never touched by
    /// the shift, the part that stays inside the last window, and the wrapped part.
    const fn band(&self, pos: usize, len: usize) -> usize {
        if pos + self.window_size < len {
            0
        } else if pos + self.shift_size < len {
            1
        } else {
            2
        }
    }

    /// Builds the `[num_windows, ws², ws²]` additive mask on the host.
    ///
    /// A pair gets `0.0` when both tokens fall in the same pre-shift region and
    /// [`MASKED_SCORE`] otherwise.
    pub fn build(&self) -> TensorData {
        let ws = self.window_size;
        let n = ws * ws;
        let cols = self.width / ws;
        let num_windows = self.num_windows();

        let mut values = Vec::with_capacity(num_windows * n * n);
        for window in 0..num_windows {
            let (row0, col0) = ((window / cols) * ws, (window % cols) * ws);
            let regions: Vec<usize> = (0..n)
                .map(|t| {
                    let (r, c) = (row0 + t / ws, col0 + t % ws);
                    3 * self.band(r, self.height) + self.band(c, self.width)
                })
                .collect();

            for &ri in &regions {
                values.extend(
                    regions
                        .iter()
                        .map(|&rj| if ri == rj { 0.0 } else { MASKED_SCORE }),
                );
            }
        }

        TensorData::new(values, [num_windows, n, n])
    }
}

/// Single-entry cache of the host-side shift mask.
///
/// The entry is rebuilt only when the key changes, which happens when the block is fed
/// a different resolution. Clones share the entry.
#[derive(Debug, Clone, Default)]
pub struct ShiftMaskCache {
    slot: Arc<Mutex<Option<(ShiftMaskKey, TensorData)>>>,
}

impl ShiftMaskCache {
    /// Returns the mask for `key`, building it if the cached entry is for another key.
    pub fn get_or_build(&self, key: ShiftMaskKey) -> TensorData {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some((cached, data)) if *cached == key => data.clone(),
            _ => {
                tracing::trace!(?key, "rebuilding shift mask");
                let data = key.build();
                *slot = Some((key, data.clone()));
                data
            }
        }
    }

    /// The key of the currently cached mask, if any.
    pub fn cached_key(&self) -> Option<ShiftMaskKey> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(key, _)| *key)
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::Distribution;
    use rstest::rstest;

    use super::*;
    use crate::tests::TestBackend;

    fn to_vec<const D: usize>(x: Tensor<TestBackend, D>) -> Vec<f32> {
        x.into_data().to_vec::<f32>().expect("f32 data")
    }

    #[rstest]
    #[case(1, 3, 5, 2, 8)]
    #[case(2, 8, 8, 1, 4)]
    #[case(4, 16, 8, 2, 6)]
    #[case(7, 14, 21, 2, 3)]
    #[case(7, 56, 56, 1, 2)]
    fn window_partition_then_reverse_is_identity(
        #[case] window_size: usize,
        #[case] h: usize,
        #[case] w: usize,
        #[case] batch_size: usize,
        #[case] channels: usize,
    ) {
        let device = Default::default();
        let input = Tensor::<TestBackend, 4>::random(
            [batch_size, h, w, channels],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        let windows = window_partition(input.clone(), window_size).expect("divisible grid");
        let num_windows = (h / window_size) * (w / window_size);
        assert_eq!(
            windows.dims(),
            [batch_size * num_windows, window_size * window_size, channels]
        );

        let restored = window_reverse(windows, window_size, h, w).expect("matching grid");
        assert_eq!(restored.dims(), [batch_size, h, w, channels]);
        assert_eq!(to_vec(input), to_vec(restored));
    }

    #[test]
    fn window_partition_groups_neighbouring_tokens() {
        let device = Default::default();
        // 4x4 grid holding its own flat index, two 2x2 windows per row.
        let grid = Tensor::<TestBackend, 1, Int>::arange(0..16, &device)
            .float()
            .reshape([1, 4, 4, 1]);

        let windows = to_vec(window_partition(grid, 2).expect("divisible grid"));
        assert_eq!(
            windows,
            vec![
                0.0, 1.0, 4.0, 5.0, //
                2.0, 3.0, 6.0, 7.0, //
                8.0, 9.0, 12.0, 13.0, //
                10.0, 11.0, 14.0, 15.0,
            ]
        );
    }

    #[test]
    fn window_partition_rejects_indivisible_grid() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 4>::zeros([1, 10, 14, 2], &device);
        assert!(matches!(
            window_partition(input, 7),
            Err(SwinError::Shape { .. })
        ));
    }

    #[rstest]
    #[case(2, vec![3.0, 4.0, 0.0, 1.0, 2.0])]
    #[case(-2, vec![2.0, 3.0, 4.0, 0.0, 1.0])]
    #[case(5, vec![0.0, 1.0, 2.0, 3.0, 4.0])]
    fn cyclic_shift_matches_torch_roll(#[case] shift: i64, #[case] expected: Vec<f32>) {
        let device = Default::default();
        let column = Tensor::<TestBackend, 1>::from_floats([0.0, 1.0, 2.0, 3.0, 4.0], &device);

        // A 5x1 grid moves along height only; a 1x5 grid along width only.
        let tall = column.clone().reshape([1, 5, 1, 1]);
        let wide = column.reshape([1, 1, 5, 1]);
        assert_eq!(to_vec(cyclic_shift(tall, shift)), expected);
        assert_eq!(to_vec(cyclic_shift(wide, shift)), expected);
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(6)]
    fn cyclic_shift_round_trips(#[case] shift: i64) {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::random(
            [2, 7, 14, 3],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let restored = cyclic_shift(cyclic_shift(x.clone(), -shift), shift);
        assert_eq!(to_vec(x), to_vec(restored));
    }

    #[test]
    fn relative_position_index_covers_every_offset_for_window_seven() {
        let index = relative_position_index(7);
        assert_eq!(index.len(), 49 * 49);
        assert!(index.iter().all(|&i| (0..169).contains(&i)));

        let mut distinct = index.clone();
        distinct.sort_unstable();
        distinct.dedup();
        assert_eq!(distinct.len(), 169);
    }

    #[rstest]
    #[case(2)]
    #[case(4)]
    #[case(7)]
    fn relative_position_index_mirrors_under_transpose(#[case] window_size: usize) {
        let n = window_size * window_size;
        let index = relative_position_index(window_size);
        // Zero offset sits in the middle of the table.
        let centre = ((window_size - 1) * (2 * window_size - 1) + window_size - 1) as i64;

        for i in 0..n {
            assert_eq!(index[i * n + i], centre);
            for j in 0..n {
                assert_eq!(index[i * n + j] + index[j * n + i], 2 * centre);
            }
        }
    }

    #[rstest]
    #[case(8, 8, 4, 2)]
    #[case(14, 14, 7, 3)]
    #[case(12, 8, 4, 1)]
    #[case(14, 21, 7, 6)]
    #[case(8, 8, 4, 0)]
    #[case(7, 7, 7, 3)]
    fn shift_mask_is_symmetric(
        #[case] height: usize,
        #[case] width: usize,
        #[case] window_size: usize,
        #[case] shift_size: usize,
    ) {
        let key = ShiftMaskKey {
            height,
            width,
            window_size,
            shift_size,
        };
        let n = window_size * window_size;
        let data = key.build();
        assert_eq!(data.shape, vec![key.num_windows(), n, n]);

        let values = data.to_vec::<f32>().expect("f32 data");
        for window in values.chunks(n * n) {
            for i in 0..n {
                assert_eq!(window[i * n + i], 0.0);
                for j in 0..n {
                    assert_eq!(window[i * n + j], window[j * n + i]);
                }
            }
        }
        if shift_size == 0 {
            assert!(values.iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn single_window_mask_separates_the_wrapped_bands() {
        let key = ShiftMaskKey {
            height: 4,
            width: 4,
            window_size: 4,
            shift_size: 2,
        };
        let values = key.build().to_vec::<f32>().expect("f32 data");
        assert_eq!(values.len(), 16 * 16);

        // Four 2x2 regions: every token sees only the three others of its own region.
        let masked = values.iter().filter(|&&v| v == MASKED_SCORE).count();
        assert_eq!(masked, 16 * 16 - 4 * (4 * 4));
    }

    #[test]
    fn shift_mask_only_masks_windows_touching_the_seam() {
        let key = ShiftMaskKey {
            height: 8,
            width: 8,
            window_size: 4,
            shift_size: 2,
        };
        let values = key.build().to_vec::<f32>().expect("f32 data");
        let per_window: Vec<usize> = values
            .chunks(16 * 16)
            .map(|w| w.iter().filter(|&&v| v == MASKED_SCORE).count())
            .collect();

        // Top-left window lies entirely inside region 0; the others straddle the seam.
        assert_eq!(per_window[0], 0);
        assert!(per_window[1..].iter().all(|&count| count > 0));
        // Bottom-right window holds four 2x2 regions: 16 * 16 - 4 * (4 * 4) masked pairs.
        assert_eq!(per_window[3], 192);
    }

    #[test]
    fn shift_mask_cache_rebuilds_on_resolution_change() {
        let cache = ShiftMaskCache::default();
        let first = ShiftMaskKey {
            height: 8,
            width: 8,
            window_size: 4,
            shift_size: 2,
        };
        let second = ShiftMaskKey {
            height: 4,
            width: 4,
            ..first
        };

        assert_eq!(cache.cached_key(), None);
        let a = cache.get_or_build(first).to_vec::<f32>().expect("f32 data");
        assert_eq!(cache.cached_key(), Some(first));
        let again = cache.get_or_build(first).to_vec::<f32>().expect("f32 data");
        assert_eq!(again, a);

        let b = cache.get_or_build(second);
        assert_eq!(cache.cached_key(), Some(second));
        assert_eq!(b.shape, vec![1, 16, 16]);
    }
}
