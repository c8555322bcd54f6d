use crate::types::*;
use ndarray::{Array2, Zip};
use std::path::Path;

/// Running per-pixel maximum and valid-sample count over one bucket's frames.
///
/// The result does not depend on the order frames arrive in: a missing (NaN)
/// value never touches either grid, and the first valid value at a cell
/// initializes its maximum.
pub struct PixelAggregator {
    tier: Tier,
    shape: GridShape,
    fill: FillPolicy,
    max: Array2<f32>,
    count: Array2<u32>,
    frames: usize,
}

impl PixelAggregator {
    pub fn new(tier: Tier, shape: GridShape, fill_sentinel: f32) -> Self {
        Self {
            tier,
            shape,
            fill: tier.fill_policy(fill_sentinel),
            max: Array2::from_elem(shape.dim(), f32::NAN),
            count: Array2::zeros(shape.dim()),
            frames: 0,
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Fold one frame in. A frame of the wrong shape is a configuration
    /// error for the whole bucket, so nothing is folded and the caller
    /// should abandon the bucket.
    pub fn fold(&mut self, source: &Path, mut frame: RasterFrame) -> Result<(), AodError> {
        let (rows, cols) = frame.dim();
        let found = GridShape::new(rows, cols);
        if found != self.shape {
            return Err(AodError::DimensionMismatch {
                path: source.to_path_buf(),
                expected: self.shape,
                found,
            });
        }

        if let FillPolicy::Translate(sentinel) = self.fill {
            translate_fill(&mut frame, sentinel);
        }

        Zip::from(&mut self.max)
            .and(&mut self.count)
            .and(&frame)
            .for_each(|max, count, &value| {
                if value.is_nan() {
                    return;
                }
                *count += 1;
                if max.is_nan() || value > *max {
                    *max = value;
                }
            });

        self.frames += 1;
        Ok(())
    }

    pub fn finish(self, key: impl Into<String>) -> AggregateResult {
        AggregateResult {
            tier: self.tier,
            key: key.into(),
            max: self.max,
            count: self.count,
            frames: self.frames,
        }
    }
}

/// Replace the product's fill sentinel with NaN. Applying it twice is a no-op.
pub fn translate_fill(frame: &mut Array2<f32>, sentinel: f32) {
    frame.mapv_inplace(|v| if v == sentinel { f32::NAN } else { v });
}

/// Aggregate a complete set of frames in one call.
pub fn aggregate_frames<'a, I>(
    tier: Tier,
    shape: GridShape,
    fill_sentinel: f32,
    key: &str,
    frames: I,
) -> Result<AggregateResult, AodError>
where
    I: IntoIterator<Item = (&'a Path, RasterFrame)>,
{
    let mut aggregator = PixelAggregator::new(tier, shape, fill_sentinel);
    for (path, frame) in frames {
        aggregator.fold(path, frame)?;
    }
    Ok(aggregator.finish(key))
}
