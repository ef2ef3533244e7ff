//! Filling coarse data sources from finer ones.
//!
//! A reduction runs in two halves. [`reduce_for`] is pure: it turns one finer source into the target
//! columns it covers, still in the finer source's id space, and can run on any thread. [`apply_reduced`]
//! then merges ids into the target and replaces the columns it covers. Because each
//! coarse column is a deterministic function of its children, repeating a downsample into the same
//! target changes nothing.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::core::cancel::CancelToken;
use crate::core::error::Error;
use crate::core::types::Result;
use crate::data::column::Column;
use crate::data::id_map::IdMap;
use crate::data::source::{DataSource, FullDataSource, SourceMeta};
use crate::math::SectionPos;
use crate::streaming::pools::WorkerPools;

/// Asynchronous access to stored sections, used to fetch the finer inputs of a downsample.
pub trait SectionProvider: Send + Sync + 'static {
    /// The source stored at `pos`, or `None` if nothing exists there yet.
    fn read_section(&self, pos: SectionPos) -> impl Future<Output = Result<Option<Arc<DataSource>>>> + Send;
}

/// Target columns produced from one finer source, still using that source's ids.
#[derive(Clone, Debug)]
pub struct ReducedColumns {
    pub source_pos: SectionPos,
    pub min_y: i32,
    pub id_map: IdMap,
    pub columns: Vec<(u32, u32, Column)>,
}

/// Reduce `source` into the columns of a target described by `target`.
///
/// When the detail gap collapses the whole source into at most one target column, only the source's
/// corner column is used, and only if that corner is also a target column corner.
pub fn reduce_for(target: &SourceMeta, source: &dyn FullDataSource) -> Result<ReducedColumns> {
    let s = *source.meta();
    if s.data_detail > target.data_detail {
        return Err(Error::OutOfBounds(format!(
            "cannot sample {} (data detail {}) into coarser-only target {} (data detail {})",
            s.pos, s.data_detail, target.pos, target.data_detail
        )));
    }
    let mut reduced = ReducedColumns {
        source_pos: s.pos,
        min_y: s.min_y,
        id_map: IdMap::new(),
        columns: Vec::new(),
    };
    if !target.pos.overlaps(s.pos) {
        return Ok(reduced);
    }

    let gap = target.data_detail - s.data_detail;
    let column_side = 1i64 << target.data_detail;
    let (tx0, tz0) = target.pos.min_corner();
    let (sx0, sz0) = s.pos.min_corner();

    if gap >= s.width_log2 {
        let aligned = (sx0 - tx0).rem_euclid(column_side) == 0 && (sz0 - tz0).rem_euclid(column_side) == 0;
        if let (true, Some((cx, cz))) = (aligned, target.column_of_block(sx0, sz0)) {
            if let Some(corner) = source.column(0, 0).filter(|c| !c.is_empty()) {
                reduced.columns.push((cx, cz, corner.clone()));
            }
        }
    } else {
        // the target column grid nests inside the source, so every covered column is whole
        let ratio = 1u32 << gap;
        let s_side = s.pos.width();
        let ix0 = sx0.max(tx0);
        let iz0 = sz0.max(tz0);
        let ix1 = (sx0 + s_side).min(tx0 + target.pos.width());
        let iz1 = (sz0 + s_side).min(tz0 + target.pos.width());
        for block_z in (iz0..iz1).step_by(column_side as usize) {
            for block_x in (ix0..ix1).step_by(column_side as usize) {
                let (cx, cz) = ((block_x - tx0) / column_side, (block_z - tz0) / column_side);
                let lx0 = ((block_x - sx0) >> s.data_detail) as u32;
                let lz0 = ((block_z - sz0) >> s.data_detail) as u32;
                let column = if ratio == 1 {
                    source.column(lx0, lz0).cloned().unwrap_or_default()
                } else {
                    let children = (lz0..lz0 + ratio)
                        .flat_map(|z| (lx0..lx0 + ratio).map(move |x| (x, z)))
                        .filter_map(|(x, z)| source.column(x, z));
                    Column::downsample_from(children)
                };
                if !column.is_empty() {
                    reduced.columns.push((cx as u32, cz as u32, column));
                }
            }
        }
    }

    if !reduced.columns.is_empty() {
        reduced.id_map = source.id_map().clone();
    }
    Ok(reduced)
}

/// Merge reduced columns into `target`, replacing every covered column that differs. Each coarse
/// column is derived from its children alone, so earlier contents never outrank a fresh reduction.
/// Returns how many columns changed.
pub fn apply_reduced(target: &mut dyn FullDataSource, reduced: ReducedColumns) -> Result<usize> {
    merge_reduced(target, reduced, |t, x, z, column| t.replace_column(x, z, column))
}

/// Merge reduced columns into `target` under the generation priority rule. Returns how many
/// columns changed.
pub fn overlay_reduced(target: &mut dyn FullDataSource, reduced: ReducedColumns) -> Result<usize> {
    merge_reduced(target, reduced, |t, x, z, column| t.write_column(x, z, column))
}

fn merge_reduced(
    target: &mut dyn FullDataSource,
    reduced: ReducedColumns,
    mut write: impl FnMut(&mut dyn FullDataSource, u32, u32, Column) -> bool,
) -> Result<usize> {
    if reduced.columns.is_empty() {
        return Ok(0);
    }
    let remap = target.id_map_mut().merge_and_return_remapped_ids(&reduced.id_map);
    let delta = reduced.min_y - target.min_y();
    let columns = reduced
        .columns
        .into_iter()
        .map(|(x, z, column)| Ok((x, z, column.remapped(&remap)?.rebased(delta))))
        .collect::<Result<Vec<_>>>()?;
    let mut changed = 0;
    for (x, z, column) in columns {
        if write(&mut *target, x, z, column) {
            changed += 1;
        }
    }
    Ok(changed)
}

/// Overlay `source` onto `target` synchronously under the generation priority rule. `source` must
/// be at equal or finer data detail.
pub fn sample_from(target: &mut dyn FullDataSource, source: &dyn FullDataSource) -> Result<usize> {
    let reduced = reduce_for(target.meta(), source)?;
    overlay_reduced(target, reduced)
}

/// Sections at `finer_data_detail` that contribute to `target`.
///
/// Sources that would collapse into a single target column are only listed when their corner is a
/// target column corner; the rest are never read.
pub fn contributing_positions(target: &SourceMeta, finer_data_detail: u8) -> Vec<SectionPos> {
    debug_assert!(finer_data_detail < target.data_detail);
    let finer_detail = finer_data_detail + target.width_log2;
    let gap = target.data_detail - finer_data_detail;
    let origin = target.pos.convert_to_detail(finer_detail);
    let per_side = 1i32 << (target.pos.detail - finer_detail);
    let step = if gap >= target.width_log2 {
        1usize << (gap - target.width_log2)
    } else {
        1
    };
    let mut out = Vec::new();
    for dz in (0..per_side).step_by(step) {
        for dx in (0..per_side).step_by(step) {
            out.push(SectionPos::new(finer_detail, origin.x + dx, origin.z + dz));
        }
    }
    out
}

/// Runs downsamples with concurrent reads and reductions on the merge pool.
pub struct Downsampler {
    pools: Arc<WorkerPools>,
}

impl Downsampler {
    pub fn new(pools: Arc<WorkerPools>) -> Self {
        Self { pools }
    }

    /// Populate `target` from the finer sections at `finer_data_detail`.
    ///
    /// Every read starts at once; each result is reduced and applied as soon as it arrives. Returns
    /// how many target columns changed.
    pub async fn downsample<P: SectionProvider>(
        &self,
        provider: &Arc<P>,
        target: &mut DataSource,
        finer_data_detail: u8,
        cancel: &CancelToken,
    ) -> Result<usize> {
        let meta = *target.meta();
        let positions = contributing_positions(&meta, finer_data_detail);
        log::debug!(
            "downsampling {} from {} sections at data detail {}",
            meta.pos,
            positions.len(),
            finer_data_detail
        );

        let mut reads = JoinSet::new();
        for pos in positions {
            cancel.check("downsample")?;
            let provider = Arc::clone(provider);
            reads.spawn(async move { (pos, provider.read_section(pos).await) });
        }

        let mut changed = 0;
        while let Some(joined) = reads.join_next().await {
            cancel.check("downsample")?;
            let (pos, read) =
                joined.map_err(|e| Error::Concurrency(format!("downsample read task failed: {}", e)))?;
            let Some(source) = read? else {
                continue;
            };
            if source.meta().data_detail != finer_data_detail || source.pos() != pos {
                log::warn!("section {} came back as {}, skipping", pos, source.pos());
                continue;
            }
            let reduced = self
                .pools
                .run_merge(move || reduce_for(&meta, source.as_ref()))
                .await??;
            changed += apply_reduced(target, reduced)?;
        }
        Ok(changed)
    }
}
