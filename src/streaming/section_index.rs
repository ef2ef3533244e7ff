//! Resident sections around a moving reference point, backed by section files.
//!
//! Fine sections take chunk patches directly. Every edit marks the coarser ancestors stale, and
//! [`SectionIndex::rebuild_stale`] refills them finest first from what is already on disk.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use glam::IVec2;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use crate::core::cancel::CancelToken;
use crate::core::config::LodConfig;
use crate::core::error::Error;
use crate::core::types::Result;
use crate::data::downsample::{Downsampler, sample_from};
use crate::data::patch::{ChunkPatch, ChunkSource};
use crate::data::source::{DataSource, FullDataSource};
use crate::index::QuadTree;
use crate::math::SectionPos;
use crate::streaming::file_handler::FileHandler;
use crate::streaming::generation::{GenerationQueue, WorldGenerator};
use crate::streaming::in_flight::InFlight;
use crate::streaming::pools::WorkerPools;

pub struct SectionIndex<G> {
    config: LodConfig,
    tree: QuadTree<Arc<DataSource>>,
    files: Arc<FileHandler>,
    pools: Arc<WorkerPools>,
    downsampler: Downsampler,
    generation: GenerationQueue<G>,
    loads: InFlight<SectionPos, Arc<DataSource>>,
    /// Serializes read-modify-write cycles per section
    edit_locks: Mutex<HashMap<SectionPos, Arc<tokio::sync::Mutex<()>>>>,
    /// Coarse sections whose finer data changed since they were last rebuilt
    stale: Mutex<BTreeSet<SectionPos>>,
}

impl<G: WorldGenerator> SectionIndex<G> {
    /// An index centered on the block origin.
    pub fn new(config: LodConfig, generator: Arc<G>) -> Result<Self> {
        config.validate()?;
        let pools = Arc::new(WorkerPools::new(&config.threads)?);
        let tree = QuadTree::new(
            config.view_diameter_blocks,
            IVec2::ZERO,
            config.min_section_detail(),
            config.max_section_detail(),
        )?;
        let files = Arc::new(FileHandler::new(&config, Arc::clone(&pools))?);
        log::info!(
            "section index over {} (details {}..={}, {} blocks tracked)",
            config.data_dir.display(),
            config.min_section_detail(),
            config.max_section_detail(),
            config.view_diameter_blocks
        );

        Ok(Self {
            downsampler: Downsampler::new(Arc::clone(&pools)),
            generation: GenerationQueue::new(generator),
            loads: InFlight::new(),
            edit_locks: Mutex::new(HashMap::new()),
            stale: Mutex::new(BTreeSet::new()),
            config,
            tree,
            files,
            pools,
        })
    }

    pub fn config(&self) -> &LodConfig {
        &self.config
    }

    pub fn files(&self) -> &Arc<FileHandler> {
        &self.files
    }

    pub fn tree(&self) -> &QuadTree<Arc<DataSource>> {
        &self.tree
    }

    pub fn generation(&self) -> &GenerationQueue<G> {
        &self.generation
    }

    /// Positions waiting for [`Self::rebuild_stale`], finest first.
    pub fn stale_positions(&self) -> Vec<SectionPos> {
        self.stale.lock().iter().copied().collect()
    }

    /// The resident source at `pos`, loading it from disk (or creating it empty) on first use.
    pub async fn get_or_load(&self, pos: SectionPos) -> Result<Arc<DataSource>> {
        if let Some(source) = self.tree.get_value(pos)? {
            return Ok(source);
        }
        self.loads
            .run(pos, || async {
                if let Some(source) = self.tree.get_value(pos)? {
                    return Ok(source);
                }
                let source = Arc::new(self.files.read(pos).await?);
                self.tree.set_value(pos, Arc::clone(&source))?;
                Ok::<_, Error>(source)
            })
            .await
    }

    async fn lock_section(&self, pos: SectionPos) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.edit_locks.lock().entry(pos).or_default());
        lock.lock_owned().await
    }

    /// Make `source` resident and persist it. Only a concurrent-write violation fails the caller;
    /// other write failures are already logged and the resident copy stays authoritative.
    async fn commit(&self, source: DataSource) -> Result<()> {
        let pos = source.pos();
        let source = Arc::new(source);
        self.tree.set_value(pos, Arc::clone(&source))?;
        match self.files.write(source).await {
            Err(err @ Error::Concurrency(_)) => Err(err),
            _ => Ok(()),
        }
    }

    fn mark_ancestors_stale(&self, pos: SectionPos) {
        let max = self.config.max_section_detail();
        let mut stale = self.stale.lock();
        let mut ancestor = pos;
        while ancestor.detail < max {
            ancestor = ancestor.parent();
            stale.insert(ancestor);
        }
    }

    /// Scan `chunk` into a patch and merge it into the finest section covering it.
    pub async fn ingest_chunk(&self, chunk: &impl ChunkSource) -> Result<usize> {
        self.ingest_patch(ChunkPatch::from_chunk(chunk, self.config.min_y)).await
    }

    /// Merge `patch` into the finest section covering it. Returns how many columns changed.
    pub async fn ingest_patch(&self, patch: ChunkPatch) -> Result<usize> {
        let pos = patch.pos().convert_to_detail(self.config.min_section_detail());
        let _lock = self.lock_section(pos).await;
        let current = self.get_or_load(pos).await?;

        let (source, changed) = self
            .pools
            .run_transform(move || {
                let mut source = DataSource::clone(&current);
                let changed = sample_from(&mut source, &patch)?;
                Ok::<_, Error>((source, changed))
            })
            .await??;
        if changed == 0 {
            return Ok(0);
        }

        log::trace!("ingested {} columns into {}", changed, pos);
        self.commit(source).await?;
        self.mark_ancestors_stale(pos);
        Ok(changed)
    }

    /// Downsample every stale section from the level below it, finest first, so each level reads
    /// already rebuilt children. Returns how many sections changed.
    ///
    /// On error the unprocessed positions stay stale.
    pub async fn rebuild_stale(&self, cancel: &CancelToken) -> Result<usize> {
        let pending: Vec<SectionPos> = std::mem::take(&mut *self.stale.lock()).into_iter().collect();
        let mut rebuilt = 0;
        for (i, &pos) in pending.iter().enumerate() {
            match self.rebuild(pos, cancel).await {
                Ok(true) => rebuilt += 1,
                Ok(false) => {}
                Err(err) => {
                    self.stale.lock().extend(pending[i..].iter().copied());
                    return Err(err);
                }
            }
        }
        if rebuilt > 0 {
            log::debug!("rebuilt {} of {} stale sections", rebuilt, pending.len());
        }
        Ok(rebuilt)
    }

    async fn rebuild(&self, pos: SectionPos, cancel: &CancelToken) -> Result<bool> {
        cancel.check("rebuild")?;
        if !self.tree.is_section_pos_in_bounds(pos) {
            return Ok(false);
        }
        let _lock = self.lock_section(pos).await;
        let current = self.get_or_load(pos).await?;
        if current.data_detail() == 0 {
            return Ok(false);
        }
        let mut source = DataSource::clone(&current);
        let finer = source.data_detail() - 1;

        let changed = self
            .downsampler
            .downsample(&self.files, &mut source, finer, cancel)
            .await?;
        let source = source.try_promoting_to_complete();
        if changed == 0 && source.kind() == current.kind() {
            return Ok(false);
        }
        self.commit(source).await?;
        Ok(true)
    }

    /// Generate whatever the finest section at `pos` is still missing and ingest the result.
    /// Returns how many columns changed.
    pub async fn generate_missing(&self, pos: SectionPos) -> Result<usize> {
        if pos.detail != self.config.min_section_detail() {
            return Err(Error::OutOfBounds(format!(
                "generation targets sections at detail {}, got {}",
                self.config.min_section_detail(),
                pos
            )));
        }
        let source = self.get_or_load(pos).await?;
        let DataSource::Complete(complete) = source.as_ref() else {
            return Err(Error::Generation(format!("section {} is not a complete source", pos)));
        };
        let generator = self.generation.generator();
        let targets = complete.ungenerated_positions(generator.min_granularity(), generator.max_granularity());
        drop(source);

        let mut changed = 0;
        for target in targets {
            let patches = self.generation.generate(target).await?;
            for patch in patches.iter() {
                changed += self.ingest_patch(patch.clone()).await?;
            }
        }
        Ok(changed)
    }

    /// Move the tracked square. Returns how many resident sources were evicted.
    pub fn set_center_block_pos(&self, center: IVec2) -> usize {
        let mut evicted = 0;
        self.tree.set_center_block_pos(center, |_, _| evicted += 1);
        self.stale.lock().retain(|pos| self.tree.is_section_pos_in_bounds(*pos));
        self.edit_locks
            .lock()
            .retain(|pos, lock| Arc::strong_count(lock) > 1 || self.tree.is_section_pos_in_bounds(*pos));
        if evicted > 0 {
            log::debug!("recentered on {}, evicted {} sections", center, evicted);
        }
        evicted
    }
}
