//! Deduplicated, cancellable requests to the external world generator.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::IVec2;

use crate::core::cancel::CancelToken;
use crate::core::error::Error;
use crate::core::types::Result;
use crate::data::patch::ChunkPatch;
use crate::math::SectionPos;
use crate::streaming::in_flight::InFlight;

/// Terrain generation capability supplied by the host.
pub trait WorldGenerator: Send + Sync + 'static {
    /// Finest section detail a single request may cover.
    fn min_granularity(&self) -> u8;
    /// Coarsest section detail a single request may cover.
    fn max_granularity(&self) -> u8;
    /// Generate every chunk of the square at `origin` (minimum block corner) with side
    /// `2^granularity`. Implementations should poll `cancel` and fail with
    /// [`Error::Interrupted`] once it fires.
    fn generate(
        &self,
        origin: IVec2,
        granularity: u8,
        cancel: CancelToken,
    ) -> impl Future<Output = Result<Vec<ChunkPatch>>> + Send;
}

pub struct GenerationQueue<G> {
    generator: Arc<G>,
    in_flight: InFlight<SectionPos, Arc<Vec<ChunkPatch>>>,
    cancel: CancelToken,
    runs: AtomicU64,
}

impl<G: WorldGenerator> GenerationQueue<G> {
    pub fn new(generator: Arc<G>) -> Self {
        Self {
            generator,
            in_flight: InFlight::new(),
            cancel: CancelToken::new(),
            runs: AtomicU64::new(0),
        }
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Number of generator invocations so far.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Cancel every running and future request.
    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }

    /// Generate the section at `pos`. Concurrent requests for the same position share one run.
    pub async fn generate(&self, pos: SectionPos) -> Result<Arc<Vec<ChunkPatch>>> {
        let (min, max) = (self.generator.min_granularity(), self.generator.max_granularity());
        if pos.detail < min || pos.detail > max {
            return Err(Error::OutOfBounds(format!(
                "generation request {} outside granularity {}..={}",
                pos, min, max
            )));
        }
        self.in_flight
            .run(pos, || async {
                self.cancel.check("generation")?;
                self.runs.fetch_add(1, Ordering::Relaxed);
                let (x, z) = pos.min_corner();
                let origin = IVec2::new(x as i32, z as i32);
                log::debug!("generating {} at {}", pos, origin);
                let patches = self.generator.generate(origin, pos.detail, self.cancel.clone()).await?;
                self.cancel.check("generation")?;
                Ok::<_, Error>(Arc::new(patches))
            })
            .await
    }
}
