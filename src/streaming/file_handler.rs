//! Section files on disk: one container per section position.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::core::cancel::CancelToken;
use crate::core::config::LodConfig;
use crate::core::error::Error;
use crate::core::types::Result;
use crate::data::downsample::SectionProvider;
use crate::data::source::{DataSource, FullDataSource};
use crate::math::SectionPos;
use crate::streaming::codec::{self, PayloadRegistry};
use crate::streaming::container::{self, Compression};
use crate::streaming::pools::WorkerPools;

type ChangeListener = Box<dyn Fn(SectionPos) + Send + Sync>;

/// Get the file path for a section.
pub fn section_path(base_dir: &Path, pos: SectionPos) -> PathBuf {
    // one directory per detail level keeps coarse levels from drowning in fine files
    base_dir
        .join(format!("detail_{}", pos.detail))
        .join(format!("{}_{}.lod", pos.x, pos.z))
}

/// Marks a file as being written; released on drop.
struct WriteGuard {
    writing: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.writing.lock().remove(&self.path);
    }
}

pub struct FileHandler {
    base_dir: PathBuf,
    config: LodConfig,
    compression: Compression,
    pools: Arc<WorkerPools>,
    registry: Arc<PayloadRegistry>,
    writing: Arc<Mutex<HashSet<PathBuf>>>,
    listeners: RwLock<Vec<ChangeListener>>,
    cancel: CancelToken,
}

impl FileHandler {
    pub fn new(config: &LodConfig, pools: Arc<WorkerPools>) -> Result<Self> {
        Ok(Self {
            base_dir: config.data_dir.clone(),
            config: config.clone(),
            compression: config.compression,
            pools,
            registry: Arc::new(PayloadRegistry::standard()?),
            writing: Arc::new(Mutex::new(HashSet::new())),
            listeners: RwLock::new(Vec::new()),
            cancel: CancelToken::new(),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn path_for(&self, pos: SectionPos) -> PathBuf {
        section_path(&self.base_dir, pos)
    }

    /// Cancels in-progress decodes.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Register a callback fired after a section file has been durably replaced.
    pub fn add_change_listener(&self, listener: impl Fn(SectionPos) + Send + Sync + 'static) {
        self.listeners.write().push(Box::new(listener));
    }

    /// The stored source, or `None` if there is no usable file. Corrupt files are logged and
    /// treated as absent.
    pub async fn read_existing(&self, pos: SectionPos) -> Result<Option<DataSource>> {
        let path = self.path_for(pos);
        let registry = Arc::clone(&self.registry);
        let cancel = self.cancel.clone();
        let result = self
            .pools
            .run_io(move || -> Result<Option<DataSource>> {
                let Some(container) = container::read(&path)? else {
                    return Ok(None);
                };
                if container.header.pos != pos {
                    return Err(Error::Format(format!(
                        "{} holds section {}",
                        path.display(),
                        container.header.pos
                    )));
                }
                registry.decode(&container, &cancel).map(Some)
            })
            .await?;

        match result {
            Err(err) if err.is_format() => {
                log::warn!("ignoring unreadable section {}: {}", pos, err);
                Ok(None)
            }
            other => other,
        }
    }

    /// The stored source, or a fresh empty one if nothing usable is on disk.
    pub async fn read(&self, pos: SectionPos) -> Result<DataSource> {
        match self.read_existing(pos).await? {
            Some(source) => Ok(source),
            None => DataSource::new_for(pos, &self.config),
        }
    }

    fn begin_write(&self, path: &Path) -> Result<WriteGuard> {
        let mut writing = self.writing.lock();
        if !writing.insert(path.to_path_buf()) {
            let err = Error::Concurrency(format!("concurrent write to {}", path.display()));
            log::error!("{}", err);
            return Err(err);
        }
        Ok(WriteGuard {
            writing: Arc::clone(&self.writing),
            path: path.to_path_buf(),
        })
    }

    /// Persist `source` atomically, then notify listeners.
    pub async fn write(&self, source: Arc<DataSource>) -> Result<()> {
        let pos = source.pos();
        let path = self.path_for(pos);
        let _guard = self.begin_write(&path)?;

        let header = codec::header_for(&source, self.compression);
        let result = self
            .pools
            .run_io(move || container::write_atomic(&path, header, |w| codec::encode(&source, w)))
            .await
            .and_then(|r| r);
        if let Err(err) = &result {
            log::error!("failed to write section {}: {}", pos, err);
            return result;
        }

        log::debug!("wrote section {} (version {})", pos, header.data_version);
        for listener in self.listeners.read().iter() {
            listener(pos);
        }
        Ok(())
    }

    /// Delete a section file if present.
    pub async fn delete(&self, pos: SectionPos) -> Result<bool> {
        let path = self.path_for(pos);
        let _guard = self.begin_write(&path)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl SectionProvider for FileHandler {
    async fn read_section(&self, pos: SectionPos) -> Result<Option<Arc<DataSource>>> {
        Ok(self.read_existing(pos).await?.map(Arc::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::core::config::ThreadConfig;
    use crate::data::column::{Column, DataPoint, GenerationStep};
    use crate::data::id_map::IdEntry;
    use crate::data::source::SourceKind;

    fn handler(dir: &Path) -> FileHandler {
        let config = LodConfig {
            data_dir: dir.to_path_buf(),
            ..Default::default()
        };
        let pools = Arc::new(WorkerPools::new(&ThreadConfig::default()).unwrap());
        FileHandler::new(&config, pools).unwrap()
    }

    fn sample(pos: SectionPos, config: &LodConfig) -> DataSource {
        let mut source = DataSource::new_for(pos, config).unwrap();
        let id = source.id_map_mut().add_if_not_present_and_get_id(IdEntry::new("swamp", "mud"));
        source.write_column(5, 6, Column::new(GenerationStep::Light, vec![DataPoint::new(id, 9, 60, 15, 0)]));
        source
    }

    #[test]
    fn test_section_path_layout() {
        let path = section_path(Path::new("/data"), SectionPos::new(8, -3, 14));
        assert_eq!(path, PathBuf::from("/data/detail_8/-3_14.lod"));
    }

    #[tokio::test]
    async fn test_write_then_read_and_notify() {
        let dir = tempfile::tempdir().unwrap();
        let files = handler(dir.path());
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        files.add_change_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let pos = SectionPos::new(7, 2, -1);
        let source = sample(pos, &LodConfig::default());
        files.write(Arc::new(source.clone())).await.unwrap();
        assert_eq!(notified.load(Ordering::SeqCst), 1);

        let back = files.read(pos).await.unwrap();
        assert_eq!(back.kind(), SourceKind::Sparse);
        assert_eq!(back, source);
    }

    #[tokio::test]
    async fn test_missing_and_corrupt_files_read_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let files = handler(dir.path());
        let pos = SectionPos::new(6, 0, 0);
        assert!(files.read(pos).await.unwrap().is_empty());

        files.write(Arc::new(sample(pos, &LodConfig::default()))).await.unwrap();
        let path = files.path_for(pos);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        assert!(files.read(pos).await.unwrap().is_empty());
        assert!(files.read_section(pos).await.unwrap().is_none());
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
    }

    #[tokio::test]
    async fn test_concurrent_write_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let files = handler(dir.path());
        let pos = SectionPos::new(6, 1, 1);
        let source = Arc::new(sample(pos, &LodConfig::default()));

        let guard = files.begin_write(&files.path_for(pos)).unwrap();
        let err = files.write(Arc::clone(&source)).await.unwrap_err();
        assert!(matches!(err, Error::Concurrency(_)));
        drop(guard);

        files.write(source).await.unwrap();
        assert!(files.delete(pos).await.unwrap());
        assert!(!files.delete(pos).await.unwrap());
    }
}
