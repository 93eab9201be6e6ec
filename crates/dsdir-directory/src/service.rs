//! Dataset-facing service
//!
//! Ties a directory backend to the data drivers of this node: datasets
//! read or written through a driver get their metadata published, and
//! published metadata can be turned back into data.

use crate::backend::DirectoryBackend;
use crate::resolver::{BulkResolver, DEFAULT_POLL_INTERVAL, DEFAULT_RESOLUTION_TIMEOUT, Resolution};
use dsdir_common::config::DefaultDataset;
use dsdir_common::{DataUrl, DatasetId, DatasetMeta, DatasetRef, Error, Result, Visibility};
use dsdir_data::{DataDriver, Dataset, DriverFactory, DriverResult};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Run blocking driver I/O off the async workers
async fn run_driver<R, F>(f: F) -> Result<R>
where
    R: Send + 'static,
    F: FnOnce() -> DriverResult<R> + Send + 'static,
{
    let out = tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::driver(format!("driver task failed: {e}")))??;
    Ok(out)
}

/// Materialize the dataset a record points at
pub(crate) async fn load_dataset(
    drivers: &DriverFactory,
    nodelet_addr: &str,
    meta: &DatasetMeta,
) -> Result<Dataset> {
    let url = DataUrl::parse(meta.data_url())?;
    let driver = drivers.get_driver(meta.driver_type(), nodelet_addr)?;
    run_driver(move || driver.open(&url.path)?.read()).await
}

pub struct DatasetService {
    backend: Arc<dyn DirectoryBackend>,
    drivers: Arc<DriverFactory>,
    nodelet_addr: String,
    resolution_timeout: RwLock<Duration>,
    poll_interval: Duration,
}

impl DatasetService {
    pub fn new(
        backend: Arc<dyn DirectoryBackend>,
        drivers: Arc<DriverFactory>,
        nodelet_addr: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            drivers,
            nodelet_addr: nodelet_addr.into(),
            resolution_timeout: RwLock::new(DEFAULT_RESOLUTION_TIMEOUT),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn nodelet_addr(&self) -> &str {
        &self.nodelet_addr
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn DirectoryBackend> {
        &self.backend
    }

    #[must_use]
    pub fn drivers(&self) -> &Arc<DriverFactory> {
        &self.drivers
    }

    pub fn set_resolution_timeout(&self, timeout: Duration) {
        *self.resolution_timeout.write() = timeout;
    }

    #[must_use]
    pub fn resolution_timeout(&self) -> Duration {
        *self.resolution_timeout.read()
    }

    /// Read a dataset through `driver` and publish its metadata
    pub async fn new_dataset(
        &self,
        driver: Arc<dyn DataDriver>,
        path: &str,
        description: &str,
    ) -> Result<(Dataset, DatasetMeta)> {
        let meta = DatasetMeta::new(
            description,
            Visibility::Public,
            driver.driver_type(),
            DataUrl::with_nodelet(driver.nodelet_addr(), path),
        );

        let source = path.to_string();
        let dataset = run_driver(move || driver.open(&source)?.read()).await?;
        info!(
            "New dataset {} ({} rows) from {}",
            description,
            dataset.num_rows(),
            path
        );

        self.backend.put(&meta).await?;
        Ok((dataset, meta))
    }

    /// Write a dataset through `driver` and publish its metadata
    pub async fn write_dataset(
        &self,
        dataset: &Dataset,
        driver: Arc<dyn DataDriver>,
        path: &str,
        description: &str,
    ) -> Result<DatasetMeta> {
        let meta = DatasetMeta::new(
            description,
            Visibility::Public,
            driver.driver_type(),
            DataUrl::with_nodelet(driver.nodelet_addr(), path),
        );

        let target = path.to_string();
        let data = dataset.clone();
        run_driver(move || driver.open(&target)?.write(&data)).await?;

        self.backend.put(&meta).await?;
        Ok(meta)
    }

    /// Publish an existing record
    pub async fn register_dataset(&self, meta: &DatasetMeta) -> Result<()> {
        self.backend.put(meta).await
    }

    pub async fn find_dataset(&self, id: &DatasetId) -> Result<Option<DatasetMeta>> {
        self.backend.get(id).await
    }

    /// Look a dataset up and read it through its driver
    pub async fn read_dataset(&self, id: &DatasetId) -> Result<Option<Dataset>> {
        let Some(meta) = self.backend.get(id).await? else {
            return Ok(None);
        };
        let dataset = load_dataset(&self.drivers, &self.nodelet_addr, &meta).await?;
        Ok(Some(dataset))
    }

    /// Resolve a group of dataset references
    pub async fn resolve<T>(&self, refs: Vec<DatasetRef<T>>) -> Resolution<T>
    where
        T: Send + 'static,
    {
        self.resolver().resolve(refs).await
    }

    /// Resolve a group of references, calling `handler` only if all of
    /// them resolved in time
    pub async fn find_peer_list<T, F>(&self, refs: Vec<DatasetRef<T>>, handler: F) -> bool
    where
        T: Send + 'static,
        F: FnOnce(Vec<(DatasetMeta, T)>),
    {
        self.resolver().find_peer_list(refs, handler).await
    }

    pub async fn delete_dataset(&self, id: &DatasetId) -> Result<()> {
        warn!("Delete dataset {} requested, deletion is not supported", id);
        Err(Error::not_implemented("delete dataset"))
    }

    /// Register every configured dataset; returns how many succeeded
    pub async fn load_default_datasets(&self, datasets: &[DefaultDataset]) -> usize {
        info!("Load {} default datasets", datasets.len());
        let mut loaded = 0;
        for dataset in datasets {
            let driver = match self.drivers.get_driver(&dataset.model, &self.nodelet_addr) {
                Ok(driver) => driver,
                Err(e) => {
                    error!("Skip default dataset {}: {}", dataset.description, e);
                    continue;
                }
            };
            match self
                .new_dataset(driver, &dataset.source, &dataset.description)
                .await
            {
                Ok(_) => loaded += 1,
                Err(e) => error!(
                    "Load default dataset {} from {} failed: {}",
                    dataset.description, dataset.source, e
                ),
            }
        }
        loaded
    }

    /// Re-publish every locally cached record as served by this node
    pub async fn restore_from_local_storage(&self) -> Result<usize> {
        info!("Restore dataset from local storage...");
        let metas = self.backend.list_local()?;
        let mut restored = 0;
        for meta in metas {
            let url = match DataUrl::parse(meta.data_url()) {
                Ok(url) => url,
                Err(e) => {
                    error!("Restore dataset from local storage failed: {}", e);
                    continue;
                }
            };
            let meta = meta.relocated(DataUrl::with_nodelet(&self.nodelet_addr, &url.path));
            if let Err(e) = self.backend.put(&meta).await {
                error!("Republish dataset {} failed: {}", meta.description(), e);
                continue;
            }
            restored += 1;
        }
        info!("Restored {} datasets", restored);
        Ok(restored)
    }

    fn resolver(&self) -> BulkResolver<dyn DirectoryBackend> {
        BulkResolver::new(Arc::clone(&self.backend))
            .with_timeout(self.resolution_timeout())
            .with_poll_interval(self.poll_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MetaCache;
    use crate::dht::{DhtBackend, MemoryDht};
    use dsdir_data::CsvDriver;
    use dsdir_store::MemoryCache;
    use tempfile::tempdir;

    const NODELET: &str = "node0:127.0.0.1:50050";
    const SAMPLE: &str = "x,y\n1,2\n3,4\n";

    fn service() -> (DatasetService, Arc<MemoryCache>) {
        let cache = Arc::new(MemoryCache::new());
        let backend = Arc::new(DhtBackend::new(cache.clone(), Arc::new(MemoryDht::new())));
        let service = DatasetService::new(backend, Arc::new(DriverFactory::new()), NODELET);
        (service, cache)
    }

    #[tokio::test]
    async fn test_new_dataset_publishes_and_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("train.csv");
        std::fs::write(&path, SAMPLE).unwrap();
        let path = path.to_str().unwrap();

        let (service, _) = service();
        let driver: Arc<dyn DataDriver> = Arc::new(CsvDriver::new(NODELET));
        let (dataset, meta) = service.new_dataset(driver, path, "train").await.unwrap();

        assert_eq!(dataset.num_rows(), 2);
        assert_eq!(meta.id(), &DatasetId::from_name("train"));
        assert_eq!(meta.data_url(), format!("{NODELET}:{path}"));
        assert_eq!(service.find_dataset(meta.id()).await.unwrap(), Some(meta.clone()));

        let read = service.read_dataset(meta.id()).await.unwrap().unwrap();
        assert_eq!(read.num_rows(), 2);
    }

    #[tokio::test]
    async fn test_write_dataset() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.csv");
        std::fs::write(&src, SAMPLE).unwrap();
        let dst = dir.path().join("copy.csv");

        let (service, _) = service();
        let driver: Arc<dyn DataDriver> = Arc::new(CsvDriver::new(NODELET));
        let (dataset, _) = service
            .new_dataset(Arc::clone(&driver), src.to_str().unwrap(), "src")
            .await
            .unwrap();
        let meta = service
            .write_dataset(&dataset, driver, dst.to_str().unwrap(), "copy")
            .await
            .unwrap();

        assert!(dst.exists());
        let copy = service.read_dataset(meta.id()).await.unwrap().unwrap();
        assert_eq!(copy.num_rows(), 2);
    }

    #[tokio::test]
    async fn test_read_unknown_dataset() {
        let (service, _) = service();
        assert!(
            service
                .read_dataset(&DatasetId::from_name("nothing"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_read_with_unknown_driver() {
        let (service, _) = service();
        let meta = DatasetMeta::new("p", Visibility::Public, "parquet", "n:h:1:/p.parquet");
        service.register_dataset(&meta).await.unwrap();
        let err = service.read_dataset(meta.id()).await.unwrap_err();
        assert!(matches!(err, Error::DriverNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_is_not_implemented() {
        let (service, _) = service();
        let err = service
            .delete_dataset(&DatasetId::from_name("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
    }

    #[tokio::test]
    async fn test_load_default_datasets_skips_failures() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.csv");
        std::fs::write(&good, SAMPLE).unwrap();

        let (service, _) = service();
        let datasets = vec![
            DefaultDataset {
                description: "good".into(),
                model: "csv".into(),
                source: good.to_str().unwrap().into(),
            },
            DefaultDataset {
                description: "no_driver".into(),
                model: "mysql".into(),
                source: "db".into(),
            },
            DefaultDataset {
                description: "no_file".into(),
                model: "csv".into(),
                source: dir.path().join("missing.csv").to_str().unwrap().into(),
            },
        ];
        assert_eq!(service.load_default_datasets(&datasets).await, 1);
        assert!(
            service
                .find_dataset(&DatasetId::from_name("good"))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_restore_rewrites_nodelet() {
        let (service, cache) = service();
        let local = MetaCache::new(cache);
        let moved = DatasetMeta::new("moved", Visibility::Public, "csv", "old:10.0.0.9:7000:/d/m.csv");
        local.put(&moved).unwrap();
        local
            .put(&DatasetMeta::new("broken", Visibility::Public, "csv", "nowhere"))
            .unwrap();

        assert_eq!(service.restore_from_local_storage().await.unwrap(), 1);
        let restored = local.get(moved.id()).unwrap().unwrap();
        assert_eq!(restored.data_url(), format!("{NODELET}:/d/m.csv"));
        assert_eq!(restored.id(), moved.id());
    }

    #[tokio::test]
    async fn test_resolution_timeout_is_adjustable() {
        let (service, _) = service();
        assert_eq!(service.resolution_timeout(), DEFAULT_RESOLUTION_TIMEOUT);
        service.set_resolution_timeout(Duration::from_millis(50));
        assert_eq!(service.resolution_timeout(), Duration::from_millis(50));

        let fired = service
            .find_peer_list(vec![DatasetRef::new("absent", ())], |_| {})
            .await;
        assert!(!fired);
    }
}
