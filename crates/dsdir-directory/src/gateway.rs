//! Transfer ticket handling
//!
//! The transfer layer asks for a dataset with a ticket holding the textual
//! dataset id. The gateway looks the record up, reads the data through the
//! record's driver and returns a stream that owns every batch.

use crate::backend::DirectoryBackend;
use crate::service::load_dataset;
use arrow::datatypes::SchemaRef;
use arrow::error::ArrowError;
use arrow::record_batch::{RecordBatch, RecordBatchIterator, RecordBatchReader};
use dsdir_common::{DatasetId, DatasetMeta, Error, Result};
use dsdir_data::DriverFactory;
use std::sync::Arc;
use tracing::{error, info};

/// Record batches of one dataset, owned by the stream
pub struct DatasetStream {
    meta: DatasetMeta,
    reader: Box<dyn RecordBatchReader + Send>,
}

impl DatasetStream {
    #[must_use]
    pub const fn meta(&self) -> &DatasetMeta {
        &self.meta
    }

    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        self.reader.schema()
    }
}

impl Iterator for DatasetStream {
    type Item = std::result::Result<RecordBatch, ArrowError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next()
    }
}

pub struct DataGateway {
    backend: Arc<dyn DirectoryBackend>,
    drivers: Arc<DriverFactory>,
    nodelet_addr: String,
}

impl DataGateway {
    pub fn new(
        backend: Arc<dyn DirectoryBackend>,
        drivers: Arc<DriverFactory>,
        nodelet_addr: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            drivers,
            nodelet_addr: nodelet_addr.into(),
        }
    }

    /// Serve the dataset named by `ticket`
    pub async fn do_get(&self, ticket: &[u8]) -> Result<DatasetStream> {
        let ticket_str = std::str::from_utf8(ticket)
            .map_err(|_| Error::KeyNotFound(String::from_utf8_lossy(ticket).into_owned()))?;
        let id = DatasetId::new(ticket_str);

        let Some(meta) = self.backend.get(&id).await? else {
            error!("Dataset for ticket {} not found", ticket_str);
            return Err(Error::KeyNotFound(ticket_str.to_string()));
        };

        let dataset = load_dataset(&self.drivers, &self.nodelet_addr, &meta).await?;
        info!(
            "Serving dataset {} ({} rows) for ticket {}",
            meta.description(),
            dataset.num_rows(),
            ticket_str
        );

        let (schema, batches) = dataset.into_parts();
        let reader = RecordBatchIterator::new(batches.into_iter().map(Ok), schema);
        Ok(DatasetStream {
            meta,
            reader: Box::new(reader),
        })
    }
}
