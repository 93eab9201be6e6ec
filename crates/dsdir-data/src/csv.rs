//! CSV driver
//!
//! Reads a local CSV file with a header row into Arrow record batches,
//! inferring the schema from the first rows, and writes datasets back as
//! CSV with a header.

use crate::driver::{Cursor, DataDriver, Dataset, DriverError, DriverResult};
use arrow::csv::reader::Format;
use arrow::csv::{ReaderBuilder, WriterBuilder};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Driver type name stored in dataset records
pub const DRIVER_TYPE: &str = "csv";

/// Rows sampled when inferring a schema
const INFER_MAX_RECORDS: usize = 1000;

const BATCH_SIZE: usize = 8192;

/// Driver for CSV files on the local filesystem
pub struct CsvDriver {
    nodelet_addr: String,
}

impl CsvDriver {
    #[must_use]
    pub fn new(nodelet_addr: impl Into<String>) -> Self {
        Self {
            nodelet_addr: nodelet_addr.into(),
        }
    }
}

impl DataDriver for CsvDriver {
    fn driver_type(&self) -> &str {
        DRIVER_TYPE
    }

    fn nodelet_addr(&self) -> &str {
        &self.nodelet_addr
    }

    fn open(&self, path: &str) -> DriverResult<Box<dyn Cursor>> {
        if path.is_empty() {
            return Err(DriverError::UnsupportedPath(path.to_string()));
        }
        Ok(Box::new(CsvCursor {
            path: path.to_string(),
        }))
    }
}

/// Cursor over a single CSV file
pub struct CsvCursor {
    path: String,
}

impl Cursor for CsvCursor {
    fn path(&self) -> &str {
        &self.path
    }

    fn read(&mut self) -> DriverResult<Dataset> {
        let mut file = File::open(&self.path)?;
        let format = Format::default().with_header(true);
        let (schema, _) = format.infer_schema(&mut file, Some(INFER_MAX_RECORDS))?;
        file.seek(SeekFrom::Start(0))?;

        let schema = Arc::new(schema);
        let reader = ReaderBuilder::new(Arc::clone(&schema))
            .with_header(true)
            .with_batch_size(BATCH_SIZE)
            .build(file)?;
        let batches = reader.collect::<Result<Vec<_>, _>>()?;

        let dataset = Dataset::new(schema, batches);
        debug!("Read {} rows from {}", dataset.num_rows(), self.path);
        Ok(dataset)
    }

    fn write(&mut self, dataset: &Dataset) -> DriverResult<()> {
        if let Some(parent) = Path::new(&self.path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&self.path)?;
        let mut writer = WriterBuilder::new().with_header(true).build(file);
        for batch in dataset.batches() {
            writer.write(batch)?;
        }
        let mut file = writer.into_inner();
        file.flush()?;
        file.sync_all()?;
        debug!("Wrote {} rows to {}", dataset.num_rows(), self.path);
        Ok(())
    }
}
