//! Driver contract and factory

use arrow::datatypes::SchemaRef;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Error type for driver operations
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("no driver registered for type: {0}")]
    UnknownDriver(String),
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported path: {0}")]
    UnsupportedPath(String),
}

impl From<DriverError> for dsdir_common::Error {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::UnknownDriver(t) => Self::DriverNotFound(t),
            other => Self::Driver(other.to_string()),
        }
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// A fully materialized dataset
///
/// Owns its schema and every batch, so it can be handed to a consumer
/// without keeping the cursor or driver alive.
#[derive(Clone, Debug)]
pub struct Dataset {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl Dataset {
    #[must_use]
    pub const fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self { schema, batches }
    }

    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    #[must_use]
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Give up ownership of the schema and batches
    #[must_use]
    pub fn into_parts(self) -> (SchemaRef, Vec<RecordBatch>) {
        (self.schema, self.batches)
    }
}

/// Reads or writes one dataset location
pub trait Cursor: Send {
    /// Location this cursor was opened on
    fn path(&self) -> &str;

    fn read(&mut self) -> DriverResult<Dataset>;

    fn write(&mut self, dataset: &Dataset) -> DriverResult<()>;
}

/// Opens cursors for one kind of storage
pub trait DataDriver: Send + Sync {
    /// Type name stored in dataset records, e.g. "csv"
    fn driver_type(&self) -> &str;

    /// Address of the node this driver serves data for
    fn nodelet_addr(&self) -> &str;

    fn open(&self, path: &str) -> DriverResult<Box<dyn Cursor>>;
}

type DriverCtor = Arc<dyn Fn(&str) -> Arc<dyn DataDriver> + Send + Sync>;

/// Maps driver type names to driver constructors
pub struct DriverFactory {
    ctors: RwLock<HashMap<String, DriverCtor>>,
}

impl DriverFactory {
    /// Factory with no drivers registered
    #[must_use]
    pub fn empty() -> Self {
        Self {
            ctors: RwLock::new(HashMap::new()),
        }
    }

    /// Factory with the built-in drivers registered
    #[must_use]
    pub fn new() -> Self {
        let factory = Self::empty();
        factory.register(crate::csv::DRIVER_TYPE, |nodelet: &str| -> Arc<dyn DataDriver> {
            Arc::new(crate::csv::CsvDriver::new(nodelet))
        });
        factory
    }

    /// Register (or replace) the constructor for a driver type
    pub fn register<F>(&self, driver_type: &str, ctor: F)
    where
        F: Fn(&str) -> Arc<dyn DataDriver> + Send + Sync + 'static,
    {
        self.ctors
            .write()
            .insert(driver_type.to_string(), Arc::new(ctor));
    }

    /// Build a driver of the given type serving the given node
    pub fn get_driver(
        &self,
        driver_type: &str,
        nodelet_addr: &str,
    ) -> DriverResult<Arc<dyn DataDriver>> {
        let ctor = self
            .ctors
            .read()
            .get(driver_type)
            .cloned()
            .ok_or_else(|| DriverError::UnknownDriver(driver_type.to_string()))?;
        Ok(ctor(nodelet_addr))
    }

    #[must_use]
    pub fn driver_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.ctors.read().keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for DriverFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_drivers() {
        let factory = DriverFactory::new();
        assert_eq!(factory.driver_types(), vec!["csv".to_string()]);
        let driver = factory.get_driver("csv", "node0:127.0.0.1:50050").unwrap();
        assert_eq!(driver.driver_type(), "csv");
        assert_eq!(driver.nodelet_addr(), "node0:127.0.0.1:50050");
    }

    #[test]
    fn test_unknown_driver() {
        let factory = DriverFactory::empty();
        let err = factory.get_driver("sqlite", "n").err().unwrap();
        assert!(matches!(err, DriverError::UnknownDriver(ref t) if t == "sqlite"));
        let common: dsdir_common::Error = err.into();
        assert!(matches!(common, dsdir_common::Error::DriverNotFound(_)));
    }
}
