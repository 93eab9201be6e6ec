//! DSDir Data - dataset I/O drivers
//!
//! A driver turns a path into a [`Cursor`] that materializes the dataset
//! as Arrow record batches. The directory only stores where a dataset
//! lives and which driver type reads it; this crate does the reading.

pub mod csv;
pub mod driver;

pub use csv::CsvDriver;
pub use driver::{Cursor, DataDriver, Dataset, DriverError, DriverFactory, DriverResult};
