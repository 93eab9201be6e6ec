//! DSDir Protocol - gRPC definitions
//!
//! Generated from the files under `proto/` at build time.

/// Centralized dataset registry service
pub mod registry {
    tonic::include_proto!("dsdir.registry");
}

/// Value storage served by each DHT peer
pub mod dht {
    tonic::include_proto!("dsdir.dht");
}
