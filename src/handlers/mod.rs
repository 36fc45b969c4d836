//! Host-gateway handler flows.

pub mod bucket;
