//! Infrastructure adapters backed by S3

mod s3_store;

pub use s3_store::S3DocumentStore;
