//! Storage backends

pub mod azure;
pub mod fs;
pub mod gcs;
pub mod http;
pub mod k8s;
pub mod memfs;
pub mod metadata;
pub mod oss;
pub mod s3;
pub mod sftp;
pub mod swift;
pub mod vault;
