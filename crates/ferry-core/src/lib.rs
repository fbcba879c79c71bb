//! ferry-core: chunking, cipher framing, compression, digests, and configuration.
//! All other Ferry crates depend on this one.

pub mod chunk;
pub mod cipher;
pub mod compress;
pub mod config;
pub mod digest;
pub mod error;

pub use chunk::Chunk;
pub use cipher::EncryptionKey;
pub use digest::{Digest, DigestAlgorithm};
pub use error::{Error, Result};
