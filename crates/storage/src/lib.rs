//! On-disk artifact bundles: writing, hashing and verification.

pub mod artifacts;
pub mod defang;
pub mod digest;

pub use artifacts::{
    verify_bundle, write_bundle, ArtifactEntry, Iocs, Meta, PerProfile, VerifyReport,
};
pub use defang::{defang_host, defang_url};
pub use digest::Sha256Digest;
