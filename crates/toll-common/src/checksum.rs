//! Checksum utilities for staged archive fingerprints

use crate::error::Result;
use crate::types::{ChecksumAlgorithm, FileMetadata};
use sha2::{Digest, Sha256, Sha512};
use std::io::Read;
use std::path::Path;

/// Compute checksum for a file
pub fn compute_file_checksum(
    path: impl AsRef<Path>,
    algorithm: ChecksumAlgorithm,
) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    compute_checksum(&mut file, algorithm)
}

/// Compute checksum for any readable source
pub fn compute_checksum<R: Read>(reader: &mut R, algorithm: ChecksumAlgorithm) -> Result<String> {
    match algorithm {
        ChecksumAlgorithm::Sha256 => digest_reader::<Sha256, R>(reader),
        ChecksumAlgorithm::Sha512 => digest_reader::<Sha512, R>(reader),
    }
}

fn digest_reader<D: Digest, R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = D::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Collect size and checksum of a staged file
pub fn file_metadata(path: impl AsRef<Path>, algorithm: ChecksumAlgorithm) -> Result<FileMetadata> {
    let path = path.as_ref();
    let size = std::fs::metadata(path)?.len();
    let checksum = compute_file_checksum(path, algorithm)?;

    Ok(FileMetadata {
        path: path.to_string_lossy().to_string(),
        algorithm,
        checksum,
        size,
    })
}
