use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::SystemTime;

use anyhow::{Context, Result};
use blake3::Hasher;

use crate::cache::HashCache;
use crate::utils::absolute_path;
use crate::Digest;

/// Read size used while streaming file content into the hasher.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Digest of zero bytes of content. Every empty file carries it.
pub fn empty_digest() -> Digest {
    blake3::hash(&[]).to_hex().to_string()
}

/// Digest a regular file, consulting the cache when one is configured.
///
/// A cached digest is only trusted when `modified` is not newer than the
/// cache's run timestamp. Freshly computed digests are written back at once.
pub fn hash_file(
    path: &Path,
    size: u64,
    modified: SystemTime,
    cache: Option<&HashCache>,
) -> Result<Digest> {
    if size == 0 {
        return Ok(empty_digest());
    }

    let Some(cache) = cache else {
        return calculate_hash(path);
    };

    let key = absolute_path(path)?;
    if !cache.is_stale(modified) {
        if let Some(digest) = cache.get(&key)? {
            tracing::trace!(path = %key.display(), "cache hit");
            return Ok(digest);
        }
    }

    let digest = calculate_hash(path)?;
    cache.put(&key, &digest)?;
    Ok(digest)
}

/// Digest a directory from the digests of its live children.
///
/// The input order does not matter: digests are sorted before hashing.
pub fn hash_directory<'a>(children: impl IntoIterator<Item = &'a str>) -> Digest {
    let mut digests: Vec<&str> = children.into_iter().collect();
    digests.sort_unstable();

    let mut hasher = Hasher::new();
    for digest in digests {
        hasher.update(digest.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Stream a file's bytes through BLAKE3.
fn calculate_hash(path: &Path) -> Result<Digest> {
    let mut file =
        fs::File::open(path).with_context(|| format!("Failed to open file {}", path.display()))?;

    let mut hasher = Hasher::new();
    let mut buffer = vec![0; CHUNK_SIZE];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .with_context(|| format!("Failed to read file {}", path.display()))?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}
