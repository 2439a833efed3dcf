//! Build context hashing and archiving.

use deployit_core::artifact::BuildRequest;
use deployit_core::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Name the dockerfile is stored under when it lives outside the context.
pub const EXTERNAL_DOCKERFILE: &str = ".deployit.Dockerfile";

const SKIPPED_DIRS: &[&str] = &[".git", ".deployit"];

fn is_skipped(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

/// Regular files under `root`, sorted, with their slash-separated relative paths.
fn context_files(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    if !root.is_dir() {
        return Err(Error::Build(format!(
            "build context {} is not a directory",
            root.display()
        )));
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e));
    for entry in walker {
        let entry = entry.map_err(|e| Error::Build(format!("failed to walk context: {}", e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| Error::Build(e.to_string()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((name, entry.path().to_path_buf()));
    }
    Ok(files)
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::Build(format!("failed to read {}: {}", path.display(), e)))
}

fn hash_files(hasher: &mut Sha256, files: &[(String, PathBuf)]) -> Result<()> {
    for (name, path) in files {
        hasher.update(b"file\0");
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        let content = read(path)?;
        hasher.update((content.len() as u64).to_le_bytes());
        hasher.update(&content);
    }
    Ok(())
}

/// Hex-encoded SHA-256 over the relative paths and contents of every file
/// under `root`. Used for local chart directories.
pub fn hash_directory(root: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    hash_files(&mut hasher, &context_files(root)?)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Content hash of a build: every context file (path and bytes), the
/// dockerfile, build args and cache stages. Hex-encoded SHA-256.
pub fn hash_context(request: &BuildRequest) -> Result<String> {
    let mut hasher = Sha256::new();
    let files = context_files(&request.context)?;
    hash_files(&mut hasher, &files)?;

    hasher.update(b"dockerfile\0");
    hasher.update(read(&request.dockerfile)?);

    for (key, value) in &request.build_args {
        hasher.update(b"arg\0");
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }

    for stage in &request.cache_from {
        hasher.update(b"cache\0");
        hasher.update(stage.as_bytes());
        hasher.update([0u8]);
    }

    let hash = hex::encode(hasher.finalize());
    debug!(context = %request.context.display(), files = files.len(), hash = %hash, "Hashed build context");
    Ok(hash)
}

/// Tar the build context for the docker daemon.
///
/// Returns the archive and the dockerfile's path inside it.
pub fn archive_context(request: &BuildRequest) -> Result<(Vec<u8>, String)> {
    let files = context_files(&request.context)?;
    let mut data = Vec::new();

    let dockerfile_name = {
        let mut builder = tar::Builder::new(&mut data);
        builder.follow_symlinks(false);
        let io_err = |e: std::io::Error| Error::Build(format!("failed to archive context: {}", e));

        for (name, path) in &files {
            builder.append_path_with_name(path, name).map_err(io_err)?;
        }

        let inside = request
            .dockerfile
            .strip_prefix(&request.context)
            .ok()
            .map(|p| {
                p.components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .filter(|name| files.iter().any(|(f, _)| f == name));

        let name = match inside {
            Some(name) => name,
            None => {
                builder
                    .append_path_with_name(&request.dockerfile, EXTERNAL_DOCKERFILE)
                    .map_err(io_err)?;
                EXTERNAL_DOCKERFILE.to_string()
            }
        };
        builder.finish().map_err(io_err)?;
        name
    };

    debug!(size = data.len(), dockerfile = %dockerfile_name, "Archived build context");
    Ok((data, dockerfile_name))
}
