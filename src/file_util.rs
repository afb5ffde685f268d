use flate2::{Compression, write::GzEncoder};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Moves `src` to `dest`, falling back to copy and remove when a rename is not possible
/// (for example across filesystems).
pub(crate) async fn move_file(src: &Path, dest: &Path) -> io::Result<()> {
    match tokio::fs::rename(src, dest).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e),
        Err(_) => {
            tokio::fs::copy(src, dest).await?;
            tokio::fs::remove_file(src).await
        }
    }
}

/// Returns the names of the regular files directly inside `dir`, sorted.
pub(crate) fn list_file_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = vec![];
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Writes every regular file directly inside `dir` into a gzip tarball at `dest`.
///
/// Entries are stored under their bare file names, sorted by name. An existing `dest` is
/// never overwritten: the call fails with [`io::ErrorKind::AlreadyExists`] instead.
pub(crate) fn write_flat_tarball(dir: &Path, dest: &Path) -> io::Result<()> {
    let names = list_file_names(dir)?;
    let file = BufWriter::new(File::create_new(dest)?);
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for name in names {
        builder.append_path_with_name(dir.join(&name), &name)?;
    }
    let mut file = builder.into_inner()?.finish()?;
    file.flush()?;
    Ok(())
}

/// Packs the directory `src` into a gzip tarball at `dest`.
///
/// Entry paths are relative to the parent of `src`, so the archive unpacks into a
/// single directory named after `src`.
pub(crate) fn pack_dir(src: &Path, dest: &Path) -> io::Result<()> {
    let prefix = src.parent().unwrap_or_else(|| Path::new(""));
    let file = BufWriter::new(File::create(dest)?);
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        let path = entry.path();
        let name: PathBuf = path
            .strip_prefix(prefix)
            .map_err(io::Error::other)?
            .into();
        if entry.file_type().is_dir() {
            builder.append_dir(&name, path)?;
        } else if entry.file_type().is_file() {
            builder.append_path_with_name(path, &name)?;
        }
    }
    let mut file = builder.into_inner()?.finish()?;
    file.flush()?;
    Ok(())
}
