//! Directory listing and source file classification.
//!
//! Listing is a pure function of the directory tree: it returns every regular
//! file below a root, sorted, and never mutates shared state. Deciding which of
//! those files are image sources goes through the single [`classify`] predicate.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Extensions of single-file image stacks.
pub const IMAGE_EXTENSIONS: &[&str] = &["tif", "tiff"];

/// Extension of multi-file acquisition index files.
pub const ND_EXTENSION: &str = "nd";

/// Extension of text side files (notes, coordinate tables) that are never sources.
pub const TEXT_EXTENSION: &str = "txt";

/// Kind of a file found while walking an input tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// A stack readable as a volume.
    Image,
    /// An acquisition index; when present, indices replace the plain images.
    NdIndex,
    /// Text side file.
    Text,
    /// Anything else.
    Other,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Failed to read directory '{path}': {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("'{path}' exists and is not a directory")]
    NotADirectory { path: PathBuf },
}

/// Classifies a path by its extension (case-insensitive).
pub fn classify(path: &Path) -> FileKind {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return FileKind::Other;
    };

    if IMAGE_EXTENSIONS
        .iter()
        .any(|candidate| ext.eq_ignore_ascii_case(candidate))
    {
        FileKind::Image
    } else if ext.eq_ignore_ascii_case(ND_EXTENSION) {
        FileKind::NdIndex
    } else if ext.eq_ignore_ascii_case(TEXT_EXTENSION) {
        FileKind::Text
    } else {
        FileKind::Other
    }
}

/// Returns every regular file below `root`, recursively, in sorted order.
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>, DirectoryError> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|source| DirectoryError::ReadDir {
            path: dir.clone(),
            source,
        })?;

        for entry in entries {
            let entry = entry.map_err(|source| DirectoryError::ReadDir {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Source stacks found below a root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceListing {
    pub sources: Vec<PathBuf>,
    /// Plain images left out because `.nd` indices took their place.
    pub displaced_images: usize,
}

/// Returns the source stacks below `root`.
///
/// Plain image files are returned unless the tree holds at least one `.nd`
/// index, in which case only the index files are returned.
pub fn source_files(root: &Path) -> Result<SourceListing, DirectoryError> {
    let files = list_files(root)?;

    let (nd_files, images): (Vec<PathBuf>, Vec<PathBuf>) = files
        .into_iter()
        .filter(|path| matches!(classify(path), FileKind::NdIndex | FileKind::Image))
        .partition(|path| classify(path) == FileKind::NdIndex);

    if nd_files.is_empty() {
        return Ok(SourceListing {
            sources: images,
            displaced_images: 0,
        });
    }

    Ok(SourceListing {
        sources: nd_files,
        displaced_images: images.len(),
    })
}

/// Creates `path` (and missing parents) unless it already exists.
pub fn ensure_directory(path: &Path) -> Result<(), DirectoryError> {
    if path.exists() {
        if path.is_dir() {
            return Ok(());
        }
        return Err(DirectoryError::NotADirectory {
            path: path.to_path_buf(),
        });
    }

    fs::create_dir_all(path).map_err(|source| DirectoryError::CreateDir {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), "Created directory");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(Path::new("a/b.tif")), FileKind::Image);
        assert_eq!(classify(Path::new("a/b.TIFF")), FileKind::Image);
        assert_eq!(classify(Path::new("b.nd")), FileKind::NdIndex);
        assert_eq!(classify(Path::new("notes.TXT")), FileKind::Text);
        assert_eq!(classify(Path::new("raw.czi")), FileKind::Other);
        assert_eq!(classify(Path::new("no_extension")), FileKind::Other);
    }

    #[test]
    fn test_list_files_recursive_sorted() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.tif"));
        touch(&dir.path().join("sub/a.tif"));
        touch(&dir.path().join("sub/deeper/c.txt"));
        touch(&dir.path().join("a.tif"));

        let files = list_files(dir.path()).unwrap();
        let relative: Vec<PathBuf> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();

        assert_eq!(
            relative,
            vec![
                PathBuf::from("a.tif"),
                PathBuf::from("b.tif"),
                PathBuf::from("sub/a.tif"),
                PathBuf::from("sub/deeper/c.txt"),
            ]
        );
    }

    #[test]
    fn test_list_files_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_files(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, DirectoryError::ReadDir { .. }));
    }

    #[test]
    fn test_source_files_skips_text_and_other() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("stack.tif"));
        touch(&dir.path().join("coordinates.txt"));
        touch(&dir.path().join("thumb.png"));

        let listing = source_files(dir.path()).unwrap();
        assert_eq!(listing.sources, vec![dir.path().join("stack.tif")]);
        assert_eq!(listing.displaced_images, 0);
    }

    #[test]
    fn test_source_files_prefers_nd_index() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("stack.tif"));
        touch(&dir.path().join("run/acquisition.nd"));

        touch(&dir.path().join("other.tiff"));

        let listing = source_files(dir.path()).unwrap();
        assert_eq!(listing.sources, vec![dir.path().join("run/acquisition.nd")]);
        assert_eq!(listing.displaced_images, 2);
    }

    #[test]
    fn test_ensure_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("out/crops");

        ensure_directory(&nested).unwrap();
        assert!(nested.is_dir());
        // Idempotent
        ensure_directory(&nested).unwrap();

        let file = dir.path().join("file");
        touch(&file);
        let err = ensure_directory(&file).unwrap_err();
        assert!(matches!(err, DirectoryError::NotADirectory { .. }));
    }
}
