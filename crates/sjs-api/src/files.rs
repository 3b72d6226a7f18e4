use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sjs_core::SjsError;

/// Read collaborator.
pub trait ReadFile: Send + Sync {
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;

    fn exists(&self, path: &str) -> bool {
        self.read(path).is_ok()
    }
}

/// Write collaborator.
pub trait WriteFile: Send + Sync {
    fn write(&self, path: &str, contents: &[u8]) -> io::Result<()>;
}

impl<F> ReadFile for F
where
    F: Fn(&str) -> io::Result<Vec<u8>> + Send + Sync,
{
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        self(path)
    }
}

impl<F> WriteFile for F
where
    F: Fn(&str, &[u8]) -> io::Result<()> + Send + Sync,
{
    fn write(&self, path: &str, contents: &[u8]) -> io::Result<()> {
        self(path, contents)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DiskReader;

impl ReadFile for DiskReader {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn exists(&self, path: &str) -> bool {
        Path::new(path).is_file()
    }
}

/// Writes to disk, creating missing parent directories.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskWriter;

impl WriteFile for DiskWriter {
    fn write(&self, path: &str, contents: &[u8]) -> io::Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, contents)
    }
}

pub(crate) struct FileResolver {
    search_locations: Vec<String>,
    reader: Arc<dyn ReadFile>,
    writer: Arc<dyn WriteFile>,
}

impl FileResolver {
    pub(crate) fn new(
        search_locations: Vec<String>,
        reader: Option<Arc<dyn ReadFile>>,
        writer: Option<Arc<dyn WriteFile>>,
    ) -> Self {
        Self {
            search_locations,
            reader: reader.unwrap_or_else(|| Arc::new(DiskReader)),
            writer: writer.unwrap_or_else(|| Arc::new(DiskWriter)),
        }
    }

    /// First search location holding `path` wins; otherwise `path` as given.
    pub(crate) fn resolve(&self, path: &str) -> String {
        if Path::new(path).is_absolute() {
            return path.to_string();
        }
        self.search_locations
            .iter()
            .map(|location| join(Path::new(location).join(path)))
            .find(|candidate| self.reader.exists(candidate))
            .unwrap_or_else(|| path.to_string())
    }

    /// Resolves like [`FileResolver::resolve`], then falls back to a path
    /// relative to the file `relative_to`.
    pub(crate) fn resolve_from(&self, path: &str, relative_to: Option<&str>) -> String {
        let resolved = self.resolve(path);
        if self.reader.exists(&resolved) {
            return resolved;
        }
        relative_to
            .and_then(|caller| Path::new(caller).parent())
            .map(|dir| join(dir.join(path)))
            .filter(|candidate| self.reader.exists(candidate))
            .unwrap_or(resolved)
    }

    pub(crate) fn read_text(&self, path: &str) -> Result<String, SjsError> {
        let bytes = self
            .reader
            .read(path)
            .map_err(|error| SjsError::io("IO_READ", path, &error))?;
        String::from_utf8(bytes).map_err(|error| {
            SjsError::io(
                "IO_READ",
                path,
                &io::Error::new(io::ErrorKind::InvalidData, error),
            )
        })
    }

    pub(crate) fn write_text(&self, path: &str, contents: &str) -> Result<(), SjsError> {
        self.writer
            .write(path, contents.as_bytes())
            .map_err(|error| SjsError::io("IO_WRITE", path, &error))
    }
}

fn join(path: PathBuf) -> String {
    path.to_string_lossy().replace('\\', "/")
}
