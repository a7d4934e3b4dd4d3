//! Persistence – where the finished PDF goes.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

/// Body used when sanitizing leaves nothing.
pub const FALLBACK_FILE_NAME_BODY: &str = "markdown";

/// Stores a finished PDF and reports where it went.
pub trait Persister {
    fn persist(&self, file_name: &str, bytes: &[u8]) -> io::Result<String>;
}

/// Writes files into a directory, creating it when missing.
#[derive(Debug, Clone)]
pub struct FilePersister {
    dir: PathBuf,
}

impl FilePersister {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Persister for FilePersister {
    fn persist(&self, file_name: &str, bytes: &[u8]) -> io::Result<String> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(file_name);
        fs::write(&path, bytes)?;
        Ok(path.display().to_string())
    }
}

/// Keeps files in memory.
#[derive(Debug, Default)]
pub struct MemoryPersister {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, file_name: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(file_name)
            .cloned()
    }

    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl Persister for MemoryPersister {
    fn persist(&self, file_name: &str, bytes: &[u8]) -> io::Result<String> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(file_name.to_string(), bytes.to_vec());
        Ok(format!("memory://{file_name}"))
    }
}

impl<T: Persister + ?Sized> Persister for std::sync::Arc<T> {
    fn persist(&self, file_name: &str, bytes: &[u8]) -> io::Result<String> {
        (**self).persist(file_name, bytes)
    }
}

/// Turn a document title into a file name body.
///
/// Strips characters that are unsafe in file names along with all
/// whitespace, drops a trailing `.pdf` and falls back to
/// [`FALLBACK_FILE_NAME_BODY`].
pub fn sanitize_file_name_body(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '?' | '%' | '*' | ':' | '|' | '"' | '<' | '>' | '!' | '#'))
        .filter(|c| !c.is_whitespace())
        .collect();
    let body = match cleaned.len().checked_sub(4) {
        Some(cut) if cleaned.is_char_boundary(cut) && cleaned[cut..].eq_ignore_ascii_case(".pdf") => {
            &cleaned[..cut]
        }
        _ => cleaned.as_str(),
    };
    if body.is_empty() {
        FALLBACK_FILE_NAME_BODY.to_string()
    } else {
        body.to_string()
    }
}
