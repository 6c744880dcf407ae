use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use crate::config::IngestConfig;
use crate::error::PkbError;

/// Which directories to prune and which file extensions to keep
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Directory names (final path component) that are never descended into.
    pub ignore_dirs: HashSet<String>,
    /// Lowercased extensions without the leading dot.
    pub extensions: HashSet<String>,
}

impl WalkOptions {
    pub fn new<I, J, S, T>(ignore_dirs: I, extensions: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            ignore_dirs: ignore_dirs
                .into_iter()
                .map(|d| d.as_ref().to_string())
                .collect(),
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(&config.ignore_directories, &config.supported_extensions)
    }

    fn is_ignored_dir(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|name| self.ignore_dirs.contains(name))
            .unwrap_or(false)
    }

    fn is_supported_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|s| s.to_str())
            .map(|ext| self.extensions.contains(&ext.to_lowercase()))
            .unwrap_or(false)
    }
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

/// Expand `inputs` into the ordered list of files to ingest.
///
/// Breadth-first over a FIFO queue seeded with `inputs` in the given order.
/// A directory's immediate children are appended to the back of the queue
/// sorted by file name, so the output is reproducible. Ignored directories are
/// pruned whole; files are kept only if their extension is supported.
///
/// Unreadable entries are logged and skipped. A directory reached twice (for
/// example through a symlink loop) is only expanded the first time.
pub fn walk(inputs: &[PathBuf], options: &WalkOptions) -> Vec<PathBuf> {
    let mut queue: VecDeque<PathBuf> = inputs.iter().cloned().collect();
    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut files = Vec::new();

    while let Some(path) = queue.pop_front() {
        if path.is_dir() {
            if options.is_ignored_dir(&path) {
                log::debug!("Ignoring directory: {}", path.display());
                continue;
            }

            match path.canonicalize() {
                Ok(canonical) => {
                    if !visited.insert(canonical) {
                        log::debug!("Already visited directory: {}", path.display());
                        continue;
                    }
                }
                Err(source) => {
                    let err = PkbError::Walk { path: path.clone(), source };
                    log::warn!("{}", err);
                    continue;
                }
            }

            log::info!("Found directory: {}, adding its contents to the queue", path.display());
            for entry in WalkDir::new(&path)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
            {
                match entry {
                    Ok(entry) => queue.push_back(entry.into_path()),
                    Err(e) => {
                        let entry_path = e.path().unwrap_or(&path).to_path_buf();
                        let source = e
                            .into_io_error()
                            .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
                        let err = PkbError::Walk { path: entry_path, source };
                        log::warn!("{}", err);
                    }
                }
            }
        } else if path.is_file() && options.is_supported_file(&path) {
            log::debug!("Found file: {}", path.display());
            files.push(path);
        } else {
            log::debug!("Ignoring file: {}", path.display());
        }
    }

    log::info!("Discovered {} file(s)", files.len());
    files
}
