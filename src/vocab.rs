//! Persistent class/selector vocabulary and the advisory lock guarding
//! concurrent compiler invocations from corrupting it.
//!
//! The vocabulary is a shared resource: every compiled unit may add
//! new selector and class numbers, and those numbers must stay stable
//! across separately compiled units in the same project. `VocabStore`
//! loads it once, lets the compiler allocate new entries, and writes
//! it back only when the unit compiled cleanly.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::errors::{CoreError, SourceLoc};

/// One half of the vocabulary: a bidirectional name/number table,
/// backed by a plain-text file of `<number> <name>` lines.
#[derive(Debug, Default, Clone)]
pub struct NameTable {
    by_name: BTreeMap<String, u16>,
    by_number: BTreeMap<u16, String>,
    next: u16,
}

impl NameTable {
    fn load(path: &Path) -> Result<Self, CoreError> {
        let mut table = NameTable::default();
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(table),
            Err(e) => {
                return Err(CoreError::Io {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| CoreError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((num_str, name)) = line.split_once(char::is_whitespace) else {
                continue;
            };
            let Ok(number) = num_str.trim().parse::<u16>() else {
                continue;
            };
            let name = name.trim().to_string();
            table.insert_known(number, name);
        }
        Ok(table)
    }

    fn insert_known(&mut self, number: u16, name: String) {
        self.by_number.insert(number, name.clone());
        self.by_name.insert(name, number);
        if number >= self.next {
            self.next = number + 1;
        }
    }

    pub fn number_of(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, number: u16) -> Option<&str> {
        self.by_number.get(&number).map(String::as_str)
    }

    /// Returns the existing number for `name`, or installs it at the
    /// next free number and returns that.
    pub fn intern(&mut self, name: &str) -> u16 {
        if let Some(n) = self.number_of(name) {
            return n;
        }
        let number = self.next;
        self.next += 1;
        self.insert_known(number, name.to_string());
        number
    }

    fn write(&self, path: &Path) -> Result<(), CoreError> {
        let mut out = String::new();
        for (number, name) in &self.by_number {
            out.push_str(&number.to_string());
            out.push(' ');
            out.push_str(name);
            out.push('\n');
        }
        std::fs::write(path, out).map_err(|e| CoreError::Io {
            path: path.display().to_string(),
            source: e,
        })
    }
}

/// The loaded selector and class vocabularies for one compiler run.
pub struct VocabStore {
    selector_path: PathBuf,
    classdef_path: PathBuf,
    pub selectors: NameTable,
    pub classes: NameTable,
}

impl VocabStore {
    pub fn load(selector_path: PathBuf, classdef_path: PathBuf) -> Result<Self, CoreError> {
        let selectors = NameTable::load(&selector_path)?;
        let classes = NameTable::load(&classdef_path)?;
        Ok(VocabStore {
            selector_path,
            classdef_path,
            selectors,
            classes,
        })
    }

    /// Rewrites both vocabulary files. Callers only invoke this after
    /// confirming the unit's error count is zero.
    pub fn write_back(&self) -> Result<(), CoreError> {
        self.selectors.write(&self.selector_path)?;
        self.classes.write(&self.classdef_path)?;
        Ok(())
    }
}

/// An advisory exclusive lock over the vocabulary files, held for the
/// duration of a compilation unit so two compiler processes never
/// interleave reads and write-backs.
pub struct FileLock {
    file: File,
    locked: bool,
}

impl FileLock {
    /// Opens (creating if absent) the lockfile at `path` without
    /// acquiring the lock.
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| CoreError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
        Ok(FileLock { file, locked: false })
    }

    /// Attempts to acquire the lock without blocking. Returns `false`
    /// if another process already holds it.
    pub fn try_lock(&mut self) -> Result<bool, CoreError> {
        match self.file.try_lock_exclusive() {
            Ok(()) => {
                self.locked = true;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(CoreError::Internal {
                detail: format!("lock acquisition failed: {e}"),
                loc: SourceLoc::unknown(),
            }),
        }
    }

    /// Blocks until the lock is acquired.
    pub fn lock(&mut self) -> Result<(), CoreError> {
        self.file.lock_exclusive().map_err(|e| CoreError::Internal {
            detail: format!("lock acquisition failed: {e}"),
            loc: SourceLoc::unknown(),
        })?;
        self.locked = true;
        Ok(())
    }

    pub fn unlock(&mut self) {
        if self.locked {
            let _ = self.file.unlock();
            self.locked = false;
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.unlock();
    }
}

/// The directory vocabulary files live in when the working directory
/// doesn't already contain them: probed the same way a cross-platform
/// toolchain resolves a per-user config home, falling back through the
/// environment before consulting `dirs`.
pub fn default_vocab_dir() -> PathBuf {
    if let Ok(v) = std::env::var("APPDATA") {
        if !v.is_empty() {
            return PathBuf::from(v).join("sfc");
        }
    }
    if let Ok(v) = std::env::var("HOME") {
        if !v.is_empty() {
            return PathBuf::from(v).join(".sfc");
        }
    }
    if let Some(d) = dirs::home_dir() {
        return d.join(".sfc");
    }
    PathBuf::from(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn name_table_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("selector");
        {
            let mut f = File::create(&path).unwrap();
            writeln!(f, "1 x").unwrap();
            writeln!(f, "2 y").unwrap();
        }
        let table = NameTable::load(&path).unwrap();
        assert_eq!(table.number_of("x"), Some(1));
        assert_eq!(table.name_of(2), Some("y"));
    }

    #[test]
    fn intern_reuses_existing_number_and_allocates_past_the_highest_seen() {
        let mut table = NameTable::default();
        table.insert_known(5, "init".into());
        assert_eq!(table.intern("init"), 5);
        assert_eq!(table.intern("fresh"), 6);
    }

    #[test]
    fn missing_vocab_file_loads_as_empty_rather_than_erroring() {
        let dir = tempfile::tempdir().unwrap();
        let table = NameTable::load(&dir.path().join("does-not-exist")).unwrap();
        assert_eq!(table.number_of("anything"), None);
    }

    #[test]
    fn write_back_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let selector_path = dir.path().join("selector");
        let classdef_path = dir.path().join("classdef");
        File::create(&selector_path).unwrap();
        File::create(&classdef_path).unwrap();
        let mut store = VocabStore::load(selector_path.clone(), classdef_path.clone()).unwrap();
        store.selectors.intern("init");
        store.write_back().unwrap();

        let reloaded = VocabStore::load(selector_path, classdef_path).unwrap();
        assert_eq!(reloaded.selectors.number_of("init"), Some(0));
    }

    #[test]
    fn a_second_try_lock_on_the_same_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock");
        let mut first = FileLock::open(&path).unwrap();
        assert!(first.try_lock().unwrap());

        let mut second = FileLock::open(&path).unwrap();
        assert!(!second.try_lock().unwrap());

        first.unlock();
        assert!(second.try_lock().unwrap());
    }
}
