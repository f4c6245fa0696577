//! Playlists
//!
//! [`Playlist`] is the ordered list the session walks through, with the loop
//! bounds stored per entry. [`PlaylistStore`] keeps named playlists in one
//! JSON file in the config directory.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlaylistError {
    #[error("Playlist file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse playlists: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No playlist named '{0}'")]
    NotFound(String),

    #[error("A playlist named '{0}' already exists")]
    Exists(String),
}

/// One track and its loop bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub display_name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub loop_left: usize,
    /// `None` until the track has been loaded once; means end of track
    #[serde(default)]
    pub loop_right: Option<usize>,
}

impl PlaylistEntry {
    /// Entry looping the whole file, named after it
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            display_name,
            path,
            loop_left: 0,
            loop_right: None,
        }
    }

    pub fn with_bounds(mut self, left: usize, right: Option<usize>) -> Self {
        self.loop_left = left;
        self.loop_right = right;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    entries: Vec<PlaylistEntry>,
    current: usize,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<PlaylistEntry>) -> Self {
        Self {
            entries,
            current: 0,
        }
    }

    pub fn entries(&self) -> &[PlaylistEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append and return the new index
    pub fn push(&mut self, entry: PlaylistEntry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    /// Remove an entry; the current index keeps pointing at the same track
    /// where possible.
    pub fn remove(&mut self, index: usize) -> Option<PlaylistEntry> {
        if index >= self.entries.len() {
            return None;
        }
        let entry = self.entries.remove(index);
        if index < self.current || self.current >= self.entries.len() {
            self.current = self.current.saturating_sub(1);
        }
        Some(entry)
    }

    /// Swap with the previous entry. Returns the entry's new index.
    pub fn move_up(&mut self, index: usize) -> Option<usize> {
        if index == 0 || index >= self.entries.len() {
            return None;
        }
        self.swap(index, index - 1);
        Some(index - 1)
    }

    /// Swap with the next entry. Returns the entry's new index.
    pub fn move_down(&mut self, index: usize) -> Option<usize> {
        if index + 1 >= self.entries.len() {
            return None;
        }
        self.swap(index, index + 1);
        Some(index + 1)
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> Option<&PlaylistEntry> {
        self.entries.get(self.current)
    }

    pub fn get(&self, index: usize) -> Option<&PlaylistEntry> {
        self.entries.get(index)
    }

    pub fn select(&mut self, index: usize) -> Option<&PlaylistEntry> {
        if index < self.entries.len() {
            self.current = index;
        }
        self.entries.get(index)
    }

    /// Index after the current one, wrapping
    pub fn next_index(&self) -> Option<usize> {
        if self.entries.is_empty() {
            None
        } else {
            Some((self.current + 1) % self.entries.len())
        }
    }

    /// Index before the current one, wrapping
    pub fn prev_index(&self) -> Option<usize> {
        let len = self.entries.len();
        if len == 0 {
            None
        } else {
            Some((self.current + len - 1) % len)
        }
    }

    /// Store live loop edits on the entry at `index`
    pub fn set_bounds(&mut self, index: usize, left: usize, right: Option<usize>) -> bool {
        match self.entries.get_mut(index) {
            Some(entry) => {
                entry.loop_left = left;
                entry.loop_right = right;
                true
            }
            None => false,
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.entries.swap(a, b);
        if self.current == a {
            self.current = b;
        } else if self.current == b {
            self.current = a;
        }
    }
}

/// Named playlists in a single JSON file
pub struct PlaylistStore {
    path: PathBuf,
}

impl PlaylistStore {
    /// `~/.config/looper-rs/playlists.json`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("looper-rs");
        path.push("playlists.json");
        path
    }

    pub fn open_default() -> Self {
        Self::at(Self::default_path())
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn names(&self) -> Result<Vec<String>, PlaylistError> {
        Ok(self.read_all()?.into_keys().collect())
    }

    pub fn load(&self, name: &str) -> Result<Playlist, PlaylistError> {
        let entries = self
            .read_all()?
            .remove(name)
            .ok_or_else(|| PlaylistError::NotFound(name.to_string()))?;
        Ok(Playlist::from_entries(entries))
    }

    /// Save under a new `name`. An existing playlist is never overwritten;
    /// [`remove`](Self::remove) it first.
    pub fn save(&self, name: &str, playlist: &Playlist) -> Result<(), PlaylistError> {
        let mut all = self.read_all()?;
        if all.contains_key(name) {
            return Err(PlaylistError::Exists(name.to_string()));
        }
        all.insert(name.to_string(), playlist.entries().to_vec());
        self.write_all(&all)?;
        log::info!("Saved playlist '{}' ({} entries)", name, playlist.len());
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<(), PlaylistError> {
        let mut all = self.read_all()?;
        if all.remove(name).is_none() {
            return Err(PlaylistError::NotFound(name.to_string()));
        }
        self.write_all(&all)
    }

    fn read_all(&self) -> Result<BTreeMap<String, Vec<PlaylistEntry>>, PlaylistError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, all: &BTreeMap<String, Vec<PlaylistEntry>>) -> Result<(), PlaylistError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(all)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three() -> Playlist {
        Playlist::from_entries(vec![
            PlaylistEntry::new("/music/a.wav"),
            PlaylistEntry::new("/music/b.flac"),
            PlaylistEntry::new("/music/c.mp3"),
        ])
    }

    #[test]
    fn test_entry_named_after_file() {
        let entry = PlaylistEntry::new("/music/take 3.wav");
        assert_eq!(entry.display_name, "take 3.wav");
        assert_eq!(entry.loop_right, None);
    }

    #[test]
    fn test_neighbours_wrap() {
        let mut playlist = three();
        playlist.select(2);
        assert_eq!(playlist.next_index(), Some(0));
        playlist.select(0);
        assert_eq!(playlist.prev_index(), Some(2));
        assert_eq!(Playlist::new().next_index(), None);
    }

    #[test]
    fn test_moves_follow_current() {
        let mut playlist = three();
        playlist.select(1);
        assert_eq!(playlist.move_up(1), Some(0));
        assert_eq!(playlist.current_index(), 0);
        assert_eq!(playlist.current().unwrap().display_name, "b.flac");

        assert_eq!(playlist.move_down(2), None);
        assert_eq!(playlist.move_up(0), None);
    }

    #[test]
    fn test_remove_keeps_current_track() {
        let mut playlist = three();
        playlist.select(2);
        playlist.remove(0);
        assert_eq!(playlist.current().unwrap().display_name, "c.mp3");

        playlist.remove(1);
        assert_eq!(playlist.current_index(), 0);
        assert!(playlist.remove(5).is_none());
    }

    #[test]
    fn test_bounds_written_back() {
        let mut playlist = three();
        assert!(playlist.set_bounds(1, 100, Some(9000)));
        let entry = playlist.get(1).unwrap();
        assert_eq!((entry.loop_left, entry.loop_right), (100, Some(9000)));
        assert!(!playlist.set_bounds(3, 0, None));
    }

    #[test]
    fn test_save_refuses_existing_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = PlaylistStore::at(dir.path().join("playlists.json"));
        store.save("live", &three()).unwrap();

        assert!(matches!(
            store.save("live", &Playlist::new()),
            Err(PlaylistError::Exists(name)) if name == "live"
        ));
        assert_eq!(store.load("live").unwrap().len(), 3);

        store.remove("live").unwrap();
        store.save("live", &Playlist::new()).unwrap();
        assert!(store.load("live").unwrap().is_empty());
    }

    #[test]
    fn test_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = PlaylistStore::at(dir.path().join("nested").join("playlists.json"));
        assert!(store.names().unwrap().is_empty());

        let mut playlist = three();
        playlist.set_bounds(0, 10, Some(20));
        store.save("set one", &playlist).unwrap();
        store.save("another", &Playlist::new()).unwrap();

        assert_eq!(store.names().unwrap(), vec!["another", "set one"]);
        let loaded = store.load("set one").unwrap();
        assert_eq!(loaded.entries(), playlist.entries());

        store.remove("another").unwrap();
        assert!(matches!(store.load("another"), Err(PlaylistError::NotFound(_))));
        assert!(matches!(store.remove("another"), Err(PlaylistError::NotFound(_))));
    }

    #[test]
    fn test_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playlists.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(PlaylistStore::at(path).names(), Err(PlaylistError::Parse(_))));
    }
}
