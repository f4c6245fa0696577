//! Control-side coordinator
//!
//! A [`Session`] ties the engine handle, the prefetcher and the playlist
//! together. It is polled from the control loop: it drains transport and
//! prefetch events, advances the playlist when a loop boundary is crossed in
//! playlist mode, and carries out user [`Command`]s.
//!
//! While an advance is possible the engine holds at each loop wrap, so the
//! next track starts from a silent boundary instead of cutting into the old
//! one mid-loop.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::audio::is_supported;
use crate::control::{Command, Position, HELP};
use crate::engine::{
    BoundsError, Direction, EngineHandle, LoadRequest, LoopRange, PrefetchEvent, Prefetcher,
    TransportEvent,
};
use crate::playlist::{Playlist, PlaylistEntry, PlaylistError, PlaylistStore};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Bounds(#[from] BoundsError),

    #[error(transparent)]
    Playlist(#[from] PlaylistError),

    #[error("Unsupported file type: {0}")]
    Unsupported(PathBuf),

    #[error("No playlist entry {0}")]
    NoSuchEntry(usize),

    #[error("Playlist is empty")]
    EmptyPlaylist,
}

/// Things the control loop should tell the user about
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    TrackLoaded {
        name: String,
        frames: usize,
        sample_rate: u32,
    },
    LoadFailed {
        name: String,
        error: String,
    },
    Advancing {
        name: String,
    },
    Started,
    Stopped {
        position: usize,
    },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::TrackLoaded {
                name,
                frames,
                sample_rate,
            } => write!(
                f,
                "Loaded {} ({:.2}s)",
                name,
                *frames as f64 / (*sample_rate).max(1) as f64
            ),
            Notice::LoadFailed { name, error } => write!(f, "Could not load {}: {}", name, error),
            Notice::Advancing { name } => write!(f, "Next: {}", name),
            Notice::Started => write!(f, "Playing"),
            Notice::Stopped { position } => write!(f, "Paused at frame {}", position),
        }
    }
}

/// Result of a command
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Done,
    Text(String),
    Quit,
}

pub struct Session {
    engine: EngineHandle,
    prefetcher: Prefetcher,
    playlist: Playlist,
    store: PlaylistStore,
    playlist_mode: bool,
    /// Entry waiting for the prefetcher to accept it
    pending: Option<usize>,
    /// Entry whose load is in flight
    loading: Option<usize>,
    /// Entry the engine is playing
    playing: Option<usize>,
}

impl Session {
    pub fn new(
        engine: EngineHandle,
        prefetcher: Prefetcher,
        playlist: Playlist,
        store: PlaylistStore,
    ) -> Self {
        Self {
            engine,
            prefetcher,
            playlist,
            store,
            playlist_mode: false,
            pending: None,
            loading: None,
            playing: None,
        }
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn playing_index(&self) -> Option<usize> {
        self.playing
    }

    pub fn is_loading(&self) -> bool {
        self.loading.is_some() || self.pending.is_some()
    }

    pub fn playlist_mode(&self) -> bool {
        self.playlist_mode
    }

    pub fn set_playlist_mode(&mut self, enabled: bool) {
        self.playlist_mode = enabled;
        self.sync_hold();
        if enabled {
            self.stage_next();
        }
    }

    /// Load the playlist's current entry
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.playlist.is_empty() {
            return Err(SessionError::EmptyPlaylist);
        }
        self.load_index(self.playlist.current_index())
    }

    /// Ask for entry `index`. When the prefetcher is busy the request is
    /// kept and retried from [`poll`](Self::poll).
    pub fn load_index(&mut self, index: usize) -> Result<(), SessionError> {
        let entry = self
            .playlist
            .get(index)
            .ok_or(SessionError::NoSuchEntry(index))?;
        let request =
            LoadRequest::new(entry.path.clone()).with_bounds(entry.loop_left, entry.loop_right);

        if self.prefetcher.request_load(request) {
            self.loading = Some(index);
            self.pending = None;
        } else {
            log::debug!("Prefetcher busy, entry {} queued", index);
            self.pending = Some(index);
        }
        Ok(())
    }

    /// Drain engine and prefetcher events. Call regularly from the control
    /// loop.
    pub fn poll(&mut self) -> Vec<Notice> {
        let mut notices = Vec::new();
        self.sync_hold();

        if let Some(index) = self.pending {
            if self.loading.is_none() && !self.prefetcher.is_busy() {
                if let Err(e) = self.load_index(index) {
                    log::warn!("Dropping queued load: {}", e);
                    self.pending = None;
                }
            }
        }

        for event in self.engine.drain_events() {
            match event {
                TransportEvent::BoundaryCrossed { generation, .. } => {
                    if let Some(notice) = self.on_boundary(generation) {
                        notices.push(notice);
                    }
                }
                TransportEvent::TrackStarted { generation, frames } => {
                    log::debug!("Track generation {} started ({} frames)", generation, frames);
                }
                TransportEvent::Started => notices.push(Notice::Started),
                TransportEvent::Stopped { position } => notices.push(Notice::Stopped { position }),
            }
        }

        while let Some(event) = self.prefetcher.try_recv() {
            match event {
                PrefetchEvent::Loaded {
                    path,
                    frames,
                    sample_rate,
                    range,
                    ..
                } => {
                    self.on_loaded(range);
                    notices.push(Notice::TrackLoaded {
                        name: display_name(&path),
                        frames,
                        sample_rate,
                    });
                }
                PrefetchEvent::Failed { path, error } => {
                    self.loading = None;
                    // Keep looping the current track if it is parked waiting
                    self.engine.resume_from_boundary();
                    if let Some(playing) = self.playing {
                        self.playlist.select(playing);
                    }
                    notices.push(Notice::LoadFailed {
                        name: display_name(&path),
                        error,
                    });
                }
                PrefetchEvent::Staged { path, frames } => {
                    log::debug!("Staged {:?} ({} frames)", path, frames);
                }
            }
        }

        notices
    }

    /// Park at loop wraps only while a playlist advance will follow them
    fn sync_hold(&self) {
        self.engine
            .set_hold_at_boundary(self.playlist_mode && self.playlist.len() >= 2);
    }

    fn on_boundary(&mut self, generation: u64) -> Option<Notice> {
        if !self.playlist_mode
            || self.playlist.len() < 2
            || generation != self.engine.generation()
        {
            return None;
        }
        if self.is_loading() {
            // The track being loaded ends the parked wrap
            return None;
        }
        let next = self
            .playlist
            .next_index()
            .and_then(|i| self.playlist.get(i).map(|entry| (i, entry.display_name.clone())));
        let Some((next, name)) = next else {
            self.engine.resume_from_boundary();
            return None;
        };
        match self.load_index(next) {
            Ok(()) => Some(Notice::Advancing { name }),
            Err(e) => {
                log::warn!("Playlist advance failed: {}", e);
                self.engine.resume_from_boundary();
                None
            }
        }
    }

    fn on_loaded(&mut self, range: LoopRange) {
        if let Some(index) = self.loading.take() {
            self.playing = Some(index);
            self.playlist.select(index);
            let unknown_right = self
                .playlist
                .get(index)
                .map(|entry| entry.loop_right.is_none())
                .unwrap_or(false);
            if unknown_right {
                self.playlist
                    .set_bounds(index, range.left, Some(range.right));
            }
        }
        self.stage_next();
    }

    /// Decode the following entry ahead so the advance is gapless
    fn stage_next(&mut self) {
        if !self.playlist_mode || self.playlist.len() < 2 || self.is_loading() {
            return;
        }
        let next = self
            .playlist
            .next_index()
            .and_then(|i| self.playlist.get(i))
            .map(|entry| entry.path.clone());
        if let Some(path) = next {
            self.prefetcher.stage(path);
        }
    }

    /// Carry out one user command
    pub fn apply(&mut self, command: Command) -> Result<Reply, SessionError> {
        let rate = self.engine.sample_rate();
        match command {
            Command::Play => self.engine.play(),
            Command::Pause => self.engine.pause(),
            Command::Toggle => {
                self.engine.toggle_play();
            }
            Command::Direction => {
                let direction = self.engine.toggle_direction();
                return Ok(Reply::Text(format!("Direction: {}", direction_name(direction))));
            }
            Command::Left(position) => {
                let range = self.engine.set_loop_left(position.to_frames(rate))?;
                self.write_back(range);
                return Ok(Reply::Text(format!("Loop: {} - {}", range.left, range.right)));
            }
            Command::Right(position) => {
                let range = self.engine.set_loop_right(position.to_frames(rate))?;
                self.write_back(range);
                return Ok(Reply::Text(format!("Loop: {} - {}", range.left, range.right)));
            }
            Command::Seek(position) => {
                self.engine.seek(position.to_frames(rate))?;
            }
            Command::Rewind => {
                self.engine.rewind()?;
            }
            Command::Tempo(ratio) => {
                let ratio = self.engine.set_time_ratio(ratio);
                return Ok(Reply::Text(format!("Tempo: {:.2}x", ratio)));
            }
            Command::Pitch(scale) => {
                let scale = self.engine.set_pitch_scale(scale);
                return Ok(Reply::Text(format!("Pitch: {:.2}x", scale)));
            }
            Command::Volume(db) => self.engine.set_volume_db(db),
            Command::Next => {
                let next = self.playlist.next_index().ok_or(SessionError::EmptyPlaylist)?;
                self.load_index(next)?;
            }
            Command::Prev => {
                let prev = self.playlist.prev_index().ok_or(SessionError::EmptyPlaylist)?;
                self.load_index(prev)?;
            }
            Command::Select(index) => self.load_index(index)?,
            Command::Add(path) => {
                if !is_supported(&path) {
                    return Err(SessionError::Unsupported(path));
                }
                let index = self.playlist.push(PlaylistEntry::new(path));
                if self.playing.is_none() && !self.is_loading() {
                    self.load_index(index)?;
                }
            }
            Command::Remove(index) => {
                self.playlist
                    .remove(index)
                    .ok_or(SessionError::NoSuchEntry(index))?;
                for slot in [&mut self.playing, &mut self.loading, &mut self.pending] {
                    *slot = match *slot {
                        Some(i) if i == index => None,
                        Some(i) if i > index => Some(i - 1),
                        other => other,
                    };
                }
            }
            Command::MoveUp(index) => {
                let to = self
                    .playlist
                    .move_up(index)
                    .ok_or(SessionError::NoSuchEntry(index))?;
                self.swap_indices(index, to);
            }
            Command::MoveDown(index) => {
                let to = self
                    .playlist
                    .move_down(index)
                    .ok_or(SessionError::NoSuchEntry(index))?;
                self.swap_indices(index, to);
            }
            Command::PlaylistMode => {
                self.set_playlist_mode(!self.playlist_mode);
                let state = if self.playlist_mode { "on" } else { "off" };
                return Ok(Reply::Text(format!("Playlist mode {}", state)));
            }
            Command::List => return Ok(Reply::Text(self.list())),
            Command::Save(name) => self.store.save(&name, &self.playlist)?,
            Command::Delete(name) => self.store.remove(&name)?,
            Command::Load(name) => {
                self.playlist = self.store.load(&name)?;
                self.playing = None;
                self.loading = None;
                self.pending = None;
                self.start()?;
            }
            Command::Status => return Ok(Reply::Text(self.status())),
            Command::Help => return Ok(Reply::Text(HELP.to_string())),
            Command::Quit => return Ok(Reply::Quit),
        }
        Ok(Reply::Done)
    }

    /// Store a live loop edit on the playing entry
    fn write_back(&mut self, range: LoopRange) {
        if let Some(index) = self.playing {
            self.playlist.set_bounds(index, range.left, Some(range.right));
        }
    }

    fn swap_indices(&mut self, a: usize, b: usize) {
        for slot in [&mut self.playing, &mut self.loading, &mut self.pending] {
            *slot = match *slot {
                Some(i) if i == a => Some(b),
                Some(i) if i == b => Some(a),
                other => other,
            };
        }
    }

    pub fn status(&self) -> String {
        let engine = &self.engine;
        let name = self
            .playing
            .and_then(|i| self.playlist.get(i))
            .map(|entry| entry.display_name.as_str())
            .unwrap_or("(nothing loaded)");
        let state = if engine.is_running() { "playing" } else { "paused" };
        let range = engine.loop_range();
        let rate = engine.sample_rate().max(1) as f64;

        format!(
            "{} [{}] {:.2}s / {:.2}s  loop {:.2}s - {:.2}s  {}  tempo {:.2}x  pitch {:.2}x  vol {:.1} dB{}",
            name,
            state,
            engine.position() as f64 / rate,
            engine.frame_count() as f64 / rate,
            range.left as f64 / rate,
            range.right as f64 / rate,
            direction_name(engine.direction()),
            engine.time_ratio(),
            engine.pitch_scale(),
            engine.volume_db(),
            if self.playlist_mode { "  playlist" } else { "" },
        )
    }

    pub fn list(&self) -> String {
        if self.playlist.is_empty() {
            return "Playlist is empty".to_string();
        }
        self.playlist
            .entries()
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let marker = if Some(i) == self.playing { '>' } else { ' ' };
                let right = entry
                    .loop_right
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "end".to_string());
                format!(
                    "{} {:>3}  {}  [{} - {}]",
                    marker, i, entry.display_name, entry.loop_left, right
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn direction_name(direction: Direction) -> &'static str {
    match direction {
        Direction::Forward => "forward",
        Direction::Backward => "backward",
    }
}

fn display_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::audio::{DecodedAudio, LoadError, Loader};
    use crate::engine::{build_engine, EngineConfig, EngineProcessor, StretchQuality};

    /// `<frames>.wav` decodes to that many frames of a quiet constant;
    /// anything else fails.
    struct FakeLoader;

    impl Loader for FakeLoader {
        fn load(&self, path: &Path, target_rate: u32) -> Result<DecodedAudio, LoadError> {
            let frames: usize = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| LoadError::ProbeError("not audio".to_string()))?;
            Ok(DecodedAudio {
                channels: 1,
                sample_rate: target_rate,
                samples: vec![0.1; frames],
            })
        }
    }

    fn session(paths: &[&str]) -> (Session, EngineProcessor, tempfile::TempDir) {
        let (engine, processor) = build_engine(EngineConfig {
            stretch_quality: StretchQuality::Tape,
            max_process_size: 1024,
            handoff_timeout: Duration::from_millis(60),
            ..EngineConfig::default()
        })
        .unwrap();
        let prefetcher = Prefetcher::spawn(FakeLoader, engine.barrier(), engine.sample_rate());
        let playlist = Playlist::from_entries(paths.iter().map(PlaylistEntry::new).collect());
        let dir = tempfile::tempdir().unwrap();
        let store = PlaylistStore::at(dir.path().join("playlists.json"));
        (Session::new(engine, prefetcher, playlist, store), processor, dir)
    }

    /// Run the audio side and poll until `done` holds
    fn pump(
        session: &mut Session,
        processor: &mut EngineProcessor,
        done: impl Fn(&Session, &[Notice]) -> bool,
    ) -> Vec<Notice> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut out = vec![0.0; 512];
        let mut seen = Vec::new();
        loop {
            processor.process(&mut out, 256);
            seen.extend(session.poll());
            if done(session, &seen) {
                return seen;
            }
            assert!(Instant::now() < deadline, "timed out, saw {:?}", seen);
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn loaded(session: &Session, _: &[Notice]) -> bool {
        !session.is_loading() && session.playing_index().is_some()
    }

    #[test]
    fn test_start_fills_unknown_right_bound() {
        let (mut session, mut processor, _dir) = session(&["48000.wav"]);
        session.start().unwrap();
        let notices = pump(&mut session, &mut processor, loaded);

        assert!(matches!(notices[0], Notice::TrackLoaded { frames: 48000, .. }));
        let entry = session.playlist().current().unwrap();
        assert_eq!(entry.loop_right, Some(48000));
    }

    #[test]
    fn test_playlist_mode_advances_at_boundary() {
        let (mut session, mut processor, _dir) = session(&["2000.wav", "3000.wav"]);
        session.set_playlist_mode(true);
        session.start().unwrap();
        pump(&mut session, &mut processor, loaded);
        assert_eq!(session.playing_index(), Some(0));

        let notices = pump(&mut session, &mut processor, |s, _| {
            s.playing_index() == Some(1) && !s.is_loading() && s.engine().frame_count() == 3000
        });
        assert!(notices
            .iter()
            .any(|n| matches!(n, Notice::Advancing { name } if name == "3000.wav")));
        assert_eq!(session.engine().frame_count(), 3000);

        // And wraps back to the first entry
        pump(&mut session, &mut processor, |s, _| {
            s.playing_index() == Some(0) && !s.is_loading()
        });
    }

    #[test]
    fn test_playlist_advance_switches_without_a_click() {
        let (mut session, mut processor, _dir) = session(&["2000.wav", "3000.wav"]);
        session.set_playlist_mode(true);
        session.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut out = vec![0.0; 512];
        let mut previous = 0.0_f32;
        let mut worst = 0.0_f32;
        let mut after_switch = 0;
        while after_switch < 8 {
            processor.process(&mut out, 256);
            for frame in out.chunks_exact(2) {
                worst = worst.max((frame[0] - previous).abs());
                previous = frame[0];
            }
            session.poll();
            if session.engine().frame_count() == 3000 {
                after_switch += 1;
            }
            assert!(Instant::now() < deadline, "no advance");
            thread::sleep(Duration::from_millis(1));
        }

        // One loop-fade step of a 0.1 signal
        assert!(worst <= 0.1 / 256.0 + 1e-6, "jump of {}", worst);
        assert_eq!(session.playing_index(), Some(1));
    }

    #[test]
    fn test_failed_advance_resumes_loop() {
        let (mut session, mut processor, _dir) = session(&["2000.wav", "broken.wav"]);
        session.set_playlist_mode(true);
        session.start().unwrap();
        pump(&mut session, &mut processor, |_, seen| {
            seen.iter().any(|n| matches!(n, Notice::LoadFailed { .. }))
        });
        assert!(session.engine().hold_at_boundary());

        // Back to looping the first track rather than sitting parked
        let start = session.engine().position();
        pump(&mut session, &mut processor, |s, _| s.engine().position() != start);
        assert_eq!(session.playing_index(), Some(0));
        assert_eq!(session.engine().frame_count(), 2000);
    }

    #[test]
    fn test_boundary_without_playlist_mode_just_loops() {
        let (mut session, mut processor, _dir) = session(&["1000.wav", "2000.wav"]);
        session.start().unwrap();
        pump(&mut session, &mut processor, loaded);

        let mut out = vec![0.0; 512];
        for _ in 0..20 {
            processor.process(&mut out, 256);
            session.poll();
        }
        assert_eq!(session.playing_index(), Some(0));
        assert!(!session.is_loading());
    }

    #[test]
    fn test_failed_load_keeps_current_track() {
        let (mut session, mut processor, _dir) = session(&["1000.wav", "broken.wav"]);
        session.start().unwrap();
        pump(&mut session, &mut processor, loaded);

        session.apply(Command::Next).unwrap();
        let notices = pump(&mut session, &mut processor, |_, seen| {
            seen.iter().any(|n| matches!(n, Notice::LoadFailed { .. }))
        });
        assert!(notices
            .iter()
            .any(|n| matches!(n, Notice::LoadFailed { name, .. } if name == "broken.wav")));
        assert_eq!(session.playing_index(), Some(0));
        assert_eq!(session.playlist().current_index(), 0);
        assert_eq!(session.engine().frame_count(), 1000);
    }

    #[test]
    fn test_live_edits_written_back() {
        let (mut session, mut processor, _dir) = session(&["48000.wav"]);
        session.start().unwrap();
        pump(&mut session, &mut processor, loaded);

        session.apply(Command::Pause).unwrap();
        pump(&mut session, &mut processor, |_, seen| {
            seen.iter().any(|n| matches!(n, Notice::Stopped { .. }))
        });
        session.apply(Command::Seek(Position::Frames(100))).unwrap();
        pump(&mut session, &mut processor, |s, _| s.engine().position() == 100);

        session.apply(Command::Right(Position::Seconds(0.5))).unwrap();
        session.apply(Command::Left(Position::Frames(50))).unwrap();
        let entry = session.playlist().current().unwrap();
        assert_eq!((entry.loop_left, entry.loop_right), (50, Some(24000)));

        assert!(matches!(
            session.apply(Command::Right(Position::Frames(100_000))),
            Err(SessionError::Bounds(BoundsError::OutOfRange { .. }))
        ));
        let entry = session.playlist().current().unwrap();
        assert_eq!(entry.loop_right, Some(24000));
    }

    #[test]
    fn test_playlist_commands() {
        let (mut session, _processor, _dir) = session(&["1000.wav", "2000.wav"]);
        assert!(matches!(
            session.apply(Command::Add(PathBuf::from("notes.txt"))),
            Err(SessionError::Unsupported(_))
        ));

        session.apply(Command::Add(PathBuf::from("3000.flac"))).unwrap();
        assert_eq!(session.playlist().len(), 3);

        session.apply(Command::MoveUp(2)).unwrap();
        assert_eq!(session.playlist().entries()[1].display_name, "3000.flac");

        session.apply(Command::Save("mix".to_string())).unwrap();
        session.apply(Command::Remove(0)).unwrap();
        assert_eq!(session.playlist().len(), 2);

        assert_eq!(session.apply(Command::Quit).unwrap(), Reply::Quit);
        assert!(matches!(
            session.apply(Command::Remove(9)),
            Err(SessionError::NoSuchEntry(9))
        ));

        session.apply(Command::Load("mix".to_string())).unwrap();
        assert_eq!(session.playlist().len(), 3);
        assert!(session.list().contains("3000.flac"));

        assert!(matches!(
            session.apply(Command::Save("mix".to_string())),
            Err(SessionError::Playlist(PlaylistError::Exists(_)))
        ));
        session.apply(Command::Delete("mix".to_string())).unwrap();
        session.apply(Command::Save("mix".to_string())).unwrap();
    }

    #[test]
    fn test_status_mentions_track() {
        let (mut session, mut processor, _dir) = session(&["48000.wav"]);
        session.start().unwrap();
        pump(&mut session, &mut processor, loaded);
        let status = session.status();
        assert!(status.contains("48000.wav"));
        assert!(status.contains("1.00s"));
    }
}
