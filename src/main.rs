//! looper-rs - loop player
//!
//! Plays audio files on loop between two points from the terminal. Files
//! given on the command line form the playlist; commands typed on stdin
//! control playback (type `help` for the list).

use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};

use looper::audio::{is_supported, list_output_devices, OutputDevice, SymphoniaLoader};
use looper::control::{Command, ParseError, Position};
use looper::engine::{build_engine, Direction, Prefetcher, StretchQuality};
use looper::playlist::{Playlist, PlaylistEntry, PlaylistStore};
use looper::session::{Reply, Session};
use looper::settings::AppSettings;

/// Control loop tick; matches the position refresh of a UI timer
const POLL_INTERVAL: Duration = Duration::from_millis(60);

/// Command-line arguments for looper-rs
#[derive(Parser, Debug)]
#[command(name = "looper-rs")]
#[command(about = "Play audio files on loop between two points")]
#[command(version)]
struct Args {
    /// Audio files to play, in order
    files: Vec<PathBuf>,

    /// Start from a saved playlist (files given are appended)
    #[arg(short, long)]
    playlist: Option<String>,

    /// Save the resulting playlist under a new name
    #[arg(long)]
    save_playlist: Option<String>,

    /// Loop start of the first track (frames, or seconds as 1.5s)
    #[arg(short, long, value_parser = Position::parse_flag)]
    left: Option<Position>,

    /// Loop end of the first track (frames, or seconds as 1.5s)
    #[arg(short, long, value_parser = Position::parse_flag)]
    right: Option<Position>,

    /// Tempo multiplier (0.25 - 4.0)
    #[arg(short, long)]
    tempo: Option<f64>,

    /// Pitch multiplier (0.25 - 4.0)
    #[arg(long)]
    pitch: Option<f64>,

    /// Play backwards
    #[arg(short, long)]
    backwards: bool,

    /// Volume in dB
    #[arg(short, long, allow_hyphen_values = true)]
    volume: Option<f32>,

    /// Output device name (see --list-devices)
    #[arg(short, long)]
    device: Option<String>,

    /// Move to the next playlist entry at the end of each loop
    #[arg(long)]
    playlist_mode: bool,

    /// Stretch algorithm: standard, cheaper or tape
    #[arg(long)]
    quality: Option<StretchQuality>,

    /// Load without starting playback
    #[arg(long)]
    paused: bool,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// List saved playlists and exit
    #[arg(long)]
    list_playlists: bool,
}

impl Args {
    /// Command-line values override the stored settings
    fn apply_to(&self, settings: &mut AppSettings) {
        if let Some(tempo) = self.tempo {
            settings.time_ratio = tempo;
        }
        if let Some(pitch) = self.pitch {
            settings.pitch_scale = pitch;
        }
        if let Some(volume) = self.volume {
            settings.volume_db = volume;
        }
        if let Some(quality) = self.quality {
            settings.stretch_quality = quality;
        }
        if self.device.is_some() {
            settings.output_device = self.device.clone();
        }
        if self.backwards {
            settings.backwards = true;
        }
        if self.playlist_mode {
            settings.playlist_mode = true;
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.list_devices {
        for name in list_output_devices() {
            println!("{}", name);
        }
        return Ok(());
    }

    let store = PlaylistStore::open_default();
    if args.list_playlists {
        for name in store.names().context("Failed to read saved playlists")? {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut settings = AppSettings::load();
    args.apply_to(&mut settings);

    let device =
        OutputDevice::open(settings.output_device.as_deref()).context("Failed to open audio output")?;
    let sample_rate = device.sample_rate();

    let mut config = settings.engine_config(sample_rate);
    config.autoplay = !args.paused;
    let (engine, processor) = build_engine(config).context("Failed to initialise engine")?;

    engine.set_volume_db(settings.volume_db);
    settings.time_ratio = engine.set_time_ratio(settings.time_ratio);
    settings.pitch_scale = engine.set_pitch_scale(settings.pitch_scale);
    if settings.backwards {
        engine.set_direction(Direction::Backward);
    }

    let _output = device
        .start(processor)
        .context("Failed to start audio output")?;
    let prefetcher = Prefetcher::spawn(SymphoniaLoader, engine.barrier(), sample_rate);

    let playlist = build_playlist(&args, &settings, &store, sample_rate)?;
    if let Some(name) = &args.save_playlist {
        store
            .save(name, &playlist)
            .with_context(|| format!("Failed to save playlist '{}'", name))?;
        settings.last_playlist = Some(name.clone());
    } else if args.playlist.is_some() {
        settings.last_playlist = args.playlist.clone();
    }

    let mut session = Session::new(engine, prefetcher, playlist, store);
    session.set_playlist_mode(settings.playlist_mode);
    if session.playlist().is_empty() {
        println!("Playlist is empty, add a file with 'add PATH' (type 'help' for commands)");
    } else {
        session.start()?;
    }

    run(&mut session, spawn_stdin_reader());

    let engine = session.engine();
    let volume = engine.volume_db();
    if volume.is_finite() {
        settings.volume_db = volume;
    }
    settings.time_ratio = engine.time_ratio();
    settings.pitch_scale = engine.pitch_scale();
    settings.backwards = engine.direction().is_backward();
    settings.playlist_mode = session.playlist_mode();
    settings.save();

    log::info!("Exiting");
    Ok(())
}

/// Control loop: apply commands and report session notices until `quit`
fn run(session: &mut Session, commands: Receiver<String>) {
    let mut stdin_open = true;

    loop {
        if stdin_open {
            match commands.recv_timeout(POLL_INTERVAL) {
                Ok(line) => match line.parse::<Command>() {
                    Ok(command) => match session.apply(command) {
                        Ok(Reply::Quit) => break,
                        Ok(Reply::Text(text)) => println!("{}", text),
                        Ok(Reply::Done) => {}
                        Err(e) => println!("{}", e),
                    },
                    Err(ParseError::Empty) => {}
                    Err(e) => println!("{}", e),
                },
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log::info!("stdin closed, playing until interrupted");
                    stdin_open = false;
                }
            }
        } else {
            thread::sleep(POLL_INTERVAL);
        }

        for notice in session.poll() {
            println!("{}", notice);
        }
    }
}

fn build_playlist(
    args: &Args,
    settings: &AppSettings,
    store: &PlaylistStore,
    sample_rate: u32,
) -> Result<Playlist> {
    let mut playlist = match &args.playlist {
        Some(name) => store
            .load(name)
            .with_context(|| format!("Failed to load playlist '{}'", name))?,
        None if args.files.is_empty() => match &settings.last_playlist {
            Some(name) => store.load(name).unwrap_or_else(|e| {
                log::warn!("Could not restore playlist '{}': {}", name, e);
                Playlist::new()
            }),
            None => Playlist::new(),
        },
        None => Playlist::new(),
    };

    let first_new = playlist.len();
    for path in &args.files {
        if !is_supported(path) {
            log::warn!("Skipping unsupported file {}", path.display());
            continue;
        }
        playlist.push(PlaylistEntry::new(path.clone()));
    }

    if args.left.is_some() || args.right.is_some() {
        let left = args.left.map(|p| p.to_frames(sample_rate)).unwrap_or(0);
        let right = args.right.map(|p| p.to_frames(sample_rate));
        let index = if first_new < playlist.len() { first_new } else { 0 };
        playlist.set_bounds(index, left, right);
        playlist.select(index);
    } else if first_new < playlist.len() {
        playlist.select(first_new);
    }

    Ok(playlist)
}

/// Read stdin lines on their own thread so the control loop can keep polling
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}
