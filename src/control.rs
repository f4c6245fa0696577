//! Interactive line commands
//!
//! Each line read from stdin parses into one [`Command`]. Positions accept
//! either a frame index (`48000`) or seconds with an `s` suffix (`1.5s`).

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command '{0}' (try 'help')")]
    Unknown(String),

    #[error("'{0}' needs an argument")]
    MissingArgument(&'static str),

    #[error("Invalid value '{value}' for '{command}'")]
    InvalidValue { command: &'static str, value: String },
}

/// A position given on the command line
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Position {
    Frames(usize),
    Seconds(f64),
}

impl Position {
    pub fn to_frames(self, sample_rate: u32) -> usize {
        match self {
            Position::Frames(frames) => frames,
            Position::Seconds(seconds) => (seconds.max(0.0) * sample_rate as f64).round() as usize,
        }
    }

    /// Parser for command-line flags that take a position
    pub fn parse_flag(s: &str) -> Result<Self, String> {
        s.parse()
            .map_err(|_| format!("'{}' is not a frame index or seconds value like 1.5s", s))
    }
}

impl FromStr for Position {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(seconds) = s.strip_suffix('s') {
            let seconds: f64 = seconds.parse().map_err(|_| ())?;
            if seconds.is_finite() && seconds >= 0.0 {
                return Ok(Position::Seconds(seconds));
            }
            return Err(());
        }
        s.parse().map(Position::Frames).map_err(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Pause,
    Toggle,
    /// Flip playback direction
    Direction,
    Left(Position),
    Right(Position),
    Seek(Position),
    Rewind,
    Tempo(f64),
    Pitch(f64),
    Volume(f32),
    Next,
    Prev,
    Select(usize),
    Add(PathBuf),
    Remove(usize),
    MoveUp(usize),
    MoveDown(usize),
    /// Toggle advancing through the playlist at the loop end
    PlaylistMode,
    List,
    Save(String),
    Load(String),
    /// Forget a saved playlist
    Delete(String),
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
play | pause | toggle        start, fade out, or flip playback
dir                          flip direction
left POS | right POS         move a loop bound (frames, or seconds as 1.5s)
seek POS | rewind            move the playhead
tempo R | pitch S | vol DB   tempo multiplier, pitch multiplier, volume
next | prev | select N       change track
add PATH | remove N          edit the playlist
up N | down N                reorder the playlist
mode                         toggle playlist mode
list                         show the playlist
save NAME | load NAME        store or restore a named playlist
delete NAME                  forget a saved playlist
status | help | quit";

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "" => return Err(ParseError::Empty),
            "play" => Command::Play,
            "pause" | "stop" => Command::Pause,
            "toggle" | "t" => Command::Toggle,
            "dir" | "reverse" => Command::Direction,
            "left" | "l" => Command::Left(arg(rest, "left")?),
            "right" | "r" => Command::Right(arg(rest, "right")?),
            "seek" => Command::Seek(arg(rest, "seek")?),
            "rewind" => Command::Rewind,
            "tempo" => Command::Tempo(arg(rest, "tempo")?),
            "pitch" => Command::Pitch(arg(rest, "pitch")?),
            "vol" | "volume" => Command::Volume(arg(rest, "vol")?),
            "next" | "n" => Command::Next,
            "prev" | "p" => Command::Prev,
            "select" => Command::Select(arg(rest, "select")?),
            "add" => {
                if rest.is_empty() {
                    return Err(ParseError::MissingArgument("add"));
                }
                Command::Add(PathBuf::from(rest))
            }
            "remove" | "rm" => Command::Remove(arg(rest, "remove")?),
            "up" => Command::MoveUp(arg(rest, "up")?),
            "down" => Command::MoveDown(arg(rest, "down")?),
            "mode" => Command::PlaylistMode,
            "list" | "ls" => Command::List,
            "save" => Command::Save(name(rest, "save")?),
            "load" => Command::Load(name(rest, "load")?),
            "delete" => Command::Delete(name(rest, "delete")?),
            "status" | "s" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

fn arg<T: FromStr>(rest: &str, command: &'static str) -> Result<T, ParseError> {
    if rest.is_empty() {
        return Err(ParseError::MissingArgument(command));
    }
    rest.parse().map_err(|_| ParseError::InvalidValue {
        command,
        value: rest.to_string(),
    })
}

fn name(rest: &str, command: &'static str) -> Result<String, ParseError> {
    if rest.is_empty() {
        Err(ParseError::MissingArgument(command))
    } else {
        Ok(rest.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_commands() {
        assert_eq!("play".parse(), Ok(Command::Play));
        assert_eq!("  PAUSE ".parse(), Ok(Command::Pause));
        assert_eq!("dir".parse(), Ok(Command::Direction));
        assert_eq!("q".parse(), Ok(Command::Quit));
    }

    #[test]
    fn test_positions() {
        assert_eq!("left 48000".parse(), Ok(Command::Left(Position::Frames(48000))));
        assert_eq!("seek 1.5s".parse(), Ok(Command::Seek(Position::Seconds(1.5))));
        assert_eq!(Position::Seconds(1.5).to_frames(48000), 72000);
        assert!(matches!(
            "right -5s".parse::<Command>(),
            Err(ParseError::InvalidValue { command: "right", .. })
        ));
    }

    #[test]
    fn test_numeric_arguments() {
        assert_eq!("tempo 0.5".parse(), Ok(Command::Tempo(0.5)));
        assert_eq!("vol -6".parse(), Ok(Command::Volume(-6.0)));
        assert_eq!("select 2".parse(), Ok(Command::Select(2)));
        assert_eq!(
            "tempo".parse::<Command>(),
            Err(ParseError::MissingArgument("tempo"))
        );
    }

    #[test]
    fn test_paths_keep_spaces() {
        assert_eq!(
            "add /music/my loop.wav".parse(),
            Ok(Command::Add(PathBuf::from("/music/my loop.wav")))
        );
        assert_eq!("save late night".parse(), Ok(Command::Save("late night".to_string())));
        assert_eq!(
            "delete".parse::<Command>(),
            Err(ParseError::MissingArgument("delete"))
        );
    }

    #[test]
    fn test_unknown_and_empty() {
        assert_eq!("".parse::<Command>(), Err(ParseError::Empty));
        assert_eq!(
            "jump".parse::<Command>(),
            Err(ParseError::Unknown("jump".to_string()))
        );
    }
}
