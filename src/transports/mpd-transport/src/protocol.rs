//! Line protocol codec: command encoding and response parsing.
//!
//! A response is a run of `key: value` lines closed by `OK`, or a single
//! `ACK [code@index] {command} message` line on failure.

use mpdsync_core::{
    Command, PlaybackState, ServerStats, ServerStatus, Song, TransportError, TransportResult,
    NO_SONG, UNKNOWN_PLAYLIST_VERSION,
};
use std::io::BufRead;

pub const GREETING_PREFIX: &str = "OK MPD ";
pub const COMMAND_LIST_BEGIN: &str = "command_list_begin";
pub const COMMAND_LIST_END: &str = "command_list_end";

pub type Pair = (String, String);

/// Wraps an argument in double quotes, escaping `"` and `\`.
pub fn quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

/// Request line for `command`, without the trailing newline.
pub fn encode(command: &Command) -> String {
    match command {
        Command::Add { path } => format!("add {}", quote(path)),
        Command::DeleteId { id } => format!("deleteid {id}"),
        Command::Delete { pos } => format!("delete {pos}"),
        Command::Move { from, to } => format!("move {from} {to}"),
        Command::Play => "play".to_string(),
        Command::Pause(paused) => format!("pause {}", flag(*paused)),
        Command::Stop => "stop".to_string(),
        Command::Next => "next".to_string(),
        Command::Previous => "previous".to_string(),
        Command::SetVolume(volume) => format!("setvol {volume}"),
        Command::SetRandom(random) => format!("random {}", flag(*random)),
        Command::SetRepeat(repeat) => format!("repeat {}", flag(*repeat)),
        Command::Seek { pos, seconds } => format!("seek {pos} {seconds}"),
    }
}

/// The whole command list as one request, each line newline-terminated.
pub fn encode_batch(commands: &[Command]) -> String {
    let mut request = String::new();
    request.push_str(COMMAND_LIST_BEGIN);
    request.push('\n');
    for command in commands {
        request.push_str(&encode(command));
        request.push('\n');
    }
    request.push_str(COMMAND_LIST_END);
    request.push('\n');
    request
}

/// Returns the server version announced in the greeting line.
pub fn parse_greeting(line: &str) -> TransportResult<String> {
    line.trim_end()
        .strip_prefix(GREETING_PREFIX)
        .map(str::to_string)
        .ok_or_else(|| TransportError::Protocol {
            message: format!("unexpected greeting: {}", line.trim_end()),
        })
}

/// Parses `ACK [code@index] {command} message`.
pub fn parse_ack(line: &str) -> TransportError {
    let malformed = || TransportError::Protocol {
        message: format!("malformed ACK: {line}"),
    };
    let Some(rest) = line.strip_prefix("ACK [") else {
        return malformed();
    };
    let Some((location, rest)) = rest.split_once("] {") else {
        return malformed();
    };
    let Some((command, message)) = rest.split_once('}') else {
        return malformed();
    };
    let code = location
        .split('@')
        .next()
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);

    TransportError::Server {
        code,
        command: command.to_string(),
        message: message.trim().to_string(),
    }
}

/// Reads one response. I/O failures surface as transport errors.
pub fn read_response<R: BufRead>(reader: &mut R) -> TransportResult<Vec<Pair>> {
    let mut pairs = Vec::new();
    loop {
        let line = read_line(reader)?;
        if line == "OK" {
            return Ok(pairs);
        }
        if line.starts_with("ACK ") {
            return Err(parse_ack(&line));
        }
        match line.split_once(": ") {
            Some((key, value)) => pairs.push((key.to_string(), value.to_string())),
            None => {
                return Err(TransportError::Protocol {
                    message: format!("unexpected line: {line}"),
                })
            }
        }
    }
}

/// One line with the newline stripped; EOF means the server hung up.
pub fn read_line<R: BufRead>(reader: &mut R) -> TransportResult<String> {
    let mut line = String::new();
    let read = reader.read_line(&mut line).map_err(io_error)?;
    if read == 0 {
        return Err(TransportError::Closed);
    }
    let trimmed = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(trimmed);
    Ok(line)
}

pub fn io_error(err: std::io::Error) -> TransportError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => TransportError::Timeout,
        ErrorKind::UnexpectedEof
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe => TransportError::Closed,
        ErrorKind::InvalidData => TransportError::Protocol {
            message: err.to_string(),
        },
        _ => TransportError::Io {
            message: err.to_string(),
        },
    }
}

fn number<T: std::str::FromStr>(key: &str, value: &str) -> TransportResult<T> {
    value.trim().parse().map_err(|_| TransportError::Protocol {
        message: format!("invalid {key}: {value}"),
    })
}

/// Fractional seconds as reported by `elapsed`/`duration`, truncated.
fn seconds(key: &str, value: &str) -> TransportResult<u32> {
    let parsed: f64 = number(key, value)?;
    Ok(parsed.max(0.0) as u32)
}

pub fn parse_status(pairs: &[Pair]) -> TransportResult<ServerStatus> {
    let mut status = ServerStatus {
        song_id: NO_SONG,
        playlist_version: UNKNOWN_PLAYLIST_VERSION,
        ..ServerStatus::default()
    };
    let mut precise_elapsed = None;
    let mut precise_duration = None;

    for (key, value) in pairs {
        match key.as_str() {
            "volume" => {
                let volume: i32 = number(key, value)?;
                status.volume = u8::try_from(volume).ok().filter(|v| *v <= 100);
            }
            "repeat" => status.repeat = value == "1",
            "random" => status.random = value == "1",
            "playlist" => status.playlist_version = number(key, value)?,
            "playlistlength" => status.playlist_length = number(key, value)?,
            "songid" => status.song_id = number(key, value)?,
            "state" => {
                status.state = match value.as_str() {
                    "play" => PlaybackState::Playing,
                    "pause" => PlaybackState::Paused,
                    "stop" => PlaybackState::Stopped,
                    _ => PlaybackState::Unknown,
                }
            }
            // Legacy `elapsed:total` in whole seconds.
            "time" => {
                if let Some((elapsed, total)) = value.split_once(':') {
                    status.elapsed_seconds = number(key, elapsed)?;
                    status.total_seconds = number(key, total)?;
                }
            }
            "elapsed" => precise_elapsed = Some(seconds(key, value)?),
            "duration" => precise_duration = Some(seconds(key, value)?),
            _ => {}
        }
    }

    if let Some(elapsed) = precise_elapsed {
        status.elapsed_seconds = elapsed;
    }
    if let Some(duration) = precise_duration {
        status.total_seconds = duration;
    }
    Ok(status)
}

pub fn parse_stats(pairs: &[Pair]) -> TransportResult<ServerStats> {
    let mut stats = ServerStats::default();
    for (key, value) in pairs {
        match key.as_str() {
            "artists" => stats.artists = number(key, value)?,
            "albums" => stats.albums = number(key, value)?,
            "songs" => stats.songs = number(key, value)?,
            "uptime" => stats.uptime_seconds = number(key, value)?,
            "db_playtime" => stats.db_playtime_seconds = number(key, value)?,
            "db_update" => stats.db_update = number(key, value)?,
            _ => {}
        }
    }
    Ok(stats)
}

/// Splits a song listing into records; each record starts at a `file` key.
pub fn parse_songs(pairs: &[Pair]) -> TransportResult<Vec<Song>> {
    let mut songs = Vec::new();
    let mut current: Option<Song> = None;
    let mut precise_duration = false;

    for (key, value) in pairs {
        if key == "file" {
            songs.extend(current.take());
            current = Some(Song::new(value.clone()));
            precise_duration = false;
            continue;
        }
        let Some(song) = current.as_mut() else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "title" => song.title = Some(value.clone()),
            "artist" => song.artist = Some(value.clone()),
            "album" => song.album = Some(value.clone()),
            "track" => song.track = Some(value.clone()),
            "genre" => song.genre = Some(value.clone()),
            "date" => song.date = Some(value.clone()),
            "pos" => song.pos = Some(number(key, value)?),
            "id" => song.id = Some(number(key, value)?),
            "duration" => {
                song.duration_seconds = Some(seconds(key, value)?);
                precise_duration = true;
            }
            "time" if !precise_duration => song.duration_seconds = Some(number(key, value)?),
            _ => {}
        }
    }
    songs.extend(current);
    Ok(songs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn pairs(text: &str) -> Vec<Pair> {
        read_response(&mut Cursor::new(text.to_string())).expect("response")
    }

    #[test]
    fn quote_escapes_quotes_and_backslashes() {
        assert_eq!(quote(r#"a "b" \c"#), r#""a \"b\" \\c""#);
    }

    #[test]
    fn encodes_batch_in_order() {
        let request = encode_batch(&[
            Command::Add {
                path: "dir/a b.mp3".into(),
            },
            Command::Delete { pos: 2 },
            Command::Move { from: 0, to: 5 },
        ]);
        assert_eq!(
            request,
            "command_list_begin\nadd \"dir/a b.mp3\"\ndelete 2\nmove 0 5\ncommand_list_end\n"
        );
    }

    #[test]
    fn encodes_playback_commands() {
        assert_eq!(encode(&Command::Pause(true)), "pause 1");
        assert_eq!(encode(&Command::SetRandom(false)), "random 0");
        assert_eq!(encode(&Command::SetVolume(40)), "setvol 40");
        assert_eq!(encode(&Command::Seek { pos: 3, seconds: 90 }), "seek 3 90");
    }

    #[test]
    fn greeting_yields_version() {
        assert_eq!(parse_greeting("OK MPD 0.23.5\n").unwrap(), "0.23.5");
        assert!(matches!(
            parse_greeting("HTTP/1.1 400 Bad Request"),
            Err(TransportError::Protocol { .. })
        ));
    }

    #[test]
    fn ack_line_becomes_server_error() {
        let err = parse_ack(r#"ACK [50@1] {delete} Bad song index"#);
        assert_eq!(
            err,
            TransportError::Server {
                code: 50,
                command: "delete".into(),
                message: "Bad song index".into(),
            }
        );
        assert!(matches!(parse_ack("ACK nonsense"), TransportError::Protocol { .. }));
    }

    #[test]
    fn response_stops_at_ok_and_reports_ack() {
        let mut input = Cursor::new("volume: 20\nOK\nrepeat: 1\n".to_string());
        assert_eq!(
            read_response(&mut input).unwrap(),
            vec![("volume".to_string(), "20".to_string())]
        );

        let mut ack = Cursor::new("ACK [5@0] {foo} unknown command \"foo\"\n".to_string());
        assert!(matches!(
            read_response(&mut ack),
            Err(TransportError::Server { code: 5, .. })
        ));

        let mut eof = Cursor::new("volume: 20\n".to_string());
        assert_eq!(read_response(&mut eof), Err(TransportError::Closed));
    }

    #[test]
    fn parses_status() {
        let status = parse_status(&pairs(
            "volume: -1\nrepeat: 1\nrandom: 0\nplaylist: 12\nplaylistlength: 4\n\
             state: pause\nsong: 2\nsongid: 33\ntime: 61:240\nelapsed: 61.480\n\
             duration: 240.213\nOK\n",
        ))
        .unwrap();

        assert_eq!(status.volume, None);
        assert!(status.repeat);
        assert!(!status.random);
        assert_eq!(status.playlist_version, 12);
        assert_eq!(status.playlist_length, 4);
        assert_eq!(status.state, PlaybackState::Paused);
        assert_eq!(status.song_id, 33);
        assert_eq!(status.elapsed_seconds, 61);
        assert_eq!(status.total_seconds, 240);
    }

    #[test]
    fn stopped_status_has_no_song() {
        let status = parse_status(&pairs("volume: 70\nstate: stop\nplaylist: 1\nOK\n")).unwrap();
        assert_eq!(status.song_id, NO_SONG);
        assert_eq!(status.volume, Some(70));
        assert_eq!(status.state, PlaybackState::Stopped);
    }

    #[test]
    fn rejects_non_numeric_fields() {
        let err = parse_status(&pairs("playlist: twelve\nOK\n")).unwrap_err();
        assert!(matches!(err, TransportError::Protocol { .. }));
    }

    #[test]
    fn parses_stats_db_update() {
        let stats = parse_stats(&pairs(
            "artists: 12\nalbums: 30\nsongs: 400\nuptime: 99\ndb_playtime: 1000\n\
             db_update: 1700000000\nplaytime: 5\nOK\n",
        ))
        .unwrap();
        assert_eq!(stats.songs, 400);
        assert_eq!(stats.db_update, 1_700_000_000);
    }

    #[test]
    fn splits_song_records_on_file_key() {
        let songs = parse_songs(&pairs(
            "file: a/one.flac\nTitle: One\nArtist: Band\nTime: 200\nduration: 199.9\n\
             Pos: 0\nId: 7\nfile: b/two.ogg\nTime: 90\nGenre: Jazz\nPos: 1\nId: 8\nOK\n",
        ))
        .unwrap();

        assert_eq!(songs.len(), 2);
        assert_eq!(songs[0].title.as_deref(), Some("One"));
        assert_eq!(songs[0].duration_seconds, Some(199));
        assert_eq!((songs[0].pos, songs[0].id), (Some(0), Some(7)));
        assert_eq!(songs[1].file, "b/two.ogg");
        assert_eq!(songs[1].duration_seconds, Some(90));
        assert_eq!(songs[1].genre.as_deref(), Some("Jazz"));
        assert_eq!(songs[1].title, None);
    }
}
