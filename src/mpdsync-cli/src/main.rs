use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mpd_transport::MpdConnector;
use mpdsync_core::{
    init_logging, AppDirs, ChangedField, Config, CredentialStore, SecretsError,
    ServerConfig, Song, StatusSnapshot, ValidationError,
};
use mpdsync_session::{ConnectOptions, PlaylistEntry, Session};
use std::io::BufRead;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Parser)]
#[command(name = "mpdsync", version, about = "Media server client")]
struct Cli {
    /// Connection profile (takes precedence over default_profile)
    #[arg(long, global = true)]
    profile: Option<String>,
    /// Server host override
    #[arg(long, global = true)]
    host: Option<String>,
    /// Server port override
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Directory for config and logs instead of the platform default
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the status snapshot and current song
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Poll at the configured interval and log every change
    Watch {
        /// Stop after this many polls
        #[arg(long)]
        count: Option<u64>,
    },
    /// Print the playlist, marking the song being played
    Playlist {
        #[arg(long)]
        json: bool,
    },
    /// Append files to the playlist
    Add {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Delete playlist entries by position
    Delete {
        #[arg(required = true, allow_negative_numbers = true)]
        positions: Vec<i32>,
    },
    /// Delete playlist entries by id
    DeleteId {
        #[arg(required = true, allow_negative_numbers = true)]
        ids: Vec<i32>,
    },
    /// Move a playlist entry
    Move { from: i32, to: i32 },
    Play,
    /// Toggle pause
    Pause,
    Stop,
    Next,
    Prev,
    /// Set the output volume (0-100)
    Volume {
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        level: u8,
    },
    /// Manage the server password stored in the OS keyring
    #[command(subcommand)]
    Password(PasswordCommand),
}

#[derive(Debug, Subcommand)]
enum PasswordCommand {
    /// Read a password from stdin and store it
    Set,
    /// Remove the stored password
    Clear,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Config(#[from] ValidationError),
    #[error("no password stored in the keyring for {address}; run `mpdsync password set`")]
    MissingPassword { address: String },
    #[error("keyring lookup failed: {0}")]
    Secrets(SecretsError),
}

/// Config server, then profile, then command-line overrides.
fn resolve_server(config: &Config, cli: &Cli) -> Result<ServerConfig, CliError> {
    let mut server = config.resolve_server(cli.profile.as_deref())?;
    if let Some(host) = &cli.host {
        server.host = host.clone();
    }
    if let Some(port) = cli.port {
        server.port = port;
    }
    Ok(server)
}

fn connect_options(
    server: &ServerConfig,
    lookup: impl FnOnce(&str) -> Result<String, SecretsError>,
) -> Result<ConnectOptions, CliError> {
    let mut options = ConnectOptions::from(server);
    if options.password.is_none() && server.use_keyring {
        let address = server.address();
        let password = match lookup(&address) {
            Ok(password) => password,
            Err(SecretsError::NotFound { .. }) => {
                return Err(CliError::MissingPassword { address })
            }
            Err(err) => return Err(CliError::Secrets(err)),
        };
        options.password = Some(password);
    }
    Ok(options)
}

fn open_session(options: &ConnectOptions) -> Result<Session> {
    let session = Session::new(Box::new(MpdConnector::new()));
    session.on_error(|message| tracing::warn!("{message}"));
    session
        .connect(options)
        .with_context(|| format!("could not reach {}:{}", options.host, options.port))?;
    session.poll();
    Ok(session)
}

fn format_time(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

fn describe_snapshot(snapshot: &StatusSnapshot, song: Option<&Song>) -> String {
    let mut lines = Vec::new();
    if let Some(song) = song {
        let artist = song.artist.as_deref().unwrap_or("Unknown artist");
        lines.push(format!("{} - {}", artist, song.display_title()));
    }
    let volume = snapshot
        .volume
        .map(|v| format!("{v}%"))
        .unwrap_or_else(|| "n/a".to_string());
    lines.push(format!(
        "[{}] {}/{}  volume: {}  repeat: {}  random: {}",
        snapshot.state.as_str(),
        format_time(snapshot.elapsed_seconds),
        format_time(snapshot.total_seconds),
        volume,
        if snapshot.repeat { "on" } else { "off" },
        if snapshot.random { "on" } else { "off" },
    ));
    lines.push(format!(
        "playlist: version {} ({} entries)",
        snapshot.playlist_version, snapshot.playlist_length
    ));
    lines.join("\n")
}

fn describe_entry(position: usize, entry: &PlaylistEntry) -> String {
    let marker = if entry.now_playing { '>' } else { ' ' };
    let duration = entry
        .song
        .duration_seconds
        .map(format_time)
        .unwrap_or_default();
    format!(
        "{marker}{:>4}  {}  {}",
        position,
        entry.song.display_title(),
        duration
    )
}

fn describe_change(field: ChangedField, snapshot: &StatusSnapshot) -> String {
    match field {
        ChangedField::Song => format!("song id {}", snapshot.song_id),
        ChangedField::State => format!("state {}", snapshot.state.as_str()),
        ChangedField::Volume => match snapshot.volume {
            Some(volume) => format!("volume {volume}"),
            None => "volume n/a".to_string(),
        },
        ChangedField::Elapsed => format!(
            "elapsed {}/{}",
            format_time(snapshot.elapsed_seconds),
            format_time(snapshot.total_seconds)
        ),
        ChangedField::Playlist => format!(
            "playlist version {} ({} entries)",
            snapshot.playlist_version, snapshot.playlist_length
        ),
        ChangedField::Random => format!("random {}", snapshot.random),
        ChangedField::Repeat => format!("repeat {}", snapshot.repeat),
        ChangedField::DbTime => format!("database updated at {}", snapshot.db_update),
    }
}

fn watch(session: &Session, options: &ConnectOptions, config: &Config, count: Option<u64>) {
    for field in ChangedField::ALL {
        session.subscribe(field, move |snapshot| {
            tracing::info!(field = field.as_str(), "{}", describe_change(field, snapshot));
        });
    }

    let interval = config.polling.interval();
    let mut polls = 0u64;
    loop {
        watch_tick(session, options);
        polls += 1;
        if count.is_some_and(|limit| polls >= limit) {
            break;
        }
        std::thread::sleep(interval);
    }
}

/// One poll, then a reconnect attempt if the session was already offline
/// before this tick. A poll that just lost the connection is followed by one
/// offline poll so subscribers see the reset before any reconnect.
fn watch_tick(session: &Session, options: &ConnectOptions) {
    let was_connected = session.is_connected();
    session.poll();
    if !was_connected {
        // Failures are logged by the error hook.
        let _ = session.connect(options);
    }
}

fn commit_edits(session: &Session) -> Result<()> {
    let summary = session.commit()?;
    println!(
        "Applied {} edit(s){}",
        summary.submitted,
        if summary.skipped > 0 {
            format!(", skipped {} invalid", summary.skipped)
        } else {
            String::new()
        }
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let dirs = match &cli.config_dir {
        Some(base) => AppDirs::with_base(base),
        None => AppDirs::discover()?,
    };
    let config = Config::load_or_default(&dirs)?;
    let _logging = init_logging(&config.logging, dirs.log_dir())?;
    let server = resolve_server(&config, &cli)?;
    let store = CredentialStore::new();

    if let Command::Password(action) = &cli.command {
        let address = server.address();
        match action {
            PasswordCommand::Set => {
                let mut password = String::new();
                std::io::stdin().lock().read_line(&mut password)?;
                store.store_password(&address, password.trim_end_matches(['\r', '\n']))?;
                println!("Stored password for {address}");
            }
            PasswordCommand::Clear => {
                store.delete_password(&address)?;
                println!("Removed password for {address}");
            }
        }
        return Ok(());
    }

    let options = connect_options(&server, |address| store.password(address))?;
    tracing::info!(
        host = %options.host,
        port = options.port,
        config_dir = %dirs.config_dir().display(),
        "starting"
    );
    let session = open_session(&options)?;

    match cli.command {
        Command::Status { json } => {
            let snapshot = session.snapshot();
            let song = session.current_song();
            if json {
                let value = serde_json::json!({ "status": snapshot, "song": song });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("{}", describe_snapshot(&snapshot, song.as_ref()));
            }
        }
        Command::Watch { count } => watch(&session, &options, &config, count),
        Command::Playlist { json } => {
            let playlist = session.playlist();
            if json {
                println!("{}", serde_json::to_string_pretty(&playlist)?);
            } else if playlist.is_empty() {
                println!("Playlist is empty.");
            } else {
                for (position, entry) in playlist.iter().enumerate() {
                    println!("{}", describe_entry(position, entry));
                }
            }
        }
        Command::Add { paths } => {
            for path in paths {
                session.enqueue_append(path);
            }
            commit_edits(&session)?;
        }
        Command::Delete { mut positions } => {
            // Highest first so earlier deletes do not shift later targets.
            positions.sort_unstable_by(|a, b| b.cmp(a));
            for position in positions {
                session.enqueue_delete_by_position(position);
            }
            commit_edits(&session)?;
        }
        Command::DeleteId { ids } => {
            for id in ids {
                session.enqueue_delete_by_id(id);
            }
            commit_edits(&session)?;
        }
        Command::Move { from, to } => {
            session.enqueue_move(from, to);
            commit_edits(&session)?;
        }
        Command::Play => session.play()?,
        Command::Pause => session.toggle_pause()?,
        Command::Stop => session.stop()?,
        Command::Next => session.next()?,
        Command::Prev => session.previous()?,
        Command::Volume { level } => session.set_volume(level)?,
        Command::Password(_) => {}
    }

    session.disconnect();
    Ok(())
}
