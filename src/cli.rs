//! # Command-Line Interface Module
//!
//! Clap definitions for the `kindred` binary.
//!
//! ## Commands
//!
//! - `init-db`: Create the feature store
//! - `stats`: Show how many tracks have stored features
//! - `resolve`: Look up or extract features for one track
//! - `similar`: Nearest stored tracks to one track
//! - `build`: Batch-extract features for liked songs, playlists, artists,
//!   albums or single tracks
//! - `recommend`: Add recommended tracks to a playlist
//!
//! ## Examples
//!
//! ```bash
//! kindred build --liked --workers 6
//! kindred build --artist https://open.spotify.com/artist/4tZwfgrHOc3mvqYlEYSvVi --max-tracks 200
//! kindred recommend --playlist 37i9dQZF1DX0XUsuxWHRQd --count 25
//! kindred similar 4uLU6hMCjMI75M1A2tKUQC -n 10
//! ```

use crate::spotify::parse_id;
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

// Every id argument also takes an open.spotify.com link or a spotify: URI.
fn track_id(input: &str) -> Result<String, String> {
    parse_id(input, "track")
}

fn playlist_id(input: &str) -> Result<String, String> {
    parse_id(input, "playlist")
}

fn artist_id(input: &str) -> Result<String, String> {
    parse_id(input, "artist")
}

fn album_id(input: &str) -> Result<String, String> {
    parse_id(input, "album")
}

fn user_id(input: &str) -> Result<String, String> {
    parse_id(input, "user")
}

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

#[derive(Parser)]
#[command(name = "kindred")]
#[command(about = "Kindred: playlist recommendations from audio similarity")]
#[command(version)]
pub struct Args {
    /// Feature store location (defaults to the platform data directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the feature store if it does not exist yet
    InitDb,

    /// Show feature store statistics
    Stats,

    /// Resolve features for a single track
    ///
    /// Uses the stored row when there is one; otherwise searches, downloads
    /// and analyses the track, then stores the result.
    Resolve {
        /// Spotify track id or link
        #[arg(value_parser = track_id)]
        track: String,
    },

    /// List the stored tracks closest to a track
    Similar {
        /// Spotify track id or link
        #[arg(value_parser = track_id)]
        track: String,

        /// Number of tracks to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Build features for many tracks at once
    ///
    /// Stops early when the media source rate-limits; tracks never started
    /// are reported as cancelled and can be picked up by running again.
    #[command(group(
        ArgGroup::new("source")
            .required(true)
            .args(["liked", "playlist", "user", "artist", "album", "track"])
    ))]
    Build {
        /// All of the listener's liked songs
        #[arg(long)]
        liked: bool,

        /// Every track of a playlist
        #[arg(long, value_name = "PLAYLIST", value_parser = playlist_id)]
        playlist: Option<String>,

        /// Every public playlist of a user
        #[arg(long, value_name = "USER", value_parser = user_id)]
        user: Option<String>,

        /// Every album, single and compilation of an artist
        #[arg(long, value_name = "ARTIST", value_parser = artist_id)]
        artist: Option<String>,

        /// Every track of an album
        #[arg(long, value_name = "ALBUM", value_parser = album_id)]
        album: Option<String>,

        /// Explicit tracks (repeatable)
        #[arg(long, value_name = "TRACK", value_parser = track_id)]
        track: Vec<String>,

        /// Also build each track's artist discography (each artist once)
        #[arg(long)]
        extensive: bool,

        /// Stop after this many tracks
        #[arg(long, value_name = "N")]
        max_tracks: Option<usize>,

        /// Parallel workers (1 to 10)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Add recommended tracks to a playlist
    Recommend {
        /// Destination playlist id or link
        #[arg(long, value_name = "PLAYLIST", value_parser = playlist_id)]
        playlist: String,

        /// Number of tracks to add
        #[arg(short, long, default_value = "10")]
        count: usize,

        /// Skip artists with more followers than this
        #[arg(long)]
        max_followers: Option<u64>,

        /// Require a shared tag between seed and candidate artists
        #[arg(long)]
        genre_matching: bool,

        /// Draw seeds from this playlist instead of liked songs
        #[arg(long, value_name = "PLAYLIST", value_parser = playlist_id)]
        source_playlist: Option<String>,

        /// Weight seed artists by this Last.fm user's scrobbles
        #[arg(long, value_name = "USER")]
        lastfm_user: Option<String>,

        /// Allow artists that already appear in liked songs
        #[arg(long)]
        keep_liked_artists: bool,

        /// Pick tracks but do not write them to the playlist
        #[arg(long)]
        dry_run: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    ///
    /// Usage: kindred completion bash > ~/.local/share/bash-completion/completions/kindred
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },
}
