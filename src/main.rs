//! # Kindred
//!
//! Adds tracks to a Spotify playlist that sound like the music the listener
//! already likes, without repeating artists they already know.
//!
//! ## Usage
//!
//! ```bash
//! # Fill the feature store from liked songs
//! kindred build --liked
//!
//! # Add 20 recommendations to a playlist
//! kindred recommend --playlist <id> --count 20
//! ```
//!
//! Logging is controlled through `RUST_LOG`, e.g.
//! `RUST_LOG=kindred=debug kindred recommend ...`.

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use kindred::builder::{self, BatchBuilder, BatchSource, CollectOptions};
use kindred::cli::{self, Command};
use kindred::config::Settings;
use kindred::db::FeatureStore;
use kindred::lastfm::LastFmClient;
use kindred::provider::MetadataProvider;
use kindred::ranker::CandidateRanker;
use kindred::recommend::{Recommender, RunRequest, SeedSource, StoreAccess};
use kindred::resolver::{FeatureResolver, Source};
use kindred::spotify::SpotifyClient;
use kindred::validation::Policy;
use kindred::ytdlp::YtDlpOracle;
use kindred::completion;
use log::{info, warn};
use std::collections::HashSet;
use std::path::PathBuf;

fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();
    let mut settings = Settings::load().context("Failed to load settings")?;
    if let Some(db) = args.db {
        settings.db_path = Some(db);
    }

    match args.command {
        Command::InitDb => {
            let path = settings.db_path()?;
            FeatureStore::open(&path)
                .with_context(|| format!("Failed to create feature store at {}", path.display()))?;
            println!("Feature store ready at {}", path.display());
        }
        Command::Stats => {
            let path = settings.db_path()?;
            let store = FeatureStore::open(&path)?;
            println!("{}: {} tracks with features", path.display(), store.count()?);
        }
        Command::Resolve { track } => {
            let spotify = spotify_client(&settings)?;
            let store = FeatureStore::open(&settings.db_path()?)?;
            let oracle = ytdlp_oracle(&settings);

            let track = spotify.track(&track)?;
            let resolution = FeatureResolver::new(&store, &oracle).resolve(&track)?;
            let origin = match resolution.source {
                Source::Cached | Source::StoredElsewhere => "stored",
                Source::Extracted => "extracted and stored",
                Source::Unsaved => "extracted (not stored)",
            };
            println!("'{}' by {} ({origin})", track.name, track.artist_line());
            println!("{}", serde_json::to_string_pretty(&resolution.vector.profile)?);
        }
        Command::Similar { track, limit } => {
            let store = FeatureStore::open(&settings.db_path()?)?;
            let seed = store
                .get(&track)
                .with_context(|| format!("No stored features for {track}; run `kindred resolve {track}` first"))?;
            let candidates = CandidateRanker::new(&store)
                .with_limit(limit)
                .rank(&seed, &HashSet::new())?;
            println!("Closest to '{}' by {}:", seed.track_name, seed.artist_name);
            for (i, c) in candidates.iter().enumerate() {
                println!("{:>3}. {:.4}  {} - {}", i + 1, c.distance, c.artist_name, c.track_name);
            }
        }
        Command::Build {
            liked,
            playlist,
            user,
            artist,
            album,
            track,
            extensive,
            max_tracks,
            workers,
        } => {
            let spotify = spotify_client(&settings)?;
            let store = FeatureStore::open(&settings.db_path()?)?;
            let oracle = ytdlp_oracle(&settings);

            let source = if liked {
                BatchSource::LikedSongs
            } else if let Some(id) = playlist {
                BatchSource::Playlist(id)
            } else if let Some(id) = user {
                BatchSource::UserPlaylists(id)
            } else if let Some(id) = artist {
                BatchSource::Artist(id)
            } else if let Some(id) = album {
                BatchSource::Album(id)
            } else {
                BatchSource::Tracks(track)
            };
            let options = CollectOptions { extensive, max_tracks };
            let tracks = builder::collect_tracks(&spotify, &source, options)
                .context("Failed to list tracks to build")?;
            let workers = workers.unwrap_or_else(|| settings.workers());
            let report = BatchBuilder::new(&store, &oracle, workers).build(&tracks)?;

            println!(
                "{} tracks: {} stored, {} already present, {} unresolvable, {} failed, {} cancelled",
                report.total,
                report.stored,
                report.skipped_existing,
                report.unresolvable,
                report.failed,
                report.cancelled
            );
            if let Some(reason) = report.aborted {
                bail!("Build stopped by rate limit: {reason}");
            }
        }
        Command::Recommend {
            playlist,
            count,
            max_followers,
            genre_matching,
            source_playlist,
            lastfm_user,
            keep_liked_artists,
            dry_run,
            json,
        } => {
            let spotify = spotify_client(&settings)?;
            let oracle = ytdlp_oracle(&settings);
            let lastfm = settings
                .lastfm_api_key
                .clone()
                .map(|key| LastFmClient::new(key, &settings.lastfm_api, settings.retry_policy()));
            if genre_matching && lastfm.is_none() {
                warn!("Genre matching requested but no Last.fm API key is configured; check skipped");
            }

            let opened = open_store(settings.db_path()?);
            let store = match &opened {
                Ok(store) => StoreAccess::Ready(store),
                Err(e) => StoreAccess::Unavailable(e.to_string()),
            };

            let mut recommender =
                Recommender::new(&spotify, &oracle, store).with_options(settings.run_options());
            if let Some(lastfm) = &lastfm {
                recommender = recommender.with_tags(lastfm);
                if let Some(user) = lastfm_user.or_else(|| settings.lastfm_user.clone()) {
                    recommender = recommender.with_history(lastfm, user);
                }
            } else if lastfm_user.is_some() {
                warn!("Last.fm user given but no Last.fm API key is configured; using Spotify history");
            }

            let request = RunRequest {
                destination_playlist: playlist,
                target_count: count,
                source: source_playlist.map_or(SeedSource::LikedSongs, SeedSource::Playlist),
                policy: Policy {
                    exclude_liked_artists: !keep_liked_artists,
                    max_followers,
                    genre_matching,
                },
                dry_run,
            };
            info!("Requesting {count} tracks for playlist {}", request.destination_playlist);
            let report = recommender.run(&request, &mut rand::thread_rng());

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for added in &report.added_tracks {
                    println!("+ {} - {}  (from {})", added.artist, added.title, added.based_on_seed);
                }
                println!("{}", report.status);
                if let Some(reason) = &report.degraded {
                    println!("note: {reason}");
                }
            }

            if !report.success || report.aborted {
                bail!(report.error.unwrap_or(report.status));
            }
        }
        Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            completion::generate_completions(completion::shell_to_completion_shell(shell), &mut cmd);
        }
    }

    Ok(())
}

fn spotify_client(settings: &Settings) -> Result<SpotifyClient> {
    let token = settings.spotify_token()?.to_string();
    Ok(SpotifyClient::new(token, &settings.spotify_api, settings.retry_policy()))
}

fn ytdlp_oracle(settings: &Settings) -> YtDlpOracle {
    YtDlpOracle::new(settings.ytdlp.clone(), settings.extractor.clone())
}

fn open_store(path: PathBuf) -> kindred::Result<FeatureStore> {
    FeatureStore::open(&path).map_err(|e| {
        warn!("Feature store at {} unavailable: {e}", path.display());
        e
    })
}
