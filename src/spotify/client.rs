//! Spotify Web API client: library listing and feature enrichment.
//!
//! This is the ingestion collaborator: it assigns track identifiers (the
//! Spotify track id) and produces the read-only `TrackRecord`s the
//! pipeline consumes. Token refresh, pagination and enrichment batching
//! all live here, behind `fetch_library`.

use super::models::{
    ArtistsPage, AudioFeaturesObject, AudioFeaturesPage, CurrentUser, PlaylistTracksPage,
    PlaylistsPage, SavedTracksPage, TrackObject,
};
use crate::classifier::{AudioFeatures, TrackRecord};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const API_BASE: &str = "https://api.spotify.com";
const AUTH_BASE: &str = "https://accounts.spotify.com";

const SAVED_TRACKS_PAGE: usize = 50;
const PLAYLIST_TRACKS_PAGE: usize = 100;
const AUDIO_FEATURES_CHUNK: usize = 100;
const ARTISTS_CHUNK: usize = 50;

/// Refresh the token a minute early to avoid racing its expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum SpotifyError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Authentication failed: {0}")]
    Auth(String),
}

/// OAuth material for the refresh-token flow. Obtaining the refresh token
/// (the interactive consent step) is outside this client's concern.
#[derive(Debug, Clone)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// A normalized track plus the artist ids needed for genre enrichment.
struct IngestedTrack {
    record: TrackRecord,
    artist_ids: Vec<String>,
}

/// Client over the user's library with cached bearer-token refresh.
pub struct SpotifyClient {
    http: Client,
    credentials: SpotifyCredentials,
    api_base: String,
    auth_base: String,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyClient {
    pub fn new(credentials: SpotifyCredentials) -> Self {
        Self::with_base_urls(credentials, API_BASE, AUTH_BASE)
    }

    /// Base URLs are injectable so tests can point at a local server.
    pub fn with_base_urls(
        credentials: SpotifyCredentials,
        api_base: impl Into<String>,
        auth_base: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            credentials,
            api_base: api_base.into(),
            auth_base: auth_base.into(),
            token: Mutex::new(None),
        }
    }

    /// Fetch the user's full library: liked songs plus the tracks of every
    /// playlist the user owns, deduplicated by track id and enriched with
    /// audio features and artist genres.
    pub async fn fetch_library(&self) -> Result<Vec<TrackRecord>, SpotifyError> {
        let mut ingested: Vec<IngestedTrack> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        info!("Fetching liked songs");
        for track in self.liked_tracks().await? {
            if let Some(entry) = ingest_track(track, "liked_songs") {
                if seen.insert(entry.record.id.clone()) {
                    ingested.push(entry);
                }
            }
        }
        info!(tracks = ingested.len(), "Liked songs fetched");

        let user = self.current_user().await?;
        let playlists = self.owned_playlists(&user.id).await?;
        info!(playlists = playlists.len(), "Fetching owned playlists");

        for (name, playlist_id) in playlists {
            let source = format!("playlist:{}", name);
            for track in self.playlist_tracks(&playlist_id).await? {
                if let Some(entry) = ingest_track(track, &source) {
                    if seen.insert(entry.record.id.clone()) {
                        ingested.push(entry);
                    }
                }
            }
        }

        info!(tracks = ingested.len(), "Library fetched, enriching");
        self.enrich(ingested).await
    }

    /// Attach audio features and artist genres in bulk. Per-track
    /// enrichment gaps are tolerated; the prompt renders missing values as
    /// "unknown".
    async fn enrich(
        &self,
        ingested: Vec<IngestedTrack>,
    ) -> Result<Vec<TrackRecord>, SpotifyError> {
        let track_ids: Vec<String> = ingested.iter().map(|t| t.record.id.clone()).collect();
        let features = self.audio_features_bulk(&track_ids).await?;

        let mut artist_ids: Vec<String> = Vec::new();
        let mut seen_artists: HashSet<&str> = HashSet::new();
        for entry in &ingested {
            for artist_id in &entry.artist_ids {
                if seen_artists.insert(artist_id.as_str()) {
                    artist_ids.push(artist_id.clone());
                }
            }
        }
        let genres_by_artist = self.artist_genres_bulk(&artist_ids).await?;

        let records = ingested
            .into_iter()
            .map(|entry| {
                let mut record = entry.record;
                if let Some(object) = features.get(&record.id) {
                    record.features = AudioFeatures {
                        tempo: object.tempo,
                        energy: object.energy,
                        danceability: object.danceability,
                        valence: object.valence,
                    };
                }
                record.genres = merge_genres(&entry.artist_ids, &genres_by_artist);
                record
            })
            .collect();
        Ok(records)
    }

    async fn liked_tracks(&self) -> Result<Vec<TrackObject>, SpotifyError> {
        let mut tracks = Vec::new();
        let mut offset = 0usize;
        loop {
            let url = format!(
                "{}/v1/me/tracks?limit={}&offset={}",
                self.api_base, SAVED_TRACKS_PAGE, offset
            );
            let page: SavedTracksPage = self.get_json(&url).await?;
            let count = page.items.len();
            tracks.extend(page.items.into_iter().filter_map(|item| item.track));
            if count < SAVED_TRACKS_PAGE {
                break;
            }
            offset += SAVED_TRACKS_PAGE;
        }
        Ok(tracks)
    }

    async fn current_user(&self) -> Result<CurrentUser, SpotifyError> {
        let url = format!("{}/v1/me", self.api_base);
        self.get_json(&url).await
    }

    /// Playlists created by the user, as (name, id) pairs. Followed
    /// playlists are excluded.
    async fn owned_playlists(&self, user_id: &str) -> Result<Vec<(String, String)>, SpotifyError> {
        let mut playlists = Vec::new();
        let mut offset = 0usize;
        loop {
            let url = format!(
                "{}/v1/me/playlists?limit={}&offset={}",
                self.api_base, SAVED_TRACKS_PAGE, offset
            );
            let page: PlaylistsPage = self.get_json(&url).await?;
            let count = page.items.len();
            for playlist in page.items {
                if playlist.owner.id == user_id {
                    playlists.push((playlist.name, playlist.id));
                }
            }
            if count < SAVED_TRACKS_PAGE {
                break;
            }
            offset += SAVED_TRACKS_PAGE;
        }
        Ok(playlists)
    }

    async fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<TrackObject>, SpotifyError> {
        let mut tracks = Vec::new();
        let mut offset = 0usize;
        loop {
            let url = format!(
                "{}/v1/playlists/{}/tracks?limit={}&offset={}",
                self.api_base, playlist_id, PLAYLIST_TRACKS_PAGE, offset
            );
            let page: PlaylistTracksPage = self.get_json(&url).await?;
            let count = page.items.len();
            tracks.extend(page.items.into_iter().filter_map(|item| item.track));
            if count < PLAYLIST_TRACKS_PAGE {
                break;
            }
            offset += PLAYLIST_TRACKS_PAGE;
        }
        Ok(tracks)
    }

    async fn audio_features_bulk(
        &self,
        track_ids: &[String],
    ) -> Result<HashMap<String, AudioFeaturesObject>, SpotifyError> {
        let mut features = HashMap::with_capacity(track_ids.len());
        for chunk in track_ids.chunks(AUDIO_FEATURES_CHUNK) {
            let url = format!(
                "{}/v1/audio-features?ids={}",
                self.api_base,
                chunk.join(",")
            );
            let page: AudioFeaturesPage = self.get_json(&url).await?;
            for object in page.audio_features.into_iter().flatten() {
                features.insert(object.id.clone(), object);
            }
        }
        debug!(
            requested = track_ids.len(),
            analyzed = features.len(),
            "Audio features fetched"
        );
        Ok(features)
    }

    async fn artist_genres_bulk(
        &self,
        artist_ids: &[String],
    ) -> Result<HashMap<String, Vec<String>>, SpotifyError> {
        let mut genres = HashMap::with_capacity(artist_ids.len());
        for chunk in artist_ids.chunks(ARTISTS_CHUNK) {
            let url = format!("{}/v1/artists?ids={}", self.api_base, chunk.join(","));
            let page: ArtistsPage = self.get_json(&url).await?;
            for artist in page.artists.into_iter().flatten() {
                genres.insert(artist.id, artist.genres);
            }
        }
        Ok(genres)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SpotifyError> {
        let bearer = self.bearer().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(&bearer)
            .send()
            .await
            .map_err(|e| SpotifyError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpotifyError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| SpotifyError::InvalidResponse(e.to_string()))
    }

    /// Current access token, refreshed through the OAuth refresh-token
    /// grant when absent or close to expiry.
    async fn bearer(&self) -> Result<String, SpotifyError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_EXPIRY_MARGIN {
                return Ok(token.access_token.clone());
            }
            debug!("Access token close to expiry, refreshing");
        }

        let response = self
            .http
            .post(format!("{}/api/token", self.auth_base))
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.credentials.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SpotifyError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpotifyError::Auth(format!("status {}: {}", status, body)));
        }

        let token: super::models::TokenResponse = response
            .json()
            .await
            .map_err(|e| SpotifyError::InvalidResponse(e.to_string()))?;

        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(access_token)
    }
}

/// Normalize a wire track, skipping local files and removed tracks (no
/// stable id to classify under).
fn ingest_track(track: TrackObject, source: &str) -> Option<IngestedTrack> {
    if track.is_local {
        return None;
    }
    let id = track.id?;
    let external_url = track
        .external_urls
        .spotify
        .unwrap_or_else(|| format!("https://open.spotify.com/track/{}", id));

    let mut artists = Vec::with_capacity(track.artists.len());
    let mut artist_ids = Vec::with_capacity(track.artists.len());
    for artist in track.artists {
        artists.push(artist.name);
        if let Some(artist_id) = artist.id {
            artist_ids.push(artist_id);
        }
    }
    if artists.is_empty() {
        warn!(track_id = %id, "Track has no artists listed");
    }

    Some(IngestedTrack {
        record: TrackRecord {
            id,
            name: track.name,
            artists,
            genres: Vec::new(),
            features: AudioFeatures::default(),
            external_url,
            source: source.to_string(),
        },
        artist_ids,
    })
}

/// Union of the artists' genre tags, first-seen order, without duplicates.
fn merge_genres(
    artist_ids: &[String],
    genres_by_artist: &HashMap<String, Vec<String>>,
) -> Vec<String> {
    let mut genres: Vec<String> = Vec::new();
    for artist_id in artist_ids {
        if let Some(artist_genres) = genres_by_artist.get(artist_id) {
            for genre in artist_genres {
                if !genres.contains(genre) {
                    genres.push(genre.clone());
                }
            }
        }
    }
    genres
}
