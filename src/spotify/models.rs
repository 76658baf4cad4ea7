//! Wire types for the Spotify Web API responses we consume.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
pub struct CurrentUser {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct SavedTracksPage {
    pub items: Vec<SavedTrackItem>,
}

#[derive(Debug, Deserialize)]
pub struct SavedTrackItem {
    pub track: Option<TrackObject>,
}

#[derive(Debug, Deserialize)]
pub struct TrackObject {
    /// Absent for local files.
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
    #[serde(default)]
    pub external_urls: ExternalUrls,
    #[serde(default)]
    pub is_local: bool,
}

#[derive(Debug, Deserialize)]
pub struct ArtistRef {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExternalUrls {
    pub spotify: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlaylistsPage {
    pub items: Vec<PlaylistObject>,
}

#[derive(Debug, Deserialize)]
pub struct PlaylistObject {
    pub id: String,
    pub name: String,
    pub owner: PlaylistOwner,
}

#[derive(Debug, Deserialize)]
pub struct PlaylistOwner {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct PlaylistTracksPage {
    pub items: Vec<PlaylistTrackItem>,
}

#[derive(Debug, Deserialize)]
pub struct PlaylistTrackItem {
    /// `None` for removed tracks and some local files.
    pub track: Option<TrackObject>,
}

#[derive(Debug, Deserialize)]
pub struct AudioFeaturesPage {
    /// Index-aligned with the requested ids; `None` for unanalyzed tracks.
    pub audio_features: Vec<Option<AudioFeaturesObject>>,
}

#[derive(Debug, Deserialize)]
pub struct AudioFeaturesObject {
    pub id: String,
    pub tempo: Option<f64>,
    pub energy: Option<f64>,
    pub danceability: Option<f64>,
    pub valence: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ArtistsPage {
    pub artists: Vec<Option<ArtistObject>>,
}

#[derive(Debug, Deserialize)]
pub struct ArtistObject {
    pub id: String,
    #[serde(default)]
    pub genres: Vec<String>,
}
