//! Track source: Spotify Web API integration.

mod client;
mod models;

pub use client::{SpotifyClient, SpotifyCredentials, SpotifyError};
