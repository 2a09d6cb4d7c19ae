/*!
Reshaping of soundcloud track and playlist json into the summaries
the mini app renders.
*/
use serde_json::{Number, Value};

use crate::models::{PlaylistSummary, TrackSummary};

const DEFAULT_TITLE: &str = "Untitled";
const DEFAULT_ARTIST: &str = "Unknown";

/// Soundcloud answers list endpoints with either a bare array or a
/// `{"collection": [...]}` envelope depending on pagination. Anything
/// else is treated as an empty listing.
pub fn unwrap_collection(raw: Value) -> Vec<Value> {
    match raw {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("collection") {
            Some(Value::Array(items)) => items,
            _ => vec![],
        },
        _ => vec![],
    }
}

fn id_of(raw: &Value) -> Value {
    raw.get("id").cloned().unwrap_or(Value::Null)
}

fn str_or(raw: &Value, key: &str, default: &str) -> String {
    raw.get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

pub fn simplify_track(raw: &Value) -> TrackSummary {
    TrackSummary {
        id: id_of(raw),
        title: str_or(raw, "title", DEFAULT_TITLE),
        artist: raw
            .get("user")
            .map(|user| str_or(user, "username", DEFAULT_ARTIST))
            .unwrap_or_else(|| DEFAULT_ARTIST.to_string()),
        // any json number is kept as is, fractional or not
        duration_ms: match raw.get("duration") {
            Some(Value::Number(n)) => n.clone(),
            _ => Number::from(0),
        },
        artwork_url: str_or(raw, "artwork_url", ""),
    }
}

pub fn simplify_playlist(raw: &Value) -> PlaylistSummary {
    let tracks = match raw.get("tracks") {
        Some(Value::Array(tracks)) => tracks
            .iter()
            .filter(|t| t.is_object())
            .map(simplify_track)
            .collect(),
        _ => vec![],
    };
    PlaylistSummary {
        id: id_of(raw),
        title: str_or(raw, "title", DEFAULT_TITLE),
        track_count: raw.get("track_count").and_then(Value::as_u64).unwrap_or(0),
        artwork_url: str_or(raw, "artwork_url", ""),
        tracks,
    }
}

/// Unwrap and simplify a track listing, skipping non-object elements
pub fn simplify_tracks(raw: Value) -> Vec<TrackSummary> {
    unwrap_collection(raw)
        .iter()
        .filter(|t| t.is_object())
        .map(simplify_track)
        .collect()
}

pub fn simplify_playlists(raw: Value) -> Vec<PlaylistSummary> {
    unwrap_collection(raw)
        .iter()
        .filter(|p| p.is_object())
        .map(simplify_playlist)
        .collect()
}
