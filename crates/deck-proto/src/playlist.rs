//! Parser for the station playlist file.
//!
//! The format is extended M3U as the curation scripts export it: a `#EXTM3U`
//! header, then one `#EXTINF` line per station followed by its payload lines.
//! Stations are addressed by position everywhere else in the system, so a
//! playlist that parses to zero stations is an error, not an empty success.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlaylistError {
    #[error("no #EXTM3U header found")]
    MissingHeader,
    #[error("station {name:?} has no URL line")]
    MissingUrl { name: String },
    #[error("playlist contains no stations")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Station {
    pub name: String,
    pub url: String,
    /// Every non-blank line of the station's block, in file order.  The last
    /// one is the playable URL; earlier ones are exporter metadata kept
    /// as-is.
    pub payload: Vec<String>,
}

/// Parse playlist text into the ordered station list.
///
/// The display name is whatever follows the last comma of the `#EXTINF`
/// line.  All lines are trimmed; blank lines are skipped.  Anything before
/// the header or between the header and the first `#EXTINF` is ignored.
pub fn parse(text: &str) -> Result<Vec<Station>, PlaylistError> {
    let mut lines = text.lines().map(str::trim);

    if !lines.any(|line| line.starts_with("#EXTM3U")) {
        return Err(PlaylistError::MissingHeader);
    }

    let mut stations = Vec::new();
    let mut pending: Option<(String, Vec<String>)> = None;

    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some(info) = line.strip_prefix("#EXTINF:") {
            if let Some((name, payload)) = pending.take() {
                stations.push(finish(name, payload)?);
            }
            let name = match info.rfind(',') {
                Some(comma) => info[comma + 1..].trim().to_string(),
                None => String::new(),
            };
            pending = Some((name, Vec::new()));
        } else if let Some((_, payload)) = pending.as_mut() {
            payload.push(line.to_string());
        }
    }

    if let Some((name, payload)) = pending.take() {
        stations.push(finish(name, payload)?);
    }

    if stations.is_empty() {
        return Err(PlaylistError::Empty);
    }
    Ok(stations)
}

fn finish(name: String, payload: Vec<String>) -> Result<Station, PlaylistError> {
    let url = match payload.last() {
        Some(url) => url.clone(),
        None => return Err(PlaylistError::MissingUrl { name }),
    };
    Ok(Station { name, url, payload })
}
