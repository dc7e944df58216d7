//! Playlist parsing for stream URL resolution.

use anyhow::Result;

/// Extract the first stream URL from a `.pls` playlist.
pub fn parse_pls(content: &str) -> Result<String> {
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with("File") {
            if let Some(url) = line.split('=').nth(1) {
                let url = url.trim();
                if !url.is_empty() {
                    return Ok(url.to_string());
                }
            }
        }
    }
    anyhow::bail!("no stream URL found in .pls playlist")
}

/// Extract the first stream URL from an `.m3u`/`.m3u8` playlist.
pub fn parse_m3u(content: &str) -> Result<String> {
    for line in content.lines() {
        let line = line.trim();
        if !line.is_empty() && !line.starts_with('#') {
            return Ok(line.to_string());
        }
    }
    anyhow::bail!("no stream URL found in .m3u playlist")
}

/// Whether the URL points at a playlist that has to be fetched and parsed
/// before streaming.
pub fn is_playlist_url(url: &str) -> bool {
    url.ends_with(".pls") || url.ends_with(".m3u") || url.ends_with(".m3u8")
}

/// Parse playlist content based on the URL it was fetched from.
pub fn parse_playlist(url: &str, content: &str) -> Result<String> {
    if url.ends_with(".pls") {
        parse_pls(content)
    } else {
        parse_m3u(content)
    }
}
