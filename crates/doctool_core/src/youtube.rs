use std::sync::LazyLock;

use regex::Regex;

static VIDEO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ^https?://
        (?:
            (?:www\.)?youtube\.com/(?:watch\?(?:[^\#]*&)?v=|embed/)
          | youtu\.be/
        )
        (?<id>[A-Za-z0-9_-]{6,})",
    )
    .expect("valid regex")
});

/// Extract the video ID from the `watch?v=`, `youtu.be/`, and `embed/` URL
/// shapes. Anything else yields `None`.
pub fn video_id(url: &str) -> Option<String> {
    VIDEO_URL
        .captures(url.trim())
        .map(|captures| captures["id"].to_string())
}

/// The in-page video link markup: a styled anchor with the play glyph, as
/// injected next to a page's title block.
pub fn render_link(url: &str, title: &str) -> Option<String> {
    video_id(url)?;
    Some(format!(
        "<p class=\"youtube_link\"><a href=\"{}\" target=\"_blank\" rel=\"noopener noreferrer\">&#9654;&nbsp;{title}</a></p>",
        url.trim()
    ))
}

/// The privacy-enhanced iframe embed for a recognized video URL; unrecognized
/// URLs pass through as `None` so callers can fall back to a plain link.
pub fn render_embed(url: &str) -> Option<String> {
    let id = video_id(url)?;
    Some(format!(
        "<iframe class=\"youtube_embed\" src=\"https://www.youtube-nocookie.com/embed/{id}\" frameborder=\"0\" allowfullscreen></iframe>"
    ))
}
