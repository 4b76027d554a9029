//! M3U8 playlist parsing (`spec.md` §4.6 step 2).
//!
//! No crate in this workspace's stack covers HLS playlist parsing, and
//! pulling one in for "take the last non-comment line" would be overkill;
//! this is a deliberate hand-rolled exception to the otherwise-strict
//! prefer-the-ecosystem rule.

/// Return the URL of the last media segment referenced by `playlist`, or
/// `None` if the playlist has no segment lines.
///
/// A line is a segment reference unless it is blank or starts with `#`
/// (an M3U8 tag or comment).
#[must_use]
pub fn last_segment_url(playlist: &str) -> Option<&str> {
    playlist
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .next_back()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_last_segment_ignoring_tags() {
        let playlist = "#EXTM3U\n#EXT-X-VERSION:3\n#EXTINF:6.0,\nseg1.ts\n#EXTINF:6.0,\nseg2.ts\n";
        assert_eq!(last_segment_url(playlist), Some("seg2.ts"));
    }

    #[test]
    fn empty_playlist_has_no_segment() {
        assert_eq!(last_segment_url("#EXTM3U\n#EXT-X-VERSION:3\n"), None);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let playlist = "#EXTM3U\n\nseg1.ts\n\n";
        assert_eq!(last_segment_url(playlist), Some("seg1.ts"));
    }
}
