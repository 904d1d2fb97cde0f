use url::Url;

use crate::IoriResult;

pub(crate) fn is_absolute_url(s: &str) -> bool {
    s.starts_with("http://")
        || s.starts_with("https://")
        || s.starts_with("file://")
        || s.starts_with("ftp://")
}

/// Resolve `new` against `current`.
///
/// The query of `current` (manifest URL, its redirect target or an outer `BaseURL`) is carried
/// over unless `new` brings its own:
///
/// ```text
/// merge_baseurls(https://example.com/manifest.mpd?auth=secret, /video42.mp4)
///   => https://example.com/video42.mp4?auth=secret
/// merge_baseurls(https://example.com/manifest.mpd?auth=old, /video42.mp4?auth=new)
///   => https://example.com/video42.mp4?auth=new
/// ```
pub(crate) fn merge_baseurls(current: &Url, new: &str) -> IoriResult<Url> {
    if is_absolute_url(new) {
        Ok(Url::parse(new)?)
    } else {
        let mut merged = current.join(new)?;
        if merged.query().is_none() {
            merged.set_query(current.query());
        }
        Ok(merged)
    }
}

/// Make sure a base URL acts as a directory when a relative path is appended to it.
pub(crate) fn as_directory(base: &str) -> String {
    if is_absolute_url(base) && !base.ends_with('/') {
        format!("{base}/")
    } else {
        base.to_string()
    }
}
