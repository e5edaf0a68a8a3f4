/// Local media files and their sidecar subtitles
use crate::profiles::profile_for_mime;
use dlna_caster_core::{CastError, MediaResource, Result, SubtitleResource};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Subtitle extensions looked up next to a media file, in preference order
const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "vtt", "sub", "ass", "ssa"];

/// Build a servable resource description for a local file
///
/// The path is canonicalized and the size captured now; later growth of
/// the file is not reflected in what the server advertises.
pub fn inspect_media(path: impl AsRef<Path>, subtitles: Vec<SubtitleResource>) -> Result<MediaResource> {
    let path = canonical_file(path.as_ref())?;
    let size = std::fs::metadata(&path)?.len();

    let mime_type = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    let profile = profile_for_mime(&mime_type);

    debug!(
        "Probed {} ({} bytes, {}, profile {:?})",
        path.display(),
        size,
        mime_type,
        profile.name
    );

    Ok(MediaResource {
        path,
        size,
        mime_type,
        dlna_profile: profile.name.map(str::to_string),
        subtitles,
    })
}

/// Describe an explicitly chosen subtitle file
pub fn subtitle_resource(path: impl AsRef<Path>) -> Result<SubtitleResource> {
    let path = canonical_file(path.as_ref())?;
    let size = std::fs::metadata(&path)?.len();
    let mime_type = subtitle_mime(&path).to_string();

    Ok(SubtitleResource {
        path,
        mime_type,
        size,
    })
}

/// Existing subtitle files sharing the media file's stem
pub fn find_sidecar_subtitles(media_path: impl AsRef<Path>) -> Vec<SubtitleResource> {
    let media_path = media_path.as_ref();
    let Some(stem) = media_path.file_stem() else {
        return Vec::new();
    };
    let dir = media_path.parent().unwrap_or_else(|| Path::new("."));

    SUBTITLE_EXTENSIONS
        .iter()
        .map(|ext| {
            let mut name = stem.to_os_string();
            name.push(".");
            name.push(ext);
            dir.join(name)
        })
        .filter(|candidate| candidate.is_file())
        .filter_map(|candidate| match subtitle_resource(&candidate) {
            Ok(subtitle) => {
                debug!("Found sidecar subtitle {}", subtitle.path.display());
                Some(subtitle)
            }
            Err(e) => {
                debug!("Skipping subtitle {}: {}", candidate.display(), e);
                None
            }
        })
        .collect()
}

/// MIME type renderers expect for a subtitle extension
pub fn subtitle_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "srt" => "text/srt",
        "vtt" => "text/vtt",
        "sub" => "text/x-microdvd",
        "ass" | "ssa" => "text/x-ssa",
        _ => "text/plain",
    }
}

fn canonical_file(path: &Path) -> Result<PathBuf> {
    let canonical = match path.canonicalize() {
        Ok(p) => p,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CastError::ResourceNotFound(path.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    if !canonical.is_file() {
        return Err(CastError::ResourceNotFound(format!(
            "{} is not a regular file",
            canonical.display()
        )));
    }

    Ok(canonical)
}
