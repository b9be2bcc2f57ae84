//! Storage file naming
//!
//! Audio and transcript objects are named after the campaign and session
//! they belong to, so a session record can always be matched to its files.

/// Build the storage file name for a session's audio.
///
/// The extension of `original_name` is kept (lowercased); names without an
/// extension get none.
///
/// ```
/// use tavern_common::generate_file_name;
///
/// assert_eq!(generate_file_name("c1", "s9", "foo.mp3"), "campaignc1Sessions9.mp3");
/// assert_eq!(generate_file_name("c1", "s9", "Table Talk.M4A"), "campaignc1Sessions9.m4a");
/// ```
pub fn generate_file_name(campaign_id: &str, session_id: &str, original_name: &str) -> String {
    let stem = format!("campaign{}Session{}", campaign_id, session_id);
    match extension(original_name) {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem,
    }
}

/// Name of the transcript object the processing function writes for a session
pub fn transcription_file_name(campaign_id: &str, session_id: &str) -> String {
    format!("campaign{}Session{}.json", campaign_id, session_id)
}

/// Content type from a file extension, for objects uploaded without one
pub fn content_type_for(file_name: &str) -> &'static str {
    match extension(file_name).as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("m4a") | Some("mp4") => "audio/mp4",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("webm") => "audio/webm",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

fn extension(name: &str) -> Option<String> {
    let file = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let (stem, ext) = file.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_file_name_shape() {
        let name = generate_file_name("abc", "123", "foo.mp3");
        assert_eq!(name, "campaignabcSession123.mp3");

        // Deterministic
        assert_eq!(name, generate_file_name("abc", "123", "foo.mp3"));
    }

    #[test]
    fn test_generate_file_name_uses_last_extension() {
        assert_eq!(
            generate_file_name("a", "b", "session.backup.wav"),
            "campaignaSessionb.wav"
        );
    }

    #[test]
    fn test_generate_file_name_without_extension() {
        assert_eq!(generate_file_name("a", "b", "recording"), "campaignaSessionb");
        assert_eq!(generate_file_name("a", "b", ".hidden"), "campaignaSessionb");
        assert_eq!(generate_file_name("a", "b", "trailing."), "campaignaSessionb");
    }

    #[test]
    fn test_generate_file_name_ignores_directories() {
        assert_eq!(
            generate_file_name("a", "b", "/home/gm/dir.v2/night1.flac"),
            "campaignaSessionb.flac"
        );
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("a.MP3"), "audio/mpeg");
        assert_eq!(content_type_for("transcript.json"), "application/json");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }

    #[test]
    fn test_transcription_file_name() {
        assert_eq!(transcription_file_name("a", "b"), "campaignaSessionb.json");
    }
}
