use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use bouncer::chat::Attachment;
use bouncer::fetch::file_url;
use log::{debug, info, warn};
use walkdir::WalkDir;

/// Extensions picked up when a directory is given as input
const MEDIA_EXTENSIONS: &[&str] = &["mkv", "mp4", "m4v", "avi", "mov", "webm"];

/// Turn command-line inputs into attachments.
///
/// URLs pass through as-is, files become `file://` attachments, and directories
/// are walked for media files.
pub fn collect_attachments(inputs: &[String]) -> Result<Vec<Attachment>> {
    let mut attachments = Vec::new();

    for input in inputs {
        if input.starts_with("http://") || input.starts_with("https://") {
            let name = url_file_name(input);
            attachments.push(Attachment {
                content_type: guess_content_type(Path::new(&name)),
                name,
                url: input.clone(),
            });
            continue;
        }

        let path = std::fs::canonicalize(input).with_context(|| format!("Input not found: {}", input))?;
        if path.is_dir() {
            let found = scan_directory(&path);
            info!("Found {} media file(s) in {}", found.len(), path.display());
            for file in found {
                attachments.push(local_attachment(&file)?);
            }
        } else {
            attachments.push(local_attachment(&path)?);
        }
    }

    Ok(attachments)
}

fn local_attachment(path: &Path) -> Result<Attachment> {
    let url = file_url(path).with_context(|| format!("Cannot build a file URL for {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    Ok(Attachment {
        content_type: guess_content_type(path),
        name,
        url,
    })
}

/// Media files under `root`, sorted by path
fn scan_directory(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let is_media = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| MEDIA_EXTENSIONS.contains(&s.to_lowercase().as_str()))
            .unwrap_or(false);
        if is_media {
            debug!("Found media file: {}", path.display());
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    files
}

/// MIME type from the file extension, the way an upload would be labelled
fn guess_content_type(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let mime = match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        _ => return None,
    };
    Some(mime.to_string())
}

/// Last path segment of a URL, without query or fragment
fn url_file_name(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    match without_query.trim_end_matches('/').rsplit_once('/') {
        Some((_, name)) if !name.is_empty() && !name.contains(':') => name.to_string(),
        _ => "download".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_file_name() {
        assert_eq!(url_file_name("https://cdn.example/a/b/clip.mp4?ex=1#t"), "clip.mp4");
        assert_eq!(url_file_name("https://cdn.example/"), "download");
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type(Path::new("a.MKV")).as_deref(), Some("video/x-matroska"));
        assert_eq!(guess_content_type(Path::new("a.png")).as_deref(), Some("image/png"));
        assert_eq!(guess_content_type(Path::new("a.txt")), None);
        assert_eq!(guess_content_type(Path::new("noext")), None);
    }

    #[test]
    fn test_directory_inputs_keep_only_media() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        for name in ["b.mp4", "a.MOV", "notes.txt", "nested/c.webm"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let inputs = vec![dir.path().to_string_lossy().to_string()];
        let attachments = collect_attachments(&inputs).unwrap();
        let names: Vec<&str> = attachments.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a.MOV", "b.mp4", "c.webm"]);
        assert!(attachments.iter().all(|a| a.url.starts_with("file://") && a.is_video()));
    }

    #[test]
    fn test_explicit_file_keeps_its_type() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("cat.png");
        std::fs::write(&image, b"x").unwrap();

        let attachments = collect_attachments(&[image.to_string_lossy().to_string()]).unwrap();
        assert_eq!(attachments.len(), 1);
        assert!(!attachments[0].is_video());
    }

    #[test]
    fn test_missing_input_is_an_error() {
        assert!(collect_attachments(&["/definitely/not/here.mp4".to_string()]).is_err());
    }
}
