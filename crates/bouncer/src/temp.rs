use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use log::{debug, warn};

const DOWNLOADS_DIR: &str = "downloads";
const OUTPUT_DIR: &str = "output";
const RENDER_DIR: &str = "render";

/// Extension of every rendered output
pub const OUTPUT_EXTENSION: &str = "webm";

/// Scratch tree shared by all jobs of a process.
///
/// Created once at startup and handed to whoever needs scratch space; each job
/// only ever touches the files and render directory it reserved itself.
#[derive(Debug, Clone)]
pub struct TempRoot {
    root: PathBuf,
}

impl TempRoot {
    /// Create `root` and its `downloads/`, `output/` and `render/` children
    pub fn init(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        for dir in [DOWNLOADS_DIR, OUTPUT_DIR, RENDER_DIR] {
            std::fs::create_dir_all(root.join(dir))?;
        }
        // Concat manifests resolve relative entries against their own directory
        let root = std::fs::canonicalize(&root)?;
        debug!("Temp root ready at {}", root.display());
        Ok(TempRoot { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join(DOWNLOADS_DIR)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(OUTPUT_DIR)
    }

    pub fn render_dir(&self) -> PathBuf {
        self.root.join(RENDER_DIR)
    }

    /// Claim a collision-free download file for an attachment name
    pub fn reserve_download(&self, attachment_name: &str) -> io::Result<(String, PathBuf)> {
        reserve_unique(&base_name(attachment_name), &self.downloads_dir())
    }

    /// Claim a collision-free `.webm` output file for a logical output name
    pub fn reserve_output(&self, logical_name: &str) -> io::Result<(String, PathBuf)> {
        reserve_unique(&output_file_name(&base_name(logical_name)), &self.output_dir())
    }

    /// Create an empty render workspace for one job under `render/`
    pub async fn render_workspace(&self, name: &str) -> io::Result<RenderWorkspace> {
        let render_dir = self.render_dir();
        tokio::fs::create_dir_all(&render_dir).await?;

        // create_dir (not _all) fails on an existing directory, so a name is never shared
        let mut attempt = 0;
        let root = loop {
            let candidate = render_dir.join(numbered_name(&sanitize_file_name(name), attempt));
            match tokio::fs::create_dir(&candidate).await {
                Ok(()) => break candidate,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e),
            }
        };

        let workspace = RenderWorkspace::at(root);
        tokio::fs::create_dir(&workspace.files_dir).await?;
        tokio::fs::create_dir(&workspace.frames_dir).await?;
        tokio::fs::create_dir(&workspace.resized_dir).await?;
        debug!("Render workspace created: {}", workspace.root.display());
        Ok(workspace)
    }
}

/// Per-job working directory with the fixed layout the pipeline writes into
#[derive(Debug, Clone)]
pub struct RenderWorkspace {
    pub root: PathBuf,
    pub files_dir: PathBuf,
    pub audio_file: PathBuf,
    pub concat_list: PathBuf,
    pub frames_dir: PathBuf,
    pub resized_dir: PathBuf,
}

impl RenderWorkspace {
    fn at(root: PathBuf) -> Self {
        RenderWorkspace {
            files_dir: root.join("tempFiles"),
            audio_file: root.join("tempAudio.webm"),
            concat_list: root.join("tempConcatList.txt"),
            frames_dir: root.join("tempFrames"),
            resized_dir: root.join("tempResizedFrames"),
            root,
        }
    }

    /// Decoder output pattern, one PNG per frame
    pub fn frame_pattern(&self) -> PathBuf {
        self.frames_dir.join("%d.png")
    }

    /// Recursively delete the workspace. Failures are logged, never returned.
    pub async fn remove(&self) {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!("Removed render workspace {}", self.root.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove render workspace {}: {}", self.root.display(), e),
        }
    }
}

/// `name` with a counter spliced in before its extension ("clip.mp4", 1 -> "clip.1.mp4").
/// Counter 0 is the name itself; names without a dot get the counter appended ("clip1").
pub fn numbered_name(name: &str, count: u32) -> String {
    if count == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) => format!("{}.{}.{}", stem, count, ext),
        None => format!("{}{}", name, count),
    }
}

/// First numbered variant of `name` that does not exist in `dir`
pub fn unique_name(name: &str, dir: &Path) -> (String, PathBuf) {
    let mut count = 0;
    loop {
        let file_name = numbered_name(name, count);
        let path = dir.join(&file_name);
        if !path.exists() {
            return (file_name, path);
        }
        count += 1;
    }
}

/// Like `unique_name`, but atomically creates the empty file so concurrent jobs
/// can never be handed the same path
pub fn reserve_unique(name: &str, dir: &Path) -> io::Result<(String, PathBuf)> {
    let mut count = 0;
    loop {
        let file_name = numbered_name(name, count);
        let path = dir.join(&file_name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => return Ok((file_name, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => count += 1,
            Err(e) => return Err(e),
        }
    }
}

/// Logical output name with its last extension replaced by `.webm`
pub fn output_file_name(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{}.{}", stem, OUTPUT_EXTENSION),
        _ => format!("{}.{}", name, OUTPUT_EXTENSION),
    }
}

/// Last path component of a user-supplied name, otherwise untouched.
/// Names that would resolve to a directory become "file".
pub fn base_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    if base.trim_matches('.').is_empty() {
        "file".to_string()
    } else {
        base.to_string()
    }
}

/// Reduce a user-supplied name to a single ASCII-only path component
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}
