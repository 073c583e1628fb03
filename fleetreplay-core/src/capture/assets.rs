//! Side-channel assets referenced by captured payloads
//!
//! Building maps point at floor-plan images served from the gateway cache
//! (`http://host/cache/building/L1.png`). Capturing resolves each URL to its
//! local cache file and tags the image with `_captured_file`; the files
//! themselves are copied next to the session file only at save time.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

/// Tag added to image records whose file was found locally
pub const CAPTURED_FILE_TAG: &str = "_captured_file";

/// URL path segment that marks a cached asset
const CACHE_SEGMENT: &str = "cache";

/// Filename -> local source path
pub type AssetManifest = BTreeMap<String, PathBuf>;

/// Scan a building map for image references and resolve them under
/// `cache_dir`.
///
/// Returns the rewritten payload and the assets that exist locally. Missing
/// files are logged and left untagged.
pub async fn scan_building_map(mut data: Value, cache_dir: &Path) -> (Value, AssetManifest) {
    let mut found = AssetManifest::new();

    let Some(levels) = data.get_mut("levels").and_then(Value::as_array_mut) else {
        return (data, found);
    };

    for level in levels.iter_mut() {
        let Some(images) = level.get_mut("images").and_then(Value::as_array_mut) else {
            continue;
        };

        for image in images.iter_mut() {
            let Some(url) = image.get("data").and_then(Value::as_str) else {
                continue;
            };
            let Some((rel_path, filename)) = cache_reference(url) else {
                continue;
            };

            let source = cache_dir.join(&rel_path);
            if tokio::fs::try_exists(&source).await.unwrap_or(false) {
                tracing::info!(file = %filename, "Captured map image");
                if let Some(obj) = image.as_object_mut() {
                    obj.insert(CAPTURED_FILE_TAG.to_string(), Value::String(filename.clone()));
                }
                found.insert(filename, source);
            } else {
                tracing::warn!(path = %source.display(), "Cached asset file missing");
            }
        }
    }

    (data, found)
}

/// Split an asset URL into its path below `/cache/` and its filename.
fn cache_reference(raw: &str) -> Option<(PathBuf, String)> {
    if !raw.starts_with("http") {
        return None;
    }
    let url = Url::parse(raw).ok()?;
    let segments: Vec<&str> = url.path_segments()?.collect();
    let idx = segments.iter().position(|s| *s == CACHE_SEGMENT)?;
    let rest = &segments[idx + 1..];
    let filename = rest.last().filter(|f| !f.is_empty())?.to_string();
    let rel_path: PathBuf = rest.iter().collect();
    Some((rel_path, filename))
}

/// Copy recorded assets into `dest_dir`.
///
/// Per-file failures are logged and skipped. Returns the filenames copied.
pub async fn copy_assets(manifest: &AssetManifest, dest_dir: &Path) -> Vec<String> {
    if let Err(e) = tokio::fs::create_dir_all(dest_dir).await {
        tracing::error!(dir = %dest_dir.display(), error = %e, "Cannot create asset directory");
        return Vec::new();
    }

    let mut copied = Vec::new();
    for (filename, source) in manifest {
        let dest = dest_dir.join(filename);
        match tokio::fs::copy(source, &dest).await {
            Ok(_) => {
                tracing::info!(path = %dest.display(), "Saved asset");
                copied.push(filename.clone());
            }
            Err(e) => {
                tracing::error!(source = %source.display(), error = %e, "Asset copy failed");
            }
        }
    }
    copied
}

/// Directory assets of `session_file` live in: `<parent>/<stem>_images`
pub fn assets_dir_for(session_file: &Path) -> PathBuf {
    let stem = session_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "captured_data".to_string());
    session_file
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{}_images", stem))
}
