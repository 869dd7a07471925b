//! JSON file storage with atomic replace-on-write

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tokio::fs;

/// Load a JSON document, `None` if the file does not exist yet.
/// A file that exists but cannot be read or parsed is an error.
pub async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, std::io::Error> {
    match fs::read_to_string(path).await {
        Ok(contents) => serde_json::from_str::<T>(&contents)
            .map(Some)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No file found at {:?}, starting fresh", path);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Save a JSON document atomically
#[allow(clippy::missing_errors_doc)]
pub async fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), std::io::Error> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let json = serde_json::to_string_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    // Write to a temp file, then rename over the target
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &json).await?;
    fs::rename(&tmp_path, path).await?;

    tracing::debug!("Saved {:?}", path);
    Ok(())
}
