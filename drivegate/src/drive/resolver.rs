//! Logical folder paths and their get-or-create resolution.

use super::{DriveApi, Result};
use crate::types::FolderId;
use tracing::{debug, instrument};

/// A slash-delimited folder path below the shared upload root.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FolderPath {
    segments: Vec<String>,
}

impl FolderPath {
    /// Split on `/`, dropping empty segments
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect(),
        }
    }

    /// `<root_folder>/<classroom_id>`, or `<root_folder>/<default_folder>` when there is no classroom
    pub fn for_upload(root_folder: &str, classroom_id: Option<&str>, default_folder: &str) -> Self {
        let leaf = classroom_id.filter(|c| !c.is_empty()).unwrap_or(default_folder);
        Self::parse(&format!("{root_folder}/{leaf}"))
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl std::fmt::Display for FolderPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

/// Walk `path` below `root`, reusing existing folders and creating missing ones.
///
/// Folders created before a failure are left in place; a retry finds and reuses them.
#[instrument(skip(drive), fields(path = %path), err)]
pub async fn resolve_folder(drive: &dyn DriveApi, root: &str, path: &FolderPath) -> Result<FolderId> {
    let mut current: FolderId = root.to_string();
    for segment in path.segments() {
        current = match drive.find_folder(segment, &current).await? {
            Some(existing) => existing,
            None => {
                let created = drive.create_folder(segment, &current).await?;
                debug!(%segment, folder_id = %created, "Created missing folder");
                created
            }
        };
    }
    Ok(current)
}
