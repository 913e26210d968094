//! File tree: folder and file nodes owned by a storage.
//!
//! Nodes form a forest per storage whose top level hangs off the
//! [`ROOT_FOLDER_ID`] sentinel. Deleted nodes keep their row with a
//! `deleted_at` marker and are invisible to every query here.

mod naming;
mod repository;

pub use naming::{add_index_to_filename, extension, validate_name, MAX_NAME_LENGTH};
pub use repository::TreeRepository;

use serde::Serialize;

/// Parent id of top-level nodes.
pub const ROOT_FOLDER_ID: i64 = 0;

/// Kind of a node, derived from the extension for files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Folder = 0,
    Music = 1,
    Video = 2,
    Document = 3,
    Picture = 4,
    Other = 5,
}

impl FileType {
    /// Classify a file by its name's extension.
    pub fn from_name(name: &str) -> Self {
        match extension(name).as_deref() {
            Some("txt" | "doc" | "docx" | "html" | "pdf" | "xls" | "xlsx" | "ppt" | "pptx" | "md") => {
                FileType::Document
            }
            Some(
                "bmp" | "gif" | "jpg" | "jpeg" | "png" | "svg" | "tiff" | "psd" | "raw" | "eps",
            ) => FileType::Picture,
            Some(
                "avi" | "mov" | "mkv" | "asf" | "rmvb" | "mpeg" | "wmv" | "mp4" | "ts" | "flv",
            ) => FileType::Video,
            Some("mp3" | "wma" | "wav" | "aac" | "flac" | "ape" | "aiff" | "ogg") => FileType::Music,
            _ => FileType::Other,
        }
    }

    /// Decode the stored discriminant.
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(FileType::Folder),
            1 => Some(FileType::Music),
            2 => Some(FileType::Video),
            3 => Some(FileType::Document),
            4 => Some(FileType::Picture),
            5 => Some(FileType::Other),
            _ => None,
        }
    }

    /// Stored discriminant.
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    /// Display name.
    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Folder => "folder",
            FileType::Music => "music",
            FileType::Video => "video",
            FileType::Document => "document",
            FileType::Picture => "picture",
            FileType::Other => "other",
        }
    }

    /// All types, folders first.
    pub fn all() -> [FileType; 6] {
        [
            FileType::Folder,
            FileType::Music,
            FileType::Video,
            FileType::Document,
            FileType::Picture,
            FileType::Other,
        ]
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live folder or file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileNode {
    /// Unique node ID; increases with creation order.
    pub id: i64,
    /// Owning storage.
    pub storage_id: i64,
    /// Parent folder, or `ROOT_FOLDER_ID`.
    pub father_id: i64,
    /// Name, unique among live siblings.
    pub name: String,
    /// Node kind.
    pub file_type: FileType,
    /// Referenced blob (`None` for folders).
    pub blob_id: Option<i64>,
    /// Size of the referenced blob; 0 for folders.
    pub size: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl FileNode {
    /// Whether this node is a folder.
    pub fn is_folder(&self) -> bool {
        self.file_type == FileType::Folder
    }
}

/// Data for inserting a node.
#[derive(Debug, Clone)]
pub struct NewFileNode {
    pub storage_id: i64,
    pub father_id: i64,
    pub name: String,
    pub file_type: FileType,
    pub blob_id: Option<i64>,
}

impl NewFileNode {
    /// A folder under `father_id`.
    pub fn folder(storage_id: i64, father_id: i64, name: impl Into<String>) -> Self {
        Self {
            storage_id,
            father_id,
            name: name.into(),
            file_type: FileType::Folder,
            blob_id: None,
        }
    }

    /// A file referencing `blob_id`; the type comes from the name.
    pub fn file(storage_id: i64, father_id: i64, name: impl Into<String>, blob_id: i64) -> Self {
        let name = name.into();
        Self {
            storage_id,
            father_id,
            file_type: FileType::from_name(&name),
            name,
            blob_id: Some(blob_id),
        }
    }
}

/// The only field a rename may change.
#[derive(Debug, Clone)]
pub struct RenamePatch {
    pub name: String,
}

/// The only field a move may change.
#[derive(Debug, Clone, Copy)]
pub struct MovePatch {
    pub father_id: i64,
}
