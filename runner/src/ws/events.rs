//! Inbound event payloads for the editor protocol.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct FetchDirRequest {
    #[serde(default)]
    pub dir: String,
}

#[derive(Debug, Deserialize)]
pub struct FetchContentRequest {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateContentRequest {
    pub path: String,
    pub patch: String,
}

#[derive(Debug, Deserialize)]
pub struct TerminalInputRequest {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct TerminalResizeRequest {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Deserialize)]
pub struct CreateFileRequest {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateFolderRequest {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    #[serde(rename = "oldPath")]
    pub old_path: String,
    #[serde(rename = "newPath")]
    pub new_path: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct CopyRequest {
    #[serde(rename = "sourcePath")]
    pub source_path: String,
    #[serde(rename = "targetPath")]
    pub target_path: String,
}

#[derive(Debug, Deserialize)]
pub struct CutRequest {
    #[serde(rename = "sourcePath")]
    pub source_path: String,
}

#[derive(Debug, Deserialize)]
pub struct PasteRequest {
    #[serde(rename = "targetPath")]
    pub target_path: String,
}
