//! Typed client for the runner RPC surface.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::types::*;

/// Transport-level RPC failures. Domain errors are carried in the response
/// bodies instead and never surface here.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rpc call {method} returned status {status}")]
    Status {
        method: String,
        status: reqwest::StatusCode,
    },
}

/// Client for a single runner's RPC surface.
#[derive(Debug, Clone)]
pub struct ReplClient {
    http: reqwest::Client,
    base_url: String,
}

impl ReplClient {
    /// Create a client for the runner at `base_url` (e.g. `http://localhost:8081`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn call<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/api/v1/rpc/{}", self.base_url, method);
        let response = self.http.post(url).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Status {
                method: method.to_string(),
                status,
            });
        }
        Ok(response.json().await?)
    }

    pub async fn read_file(&self, req: &ReadFileRequest) -> Result<ReadFileResponse, RpcError> {
        self.call("ReadFile", req).await
    }

    pub async fn write_file(&self, req: &WriteFileRequest) -> Result<FileActionResponse, RpcError> {
        self.call("WriteFile", req).await
    }

    pub async fn list_files(&self, req: &ListFilesRequest) -> Result<ListFilesResponse, RpcError> {
        self.call("ListFiles", req).await
    }

    pub async fn create_file(&self, req: &CreateFileRequest) -> Result<FileActionResponse, RpcError> {
        self.call("CreateFile", req).await
    }

    pub async fn create_folder(
        &self,
        req: &CreateFolderRequest,
    ) -> Result<FileActionResponse, RpcError> {
        self.call("CreateFolder", req).await
    }

    pub async fn delete(&self, req: &DeleteRequest) -> Result<FileActionResponse, RpcError> {
        self.call("Delete", req).await
    }

    pub async fn rename(&self, req: &RenameRequest) -> Result<FileActionResponse, RpcError> {
        self.call("Rename", req).await
    }

    pub async fn copy(&self, req: &CopyRequest) -> Result<FileActionResponse, RpcError> {
        self.call("Copy", req).await
    }

    pub async fn execute_command(
        &self,
        req: &ExecuteCommandRequest,
    ) -> Result<ExecuteCommandResponse, RpcError> {
        self.call("ExecuteCommand", req).await
    }

    pub async fn create_terminal(
        &self,
        req: &CreateTerminalRequest,
    ) -> Result<CreateTerminalResponse, RpcError> {
        self.call("CreateTerminal", req).await
    }

    pub async fn send_to_terminal(
        &self,
        req: &SendToTerminalRequest,
    ) -> Result<TerminalActionResponse, RpcError> {
        self.call("SendToTerminal", req).await
    }

    pub async fn close_terminal(
        &self,
        req: &CloseTerminalRequest,
    ) -> Result<TerminalActionResponse, RpcError> {
        self.call("CloseTerminal", req).await
    }
}
