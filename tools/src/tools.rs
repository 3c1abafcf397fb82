//! Tool catalog: every tool unmarshals its arguments, forwards to the
//! runner over RPC, and renders the result as text. Transport and domain
//! failures both surface as error payloads with readable text.

use codepod_proto::*;
use rmcp::handler::server::router::tool::ToolRouter;
use std::future::Future;
use rmcp::handler::server::tool::Parameters;
use rmcp::model::{CallToolResult, Content, ServerCapabilities, ServerInfo};
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Clone)]
pub struct ReplTools {
    client: ReplClient,
    tool_router: ToolRouter<Self>,
}

fn text(content: impl Into<String>) -> CallToolResult {
    CallToolResult::success(vec![Content::text(content)])
}

fn error(content: impl Into<String>) -> CallToolResult {
    CallToolResult::error(vec![Content::text(content)])
}

/// Render a `{success, error?}` response, naming the action on failure.
fn render_action(
    action: &str,
    result: Result<FileActionResponse, RpcError>,
) -> CallToolResult {
    match result {
        Ok(response) if response.success => text(format!("{action} succeeded")),
        Ok(response) => error(format!(
            "Error during {action}: {}",
            response.error.unwrap_or_else(|| "unknown error".to_string())
        )),
        Err(err) => error(format!("Failed to {action}: {err}")),
    }
}

fn render_terminal_action(
    action: &str,
    result: Result<TerminalActionResponse, RpcError>,
) -> CallToolResult {
    match result {
        Ok(response) if response.success => text(format!("{action} succeeded")),
        Ok(response) => error(format!(
            "Error during {action}: {}",
            response.error.unwrap_or_else(|| "unknown error".to_string())
        )),
        Err(err) => error(format!("Failed to {action}: {err}")),
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PathArgs {
    /// Path relative to the workspace root
    pub path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteFileArgs {
    /// Path relative to the workspace root
    pub path: String,
    /// Content to write
    pub content: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListFilesArgs {
    /// Path to list, empty for the workspace root
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RenameArgs {
    /// Current path
    pub old_path: String,
    /// New path
    pub new_path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CopyArgs {
    /// Source path
    pub source_path: String,
    /// Target path
    pub target_path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteCommandArgs {
    /// Command to execute
    pub command: String,
    /// Working directory, relative to the workspace root
    #[serde(default)]
    pub working_dir: String,
    /// Seconds of output silence before the command is considered done
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateTerminalArgs {
    /// Optional name for the terminal session
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SendToTerminalArgs {
    /// Terminal session id
    pub session_id: String,
    /// Input to send
    pub input: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CloseTerminalArgs {
    /// Terminal session id
    pub session_id: String,
}

#[tool_router]
impl ReplTools {
    pub fn new(client: ReplClient) -> Self {
        Self {
            client,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(name = "ping", description = "Check that the tool server is reachable")]
    async fn ping(&self) -> CallToolResult {
        text("pong")
    }

    #[tool(
        name = "read_file",
        description = "Read the contents of a file in the workspace"
    )]
    async fn read_file(&self, Parameters(args): Parameters<PathArgs>) -> CallToolResult {
        match self
            .client
            .read_file(&ReadFileRequest { path: args.path })
            .await
        {
            Ok(response) => match (response.content, response.error) {
                (Some(content), _) => text(content),
                (None, Some(err)) => error(format!("Error reading file: {err}")),
                (None, None) => text(String::new()),
            },
            Err(err) => error(format!("Failed to read file: {err}")),
        }
    }

    #[tool(name = "write_file", description = "Write content to a file in the workspace")]
    async fn write_file(&self, Parameters(args): Parameters<WriteFileArgs>) -> CallToolResult {
        let result = self
            .client
            .write_file(&WriteFileRequest {
                path: args.path,
                content: args.content,
            })
            .await;
        render_action("write file", result)
    }

    #[tool(
        name = "list_files",
        description = "List files and directories in a given path"
    )]
    async fn list_files(&self, Parameters(args): Parameters<ListFilesArgs>) -> CallToolResult {
        match self
            .client
            .list_files(&ListFilesRequest { path: args.path })
            .await
        {
            Ok(response) => {
                if let Some(err) = response.error {
                    return error(format!("Error listing files: {err}"));
                }
                let listing = response
                    .files
                    .unwrap_or_default()
                    .into_iter()
                    .map(|file| {
                        let kind = if file.is_dir { "dir" } else { "file" };
                        format!("{}\t{}", file.name, kind)
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                text(listing)
            }
            Err(err) => error(format!("Failed to list files: {err}")),
        }
    }

//     #[tool(name = "create_file", description = "Create a new file in the workspace")]
//     async fn create_file(&self, Parameters(args): Parameters<PathArgs>) -> CallToolResult {
//         let result = self
//             .client
//             .create_file(&CreateFileRequest { path: args.path })
//             .await;
//         render_action("create file", result)
//     }
// 
//     #[tool(name = "create_folder", description = "Create a new folder in the workspace")]
//     async fn create_folder(&self, Parameters(args): Parameters<PathArgs>) -> CallToolResult {
//         let result = self
//             .client
//             .create_folder(&CreateFolderRequest { path: args.path })
//             .await;
//         render_action("create folder", result)
//     }

    #[tool(name = "delete", description = "Delete a file or folder from the workspace")]
    async fn delete(&self, Parameters(args): Parameters<PathArgs>) -> CallToolResult {
        let result = self.client.delete(&DeleteRequest { path: args.path }).await;
        render_action("delete", result)
    }

    #[tool(name = "rename", description = "Rename or move a file or folder")]
    async fn rename(&self, Parameters(args): Parameters<RenameArgs>) -> CallToolResult {
        let result = self
            .client
            .rename(&RenameRequest {
                old_path: args.old_path,
                new_path: args.new_path,
            })
            .await;
        render_action("rename", result)
    }

    #[tool(name = "copy", description = "Copy a file or folder")]
    async fn copy(&self, Parameters(args): Parameters<CopyArgs>) -> CallToolResult {
        let result = self
            .client
            .copy(&CopyRequest {
                source_path: args.source_path,
                target_path: args.target_path,
            })
            .await;
        render_action("copy", result)
    }

    #[tool(
        name = "execute_command",
        description = "Execute a command in the terminal and return the output"
    )]
    async fn execute_command(
        &self,
        Parameters(args): Parameters<ExecuteCommandArgs>,
    ) -> CallToolResult {
        match self
            .client
            .execute_command(&ExecuteCommandRequest {
                command: args.command,
                working_dir: args.working_dir,
                timeout_seconds: args.timeout.unwrap_or(30),
            })
            .await
        {
            Ok(response) => match (response.output, response.error) {
                (_, Some(err)) => error(format!("Error executing command: {err}")),
                (Some(output), None) => text(output),
                (None, None) => text(String::new()),
            },
            Err(err) => error(format!("Failed to execute command: {err}")),
        }
    }

    #[tool(
        name = "create_terminal",
        description = "Create a new persistent terminal session"
    )]
    async fn create_terminal(
        &self,
        Parameters(args): Parameters<CreateTerminalArgs>,
    ) -> CallToolResult {
        match self
            .client
            .create_terminal(&CreateTerminalRequest { name: args.name })
            .await
        {
            Ok(response) => match (response.session_id, response.error) {
                (Some(session_id), _) => {
                    text(format!("Terminal created with session ID: {session_id}"))
                }
                (None, Some(err)) => error(format!("Error creating terminal: {err}")),
                (None, None) => error("Error creating terminal: no session id returned"),
            },
            Err(err) => error(format!("Failed to create terminal: {err}")),
        }
    }

    #[tool(
        name = "send_to_terminal",
        description = "Send input to a persistent terminal session"
    )]
    async fn send_to_terminal(
        &self,
        Parameters(args): Parameters<SendToTerminalArgs>,
    ) -> CallToolResult {
        let result = self
            .client
            .send_to_terminal(&SendToTerminalRequest {
                session_id: args.session_id,
                input: args.input,
            })
            .await;
        render_terminal_action("send to terminal", result)
    }

    #[tool(name = "close_terminal", description = "Close a persistent terminal session")]
    async fn close_terminal(
        &self,
        Parameters(args): Parameters<CloseTerminalArgs>,
    ) -> CallToolResult {
        let result = self
            .client
            .close_terminal(&CloseTerminalRequest {
                session_id: args.session_id,
            })
            .await;
        render_terminal_action("close terminal", result)
    }
}

#[tool_handler]
impl ServerHandler for ReplTools {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Workspace file-system and terminal tools backed by a repl runtime".to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
