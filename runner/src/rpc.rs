//! RPC surface for the tool adapter.
//!
//! JSON request/response under `/api/v1/rpc/<Method>`. Domain failures ride
//! in the response bodies; a handler never fails the transport.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use codepod_proto::*;
use tracing::debug;

use crate::fsops::{self, FsError};
use crate::pty::{self, PtyConfig};
use crate::state::RunnerState;

pub fn routes() -> Router<Arc<RunnerState>> {
    Router::new()
        .route("/ReadFile", post(read_file))
        .route("/WriteFile", post(write_file))
        .route("/ListFiles", post(list_files))
        .route("/CreateFile", post(create_file))
        .route("/CreateFolder", post(create_folder))
        .route("/Delete", post(delete))
        .route("/Rename", post(rename))
        .route("/Copy", post(copy))
        .route("/ExecuteCommand", post(execute_command))
        .route("/CreateTerminal", post(create_terminal))
        .route("/SendToTerminal", post(send_to_terminal))
        .route("/CloseTerminal", post(close_terminal))
}

async fn run_fs<T>(task: impl FnOnce() -> Result<T, FsError> + Send + 'static) -> Result<T, FsError>
where
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(result) => result,
        Err(err) => Err(FsError::Io(std::io::Error::other(err))),
    }
}

fn action_response(result: Result<(), FsError>) -> FileActionResponse {
    match result {
        Ok(()) => FileActionResponse::ok(),
        Err(err) => FileActionResponse::err(err.to_string()),
    }
}

async fn read_file(
    State(state): State<Arc<RunnerState>>,
    Json(req): Json<ReadFileRequest>,
) -> Json<ReadFileResponse> {
    let root = state.workspace_root.clone();
    let response = match run_fs(move || fsops::fetch_content(&root, &req.path)).await {
        Ok(content) => ReadFileResponse {
            content: Some(content),
            error: None,
        },
        Err(err) => ReadFileResponse {
            content: None,
            error: Some(err.to_string()),
        },
    };
    Json(response)
}

async fn write_file(
    State(state): State<Arc<RunnerState>>,
    Json(req): Json<WriteFileRequest>,
) -> Json<FileActionResponse> {
    let root = state.workspace_root.clone();
    Json(action_response(
        run_fs(move || fsops::save_file(&root, &req.path, &req.content)).await,
    ))
}

async fn list_files(
    State(state): State<Arc<RunnerState>>,
    Json(req): Json<ListFilesRequest>,
) -> Json<ListFilesResponse> {
    let root = state.workspace_root.clone();
    let response = match run_fs(move || fsops::fetch_dir(&root, &req.path)).await {
        Ok(files) => ListFilesResponse {
            files: Some(files),
            error: None,
        },
        Err(err) => ListFilesResponse {
            files: None,
            error: Some(err.to_string()),
        },
    };
    Json(response)
}

async fn create_file(
    State(state): State<Arc<RunnerState>>,
    Json(req): Json<CreateFileRequest>,
) -> Json<FileActionResponse> {
    let root = state.workspace_root.clone();
    Json(action_response(
        run_fs(move || fsops::create_file(&root, &req.path)).await,
    ))
}

async fn create_folder(
    State(state): State<Arc<RunnerState>>,
    Json(req): Json<CreateFolderRequest>,
) -> Json<FileActionResponse> {
    let root = state.workspace_root.clone();
    Json(action_response(
        run_fs(move || fsops::create_folder(&root, &req.path)).await,
    ))
}

async fn delete(
    State(state): State<Arc<RunnerState>>,
    Json(req): Json<DeleteRequest>,
) -> Json<FileActionResponse> {
    let root = state.workspace_root.clone();
    Json(action_response(
        run_fs(move || fsops::delete(&root, &req.path)).await,
    ))
}

async fn rename(
    State(state): State<Arc<RunnerState>>,
    Json(req): Json<RenameRequest>,
) -> Json<FileActionResponse> {
    let root = state.workspace_root.clone();
    Json(action_response(
        run_fs(move || fsops::rename(&root, &req.old_path, &req.new_path)).await,
    ))
}

async fn copy(
    State(state): State<Arc<RunnerState>>,
    Json(req): Json<CopyRequest>,
) -> Json<FileActionResponse> {
    let root = state.workspace_root.clone();
    Json(action_response(
        run_fs(move || fsops::copy(&root, &req.source_path, &req.target_path)).await,
    ))
}

/// Run a command in a transient PTY, aggregating output until it has been
/// quiet for the requested window or the shell exits.
async fn execute_command(
    State(state): State<Arc<RunnerState>>,
    Json(req): Json<ExecuteCommandRequest>,
) -> Json<ExecuteCommandResponse> {
    let working_dir = if req.working_dir.is_empty() {
        state.workspace_root.clone()
    } else {
        match fsops::resolve_path(&state.workspace_root, &req.working_dir) {
            Ok(dir) => dir,
            Err(err) => {
                return Json(ExecuteCommandResponse {
                    output: None,
                    error: Some(err.to_string()),
                })
            }
        }
    };

    let session_id = pty::generate_session_id();
    let config = PtyConfig {
        working_dir: Some(working_dir),
        ..Default::default()
    };
    let session = match state.pty.create_session(&session_id, Some(config)) {
        Ok(session) => session,
        Err(err) => {
            return Json(ExecuteCommandResponse {
                output: None,
                error: Some(err.to_string()),
            })
        }
    };

    let output = Arc::new(Mutex::new(String::new()));
    let last_output = Arc::new(Mutex::new(Instant::now()));

    let sink = Arc::clone(&output);
    let stamp = Arc::clone(&last_output);
    session.set_on_data(move |data| {
        sink.lock().unwrap().push_str(&String::from_utf8_lossy(data));
        *stamp.lock().unwrap() = Instant::now();
    });

    if let Err(err) = session.write_string(&format!("{}\n", req.command)) {
        state.pty.remove_session(&session_id);
        return Json(ExecuteCommandResponse {
            output: None,
            error: Some(err.to_string()),
        });
    }

    let quiet = Duration::from_secs(req.timeout_seconds.max(1));
    let mut done = session.done();
    loop {
        tokio::select! {
            changed = done.changed() => {
                if changed.is_err() || *done.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {
                if last_output.lock().unwrap().elapsed() >= quiet {
                    break;
                }
            }
        }
    }

    state.pty.remove_session(&session_id);
    let aggregated = output.lock().unwrap().clone();
    debug!(bytes = aggregated.len(), "execute_command finished");
    Json(ExecuteCommandResponse {
        output: Some(aggregated),
        error: None,
    })
}

async fn create_terminal(
    State(state): State<Arc<RunnerState>>,
    Json(_req): Json<CreateTerminalRequest>,
) -> Json<CreateTerminalResponse> {
    let session_id = pty::generate_session_id();
    let config = PtyConfig {
        working_dir: Some(state.workspace_root.clone()),
        ..Default::default()
    };
    let response = match state.pty.create_session(&session_id, Some(config)) {
        Ok(_) => CreateTerminalResponse {
            session_id: Some(session_id),
            error: None,
        },
        Err(err) => CreateTerminalResponse {
            session_id: None,
            error: Some(err.to_string()),
        },
    };
    Json(response)
}

async fn send_to_terminal(
    State(state): State<Arc<RunnerState>>,
    Json(req): Json<SendToTerminalRequest>,
) -> Json<TerminalActionResponse> {
    let Some(session) = state.pty.get_session(&req.session_id) else {
        return Json(TerminalActionResponse::err("session not found"));
    };
    let response = match session.write_string(&req.input) {
        Ok(()) => TerminalActionResponse::ok(),
        Err(err) => TerminalActionResponse::err(err.to_string()),
    };
    Json(response)
}

async fn close_terminal(
    State(state): State<Arc<RunnerState>>,
    Json(req): Json<CloseTerminalRequest>,
) -> Json<TerminalActionResponse> {
    if state.pty.get_session(&req.session_id).is_none() {
        return Json(TerminalActionResponse::err("session not found"));
    }
    state.pty.remove_session(&req.session_id);
    Json(TerminalActionResponse::ok())
}
