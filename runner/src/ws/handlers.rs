//! WebSocket upgrade handling and the editor event handlers.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::fsops::{self, FsError};
use crate::pty::{self, PtyConfig};
use crate::state::RunnerState;

use super::channel::{EventChannel, WireMessage, OUTBOUND_QUEUE_CAPACITY};
use super::events::*;

/// GET /api/v1/repl/ws
pub async fn ws_handler(
    State(state): State<Arc<RunnerState>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<RunnerState>) {
    let (mut sink, mut stream) = socket.split();

    let (tx, mut rx) = mpsc::channel::<WireMessage>(OUTBOUND_QUEUE_CAPACITY);
    let channel = EventChannel::new(tx);
    register_handlers(&channel, &state);

    // Writer task: drains the bounded outbound queue in enqueue order.
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(err) => {
                    warn!(%err, "failed to serialize outbound message");
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    state.shutdown.on_connection_established();
    info!("editor connected");
    channel.dispatch("connect", Value::Null);

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<WireMessage>(&text) {
                Ok(message) => {
                    channel.dispatch(&message.event, message.data.unwrap_or(Value::Null));
                }
                Err(err) => {
                    warn!(%err, "ignoring unparseable message");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(%err, "websocket read error");
                break;
            }
        }
    }

    channel.dispatch("disconnect", Value::Null);
    writer.abort();
    state.shutdown.on_connection_closed();
    info!("editor disconnected");
}

/// Run a filesystem operation off the async workers.
async fn run_fs<T>(task: impl FnOnce() -> Result<T, FsError> + Send + 'static) -> Result<T, FsError>
where
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(result) => result,
        Err(err) => Err(FsError::Io(std::io::Error::other(err))),
    }
}

fn register_handlers(channel: &Arc<EventChannel>, state: &Arc<RunnerState>) {
    {
        let emit = Arc::clone(channel);
        let state = Arc::clone(state);
        channel.on("connect", move |_| {
            let channel = Arc::clone(&emit);
            let root = state.workspace_root.clone();
            async move {
                match run_fs(move || fsops::fetch_dir(&root, "")).await {
                    Ok(contents) => {
                        let _ = channel.emit("Loaded", json!({ "rootContents": contents }));
                    }
                    Err(err) => {
                        warn!(%err, "failed to load workspace root");
                        let _ = channel
                            .emit("error", json!({ "message": "Failed to load directory" }));
                    }
                }
            }
        });
    }

    {
        let emit = Arc::clone(channel);
        let state = Arc::clone(state);
        channel.on_typed("fetchDir", move |req: FetchDirRequest| {
            let channel = Arc::clone(&emit);
            let root = state.workspace_root.clone();
            async move {
                let dir = req.dir.clone();
                match run_fs(move || fsops::fetch_dir(&root, &req.dir)).await {
                    Ok(contents) => {
                        let _ = channel.emit(
                            "fetchDirResponse",
                            json!({ "contents": contents, "path": dir }),
                        );
                    }
                    Err(err) => {
                        let _ = channel
                            .emit("fetchDirResponse", json!({ "error": err.to_string() }));
                    }
                }
            }
        });
    }

    {
        let emit = Arc::clone(channel);
        let state = Arc::clone(state);
        channel.on_typed("fetchContent", move |req: FetchContentRequest| {
            let channel = Arc::clone(&emit);
            let root = state.workspace_root.clone();
            async move {
                let path = req.path.clone();
                match run_fs(move || fsops::fetch_content(&root, &req.path)).await {
                    Ok(content) => {
                        let _ = channel.emit(
                            "fetchContentResponse",
                            json!({ "content": content, "path": path }),
                        );
                    }
                    Err(err) => {
                        let _ = channel
                            .emit("fetchContentResponse", json!({ "error": err.to_string() }));
                    }
                }
            }
        });
    }

    {
        let emit = Arc::clone(channel);
        let state = Arc::clone(state);
        channel.on_typed("updateContent", move |req: UpdateContentRequest| {
            let channel = Arc::clone(&emit);
            let root = state.workspace_root.clone();
            async move {
                match run_fs(move || fsops::save_file_diffs(&root, &req.path, &req.patch)).await
                {
                    Ok(()) => {
                        let _ = channel
                            .emit("updateContentResponse", json!({ "success": true }));
                    }
                    Err(err) => {
                        let _ = channel
                            .emit("updateContentResponse", json!({ "error": err.to_string() }));
                    }
                }
            }
        });
    }

    {
        let emit = Arc::clone(channel);
        let state = Arc::clone(state);
        channel.on("requestTerminal", move |_| {
            let channel = Arc::clone(&emit);
            let state = Arc::clone(&state);
            async move {
                let session_id = pty::generate_session_id();
                let config = PtyConfig {
                    working_dir: Some(state.workspace_root.clone()),
                    ..Default::default()
                };
                let session = match state.pty.create_session(&session_id, Some(config)) {
                    Ok(session) => session,
                    Err(err) => {
                        warn!(%err, "failed to create terminal session");
                        let _ = channel.emit(
                            "terminalError",
                            json!({ "error": "Failed to create terminal session" }),
                        );
                        return;
                    }
                };

                let _ = channel.emit("terminalConnected", json!({ "sessionId": session_id }));

                let data_channel = Arc::clone(&channel);
                session.set_on_data(move |data| {
                    let _ = data_channel
                        .emit("terminalResponse", String::from_utf8_lossy(data));
                });

                let close_channel = Arc::clone(&channel);
                let close_state = Arc::clone(&state);
                let close_id = session_id.clone();
                session.set_on_close(move || {
                    let _ = close_channel.emit("terminalClosed", Value::Null);
                    close_state.pty.remove_session(&close_id);
                });
            }
        });
    }

    {
        let state = Arc::clone(state);
        channel.on_typed("terminalInput", move |req: TerminalInputRequest| {
            let state = Arc::clone(&state);
            async move {
                let Some(session) = state.pty.get_session(&req.session_id) else {
                    return;
                };
                if let Err(err) = session.write_string(&req.data) {
                    debug!(%err, session_id = %req.session_id, "terminal input dropped");
                }
            }
        });
    }

    {
        let state = Arc::clone(state);
        channel.on_typed("terminalResize", move |req: TerminalResizeRequest| {
            let state = Arc::clone(&state);
            async move {
                let Some(session) = state.pty.get_session(&req.session_id) else {
                    return;
                };
                if let Err(err) = session.resize(req.cols, req.rows) {
                    debug!(%err, session_id = %req.session_id, "terminal resize failed");
                }
            }
        });
    }

    register_file_op_handlers(channel, state);
}

/// File-tree context-menu operations: create, rename, delete, copy, cut,
/// paste. Each answers on its own `<op>Response` event.
fn register_file_op_handlers(channel: &Arc<EventChannel>, state: &Arc<RunnerState>) {
    {
        let emit = Arc::clone(channel);
        let state = Arc::clone(state);
        channel.on_typed("createFile", move |req: CreateFileRequest| {
            let channel = Arc::clone(&emit);
            let root = state.workspace_root.clone();
            async move {
                let result = run_fs(move || fsops::create_file(&root, &req.path)).await;
                emit_op_response(&channel, "createFileResponse", result);
            }
        });
    }

    {
        let emit = Arc::clone(channel);
        let state = Arc::clone(state);
        channel.on_typed("createFolder", move |req: CreateFolderRequest| {
            let channel = Arc::clone(&emit);
            let root = state.workspace_root.clone();
            async move {
                let result = run_fs(move || fsops::create_folder(&root, &req.path)).await;
                emit_op_response(&channel, "createFolderResponse", result);
            }
        });
    }

    {
        let emit = Arc::clone(channel);
        let state = Arc::clone(state);
        channel.on_typed("rename", move |req: RenameRequest| {
            let channel = Arc::clone(&emit);
            let root = state.workspace_root.clone();
            async move {
                let result =
                    run_fs(move || fsops::rename(&root, &req.old_path, &req.new_path)).await;
                emit_op_response(&channel, "renameResponse", result);
            }
        });
    }

    {
        let emit = Arc::clone(channel);
        let state = Arc::clone(state);
        channel.on_typed("delete", move |req: DeleteRequest| {
            let channel = Arc::clone(&emit);
            let root = state.workspace_root.clone();
            async move {
                let result = run_fs(move || fsops::delete(&root, &req.path)).await;
                emit_op_response(&channel, "deleteResponse", result);
            }
        });
    }

    {
        let emit = Arc::clone(channel);
        let state = Arc::clone(state);
        channel.on_typed("copy", move |req: CopyRequest| {
            let channel = Arc::clone(&emit);
            let root = state.workspace_root.clone();
            async move {
                let result =
                    run_fs(move || fsops::copy(&root, &req.source_path, &req.target_path)).await;
                emit_op_response(&channel, "copyResponse", result);
            }
        });
    }

    {
        let emit = Arc::clone(channel);
        let state = Arc::clone(state);
        channel.on_typed("cut", move |req: CutRequest| {
            let channel = Arc::clone(&emit);
            let state = Arc::clone(&state);
            async move {
                let root = state.workspace_root.clone();
                let result = run_fs(move || fsops::cut(&root, &req.source_path)).await;
                match result {
                    Ok(marker) => {
                        *state.clipboard.lock().unwrap() = Some(marker);
                        let _ = channel.emit("cutResponse", json!({ "success": true }));
                    }
                    Err(err) => {
                        let _ = channel.emit("cutResponse", json!({ "error": err.to_string() }));
                    }
                }
            }
        });
    }

    {
        let emit = Arc::clone(channel);
        let state = Arc::clone(state);
        channel.on_typed("paste", move |req: PasteRequest| {
            let channel = Arc::clone(&emit);
            let state = Arc::clone(&state);
            async move {
                // The marker is consumed whether or not the paste succeeds.
                let marker = state.clipboard.lock().unwrap().take();
                let root = state.workspace_root.clone();
                let result =
                    run_fs(move || fsops::paste(&root, marker, &req.target_path)).await;
                emit_op_response(&channel, "pasteResponse", result);
            }
        });
    }
}

fn emit_op_response(channel: &EventChannel, event: &str, result: Result<(), FsError>) {
    match result {
        Ok(()) => {
            let _ = channel.emit(event, json!({ "success": true }));
        }
        Err(err) => {
            let _ = channel.emit(event, json!({ "error": err.to_string() }));
        }
    }
}
