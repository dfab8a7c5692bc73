//! Manages the WebSocket connection lifecycle for a training session.

use super::protocol::{ClientMessage, ServerMessage};
use crate::{
    models::{ResumeResponse, SessionStatus, TaskResponse},
    state::AppState,
};
use anyhow::{Context, Result, anyhow};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use simtrain_core::{
    EventReceiver, SessionEvent,
    resume::ResumeResolution,
    session::TrainingSession,
    throttle::Throttle,
    training::{TrainingState, TrainingStatus},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, instrument, warn};
use uuid::Uuid;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// A session that passed the `init` handshake, with the channels feeding the socket.
struct LiveSession {
    session_id: Uuid,
    session: TrainingSession,
    events: EventReceiver,
    frames: mpsc::UnboundedReceiver<String>,
    resume: ResumeResolution,
}

/// Entry point for a new connection: waits for `init`, resumes the stored
/// session and hands over to the session loop.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("New WebSocket connection. Awaiting initialization...");
    let (mut socket_tx, mut socket_rx) = socket.split();

    let init = match socket_rx.next().await {
        Some(Ok(Message::Text(text))) => parse_init(&text),
        Some(Ok(_)) => Err(anyhow!("First message was not a text `init` message.")),
        _ => {
            info!("Client disconnected before sending init message.");
            return;
        }
    };
    let live = match init {
        Ok(session_id) => start_session(&state, session_id).await,
        Err(e) => Err(e),
    };
    let live = match live {
        Ok(live) => live,
        Err(e) => {
            error!("Session initialization failed: {:?}", e);
            let _ = send_msg(
                &mut socket_tx,
                ServerMessage::Error {
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    };

    let sequence = live.session.sequence();
    let resume_task = sequence
        .get(live.resume.phase_index)
        .map(|task| task.name.clone())
        .unwrap_or_default();
    let initialized = ServerMessage::Initialized {
        session_id: live.session_id,
        resume: ResumeResponse::new(&live.resume, resume_task),
        training: live.session.training(),
        tasks: sequence
            .tasks()
            .iter()
            .enumerate()
            .map(|(index, task)| TaskResponse::new(index, task))
            .collect(),
    };
    if send_msg(&mut socket_tx, initialized).await.is_err() {
        error!("Failed to send Initialized message to client.");
        live.session.end();
        return;
    }

    let session_span = tracing::info_span!("training_runtime", session_id = %live.session_id);
    tokio::spawn(
        async move {
            let session_id = live.session_id;
            if let Err(e) = run_training_session(state, socket_tx, socket_rx, live).await {
                error!(error = ?e, %session_id, "Training session terminated with error.");
            }
            info!("Training session finished.");
        }
        .instrument(session_span),
    );
}

fn parse_init(text: &str) -> Result<Uuid> {
    match serde_json::from_str::<ClientMessage>(text).context("Malformed `init` message")? {
        ClientMessage::Init { session_id } => Ok(session_id),
        _ => Err(anyhow!("First message must be `init`")),
    }
}

/// Loads the stored session, resolves where to resume and applies it.
async fn start_session(state: &Arc<AppState>, session_id: Uuid) -> Result<LiveSession> {
    tracing::Span::current().record("session_id", tracing::field::display(session_id));

    let stored = state
        .db
        .find_session(session_id)
        .await?
        .context("Session not found")?;
    if stored.status == SessionStatus::Ended {
        return Err(anyhow!("Session has already ended"));
    }

    let (frame_tx, frames) = mpsc::unbounded_channel::<String>();
    let (session, events) = TrainingSession::new(state.sequence.clone(), Arc::new(frame_tx));
    let resume = session
        .resolve_from_store(&*state.db, session_id)
        .await?;
    session.apply_resume(&resume);
    info!(
        phase_index = resume.phase_index,
        is_from_start = resume.is_from_start,
        "Resuming training session"
    );

    Ok(LiveSession {
        session_id,
        session,
        events,
        frames,
        resume,
    })
}

/// The main event loop for an initialized socket.
///
/// Client messages drive the session; derived-state events are persisted and
/// forwarded, and outbound frames are relayed for the browser to write to the
/// simulation.
async fn run_training_session(
    state: Arc<AppState>,
    mut socket_tx: SplitSink<WebSocket, Message>,
    mut socket_rx: SplitStream<WebSocket>,
    live: LiveSession,
) -> Result<()> {
    let LiveSession {
        session_id,
        session,
        mut events,
        mut frames,
        resume,
    } = live;
    let explosion_level = session
        .explosion()
        .throttled_level(state.config.command_throttle);
    let mut last_saved = (!resume.is_from_start).then_some(resume.phase_index);

    let result: Result<()> = async {
        loop {
            tokio::select! {
                msg = socket_rx.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_client_text(&session, &explosion_level, &text) {
                            send_msg(&mut socket_tx, reply).await?;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => warn!("Ignoring binary message from client."),
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Client closed the connection.");
                        break;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Err(e)) => {
                        error!("Error receiving from client WebSocket: {:?}", e);
                        break;
                    }
                },
                Some(event) = events.recv() => {
                    if let SessionEvent::TrainingUpdated(training) = &event {
                        persist_progress(&state, session_id, training, &mut last_saved).await?;
                    }
                    send_msg(&mut socket_tx, event.into()).await?;
                },
                Some(frame) = frames.recv() => {
                    send_msg(&mut socket_tx, ServerMessage::OutboundFrame { frame }).await?;
                },
                else => break,
            }
        }
        Ok(())
    }
    .await;

    let answered = session.end();
    if let Err(e) = state
        .db
        .record_question_results(session_id, &answered)
        .await
    {
        error!(error = ?e, "Failed to record question results.");
    }
    info!("WebSocket connection closed and training session terminated.");
    result
}

/// Applies one client message to the session. Returns a reply for the client
/// when the message could not be applied.
fn handle_client_text(
    session: &TrainingSession,
    explosion_level: &Throttle<f64>,
    text: &str,
) -> Option<ServerMessage> {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed client message.");
            return Some(ServerMessage::Error {
                message: format!("Malformed message: {e}"),
            });
        }
    };

    match msg {
        ClientMessage::Init { .. } => warn!("Ignoring repeated `init` message."),
        ClientMessage::SimulationFrame { frame } => {
            if !session.ingest(&frame) {
                debug!(%frame, "Simulation frame dropped");
            }
        }
        ClientMessage::SetExplosionLevel { level } => explosion_level.call(level),
        ClientMessage::Explode => session.explosion().explode_building(),
        ClientMessage::Assemble => session.explosion().assemble_building(),
        ClientMessage::SubmitAnswer {
            question_id,
            answer,
        } => {
            if let Err(e) = session.questions().submit_answer(&question_id, &answer) {
                warn!(%question_id, error = %e, "Answer rejected");
                return Some(ServerMessage::Error {
                    message: e.to_string(),
                });
            }
        }
    }
    None
}

/// The task index to checkpoint for `training`, if it moved past what was last saved.
fn checkpoint_due(training: &TrainingState, last_saved: Option<usize>) -> Option<usize> {
    if training.status == TrainingStatus::NotStarted {
        return None;
    }
    let index = training.current_task_index;
    (last_saved != Some(index)).then_some(index)
}

async fn persist_progress(
    state: &AppState,
    session_id: Uuid,
    training: &TrainingState,
    last_saved: &mut Option<usize>,
) -> Result<()> {
    if let Some(index) = checkpoint_due(training, *last_saved) {
        let phase_index = i64::try_from(index).context("Task index out of range")?;
        state.db.save_checkpoint(session_id, phase_index).await?;
        *last_saved = Some(index);
        debug!(phase_index, "Checkpoint saved");
    }
    if training.status == TrainingStatus::Complete {
        state
            .db
            .update_session_status(session_id, SessionStatus::Ended)
            .await?;
        info!("Training complete. Session marked as ended.");
    }
    Ok(())
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
