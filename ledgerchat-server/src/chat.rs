//! Chat turn orchestration
//!
//! One turn: ensure the conversation, persist the user message, replay
//! history to the completion endpoint, forward reply fragments to the
//! client, persist the final (or partial) assistant reply.

use std::sync::Arc;

use futures::Stream;
use ledgerchat_core::completion::ChatMessage;
use ledgerchat_core::models::{Message, Role};
use ledgerchat_core::store::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::http::{completion_error_message, store_error_message, HttpState};

/// System prompt sent with every completion call; never persisted.
const SYSTEM_PROMPT: &str = "You are Ledgerchat, an assistant for expense documents. \
Answer questions about uploaded receipts, invoices and expense reports; calculate totals, \
break expenses into categories, and flag anything unusual. When the conversation contains \
extracted document text, ground your answers in that text. Be concise.";

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
}

/// Events emitted over the SSE channel for one turn.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TurnEvent {
    Delta {
        delta: String,
    },
    Done {
        done: bool,
        conversation_id: Uuid,
        message_id: i64,
    },
    Error {
        error: String,
        partial_saved: bool,
    },
}

/// Wire messages for one completion call: system prompt plus the stored
/// history in insertion order.
pub fn build_prompt(history: &[Message]) -> Vec<ChatMessage> {
    let mut prompt = Vec::with_capacity(history.len() + 1);
    prompt.push(ChatMessage::system(SYSTEM_PROMPT));
    for message in history {
        prompt.push(ChatMessage {
            role: message.role.into(),
            content: message.content.clone(),
        });
    }
    prompt
}

/// Run one chat turn, yielding [`TurnEvent`]s as the reply streams in.
///
/// The returned stream ends after a `Done` or `Error` event. If the consumer
/// drops the stream mid-reply, the turn task notices on its next send, stops
/// pulling fragments, and releases the upstream connection; the abandoned
/// partial text is not persisted.
pub async fn stream_turn(
    state: Arc<HttpState>,
    request: ChatRequest,
) -> impl Stream<Item = TurnEvent> {
    let (tx, rx) = mpsc::channel::<TurnEvent>(32);
    tokio::spawn(run_turn(state, request, tx));

    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    })
}

async fn run_turn(state: Arc<HttpState>, request: ChatRequest, tx: mpsc::Sender<TurnEvent>) {
    let setup = async {
        let conversation = state
            .store
            .ensure_conversation(&request.session_id, json!({}))
            .await?;
        state
            .store
            .append_message(conversation.id, Role::User, &request.message, None)
            .await?;
        let history = state
            .store
            .load_history(conversation.id, Some(state.config.chat.history_limit))
            .await?;
        Ok::<_, StoreError>((conversation, build_prompt(&history)))
    }
    .await;

    let (conversation, prompt) = match setup {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %e, session_id = %request.session_id, "chat turn setup failed");
            let _ = tx
                .send(TurnEvent::Error {
                    error: store_error_message(&e),
                    partial_saved: false,
                })
                .await;
            return;
        }
    };

    let mut stream = match state.completions.complete_streaming(&prompt).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, conversation_id = %conversation.id, "completion request failed");
            let _ = tx
                .send(TurnEvent::Error {
                    error: completion_error_message(&e),
                    partial_saved: false,
                })
                .await;
            return;
        }
    };

    while let Some(fragment) = stream.next_fragment().await {
        match fragment {
            Ok(delta) => {
                if tx.send(TurnEvent::Delta { delta }).await.is_err() {
                    tracing::debug!(
                        conversation_id = %conversation.id,
                        "client disconnected mid-stream, dropping completion"
                    );
                    return;
                }
            }
            Err(failure) => {
                tracing::error!(
                    error = %failure.error,
                    partial_chars = failure.partial.len(),
                    conversation_id = %conversation.id,
                    "completion stream failed mid-reply"
                );
                // A partial reply the user already saw is worth keeping;
                // losing it silently would be worse than a truncated row.
                let partial_saved = if failure.partial.is_empty() {
                    false
                } else {
                    match state
                        .store
                        .append_message(conversation.id, Role::Assistant, &failure.partial, None)
                        .await
                    {
                        Ok(_) => true,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to persist partial reply");
                            false
                        }
                    }
                };
                let _ = tx
                    .send(TurnEvent::Error {
                        error: completion_error_message(&failure.error),
                        partial_saved,
                    })
                    .await;
                return;
            }
        }
    }

    let reply = stream.emitted().to_string();
    if reply.is_empty() {
        // never render a blank assistant turn as success
        let _ = tx
            .send(TurnEvent::Error {
                error: "The assistant returned an empty reply. Please try again.".to_string(),
                partial_saved: false,
            })
            .await;
        return;
    }

    match state
        .store
        .append_message(conversation.id, Role::Assistant, &reply, None)
        .await
    {
        Ok(message) => {
            let _ = tx
                .send(TurnEvent::Done {
                    done: true,
                    conversation_id: conversation.id,
                    message_id: message.id,
                })
                .await;
        }
        Err(e) => {
            tracing::error!(error = %e, conversation_id = %conversation.id, "failed to persist assistant reply");
            let _ = tx
                .send(TurnEvent::Error {
                    error: store_error_message(&e),
                    partial_saved: false,
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(id: i64, role: Role, content: &str) -> Message {
        Message {
            id,
            conversation_id: Uuid::new_v4(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
            attachment: None,
        }
    }

    #[test]
    fn prompt_starts_with_system_and_preserves_order() {
        let history = vec![
            message(1, Role::User, "total?"),
            message(2, Role::Assistant, "$42"),
            message(3, Role::User, "and the tip?"),
        ];
        let prompt = build_prompt(&history);

        assert_eq!(prompt.len(), 4);
        assert_eq!(
            serde_json::to_value(&prompt[0]).unwrap()["role"],
            "system"
        );
        assert_eq!(prompt[1].content, "total?");
        assert_eq!(prompt[2].content, "$42");
        assert_eq!(prompt[3].content, "and the tip?");
    }

    #[test]
    fn turn_events_serialize_to_flat_json() {
        let delta = serde_json::to_value(TurnEvent::Delta {
            delta: "Hel".to_string(),
        })
        .unwrap();
        assert_eq!(delta["delta"], "Hel");

        let done = serde_json::to_value(TurnEvent::Done {
            done: true,
            conversation_id: Uuid::new_v4(),
            message_id: 7,
        })
        .unwrap();
        assert_eq!(done["done"], true);
        assert_eq!(done["message_id"], 7);

        let error = serde_json::to_value(TurnEvent::Error {
            error: "nope".to_string(),
            partial_saved: true,
        })
        .unwrap();
        assert_eq!(error["error"], "nope");
        assert_eq!(error["partial_saved"], true);
    }
}
