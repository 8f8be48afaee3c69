//! Supabase realtime: a Phoenix channel over a websocket, one socket per subscription.
//!
//! Only `postgres_changes` messages are forwarded. A server-side filter is only checked
//! against the new row and would hide rows leaving the filter, so the channel listens to the
//! whole table and events are filtered here with [`ChangeEvent::concerns`].

use std::time::Duration;

use futures::channel::mpsc::UnboundedSender;
use futures::{SinkExt as _, StreamExt as _};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use super::SupabaseConfig;
use crate::error::FetchError;
use crate::gateway::{ChangeEvent, ChangeKind, Row};
use crate::query::Filter;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

fn socket_url(config: &SupabaseConfig) -> String {
    let base = config
        .supabase_url
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);
    format!(
        "{base}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
        config.supabase_anon_key
    )
}

fn topic(table: &str) -> String {
    format!("realtime:public:{table}")
}

fn join_message(table: &str, access_token: &str) -> String {
    let change = json!({ "event": "*", "schema": "public", "table": table });
    json!({
        "topic": topic(table),
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [change],
            },
            "access_token": access_token,
        },
        "ref": "1",
    })
    .to_string()
}

fn heartbeat_message(sequence: u64) -> String {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": sequence.to_string(),
    })
    .to_string()
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    kind: ChangeKind,
    table: String,
    #[serde(default)]
    record: Option<Row>,
    #[serde(default)]
    old_record: Option<Row>,
}

/// Turn one socket frame into a change event, if it is one this channel cares about.
fn parse_change(text: &str, filter: &Filter) -> Option<ChangeEvent> {
    let envelope: Envelope = serde_json::from_str(text).ok()?;
    match envelope.event.as_str() {
        "postgres_changes" => {}
        "phx_reply" | "presence_state" | "system" => return None,
        other => {
            log::debug!("Ignoring realtime `{other}` message");
            return None;
        }
    }
    let data: ChangeData = serde_json::from_value(envelope.payload.get("data")?.clone()).ok()?;
    let event = ChangeEvent {
        kind: data.kind,
        table: data.table,
        record: data.record,
        old_record: data.old_record,
    };
    // Old records only carry the primary key unless the table has full replica identity.
    event.concerns(filter).then_some(event)
}

/// Connect, join the channel and spawn the task that forwards events into `events`.
/// The task ends when the socket closes or the receiving side is dropped.
pub(super) async fn open_channel(
    config: &SupabaseConfig,
    access_token: &str,
    table: &str,
    filter: Filter,
    events: UnboundedSender<ChangeEvent>,
) -> Result<JoinHandle<()>, FetchError> {
    let (socket, _response) = tokio_tungstenite::connect_async(socket_url(config))
        .await
        .map_err(|e| FetchError::Transport(e.to_string()))?;
    let (mut sink, mut stream) = socket.split();

    sink.send(Message::Text(join_message(table, access_token)))
        .await
        .map_err(|e| FetchError::Transport(e.to_string()))?;
    log::info!("Joined realtime channel {}", topic(table));

    let table = table.to_string();
    Ok(tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        let mut sequence = 1;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    sequence += 1;
                    if let Err(e) = sink.send(Message::Text(heartbeat_message(sequence))).await {
                        log::warn!("Realtime heartbeat for `{table}` failed: {e}");
                        break;
                    }
                }
                message = stream.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            let Some(event) = parse_change(&text, &filter) else {
                                continue;
                            };
                            if events.unbounded_send(event).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Realtime channel for `{table}` closed");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            log::error!("Realtime channel for `{table}` failed: {e}");
                            break;
                        }
                    }
                }
            }
        }
    }))
}
