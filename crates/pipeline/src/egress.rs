//! Single-writer egress multiplexer
//!
//! All outbound messages funnel through one actor fed by a bounded
//! channel, which yields the per-generation ordering guarantees without
//! locking. The actor stamps timestamps, drops messages tagged with a
//! superseded generation, and is the authority on what assistant text
//! was actually delivered: on supersession it closes out the prior
//! generation's stream and reports the delivered text back to the
//! controller for history truncation.

use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

use crate::protocol::ServerMessage;

/// Commands accepted by the egress actor.
#[derive(Debug)]
pub enum EgressCommand {
    Emit {
        generation: u64,
        msg: ServerMessage,
    },
    /// A barge-in superseded `prior` generations. The actor finalizes
    /// the interrupted stream, hints the client to stop playback, and
    /// replies with the assistant text delivered so far.
    Supersede {
        new_generation: u64,
        reply: oneshot::Sender<String>,
    },
}

/// Cloneable handle feeding the egress actor.
#[derive(Clone)]
pub struct EgressHandle {
    tx: mpsc::Sender<EgressCommand>,
}

impl EgressHandle {
    /// Emit a message tagged with the generation it was produced under.
    ///
    /// Send failures mean the session is closing; they are ignored.
    pub async fn emit(&self, generation: u64, msg: ServerMessage) {
        let _ = self.tx.send(EgressCommand::Emit { generation, msg }).await;
    }

    /// Supersede everything before `new_generation`; returns the
    /// assistant text delivered for the interrupted generation.
    pub async fn supersede(&self, new_generation: u64) -> String {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(EgressCommand::Supersede {
                new_generation,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return String::new();
        }
        reply_rx.await.unwrap_or_default()
    }
}

/// Spawn the egress actor. Serialized messages go out over `out` in
/// emission order; the session's websocket writer is the only consumer.
pub fn spawn_egress(out: mpsc::Sender<String>, clock: Instant) -> EgressHandle {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(run_egress(rx, out, clock));
    EgressHandle { tx }
}

async fn run_egress(
    mut rx: mpsc::Receiver<EgressCommand>,
    out: mpsc::Sender<String>,
    clock: Instant,
) {
    let mut current_generation: u64 = 0;
    let mut delivered_text = String::new();
    let mut stream_open = false;

    while let Some(command) = rx.recv().await {
        match command {
            EgressCommand::Emit { generation, msg } => {
                if generation < current_generation {
                    tracing::trace!(
                        generation,
                        current = current_generation,
                        "dropping stale egress message"
                    );
                    continue;
                }
                if generation > current_generation {
                    // A new turn advanced the generation without a
                    // barge-in; tracking starts over.
                    current_generation = generation;
                    delivered_text.clear();
                    stream_open = false;
                }

                match &msg {
                    ServerMessage::StreamStart => {
                        stream_open = true;
                        delivered_text.clear();
                    }
                    ServerMessage::TextChunk { text } => delivered_text.push_str(text),
                    ServerMessage::StreamComplete { .. } => stream_open = false,
                    _ => {}
                }

                if send(&out, &msg, clock).await.is_err() {
                    break;
                }
            }
            EgressCommand::Supersede {
                new_generation,
                reply,
            } => {
                let delivered = std::mem::take(&mut delivered_text);
                if stream_open {
                    let complete = ServerMessage::StreamComplete {
                        full_text: delivered.clone(),
                        interrupted: true,
                    };
                    if send(&out, &complete, clock).await.is_err() {
                        break;
                    }
                }
                if send(&out, &ServerMessage::StopAudioImmediately, clock)
                    .await
                    .is_err()
                {
                    break;
                }
                current_generation = new_generation;
                stream_open = false;
                let _ = reply.send(delivered);
            }
        }
    }
}

/// Serialize with the monotonic timestamp stamped in, and forward.
async fn send(
    out: &mpsc::Sender<String>,
    msg: &ServerMessage,
    clock: Instant,
) -> Result<(), ()> {
    let mut value = match serde_json::to_value(msg) {
        Ok(value) => value,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize egress message");
            return Ok(());
        }
    };
    if let Some(object) = value.as_object_mut() {
        object.insert(
            "timestamp".to_string(),
            serde_json::json!(clock.elapsed().as_secs_f64()),
        );
    }
    out.send(value.to_string()).await.map_err(|_| ())
}
