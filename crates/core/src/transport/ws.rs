use futures_util::{SinkExt, StreamExt};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{ChannelState, Transport, TransportEvent};
use crate::{ClientCommand, DuetError, Result, SessionInput};

/// WebSocket transport. Connection, reading and writing run on one spawned
/// task per connection; everything it observes is forwarded to the session's
/// input queue.
pub struct WsTransport {
    url: String,
    events: mpsc::UnboundedSender<SessionInput>,
    state_tx: watch::Sender<ChannelState>,
    state_rx: watch::Receiver<ChannelState>,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, events: mpsc::UnboundedSender<SessionInput>) -> Self {
        let (state_tx, state_rx) = watch::channel(ChannelState::Closed);
        Self {
            url: url.into(),
            events,
            state_tx,
            state_rx,
            outgoing: None,
            task: None,
        }
    }
}

impl Transport for WsTransport {
    fn open(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        self.outgoing = Some(outgoing_tx);
        self.state_tx.send_replace(ChannelState::Opening);

        tracing::info!(url = %self.url, "opening websocket");
        self.task = Some(tokio::spawn(run_connection(
            self.url.clone(),
            outgoing_rx,
            self.events.clone(),
            self.state_tx.clone(),
        )));
        Ok(())
    }

    fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    fn send(&mut self, command: &ClientCommand) -> Result<()> {
        if self.state() != ChannelState::Open {
            return Err(DuetError::transport("websocket is not open"));
        }
        let outgoing = self
            .outgoing
            .as_ref()
            .ok_or_else(|| DuetError::transport("websocket is not open"))?;
        let text = command.to_json()?;
        tracing::debug!(command = command.name(), "sending");
        outgoing
            .send(text)
            .map_err(|_| DuetError::transport("websocket writer has shut down"))
    }

    /// Closes gracefully: frames already queued are flushed before the close
    /// handshake.
    fn close(&mut self) {
        self.outgoing = None;
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_connection(
    url: String,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<SessionInput>,
    state: watch::Sender<ChannelState>,
) {
    let emit = |event: TransportEvent| {
        let _ = events.send(SessionInput::Transport(event));
    };

    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(err) => {
            tracing::warn!(%url, error = %err, "websocket connect failed");
            state.send_replace(ChannelState::Closed);
            emit(TransportEvent::Error(err.to_string()));
            emit(TransportEvent::Closed);
            return;
        }
    };

    tracing::info!(%url, "websocket connected");
    state.send_replace(ChannelState::Open);
    emit(TransportEvent::Opened);

    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            frame = outgoing.recv() => match frame {
                Some(text) => {
                    if let Err(err) = sink.send(Message::Text(text.into())).await {
                        tracing::warn!(error = %err, "websocket send failed");
                        emit(TransportEvent::Error(err.to_string()));
                        break;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => emit(TransportEvent::Message(text.to_string())),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "websocket read failed");
                    emit(TransportEvent::Error(err.to_string()));
                    break;
                }
            },
        }
    }

    state.send_replace(ChannelState::Closed);
    tracing::info!(%url, "websocket closed");
    emit(TransportEvent::Closed);
}
