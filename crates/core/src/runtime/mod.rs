//! Async driver for a [`Session`].
//!
//! The driver owns the session and serializes everything that reaches it:
//! inputs from the channel (transport, playback and user events) and the
//! session's own timers. Each input is handled to completion before the next
//! one is read.

use std::time::Duration;

use tokio::{
    sync::mpsc,
    time::{self, Instant},
};

use crate::{ConnectionState, Session, SessionInput, TransportEvent, UserCommand};

/// How long a shutdown waits for the channel to report that it closed.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

pub struct SessionDriver {
    session: Session,
    inputs: mpsc::UnboundedReceiver<SessionInput>,
}

impl SessionDriver {
    pub fn new(session: Session, inputs: mpsc::UnboundedReceiver<SessionInput>) -> Self {
        Self { session, inputs }
    }

    /// Runs until a [`UserCommand::Shutdown`] is handled or every sender is
    /// dropped, then hands the session back.
    pub async fn run(mut self) -> Session {
        loop {
            let deadline = self.session.next_deadline().map(Instant::from_std);
            let input = tokio::select! {
                input = self.inputs.recv() => input,
                _ = sleep_until(deadline) => {
                    self.session.fire_due_timers(now());
                    continue;
                }
            };

            let Some(input) = input else {
                tracing::debug!("input channel closed; driver exiting");
                break;
            };
            let shutdown = matches!(input, SessionInput::User(UserCommand::Shutdown));
            self.session.handle(input, now());
            if shutdown {
                self.await_transport_close().await;
                break;
            }
        }
        self.session
    }

    async fn await_transport_close(&mut self) {
        if self.session.connection_state() == ConnectionState::Disconnected {
            return;
        }

        let grace = time::sleep(SHUTDOWN_GRACE);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                _ = &mut grace => {
                    tracing::debug!("transport did not confirm close in time");
                    break;
                }
                input = self.inputs.recv() => match input {
                    Some(SessionInput::Transport(event)) => {
                        let closed = event == TransportEvent::Closed;
                        self.session.handle(SessionInput::Transport(event), now());
                        if closed {
                            break;
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }
    }
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::testing::RecordingOutput;
    use crate::transport::testing::FakeTransport;
    use crate::{
        AppConfig, ChannelState, EntityConfig, EntityPair, NoopObserver, NullRenderer,
        SessionParts, SilentFeed, Voice, WsTransport,
    };

    fn session(transport: &FakeTransport) -> Session {
        Session::new(
            &AppConfig::default(),
            SessionParts {
                transport: Box::new(transport.clone()),
                output: Box::new(RecordingOutput::default()),
                renderer: Box::new(NullRenderer),
                feed: Box::new(SilentFeed),
                observer: Box::new(NoopObserver),
            },
        )
    }

    fn entities() -> EntityPair<EntityConfig> {
        EntityPair::new(
            EntityConfig::with_voice(Voice::Brian).prompt("Ask riddles."),
            EntityConfig::with_voice(Voice::Ava).prompt("Answer riddles."),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn drives_connect_poll_and_silent_turn_timers() {
        let transport = FakeTransport::new(ChannelState::Open);
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = SessionDriver::new(session(&transport), rx);

        let script = async {
            tx.send(SessionInput::User(UserCommand::Start(entities())))
                .unwrap();
            time::sleep(Duration::from_millis(150)).await;
            tx.send(SessionInput::Transport(TransportEvent::Message(
                r#"{"type":"speaking","entity":1,"text":"Hello"}"#.into(),
            )))
            .unwrap();
            time::sleep(Duration::from_millis(2100)).await;
            tx.send(SessionInput::User(UserCommand::Shutdown)).unwrap();
        };

        let (session, ()) = tokio::join!(driver.run(), script);

        assert_eq!(transport.count("start"), 1);
        assert_eq!(transport.count("audio_finished"), 1);
        assert_eq!(transport.count("stop"), 1);
        assert!(!session.is_active());
        assert_eq!(session.transcript().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_transport_close() {
        let transport = FakeTransport::new(ChannelState::Open);
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = SessionDriver::new(session(&transport), rx);

        tx.send(SessionInput::Transport(TransportEvent::Opened)).unwrap();
        tx.send(SessionInput::User(UserCommand::Shutdown)).unwrap();
        tx.send(SessionInput::Transport(TransportEvent::Closed)).unwrap();

        let started = Instant::now();
        let session = driver.run().await;

        assert!(started.elapsed() < SHUTDOWN_GRACE);
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn exits_when_every_sender_is_gone() {
        let transport = FakeTransport::new(ChannelState::Open);
        let (tx, rx) = mpsc::unbounded_channel();
        drop(tx);

        let session = SessionDriver::new(session(&transport), rx).run().await;
        assert!(!session.is_active());
        assert_eq!(*transport.opens.borrow(), 0);
    }

    #[tokio::test]
    async fn full_turn_over_a_websocket() {
        use futures_util::{SinkExt, StreamExt};
        use tokio::net::TcpListener;
        use tokio_tungstenite::{accept_async, tungstenite::Message};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();
            let mut received = Vec::new();
            let start = ws.next().await.unwrap().unwrap();
            received.push(start.into_text().unwrap().to_string());
            ws.send(Message::Text(
                r#"{"type":"speaking","entity":2,"text":"Why?"}"#.into(),
            ))
            .await
            .unwrap();
            let ack = ws.next().await.unwrap().unwrap();
            received.push(ack.into_text().unwrap().to_string());
            ws.send(Message::Text(r#"{"type":"stopped"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
            received
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(
            &AppConfig::default(),
            SessionParts {
                transport: Box::new(WsTransport::new(format!("ws://{addr}"), tx.clone())),
                output: Box::new(RecordingOutput::default()),
                renderer: Box::new(NullRenderer),
                feed: Box::new(SilentFeed),
                observer: Box::new(NoopObserver),
            },
        );
        tx.send(SessionInput::User(UserCommand::Start(entities())))
            .unwrap();

        let script = async {
            let received = server.await.unwrap();
            tx.send(SessionInput::User(UserCommand::Shutdown)).unwrap();
            received
        };
        let (session, received) = tokio::join!(SessionDriver::new(session, rx).run(), script);

        let start: serde_json::Value = serde_json::from_str(&received[0]).unwrap();
        assert_eq!(start["type"], "start");
        assert_eq!(start["system2"], "Answer riddles.");
        assert_eq!(received[1], r#"{"type":"audio_finished"}"#);
        assert!(!session.is_active());
        assert_eq!(session.transcript().entries()[0].text, "Why?");
    }
}
