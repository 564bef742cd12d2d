//! Audio output backed by rodio.
//!
//! The output stream lives on a dedicated thread because it must stay on the
//! thread that opened it. The device is opened there too, so a slow driver
//! never stalls the runtime; if it cannot be opened, queued clips fail with the
//! device error. Clips are fetched over HTTP on the tokio runtime, decoded and
//! analysed on the audio thread, and their lifecycle is reported back to the
//! session as [`PlaybackEvent`]s.

use std::{
    io::Cursor,
    sync::mpsc::{self as std_mpsc, RecvTimeoutError},
    thread,
    time::{Duration, Instant},
};

use duet_core::{
    downmix, AudioConfig, AudioOutput, ClipAnalysis, ClipId, DuetError, PlaybackEvent,
    PlaybackEventKind, Result, SessionInput,
};
use reqwest::Url;
use rodio::{buffer::SamplesBuffer, Decoder, OutputStream, OutputStreamBuilder, Sink, Source};
use tokio::sync::mpsc;

use crate::feed::ClipFeed;

/// How often the audio thread checks whether the current clip has drained.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

type OpenDevice = fn() -> std::result::Result<OutputStream, String>;

enum Request {
    /// Makes `clip` the current clip; anything else becomes stale.
    Queue { clip: ClipId, volume: f32 },
    Loaded { clip: ClipId, bytes: Vec<u8> },
    Volume { clip: ClipId, volume: f32 },
    Stop(ClipId),
}

pub struct RodioOutput {
    http: reqwest::Client,
    base: Url,
    events: mpsc::UnboundedSender<SessionInput>,
    feed: ClipFeed,
    block_size: usize,
    smoothing: f32,
    open_device: OpenDevice,
    worker: Option<std_mpsc::Sender<Request>>,
}

impl RodioOutput {
    pub fn new(
        server_url: &str,
        audio: &AudioConfig,
        events: mpsc::UnboundedSender<SessionInput>,
        feed: ClipFeed,
    ) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            base: http_base(server_url)?,
            events,
            feed,
            block_size: audio.analysis_block,
            smoothing: audio.smoothing,
            open_device: open_default_device,
            worker: None,
        })
    }

    fn worker(&self) -> Result<&std_mpsc::Sender<Request>> {
        self.worker
            .as_ref()
            .ok_or_else(|| DuetError::playback("audio output is not initialized"))
    }

    fn send(&self, request: Request) -> Result<()> {
        self.worker()?
            .send(request)
            .map_err(|_| DuetError::playback("audio thread has stopped"))
    }
}

impl AudioOutput for RodioOutput {
    fn initialize(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (requests, inbox) = std_mpsc::channel();
        let worker = AudioWorker {
            events: self.events.clone(),
            feed: self.feed.clone(),
            block_size: self.block_size,
            smoothing: self.smoothing,
            open_device: self.open_device,
        };
        thread::Builder::new()
            .name("duet-audio".into())
            .spawn(move || worker.run(inbox))?;
        self.worker = Some(requests);
        Ok(())
    }

    fn play(&mut self, clip: ClipId, source: &str, volume: f32) -> Result<()> {
        let url = self
            .base
            .join(source)
            .map_err(|err| DuetError::playback(format!("invalid audio url `{source}`: {err}")))?;
        self.send(Request::Queue { clip, volume })?;
        emit(&self.events, clip, PlaybackEventKind::Loading);

        let worker = self.worker()?.clone();
        let http = self.http.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            tracing::debug!(clip = clip.value(), %url, "fetching audio");
            match fetch(&http, &url).await {
                Ok(bytes) => {
                    let _ = worker.send(Request::Loaded { clip, bytes });
                }
                Err(err) => emit(&events, clip, PlaybackEventKind::Failed(err.to_string())),
            }
        });
        Ok(())
    }

    fn set_volume(&mut self, clip: ClipId, volume: f32) {
        if let Err(err) = self.send(Request::Volume { clip, volume }) {
            tracing::debug!(error = %err, "volume change dropped");
        }
    }

    fn stop(&mut self, clip: ClipId) {
        if let Err(err) = self.send(Request::Stop(clip)) {
            tracing::debug!(error = %err, "stop dropped");
        }
    }
}

struct CurrentClip {
    clip: ClipId,
    volume: f32,
    sink: Option<Sink>,
}

struct AudioWorker {
    events: mpsc::UnboundedSender<SessionInput>,
    feed: ClipFeed,
    block_size: usize,
    smoothing: f32,
    open_device: OpenDevice,
}

impl AudioWorker {
    fn run(self, inbox: std_mpsc::Receiver<Request>) {
        let mut device = self.open();
        let mut current: Option<CurrentClip> = None;
        loop {
            match inbox.recv_timeout(POLL_INTERVAL) {
                Ok(Request::Queue { clip, volume }) => {
                    self.halt(&mut current);
                    if device.is_err() {
                        device = self.open();
                    }
                    match &device {
                        Ok(_) => {
                            current = Some(CurrentClip {
                                clip,
                                volume,
                                sink: None,
                            });
                        }
                        Err(reason) => {
                            let failed = PlaybackEventKind::Failed(reason.clone());
                            emit(&self.events, clip, failed);
                        }
                    }
                }
                Ok(Request::Loaded { clip, bytes }) => match (current.as_mut(), &device) {
                    (Some(playing), Ok(stream))
                        if playing.clip == clip && playing.sink.is_none() =>
                    {
                        match self.start(stream, playing, bytes) {
                            Ok(sink) => playing.sink = Some(sink),
                            Err(reason) => {
                                current = None;
                                emit(&self.events, clip, PlaybackEventKind::Failed(reason));
                            }
                        }
                    }
                    _ => tracing::trace!(clip = clip.value(), "discarding stale clip"),
                },
                Ok(Request::Volume { clip, volume }) => {
                    if let Some(playing) = current.as_mut().filter(|p| p.clip == clip) {
                        playing.volume = volume;
                        if let Some(sink) = &playing.sink {
                            sink.set_volume(volume);
                        }
                    }
                }
                Ok(Request::Stop(clip)) => {
                    if current.as_ref().is_some_and(|p| p.clip == clip) {
                        self.halt(&mut current);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            let drained = current
                .as_ref()
                .and_then(|playing| playing.sink.as_ref().map(|sink| (playing.clip, sink.empty())));
            if let Some((clip, true)) = drained {
                current = None;
                self.feed.end(clip.value());
                emit(&self.events, clip, PlaybackEventKind::Ended);
            }
        }

        self.halt(&mut current);
        tracing::debug!("audio thread exiting");
    }

    fn open(&self) -> std::result::Result<OutputStream, String> {
        let device = (self.open_device)();
        match &device {
            Ok(_) => tracing::info!("audio device opened"),
            Err(reason) => tracing::warn!(%reason, "audio device unavailable"),
        }
        device
    }

    fn start(
        &self,
        stream: &OutputStream,
        playing: &CurrentClip,
        bytes: Vec<u8>,
    ) -> std::result::Result<Sink, String> {
        let decoder =
            Decoder::new(Cursor::new(bytes)).map_err(|err| format!("could not decode audio: {err}"))?;
        let channels = decoder.channels();
        let sample_rate = decoder.sample_rate();
        let samples: Vec<f32> = decoder.collect();
        emit(&self.events, playing.clip, PlaybackEventKind::Playable);

        let analysis = ClipAnalysis::analyse(
            &downmix(&samples, channels),
            sample_rate,
            self.block_size,
            self.smoothing,
        )
        .unwrap_or_else(|err| {
            tracing::warn!(error = %err, "amplitude analysis failed");
            ClipAnalysis::default()
        });

        let sink = Sink::connect_new(stream.mixer());
        sink.set_volume(playing.volume);
        sink.append(SamplesBuffer::new(channels, sample_rate, samples));
        self.feed
            .begin(playing.clip.value(), analysis, Instant::now());
        emit(&self.events, playing.clip, PlaybackEventKind::Started);
        Ok(sink)
    }

    fn halt(&self, current: &mut Option<CurrentClip>) {
        if let Some(playing) = current.take() {
            if let Some(sink) = playing.sink {
                sink.stop();
            }
            self.feed.end(playing.clip.value());
        }
    }
}

fn open_default_device() -> std::result::Result<OutputStream, String> {
    OutputStreamBuilder::open_default_stream()
        .map_err(|err| format!("Audio device initialization failed: {err}"))
}

fn emit(events: &mpsc::UnboundedSender<SessionInput>, clip: ClipId, kind: PlaybackEventKind) {
    let _ = events.send(SessionInput::Playback(PlaybackEvent::new(clip, kind)));
}

async fn fetch(http: &reqwest::Client, url: &Url) -> Result<Vec<u8>> {
    let failed = |err: reqwest::Error| DuetError::playback(format!("{url}: {err}"));
    let response = http
        .get(url.clone())
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(failed)?;
    let bytes = response.bytes().await.map_err(failed)?;
    Ok(bytes.to_vec())
}

/// Origin that relative audio references are resolved against: the dialogue
/// server's address with its websocket scheme swapped for http(s).
pub fn http_base(server_url: &str) -> Result<Url> {
    let invalid = |detail: String| DuetError::Config(format!("invalid server url `{server_url}`: {detail}"));
    let mut url = Url::parse(server_url).map_err(|err| invalid(err.to_string()))?;
    let scheme = match url.scheme() {
        "ws" => "http",
        "wss" => "https",
        other => other,
    }
    .to_string();
    url.set_scheme(&scheme)
        .map_err(|_| invalid(format!("cannot use scheme `{scheme}`")))?;
    url.set_path("/");
    url.set_query(None);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use duet_core::{EntityId, PlaybackController};

    use super::*;

    #[test]
    fn websocket_address_maps_to_http_origin() {
        let base = http_base("ws://127.0.0.1:8000/ws?x=1").unwrap();
        assert_eq!(base.as_str(), "http://127.0.0.1:8000/");

        let secure = http_base("wss://duet.example/ws").unwrap();
        assert_eq!(secure.as_str(), "https://duet.example/");
    }

    #[test]
    fn audio_references_resolve_against_the_origin() {
        let base = http_base("ws://localhost:8000/ws").unwrap();
        assert_eq!(
            base.join("/audio/turn-3.mp3").unwrap().as_str(),
            "http://localhost:8000/audio/turn-3.mp3"
        );
        assert_eq!(
            base.join("https://cdn.example/a.mp3").unwrap().as_str(),
            "https://cdn.example/a.mp3"
        );
    }

    #[test]
    fn rejects_unparseable_server_urls() {
        assert!(http_base("not a url").is_err());
    }

    #[test]
    fn requests_before_initialization_fail() {
        let (events, _rx) = mpsc::unbounded_channel();
        let output = RodioOutput::new(
            "ws://localhost:8000/ws",
            &AudioConfig::default(),
            events,
            ClipFeed::default(),
        )
        .unwrap();
        assert!(output.worker().is_err());
    }

    fn slow_missing_device() -> std::result::Result<OutputStream, String> {
        thread::sleep(Duration::from_millis(400));
        Err("no device".into())
    }

    #[tokio::test]
    async fn play_returns_before_the_device_opens() {
        let (events, mut rx) = mpsc::unbounded_channel();
        let mut output = RodioOutput::new(
            "ws://127.0.0.1:9/ws",
            &AudioConfig::default(),
            events,
            ClipFeed::default(),
        )
        .unwrap();
        output.open_device = slow_missing_device;
        let mut playback = PlaybackController::new(Box::new(output), 1.0);

        let started = Instant::now();
        let clip = playback.play(EntityId::One, "/audio/a.mp3");
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(playback.take_pending().is_none());

        let failure = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(input) = rx.recv().await {
                if let SessionInput::Playback(PlaybackEvent {
                    clip: failed,
                    kind: PlaybackEventKind::Failed(reason),
                }) = input
                {
                    if failed == clip && reason == "no device" {
                        return reason;
                    }
                }
            }
            String::new()
        })
        .await
        .expect("device failure is reported");
        assert_eq!(failure, "no device");
    }
}
