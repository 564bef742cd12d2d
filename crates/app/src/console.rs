use duet_core::{
    AudioStatus, ConnectionState, Controls, DuetError, ErrorKind, SessionObserver,
    TranscriptEntry,
};

/// Prints the transcript to stdout and status changes to stderr.
#[derive(Debug, Default)]
pub struct ConsoleObserver {
    last_status: Option<AudioStatus>,
}

pub fn format_entry(entry: &TranscriptEntry) -> String {
    format!("[{}] {}: {}", entry.time_label(), entry.entity, entry.text)
}

impl SessionObserver for ConsoleObserver {
    fn connection_changed(&mut self, state: ConnectionState) {
        tracing::info!(?state, "connection state changed");
    }

    fn audio_status(&mut self, status: AudioStatus) {
        if self.last_status != Some(status) {
            eprintln!("  · {status}");
            self.last_status = Some(status);
        }
    }

    fn transcript_appended(&mut self, _index: usize, entry: &TranscriptEntry) {
        println!("{}", format_entry(entry));
    }

    fn speaking_changed(&mut self, index: usize, entry: &TranscriptEntry) {
        tracing::debug!(index, entity = %entry.entity, speaking = entry.speaking, "speaking flag");
    }

    fn transcript_cleared(&mut self) {
        println!("--- new conversation ---");
    }

    fn controls_changed(&mut self, controls: Controls) {
        tracing::debug!(?controls, "controls updated");
    }

    fn loading_changed(&mut self, visible: bool) {
        if visible {
            eprintln!("  · waiting for the first turn...");
        }
    }

    fn notify_error(&mut self, error: &DuetError) {
        match error.kind() {
            ErrorKind::Remote => eprintln!("server error: {error} (type `ack` to dismiss)"),
            _ => eprintln!("error: {error}"),
        }
    }
}
