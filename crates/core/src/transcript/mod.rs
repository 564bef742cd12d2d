use chrono::{DateTime, Local};

use crate::EntityId;

/// A single line of the dialogue transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub entity: EntityId,
    pub text: String,
    pub timestamp: DateTime<Local>,
    pub speaking: bool,
}

impl TranscriptEntry {
    /// 24-hour `HH:MM:SS` label shown next to the entry.
    pub fn time_label(&self) -> String {
        self.timestamp.format("%H:%M:%S").to_string()
    }
}

/// Append-only transcript. Only the newest entry of each entity may have its
/// speaking flag changed.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry and returns its index.
    pub fn append(&mut self, entity: EntityId, text: impl Into<String>) -> usize {
        self.entries.push(TranscriptEntry {
            entity,
            text: text.into(),
            timestamp: Local::now(),
            speaking: false,
        });
        self.entries.len() - 1
    }

    /// Updates the speaking flag of the newest entry for `entity`, returning
    /// its index when the flag actually changed.
    pub fn set_speaking(&mut self, entity: EntityId, speaking: bool) -> Option<usize> {
        let index = self.latest_index(entity)?;
        let entry = &mut self.entries[index];
        if entry.speaking == speaking {
            return None;
        }
        entry.speaking = speaking;
        Some(index)
    }

    pub fn get(&self, index: usize) -> Option<&TranscriptEntry> {
        self.entries.get(index)
    }

    #[cfg(test)]
    pub fn latest(&self, entity: EntityId) -> Option<&TranscriptEntry> {
        self.latest_index(entity).map(|index| &self.entries[index])
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn latest_index(&self, entity: EntityId) -> Option<usize> {
        self.entries.iter().rposition(|entry| entry.entity == entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_newest_entry_per_entity_is_flagged() {
        let mut transcript = Transcript::new();
        transcript.append(EntityId::One, "first");
        transcript.append(EntityId::Two, "reply");
        transcript.append(EntityId::One, "second");

        assert_eq!(transcript.set_speaking(EntityId::One, true), Some(2));
        assert!(!transcript.entries()[0].speaking);
        assert!(transcript.entries()[2].speaking);
        assert!(!transcript.entries()[1].speaking);
    }

    #[test]
    fn unchanged_flag_reports_nothing() {
        let mut transcript = Transcript::new();
        assert_eq!(transcript.set_speaking(EntityId::Two, true), None);
        transcript.append(EntityId::Two, "hi");
        assert_eq!(transcript.set_speaking(EntityId::Two, false), None);
    }

    #[test]
    fn clear_empties_the_transcript() {
        let mut transcript = Transcript::new();
        transcript.append(EntityId::One, "x");
        transcript.clear();
        assert!(transcript.is_empty());
        assert!(transcript.latest(EntityId::One).is_none());
    }

    #[test]
    fn time_label_is_24_hour() {
        let mut transcript = Transcript::new();
        let index = transcript.append(EntityId::One, "x");
        let label = transcript.get(index).unwrap().time_label();
        assert_eq!(label.len(), 8);
        assert_eq!(label.matches(':').count(), 2);
    }
}
