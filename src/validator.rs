// # Sequence Validation
//
// Structural validation of sequence definitions and the request
// deduplication front-end over the recent-hash window.
//
// Registration delegates here before any registry state mutates; the
// orchestrator consults the dedup front-end before any admission work.

use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::bus::topics;
use crate::dedup::DuplicationDetector;
use crate::error::{ConductorError, Result};
use crate::model::{Priority, Sequence};
use crate::utilities::canonical_hash;

/// Outcome of the dedup front-end. The hash is always returned so the
/// orchestrator can record it regardless of duplicate status.
#[derive(Debug, Clone)]
pub struct DeduplicationCheck {
    pub is_duplicate: bool,
    pub reason: Option<String>,
    pub hash: u64,
}

pub struct SequenceValidator {
    detector: Mutex<DuplicationDetector>,
}

impl SequenceValidator {
    pub fn new(window: Duration) -> Self {
        Self {
            detector: Mutex::new(DuplicationDetector::new(window)),
        }
    }

    /// Structural conformance of a sequence definition.
    pub fn validate_sequence(&self, sequence: &Sequence) -> Result<()> {
        if sequence.name.trim().is_empty() {
            return Err(ConductorError::Validation(
                "sequence name must be non-empty".into(),
            ));
        }
        if sequence.tempo == 0 {
            return Err(ConductorError::Validation(format!(
                "sequence {} must have a positive tempo",
                sequence.name
            )));
        }
        if sequence.movements.is_empty() {
            return Err(ConductorError::Validation(format!(
                "sequence {} must have at least one movement",
                sequence.name
            )));
        }

        for (movement_index, movement) in sequence.movements.iter().enumerate() {
            if movement.name.trim().is_empty() {
                return Err(ConductorError::Validation(format!(
                    "sequence {} movement {} must have a name",
                    sequence.name, movement_index
                )));
            }
            if movement.beats.is_empty() {
                return Err(ConductorError::Validation(format!(
                    "sequence {} movement {} must have at least one beat",
                    sequence.name, movement.name
                )));
            }
            for (position, beat) in movement.beats.iter().enumerate() {
                let expected = position as u32 + 1;
                if beat.beat != expected {
                    return Err(ConductorError::Validation(format!(
                        "sequence {} movement {} beat {} is out of order (expected {})",
                        sequence.name, movement.name, beat.beat, expected
                    )));
                }
                if beat.event.trim().is_empty() {
                    return Err(ConductorError::Validation(format!(
                        "sequence {} movement {} beat {} must name an event",
                        sequence.name, movement.name, beat.beat
                    )));
                }
                // Beat events share the bus with lifecycle topics.
                for prefix in topics::RESERVED_PREFIXES {
                    if beat.event.starts_with(prefix) {
                        return Err(ConductorError::Validation(format!(
                            "sequence {} beat event {} collides with reserved prefix {}",
                            sequence.name, beat.event, prefix
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Check a request against the recent-hash window without recording it.
    pub fn deduplicate_request(
        &self,
        name: &str,
        data: &Value,
        priority: Priority,
    ) -> DeduplicationCheck {
        let hash = canonical_hash(name, data, priority);
        let is_duplicate = self.detector.lock().contains(hash);
        if is_duplicate {
            debug!(sequence = name, hash, "duplicate request within dedup window");
        }
        DeduplicationCheck {
            is_duplicate,
            reason: is_duplicate.then(|| format!("request hash {:x} seen within window", hash)),
            hash,
        }
    }

    /// Record a hash in the window. Called by the orchestrator before any
    /// further admission work to close the double-invocation race.
    pub fn record_request_hash(&self, hash: u64) {
        self.detector.lock().record(hash);
    }

    pub fn dedup_window(&self) -> Duration {
        self.detector.lock().window()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Beat, Movement};
    use serde_json::json;

    fn validator() -> SequenceValidator {
        SequenceValidator::new(Duration::from_millis(1000))
    }

    fn valid_sequence() -> Sequence {
        Sequence::new(
            "Demo.ping-symphony",
            vec![Movement::new(
                "main",
                vec![Beat::new(1, "demo:a"), Beat::new(2, "demo:b")],
            )],
        )
    }

    #[test]
    fn test_valid_sequence_passes() {
        assert!(validator().validate_sequence(&valid_sequence()).is_ok());
    }

    #[test]
    fn test_rejects_empty_name_and_zero_tempo() {
        let mut sequence = valid_sequence();
        sequence.name = "  ".into();
        assert!(validator().validate_sequence(&sequence).is_err());

        let mut sequence = valid_sequence();
        sequence.tempo = 0;
        assert!(validator().validate_sequence(&sequence).is_err());
    }

    #[test]
    fn test_rejects_empty_movements_and_beats() {
        let mut sequence = valid_sequence();
        sequence.movements.clear();
        assert!(validator().validate_sequence(&sequence).is_err());

        let mut sequence = valid_sequence();
        sequence.movements[0].beats.clear();
        assert!(validator().validate_sequence(&sequence).is_err());
    }

    #[test]
    fn test_rejects_non_contiguous_beat_numbering() {
        let mut sequence = valid_sequence();
        sequence.movements[0].beats[1].beat = 3;
        let err = validator().validate_sequence(&sequence).unwrap_err();
        assert!(err.to_string().contains("out of order"));
    }

    #[test]
    fn test_rejects_reserved_event_prefixes() {
        let mut sequence = valid_sequence();
        sequence.movements[0].beats[0].event = "sequence:sneaky".into();
        assert!(validator().validate_sequence(&sequence).is_err());

        sequence.movements[0].beats[0].event = "bus:oops".into();
        assert!(validator().validate_sequence(&sequence).is_err());
    }

    #[test]
    fn test_dedup_front_end_records_explicitly() {
        let validator = validator();
        let data = json!({ "elementId": "elem-1" });

        let first = validator.deduplicate_request("Demo.ping-symphony", &data, Priority::Normal);
        assert!(!first.is_duplicate);

        // Not recorded yet, so still not a duplicate.
        let second = validator.deduplicate_request("Demo.ping-symphony", &data, Priority::Normal);
        assert!(!second.is_duplicate);
        assert_eq!(first.hash, second.hash);

        validator.record_request_hash(first.hash);
        let third = validator.deduplicate_request("Demo.ping-symphony", &data, Priority::Normal);
        assert!(third.is_duplicate);
        assert!(third.reason.is_some());
    }
}
