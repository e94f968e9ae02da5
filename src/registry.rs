// # Sequence Registry
//
// Owns the name → sequence and name → handler-table bindings. Registration
// validates first and mutates nothing on failure; success replaces any
// prior binding for the same name atomically.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::Result;
use crate::model::{HandlerTable, Sequence};
use crate::validator::SequenceValidator;

struct RegisteredSequence {
    sequence: Arc<Sequence>,
    handlers: HandlerTable,
}

pub struct SequenceRegistry {
    validator: Arc<SequenceValidator>,
    sequences: RwLock<HashMap<String, RegisteredSequence>>,
}

impl SequenceRegistry {
    pub fn new(validator: Arc<SequenceValidator>) -> Self {
        Self {
            validator,
            sequences: RwLock::new(HashMap::new()),
        }
    }

    /// Register a sequence with its handler table, replacing any prior
    /// binding for the same name.
    pub fn register(&self, sequence: Sequence, handlers: HandlerTable) -> Result<()> {
        self.validator.validate_sequence(&sequence)?;

        let name = sequence.name.clone();
        let replaced = {
            let mut sequences = self.sequences.write();
            sequences
                .insert(
                    name.clone(),
                    RegisteredSequence {
                        sequence: Arc::new(sequence),
                        handlers,
                    },
                )
                .is_some()
        };

        if replaced {
            info!(sequence = %name, "re-registered sequence (replaced prior binding)");
        } else {
            info!(sequence = %name, "registered sequence");
        }
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.sequences.write().remove(name).is_some();
        if removed {
            debug!(sequence = name, "unregistered sequence");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<Sequence>> {
        self.sequences
            .read()
            .get(name)
            .map(|entry| Arc::clone(&entry.sequence))
    }

    pub fn handlers(&self, name: &str) -> Option<HandlerTable> {
        self.sequences
            .read()
            .get(name)
            .map(|entry| entry.handlers.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sequences.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sequences.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.sequences.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Beat, Movement};
    use std::time::Duration;

    fn registry() -> SequenceRegistry {
        SequenceRegistry::new(Arc::new(SequenceValidator::new(Duration::from_millis(
            1000,
        ))))
    }

    fn sequence(name: &str, tempo: u32) -> Sequence {
        Sequence::new(
            name,
            vec![Movement::new("main", vec![Beat::new(1, "demo:a")])],
        )
        .with_tempo(tempo)
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = registry();
        let handlers = HandlerTable::new().on("demo:a", |_, _| Ok(None));
        registry
            .register(sequence("Demo.ping-symphony", 120), handlers)
            .unwrap();

        assert!(registry.contains("Demo.ping-symphony"));
        assert_eq!(registry.names(), vec!["Demo.ping-symphony"]);
        assert_eq!(
            registry.get("Demo.ping-symphony").unwrap().name,
            "Demo.ping-symphony"
        );
        assert_eq!(registry.handlers("Demo.ping-symphony").unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_registration_mutates_nothing() {
        let registry = registry();
        let result = registry.register(sequence("Demo.ping-symphony", 0), HandlerTable::new());
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reregistration_replaces() {
        let registry = registry();
        registry
            .register(sequence("Demo.ping-symphony", 120), HandlerTable::new())
            .unwrap();
        registry
            .register(sequence("Demo.ping-symphony", 60), HandlerTable::new())
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("Demo.ping-symphony").unwrap().tempo, 60);
    }

    #[test]
    fn test_unregister() {
        let registry = registry();
        registry
            .register(sequence("Demo.ping-symphony", 120), HandlerTable::new())
            .unwrap();
        assert!(registry.unregister("Demo.ping-symphony"));
        assert!(!registry.unregister("Demo.ping-symphony"));
        assert!(registry.get("Demo.ping-symphony").is_none());
    }
}
