//! Event verb table.
//!
//! Which lifecycle verbs are relevant and how each one affects the displayed
//! status. The literal verb set follows the engine's vocabulary and may be
//! extended; the load-bearing rule is that metadata verbs (`rename`, `update`)
//! never change the displayed status.
use std::collections::HashMap;
use std::sync::LazyLock;

/// What an allowed verb does to the container set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction {
    /// Upsert and set the displayed status to the given label.
    SetStatus(&'static str),
    /// Upsert and set the displayed status to the capitalized verb.
    CapitalizeVerb,
    /// Upsert identity fields only; the displayed status is left as is.
    KeepStatus,
    /// Delete the matching record.
    Remove,
}

static DEFAULT_VERBS: LazyLock<HashMap<&'static str, EventAction>> = LazyLock::new(|| {
    use EventAction::*;

    let mut m: HashMap<&'static str, EventAction> = HashMap::with_capacity(24);

    m.insert("start", SetStatus("Running"));
    m.insert("started", SetStatus("Running"));
    m.insert("unpause", SetStatus("Running"));
    m.insert("unpaused", SetStatus("Running"));
    m.insert("stop", SetStatus("Exited"));
    m.insert("stopped", SetStatus("Exited"));
    m.insert("die", SetStatus("Exited"));
    m.insert("died", SetStatus("Exited"));
    m.insert("kill", SetStatus("Exited"));
    m.insert("exited", SetStatus("Exited"));
    m.insert("pause", SetStatus("Paused"));
    m.insert("paused", SetStatus("Paused"));
    m.insert("create", SetStatus("Created"));
    m.insert("created", SetStatus("Created"));
    m.insert("restart", SetStatus("Restarting"));
    m.insert("restarted", SetStatus("Restarting"));
    m.insert("health_status", KeepStatus);
    m.insert("rename", KeepStatus);
    m.insert("update", KeepStatus);
    m.insert("remove", Remove);
    m.insert("rm", Remove);
    m.insert("delete", Remove);
    m.insert("deleted", Remove);

    m
});

/// Allowlist of event verbs and their effect.
#[derive(Debug, Clone)]
pub struct EventVocabulary {
    verbs: HashMap<String, EventAction>,
}

impl Default for EventVocabulary {
    fn default() -> Self {
        Self {
            verbs: DEFAULT_VERBS
                .iter()
                .map(|(verb, action)| ((*verb).to_owned(), action.clone()))
                .collect(),
        }
    }
}

impl EventVocabulary {
    /// Allows an additional verb (or overrides an existing one).
    pub fn with_verb(mut self, verb: &str, action: EventAction) -> Self {
        self.verbs.insert(verb.to_lowercase(), action);
        self
    }

    /// Looks up a lower-cased verb. `None` means the event is noise.
    pub fn action(&self, verb: &str) -> Option<&EventAction> {
        self.verbs.get(verb)
    }

    /// Display label an upsert with `verb` should write, or `None` if the
    /// status must be left unchanged.
    pub fn display_status(&self, verb: &str) -> Option<String> {
        match self.action(verb)? {
            EventAction::SetStatus(label) => Some((*label).to_owned()),
            EventAction::CapitalizeVerb => Some(capitalize(verb)),
            EventAction::KeepStatus | EventAction::Remove => None,
        }
    }
}

fn capitalize(verb: &str) -> String {
    let mut chars = verb.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowlist() {
        let vocabulary = EventVocabulary::default();
        for verb in ["start", "started", "exited", "health_status"] {
            assert!(vocabulary.action(verb).is_some(), "{verb}");
        }
        for verb in ["mount", "unmount", "exec", "attach"] {
            assert!(vocabulary.action(verb).is_none(), "{verb}");
        }
    }

    #[test]
    fn test_metadata_verbs_keep_status() {
        let vocabulary = EventVocabulary::default();
        for verb in ["rename", "update", "health_status"] {
            assert_eq!(vocabulary.display_status(verb), None, "{verb}");
            assert_eq!(vocabulary.action(verb), Some(&EventAction::KeepStatus));
        }
        assert_eq!(vocabulary.display_status("start").as_deref(), Some("Running"));
    }

    #[test]
    fn test_display_status_mapping() {
        let vocabulary = EventVocabulary::default();
        assert_eq!(vocabulary.display_status("kill").as_deref(), Some("Exited"));
        assert_eq!(vocabulary.display_status("exited").as_deref(), Some("Exited"));
        assert_eq!(vocabulary.display_status("died").as_deref(), Some("Exited"));
        assert_eq!(vocabulary.display_status("started").as_deref(), Some("Running"));
        assert_eq!(vocabulary.display_status("unpause").as_deref(), Some("Running"));
        assert_eq!(vocabulary.display_status("pause").as_deref(), Some("Paused"));
        assert_eq!(vocabulary.display_status("created").as_deref(), Some("Created"));
        assert_eq!(vocabulary.display_status("restart").as_deref(), Some("Restarting"));
        assert_eq!(vocabulary.display_status("remove"), None);
        assert_eq!(vocabulary.display_status("mount"), None);
    }

    #[test]
    fn test_removal_verbs() {
        let vocabulary = EventVocabulary::default();
        for verb in ["remove", "rm", "delete", "deleted"] {
            assert_eq!(vocabulary.action(verb), Some(&EventAction::Remove), "{verb}");
        }
    }

    #[test]
    fn test_extension_capitalizes_raw_verb() {
        let vocabulary = EventVocabulary::default().with_verb("Checkpoint", EventAction::CapitalizeVerb);
        assert_eq!(vocabulary.action("checkpoint"), Some(&EventAction::CapitalizeVerb));
        assert_eq!(vocabulary.display_status("checkpoint").as_deref(), Some("Checkpoint"));
    }
}
