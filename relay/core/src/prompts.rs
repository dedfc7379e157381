//! System Prompt Presets
//!
//! A small fixed table of named system prompts plus the resolution rule
//! for picking one: an explicit custom prompt wins, then the named
//! preset, then the default preset for anything unrecognized.

/// A named system prompt preset
#[derive(Clone, Copy, Debug)]
pub struct PromptPreset {
    /// Preset key (stable identifier)
    pub key: &'static str,
    /// Human-readable name
    pub name: &'static str,
    /// System prompt content
    pub content: &'static str,
}

/// All built-in presets
pub const PRESETS: &[PromptPreset] = &[
    PromptPreset {
        key: "default",
        name: "General assistant",
        content: "You are a helpful AI assistant.",
    },
    PromptPreset {
        key: "math",
        name: "Math expert",
        content: "You are a mathematician focused on solving math problems. \
                  Answer with rigorous mathematical language and explicit steps, \
                  and make sure formulas render correctly with $...$ or $$...$$.",
    },
    PromptPreset {
        key: "code",
        name: "Programming expert",
        content: "You are a programming expert fluent in many languages. \
                  Answer programming questions with clear, concise code and \
                  explanations, wrapping code in Markdown code blocks.",
    },
    PromptPreset {
        key: "creative",
        name: "Creative writing",
        content: "You are a creative writer skilled in stories, poetry, and prose. \
                  Reply with imaginative, literary language, attending to emotional \
                  expression and rhetoric.",
    },
    PromptPreset {
        key: "custom",
        name: "Custom",
        content: "",
    },
];

/// System prompt the relay endpoint always uses
pub const RELAY_SYSTEM_PROMPT: &str =
    "Do not repeat the reasoning process in the final answer.";

/// Which system prompt the user has selected
#[derive(Clone, Debug)]
pub struct PromptSelection {
    /// Selected preset key
    pub preset: String,
    /// Custom prompt text (used when preset is `custom` and non-empty)
    pub custom: String,
}

impl Default for PromptSelection {
    fn default() -> Self {
        Self {
            preset: "default".to_string(),
            custom: String::new(),
        }
    }
}

impl PromptSelection {
    /// Select a named preset
    pub fn preset(key: impl Into<String>) -> Self {
        Self {
            preset: key.into(),
            custom: String::new(),
        }
    }

    /// Resolve the selection to a system prompt string
    ///
    /// A non-empty custom prompt wins when `custom` mode is selected;
    /// otherwise the named preset's content; an unrecognized preset key
    /// falls back to the default preset.
    #[must_use]
    pub fn resolve(&self) -> &str {
        if self.preset == "custom" && !self.custom.is_empty() {
            return &self.custom;
        }
        find_preset(&self.preset)
            .unwrap_or_else(|| find_preset("default").expect("default preset exists"))
            .content
    }
}

/// Look up a preset by key
#[must_use]
pub fn find_preset(key: &str) -> Option<&'static PromptPreset> {
    PRESETS.iter().find(|p| p.key == key)
}
