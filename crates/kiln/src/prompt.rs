//! Prompt sanitizing and the Llama 2 chat template.

/// Opening instruction tag.
pub const B_INST: &str = "[INST]";
/// Closing instruction tag.
pub const E_INST: &str = "[/INST]";

/// A chat prompt: either plain text or a full chat history.
///
/// A history is a list of turns, each holding optional strings (for example
/// a user message and a not-yet-produced assistant reply).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    Text(String),
    History(Vec<Vec<Option<String>>>),
}

impl From<&str> for Prompt {
    fn from(value: &str) -> Self {
        Prompt::Text(value.to_string())
    }
}

impl From<String> for Prompt {
    fn from(value: String) -> Self {
        Prompt::Text(value)
    }
}

impl Prompt {
    /// Collapse into a single line of text.
    pub fn flatten(&self) -> String {
        let joined = match self {
            Prompt::Text(text) => text.clone(),
            Prompt::History(turns) => turns
                .iter()
                .flatten()
                .flatten()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" "),
        };
        joined.replace(['\n', '\t', '\r'], " ")
    }
}

/// Wrap `prompt` in instruction tags and append it to `history`.
pub fn append_user_prompt(history: &str, prompt: &str) -> String {
    format!("{history}{B_INST} {prompt} {E_INST}")
}

/// Build the text sent to the tokenizer.
///
/// `system_prompt` is only included on the first chat of a session.
pub fn sanitize_prompt(prompt: &Prompt, system_prompt: Option<&str>) -> String {
    let flat = prompt.flatten();
    append_user_prompt(system_prompt.unwrap_or_default(), &flat)
}
