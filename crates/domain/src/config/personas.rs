use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Personas
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The conversational role a persona plays. Routing picks the searcher for
/// search-intent utterances, the explainer for explanation-intent ones, and
/// the host otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PersonaRole {
    #[default]
    Host,
    Explainer,
    Searcher,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Persona name as it appears on the wire (`character` field, speaker).
    pub name: String,
    #[serde(default)]
    pub role: PersonaRole,
    /// One-paragraph character description injected into the prompt.
    #[serde(default)]
    pub description: String,
    /// Tokens that count as an explicit mention of this persona.
    #[serde(default)]
    pub name_tokens: Vec<String>,
    /// Served when every provider attempt fails. Must be non-empty.
    #[serde(default = "d_fallback")]
    pub fallback: String,
    /// Provider id to use for this persona. `None` = registry default.
    #[serde(default)]
    pub provider: Option<String>,
    /// Model override for this persona.
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonasConfig {
    #[serde(default = "d_personas")]
    pub personas: Vec<PersonaConfig>,

    /// Name of the persona used when no routing rule matches.
    #[serde(default = "d_default_persona")]
    pub default_persona: String,

    /// Utterance tokens that route to the searcher persona.
    #[serde(default = "d_search_tokens")]
    pub search_intent_tokens: Vec<String>,

    /// Utterance tokens that route to the explainer persona.
    #[serde(default = "d_explain_tokens")]
    pub explain_intent_tokens: Vec<String>,
}

impl Default for PersonasConfig {
    fn default() -> Self {
        Self {
            personas: d_personas(),
            default_persona: d_default_persona(),
            search_intent_tokens: d_search_tokens(),
            explain_intent_tokens: d_explain_tokens(),
        }
    }
}

impl PersonasConfig {
    /// Look up a persona by name.
    pub fn get(&self, name: &str) -> Option<&PersonaConfig> {
        self.personas.iter().find(|p| p.name == name)
    }

    /// All configured persona names (the speaker allowlist).
    pub fn names(&self) -> Vec<String> {
        self.personas.iter().map(|p| p.name.clone()).collect()
    }

    /// First persona with the given role, if any.
    pub fn by_role(&self, role: PersonaRole) -> Option<&PersonaConfig> {
        self.personas.iter().find(|p| p.role == role)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_default_persona() -> String {
    "lumina".into()
}

fn d_fallback() -> String {
    "Sorry — I could not reach my thoughts just now. Could you say that again?".into()
}

fn d_search_tokens() -> Vec<String> {
    ["search", "look up", "latest", "news", "find out"]
        .map(String::from)
        .to_vec()
}

fn d_explain_tokens() -> Vec<String> {
    ["explain", "why", "reasoning", "in detail", "how does"]
        .map(String::from)
        .to_vec()
}

fn d_personas() -> Vec<PersonaConfig> {
    vec![
        PersonaConfig {
            name: "lumina".into(),
            role: PersonaRole::Host,
            description: "A warm, curious host. Keeps the conversation \
                          flowing, reacts to the user's mood, and opens up \
                          new directions."
                .into(),
            name_tokens: vec!["lumina".into()],
            fallback: "Ah — my thoughts scattered for a moment there. \
                       Could you say that once more?"
                .into(),
            provider: None,
            model: None,
        },
        PersonaConfig {
            name: "claris".into(),
            role: PersonaRole::Explainer,
            description: "A calm, methodical explainer. Lays out background \
                          and structure, and walks through reasoning step \
                          by step."
                .into(),
            name_tokens: vec!["claris".into()],
            fallback: "I must apologize — I cannot assemble a proper \
                       explanation right now. Please ask me again shortly."
                .into(),
            provider: None,
            model: None,
        },
        PersonaConfig {
            name: "nox".into(),
            role: PersonaRole::Searcher,
            description: "A cool, precise fact-finder. Verifies claims, \
                          summarizes sources, and keeps answers short."
                .into(),
            name_tokens: vec!["nox".into()],
            fallback: "Lookup failed. Retry in a moment.".into(),
            provider: None,
            model: None,
        },
    ]
}
