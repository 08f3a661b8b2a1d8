//! Persona-flavored fallback utterances.
//!
//! Served when every provider attempt fails, so the conversation protocol
//! never breaks. Wording is configuration; the only hard requirement is a
//! non-empty reply.

use choir_domain::config::PersonaConfig;

const LAST_RESORT: &str = "Something went wrong on my side. Please try again.";

/// The fallback reply for a persona. Guaranteed non-empty even when the
/// configured string is blank.
pub fn fallback_reply(persona: &PersonaConfig) -> String {
    let configured = persona.fallback.trim();
    if configured.is_empty() {
        LAST_RESORT.to_owned()
    } else {
        configured.to_owned()
    }
}
