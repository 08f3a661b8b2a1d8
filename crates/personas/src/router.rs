//! Deterministic persona routing.
//!
//! The rule is pure (no I/O) and total (always returns a persona):
//! 1. An explicit persona-name token in the utterance wins.
//! 2. Any search-intent token routes to the searcher persona.
//! 3. Any explanation-intent token routes to the explainer persona.
//! 4. Otherwise the default persona answers.

use choir_domain::config::{PersonaRole, PersonasConfig};

pub struct PersonaRouter {
    config: PersonasConfig,
}

impl PersonaRouter {
    pub fn new(config: PersonasConfig) -> Self {
        Self { config }
    }

    /// Pick the persona for an utterance. Matching is case-insensitive.
    pub fn route(&self, utterance: &str) -> &str {
        let lowered = utterance.to_lowercase();

        // 1. Explicit mention of a persona name.
        for persona in &self.config.personas {
            let mentioned = persona
                .name_tokens
                .iter()
                .chain(std::iter::once(&persona.name))
                .any(|token| !token.is_empty() && lowered.contains(&token.to_lowercase()));
            if mentioned {
                return &persona.name;
            }
        }

        // 2. Search intent.
        if self.contains_any(&lowered, &self.config.search_intent_tokens) {
            if let Some(persona) = self.config.by_role(PersonaRole::Searcher) {
                return &persona.name;
            }
        }

        // 3. Explanation intent.
        if self.contains_any(&lowered, &self.config.explain_intent_tokens) {
            if let Some(persona) = self.config.by_role(PersonaRole::Explainer) {
                return &persona.name;
            }
        }

        // 4. Default.
        &self.config.default_persona
    }

    /// Validate a client-requested persona name against the configured set.
    pub fn resolve_override<'a>(&'a self, requested: &str) -> Option<&'a str> {
        self.config.get(requested).map(|p| p.name.as_str())
    }

    pub fn config(&self) -> &PersonasConfig {
        &self.config
    }

    fn contains_any(&self, lowered: &str, tokens: &[String]) -> bool {
        tokens
            .iter()
            .any(|t| !t.is_empty() && lowered.contains(&t.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> PersonaRouter {
        PersonaRouter::new(PersonasConfig::default())
    }

    #[test]
    fn explicit_name_wins() {
        let router = router();
        assert_eq!(router.route("nox, what do you think?"), "nox");
        assert_eq!(router.route("I'd like Claris to answer"), "claris");
        // Explicit names beat intent tokens.
        assert_eq!(router.route("lumina, search for cats"), "lumina");
    }

    #[test]
    fn search_intent_routes_to_searcher() {
        let router = router();
        assert_eq!(router.route("please search latest news"), "nox");
        assert_eq!(router.route("what's the LATEST on this?"), "nox");
    }

    #[test]
    fn explain_intent_routes_to_explainer() {
        let router = router();
        assert_eq!(router.route("explain the reasoning"), "claris");
        assert_eq!(router.route("why does this happen?"), "claris");
    }

    #[test]
    fn default_persona_otherwise() {
        let router = router();
        assert_eq!(router.route("hi"), "lumina");
        assert_eq!(router.route(""), "lumina");
    }

    #[test]
    fn routing_is_deterministic() {
        let router = router();
        for _ in 0..3 {
            assert_eq!(router.route("tell me about rust"), "lumina");
        }
    }

    #[test]
    fn override_resolution() {
        let router = router();
        assert_eq!(router.resolve_override("nox"), Some("nox"));
        assert_eq!(router.resolve_override("ghost"), None);
    }

    #[test]
    fn missing_role_falls_through_to_default() {
        let mut config = PersonasConfig::default();
        config.personas.retain(|p| p.name == "lumina");
        let router = PersonaRouter::new(config);
        // Search intent with no searcher configured: default answers.
        assert_eq!(router.route("search the news"), "lumina");
    }
}
