use choir_domain::config::{Config, PersonaRole};

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 8600);
}

#[test]
fn default_personas_cover_all_roles() {
    let config = Config::default();
    assert_eq!(config.personas.personas.len(), 3);
    assert!(config.personas.by_role(PersonaRole::Host).is_some());
    assert!(config.personas.by_role(PersonaRole::Explainer).is_some());
    assert!(config.personas.by_role(PersonaRole::Searcher).is_some());
    assert!(config
        .personas
        .get(&config.personas.default_persona)
        .is_some());
}

#[test]
fn default_memory_tiers_match_contract() {
    let config = Config::default();
    assert_eq!(config.memory.short_term.max_items, 100);
    assert_eq!(config.memory.short_term.ttl_seconds, 3600);
    assert_eq!(config.memory.mid_term.ttl_seconds, 86_400 * 30);
    assert_eq!(config.memory.buffer_turns, 12);
    assert_eq!(config.memory.hot_cache.ttl_seconds, 86_400);
    assert!(!config.memory.hot_cache.enabled);
}

#[test]
fn default_route_limits_match_table() {
    let limits = Config::default().rate_limits;
    assert_eq!(limits.window_secs, 60);
    assert_eq!(limits.register, 5);
    assert_eq!(limits.login, 10);
    assert_eq!(limits.refresh, 20);
    assert_eq!(limits.change_password, 5);
    assert_eq!(limits.chat, 30);
    assert_eq!(limits.chat_stream, 20);
    assert_eq!(limits.memory_search, 60);
    assert_eq!(limits.memory_store, 30);
}

#[test]
fn explicit_zero_host_parses() {
    let toml_str = r#"
[server]
host = "0.0.0.0"
port = 8600
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.host, "0.0.0.0");
}

#[test]
fn partial_persona_toml_fills_defaults() {
    let toml_str = r#"
[personas]
default_persona = "echo"

[[personas.personas]]
name = "echo"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let echo = config.personas.get("echo").expect("persona parsed");
    assert_eq!(echo.role, PersonaRole::Host);
    assert!(!echo.fallback.is_empty());
}

#[test]
fn token_ttls_default_to_hour_and_month() {
    let config = Config::default();
    assert_eq!(config.auth.access_token_ttl_secs, 3600);
    assert_eq!(config.auth.refresh_token_ttl_secs, 2_592_000);
    assert_eq!(config.auth.bcrypt_cost, 12);
}
