use super::*;
use serial_test::serial;

#[test]
fn default_config_is_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.chunking.chunk_size, 500);
    assert_eq!(config.chunking.chunk_overlap, 50);
    assert_eq!(config.retrieval.k, 3);
    assert_eq!(config.server.port, 9999);
}

#[test]
fn overlap_must_be_smaller_than_chunk_size() {
    let mut config = Config::default();
    config.chunking.chunk_overlap = config.chunking.chunk_size;

    let result = config.validate();
    assert!(matches!(result, Err(ConfigError::OverlapTooLarge(_, _))));
}

#[test]
fn rejects_empty_generation_model() {
    let mut config = Config::default();
    config.groq.model = "  ".to_string();

    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidModel(_))
    ));
}

#[test]
fn rejects_zero_retriever_k() {
    let mut config = Config::default();
    config.retrieval.k = 0;

    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidRetrieverK(0))
    ));
}

#[test]
fn rejects_bad_embedding_protocol() {
    let mut config = Config::default();
    config.embedding.protocol = "ftp".to_string();

    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidProtocol(_))
    ));
}

#[test]
fn embedding_url_from_parts() {
    let embedding = EmbeddingConfig::default();
    let url = embedding.embedding_url().expect("should build url");
    assert_eq!(url.host_str(), Some("localhost"));
    assert_eq!(url.port(), Some(11434));
}

#[test]
fn parses_toml_sections() {
    let content = r#"
[server]
port = 8080
allowed_origins = ["https://example.com"]

[groq]
model = "llama-3.3-70b-versatile"

[chunking]
chunk_size = 800
chunk_overlap = 80

[retrieval]
k = 5
"#;
    let config: Config = toml::from_str(content).expect("should parse");
    assert_eq!(config.server.port, 8080);
    assert_eq!(
        config.server.allowed_origins,
        vec!["https://example.com".to_string()]
    );
    assert_eq!(config.groq.model, "llama-3.3-70b-versatile");
    assert_eq!(config.chunking.chunk_size, 800);
    assert_eq!(config.retrieval.k, 5);
    // Unspecified sections fall back to defaults.
    assert_eq!(config.embedding.port, 11434);
}

#[test]
#[serial]
fn env_overrides_win_over_defaults() {
    unsafe {
        std::env::set_var("GROQ_API_KEY", "test-key");
        std::env::set_var("GROQ_MODEL", "env-model");
        std::env::set_var("CHUNK_SIZE", "600");
        std::env::set_var("RETRIEVER_K", "7");
        std::env::set_var("RELOAD_TOKEN", "secret");
        std::env::set_var("ALLOWED_ORIGINS", "https://a.example, https://b.example");
    }

    let mut config = Config::default();
    config.apply_env_overrides();

    unsafe {
        std::env::remove_var("GROQ_API_KEY");
        std::env::remove_var("GROQ_MODEL");
        std::env::remove_var("CHUNK_SIZE");
        std::env::remove_var("RETRIEVER_K");
        std::env::remove_var("RELOAD_TOKEN");
        std::env::remove_var("ALLOWED_ORIGINS");
    }

    assert_eq!(config.groq.api_key, "test-key");
    assert_eq!(config.groq.model, "env-model");
    assert_eq!(config.chunking.chunk_size, 600);
    assert_eq!(config.retrieval.k, 7);
    assert_eq!(config.server.reload_token, Some("secret".to_string()));
    assert_eq!(
        config.server.allowed_origins,
        vec![
            "https://a.example".to_string(),
            "https://b.example".to_string()
        ]
    );
}

#[test]
#[serial]
fn malformed_env_numbers_are_ignored() {
    unsafe {
        std::env::set_var("CHUNK_SIZE", "not-a-number");
    }

    let mut config = Config::default();
    config.apply_env_overrides();

    unsafe {
        std::env::remove_var("CHUNK_SIZE");
    }

    assert_eq!(config.chunking.chunk_size, 500);
}
