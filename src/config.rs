//! Application configuration
//!
//! Centralized configuration management with environment variable support
//! and sensible defaults.

use std::env;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Chat database configuration
    pub database: DatabaseConfig,
    /// LLM provider configuration
    pub providers: ProvidersConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind the server to
    pub port: u16,
    /// Host address to bind to
    pub host: String,
}

/// Authentication configuration
#[derive(Clone)]
pub struct AuthConfig {
    /// Shared secret used to verify bearer tokens (HS256)
    pub jwt_secret: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never log the secret itself
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .finish()
    }
}

/// Chat database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: String,
}

/// LLM provider configuration
#[derive(Debug, Clone)]
pub struct ProvidersConfig {
    /// Base URL of the Ollama server (e.g. http://localhost:11434)
    pub ollama_base_url: Option<String>,
    /// Base URL of the OpenAI-compatible API
    pub openai_base_url: Option<String>,
    /// API key for the OpenAI-compatible API
    pub openai_api_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                port: env::var("PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(8080),
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            },
            auth: AuthConfig {
                jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| "dev-secret".to_string()),
            },
            database: DatabaseConfig {
                path: env::var("CHAT_DB_PATH").unwrap_or_else(|_| {
                    // Default to ~/.chat-relay or current directory
                    if let Some(home) = env::var_os("HOME") {
                        format!("{}/.chat-relay/chats.db", home.to_string_lossy())
                    } else {
                        ".chat-relay/chats.db".to_string()
                    }
                }),
            },
            providers: ProvidersConfig {
                ollama_base_url: env::var("OLLAMA_BASE_URL").ok(),
                openai_base_url: env::var("OPENAI_API_BASE_URL").ok(),
                openai_api_key: env::var("OPENAI_API_KEY").ok(),
            },
        }
    }

    /// Get the server address as a string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
