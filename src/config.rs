use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub realtime: RealtimeConfig,
    pub chat: ChatConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Outbound frames buffered per connection before events are dropped.
    pub client_buffer: usize,
    pub ping_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub default_page_size: i64,
    pub max_page_size: i64,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub max_bytes: usize,
    pub public_base_url: String,
    pub allowed_extensions: Vec<String>,
}

pub const DEFAULT_ALLOWED_EXTENSIONS: [&str; 8] =
    ["jpg", "jpeg", "png", "gif", "pdf", "doc", "docx", "txt"];

impl Config {
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(5000),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                    .map(|v| split_list(&v))
                    .unwrap_or_else(|_| {
                        vec![
                            "http://localhost:3000".to_string(),
                            "http://localhost:5173".to_string(),
                        ]
                    }),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://codesprint_chat.db".to_string()),
                max_connections: env::var("DB_MAX_CONNS")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(8),
                busy_timeout: Duration::from_secs(
                    env::var("DB_BUSY_TIMEOUT_SECS")
                        .ok()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(5),
                ),
            },
            realtime: RealtimeConfig {
                client_buffer: env::var("WS_CLIENT_BUFFER")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(256),
                ping_interval: Duration::from_secs(
                    env::var("WS_PING_INTERVAL_SECS")
                        .ok()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(30),
                ),
            },
            chat: ChatConfig {
                default_page_size: env::var("CHAT_DEFAULT_PAGE_SIZE")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(50),
                max_page_size: env::var("CHAT_MAX_PAGE_SIZE")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(100),
            },
            upload: UploadConfig {
                max_bytes: env::var("UPLOAD_MAX_BYTES")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(5 * 1024 * 1024), // 5 MiB
                public_base_url: env::var("UPLOAD_PUBLIC_BASE_URL")
                    .unwrap_or_else(|_| "http://localhost:5000/uploads".to_string()),
                allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                    .iter()
                    .map(|e| e.to_string())
                    .collect(),
            },
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for Config {
    /// Defaults without consulting the environment; used by tests and tooling.
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 5000,
                environment: "test".to_string(),
                allowed_origins: vec!["http://localhost:3000".to_string()],
            },
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
                busy_timeout: Duration::from_secs(5),
            },
            realtime: RealtimeConfig {
                client_buffer: 256,
                ping_interval: Duration::from_secs(30),
            },
            chat: ChatConfig {
                default_page_size: 50,
                max_page_size: 100,
            },
            upload: UploadConfig {
                max_bytes: 5 * 1024 * 1024,
                public_base_url: "http://localhost:5000/uploads".to_string(),
                allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                    .iter()
                    .map(|e| e.to_string())
                    .collect(),
            },
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
