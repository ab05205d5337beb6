use std::env;
use std::path::PathBuf;

#[derive(Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub sqlite_path: String,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub token_header: String,
    pub image_base_path: String,
    pub view_cookie_max_age: i64,
    pub page_size: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let server_port = env::var("SERVER_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(38322);

        let sqlite_path =
            env::var("SQLITE_PATH").unwrap_or_else(|_| "./data/market.sqlite".to_string());
        let database_url = env::var("DATABASE_URL").ok();

        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| "kT3vQm9ZpX2rLw8N".to_string());

        let token_header = env::var("TOKEN_HEADER").unwrap_or_else(|_| "token".to_string());

        let image_base_path =
            env::var("IMAGE_BASE_PATH").unwrap_or_else(|_| "./data/".to_string());

        let view_cookie_max_age = env::var("VIEW_COOKIE_MAX_AGE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(60);

        let page_size = env::var("PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(5);

        Self {
            server_port,
            sqlite_path,
            database_url,
            jwt_secret,
            token_header,
            image_base_path,
            view_cookie_max_age,
            page_size,
        }
    }

    pub fn database_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }

        let path = self.sqlite_path.trim();
        if path.starts_with("sqlite:") || path.starts_with("file:") {
            return path.to_string();
        }
        format!("sqlite://{}?mode=rwc", path)
    }

    pub fn image_base_path(&self) -> PathBuf {
        PathBuf::from(&self.image_base_path)
    }
}
