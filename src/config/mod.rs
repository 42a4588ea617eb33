use std::env;
use std::time::Duration;

use crate::models::Coordinate;

/// 服务端配置
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL")?,
            jwt_secret: env::var("JWT_SECRET")?,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "::".into()),
            server_port: env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            api_base_uri: env::var("API_BASE_URI").unwrap_or_else(|_| "/api".into()),
            rate_limit_window_secs: env::var("RATE_LIMIT_WINDOW")
                .ok()
                .and_then(|v| v.trim_end_matches('s').parse().ok())
                .unwrap_or(60),
            rate_limit_requests: env::var("RATE_LIMIT_REQUESTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
        })
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

/// 客户端配置
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub token: String,
    /// 固定坐标，格式 "lat,lon"
    pub fixed_position: Option<Coordinate>,
    pub geo_url: Option<String>,
    pub geo_timeout_secs: u64,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        Ok(ClientConfig {
            api_url: env::var("GEOSHARE_API_URL")
                .unwrap_or_else(|_| "http://localhost:3000/api".into()),
            token: env::var("GEOSHARE_TOKEN")?,
            fixed_position: env::var("GEOSHARE_FIXED_POSITION")
                .ok()
                .and_then(|v| parse_position(&v)),
            geo_url: env::var("GEOSHARE_GEO_URL").ok().filter(|v| !v.is_empty()),
            geo_timeout_secs: env::var("GEOSHARE_GEO_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        })
    }

    pub fn geo_timeout(&self) -> Duration {
        Duration::from_secs(self.geo_timeout_secs)
    }
}

fn parse_position(value: &str) -> Option<Coordinate> {
    let (lat, lon) = value.split_once(',')?;
    let lat = lat.trim().parse().ok()?;
    let lon = lon.trim().parse().ok()?;
    match Coordinate::new(lat, lon) {
        Ok(coordinate) => Some(coordinate),
        Err(e) => {
            tracing::warn!("Ignoring GEOSHARE_FIXED_POSITION: {}", e);
            None
        }
    }
}
