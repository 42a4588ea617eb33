use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::ClientConfig;
use crate::models::Coordinate;
use crate::session::{GeolocationError, GeolocationSource};

/// 始终返回同一个坐标
#[derive(Debug, Clone, Copy)]
pub struct FixedGeolocation(pub Coordinate);

impl GeolocationSource for FixedGeolocation {
    async fn current_position(&self) -> Result<Coordinate, GeolocationError> {
        Ok(self.0)
    }
}

#[derive(Deserialize)]
struct Fix {
    #[serde(alias = "lat")]
    latitude: f64,
    #[serde(alias = "lon", alias = "lng")]
    longitude: f64,
}

/// 通过 HTTP 定位服务获取坐标，响应为 `{"latitude": .., "longitude": ..}`
#[derive(Debug, Clone)]
pub struct HttpGeolocation {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpGeolocation {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }
}

impl GeolocationSource for HttpGeolocation {
    async fn current_position(&self) -> Result<Coordinate, GeolocationError> {
        let resp = self
            .http
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                tracing::debug!("Geolocation request failed: {}", e);
                if e.is_timeout() {
                    GeolocationError::Timeout
                } else {
                    GeolocationError::PositionUnavailable
                }
            })?;

        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(GeolocationError::PermissionDenied);
            }
            status if !status.is_success() => {
                tracing::debug!("Geolocation service returned {}", status);
                return Err(GeolocationError::PositionUnavailable);
            }
            _ => {}
        }

        let fix: Fix = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                GeolocationError::Timeout
            } else {
                GeolocationError::PositionUnavailable
            }
        })?;

        Coordinate::new(fix.latitude, fix.longitude).map_err(|e| {
            tracing::warn!("Geolocation service returned {}", e);
            GeolocationError::PositionUnavailable
        })
    }
}

/// 按配置选择的定位来源
#[derive(Debug, Clone)]
pub enum DeviceGeolocation {
    Fixed(FixedGeolocation),
    Http(HttpGeolocation),
    Unsupported,
}

impl DeviceGeolocation {
    /// 固定坐标优先于定位服务；都没有配置时不支持定位
    pub fn from_config(config: &ClientConfig) -> Self {
        if let Some(coordinate) = config.fixed_position {
            DeviceGeolocation::Fixed(FixedGeolocation(coordinate))
        } else if let Some(url) = &config.geo_url {
            DeviceGeolocation::Http(HttpGeolocation::new(url.clone(), config.geo_timeout()))
        } else {
            DeviceGeolocation::Unsupported
        }
    }
}

impl GeolocationSource for DeviceGeolocation {
    async fn current_position(&self) -> Result<Coordinate, GeolocationError> {
        match self {
            DeviceGeolocation::Fixed(source) => source.current_position().await,
            DeviceGeolocation::Http(source) => source.current_position().await,
            DeviceGeolocation::Unsupported => Err(GeolocationError::Unsupported),
        }
    }
}
