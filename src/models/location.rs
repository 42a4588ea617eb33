use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 经纬度坐标，构造时校验取值范围
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("invalid coordinate ({latitude}, {longitude})")]
pub struct InvalidCoordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, InvalidCoordinate> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);

        if valid {
            Ok(Self {
                latitude,
                longitude,
            })
        } else {
            Err(InvalidCoordinate {
                latitude,
                longitude,
            })
        }
    }

    /// 复制坐标时使用的文本格式，保留六位小数
    pub fn clipboard_text(&self) -> String {
        format!("{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerProfile {
    pub username: String,
    pub avatar_url: Option<String>,
}

/// 某个用户最近一次上报的位置记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerLocation {
    pub location_id: String,
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<PeerProfile>,
}

impl PeerLocation {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    pub fn display_name(&self) -> &str {
        self.profile
            .as_ref()
            .map(|p| p.username.as_str())
            .unwrap_or("Unknown user")
    }
}
