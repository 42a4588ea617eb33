use thiserror::Error;

/// 设备无法给出定位结果的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GeolocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable")]
    PositionUnavailable,
    #[error("location request timed out")]
    Timeout,
    #[error("geolocation is not supported")]
    Unsupported,
}

/// 远端存储调用失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server returned {code}: {msg}")]
    Api { code: i32, msg: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else {
            RemoteError::Transport(e.to_string())
        }
    }
}

/// 会话层对外暴露的错误，每次失败只通知一次
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Unable to retrieve your location: {0}")]
    LocationUnavailable(#[from] GeolocationError),
    #[error("Failed to save to the server: {0}")]
    RemoteWriteFailed(RemoteError),
    #[error("Failed to load from the server: {0}")]
    RemoteReadFailed(RemoteError),
}
