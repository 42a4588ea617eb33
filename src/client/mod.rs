//! 基于 HTTP 的远端存储客户端
//!
//! 实现会话需要的 `LocationStore`、`ProfileStore` 和 `ChangeFeed`，
//! 以及私聊相关的接口。服务端通过令牌识别用户，参数中的 user_id 仅用于日志。

mod geolocation;
pub mod sse;


use std::time::Duration;

use futures_util::{StreamExt, future, stream::BoxStream};
use reqwest::{Method, RequestBuilder, header};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::models::{ChangeEvent, Coordinate, DirectMessage, FeedFilter, PeerLocation};
use crate::result::ApiResponse;
use crate::session::{AuthContext, ChangeFeed, LocationStore, ProfileStore, RemoteError};

pub use geolocation::{DeviceGeolocation, FixedGeolocation, HttpGeolocation};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Serialize)]
struct UpsertLocationBody {
    latitude: f64,
    longitude: f64,
    is_active: bool,
}

#[derive(Serialize)]
struct ActiveBody {
    is_active: bool,
}

#[derive(Serialize, Deserialize)]
struct SharingBody {
    is_sharing: bool,
}

#[derive(Serialize)]
struct SendMessageBody<'a> {
    receiver_id: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MeResponse {
    user_id: String,
    username: String,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    /// 发送请求并拆开响应包装
    async fn call<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, RemoteError> {
        let resp = req.timeout(REQUEST_TIMEOUT).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;

        let body: ApiResponse<T> = match serde_json::from_slice(&bytes) {
            Ok(body) => body,
            Err(_) if !status.is_success() => {
                return Err(RemoteError::Api {
                    code: i32::from(status.as_u16()),
                    msg: status.canonical_reason().unwrap_or("error").to_string(),
                });
            }
            Err(e) => return Err(RemoteError::Decode(e.to_string())),
        };

        if body.code != 0 {
            return Err(RemoteError::Api {
                code: body.code,
                msg: body.msg,
            });
        }
        body.resp_data
            .ok_or_else(|| RemoteError::Decode("missing resp_data".into()))
    }

    /// 打开 SSE 连接，返回解码后的变更事件
    async fn open_stream(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<BoxStream<'static, ChangeEvent>, RemoteError> {
        let resp = self
            .request(Method::GET, path)
            .query(query)
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RemoteError::Api {
                code: i32::from(status.as_u16()),
                msg: format!("cannot open {}", path),
            });
        }

        let events = sse::data_frames(resp.bytes_stream()).filter_map(|data| {
            let event = serde_json::from_str::<ChangeEvent>(&data)
                .map_err(|e| tracing::warn!("Skipping malformed change event: {}", e))
                .ok();
            future::ready(event)
        });
        Ok(events.boxed())
    }

    /// 当前令牌对应的用户
    pub async fn me(&self) -> Result<AuthContext, RemoteError> {
        let me: MeResponse = self.call(self.request(Method::GET, "/profiles/me")).await?;
        Ok(AuthContext {
            user_id: me.user_id,
            username: Some(me.username),
        })
    }

    /// 单个用户的活跃位置
    pub async fn read_active_location_of(
        &self,
        user_id: &str,
    ) -> Result<Option<PeerLocation>, RemoteError> {
        let locations: Vec<PeerLocation> = self
            .call(
                self.request(Method::GET, "/locations/active")
                    .query(&[("user_id", user_id)]),
            )
            .await?;
        Ok(locations.into_iter().next())
    }

    pub async fn send_message(
        &self,
        receiver_id: &str,
        content: &str,
    ) -> Result<DirectMessage, RemoteError> {
        self.call(
            self.request(Method::POST, "/messages")
                .json(&SendMessageBody {
                    receiver_id,
                    content,
                }),
        )
        .await
    }

    /// 与对方的历史消息，按时间正序
    pub async fn conversation(&self, peer_id: &str) -> Result<Vec<DirectMessage>, RemoteError> {
        self.call(
            self.request(Method::GET, "/messages")
                .query(&[("peer_id", peer_id)]),
        )
        .await
    }

    pub async fn subscribe_conversation(
        &self,
        peer_id: &str,
    ) -> Result<BoxStream<'static, DirectMessage>, RemoteError> {
        let events = self
            .open_stream("/messages/changes", &[("peer_id", peer_id.to_string())])
            .await?;

        Ok(events
            .filter_map(|event| {
                future::ready(match event {
                    ChangeEvent::Messages { message, .. } => Some(message),
                    ChangeEvent::Locations { .. } => None,
                })
            })
            .boxed())
    }
}

impl LocationStore for ApiClient {
    async fn upsert_location(
        &self,
        user_id: &str,
        coordinate: Coordinate,
        is_active: bool,
    ) -> Result<(), RemoteError> {
        tracing::debug!("Uploading location for {}", user_id);
        let _: serde_json::Value = self
            .call(
                self.request(Method::PUT, "/locations")
                    .json(&UpsertLocationBody {
                        latitude: coordinate.latitude,
                        longitude: coordinate.longitude,
                        is_active,
                    }),
            )
            .await?;
        Ok(())
    }

    async fn update_location_active(
        &self,
        user_id: &str,
        is_active: bool,
    ) -> Result<(), RemoteError> {
        tracing::debug!("Setting location active={} for {}", is_active, user_id);
        let _: serde_json::Value = self
            .call(
                self.request(Method::PATCH, "/locations/active")
                    .json(&ActiveBody { is_active }),
            )
            .await?;
        Ok(())
    }

    async fn read_active_locations(&self) -> Result<Vec<PeerLocation>, RemoteError> {
        self.call(self.request(Method::GET, "/locations/active"))
            .await
    }
}

impl ProfileStore for ApiClient {
    async fn update_sharing_flag(&self, user_id: &str, is_sharing: bool) -> Result<(), RemoteError> {
        tracing::debug!("Setting sharing flag={} for {}", is_sharing, user_id);
        let _: SharingBody = self
            .call(
                self.request(Method::PUT, "/profiles/me/sharing")
                    .json(&SharingBody { is_sharing }),
            )
            .await?;
        Ok(())
    }

    async fn read_sharing_flag(&self, user_id: &str) -> Result<bool, RemoteError> {
        tracing::debug!("Reading sharing flag for {}", user_id);
        let status: SharingBody = self
            .call(self.request(Method::GET, "/profiles/me/sharing"))
            .await?;
        Ok(status.is_sharing)
    }
}

impl ChangeFeed for ApiClient {
    async fn subscribe_locations(
        &self,
        filter: FeedFilter,
    ) -> Result<BoxStream<'static, ChangeEvent>, RemoteError> {
        let active = matches!(filter, FeedFilter::ActiveOnly);
        self.open_stream("/locations/changes", &[("active", active.to_string())])
            .await
    }
}
