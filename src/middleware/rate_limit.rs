use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::AsyncCommands;

use crate::{
    config::Config,
    utils::{error_codes, error_to_api_response},
};

const RATE_LIMIT_PREFIX: &str = "geoshare:rate:";

/// 按客户端 IP 的固定窗口限流
#[derive(Clone)]
pub struct RateLimiter {
    redis: Arc<redis::Client>,
    config: Arc<Config>,
}

impl RateLimiter {
    pub fn new(redis: Arc<redis::Client>, config: Config) -> Self {
        Self {
            redis,
            config: Arc::new(config),
        }
    }

    /// 返回当前窗口内的请求数
    async fn hit(&self, ip: &str) -> redis::RedisResult<u32> {
        let key = format!("{}{}", RATE_LIMIT_PREFIX, ip);
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let count: u32 = conn.incr(&key, 1).await?;
        if count == 1 {
            let _: () = conn
                .expire(&key, self.config.rate_limit_window().as_secs() as i64)
                .await?;
        }
        Ok(count)
    }
}

/// 代理头优先，其次是连接地址
fn client_ip(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').map(str::trim).find(|ip| !ip.is_empty()))
        })
        .map(|ip| ip.trim().to_string())
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".into())
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let ip = client_ip(req.headers(), remote);

    let count = match limiter.hit(&ip).await {
        Ok(count) => count,
        Err(e) => {
            // Redis 不可用时放行
            tracing::warn!("Rate limiter unavailable: {}", e);
            return Ok(next.run(req).await);
        }
    };

    if count > limiter.config.rate_limit_requests {
        tracing::info!("Rate limit exceeded for {}", ip);
        return Ok((
            StatusCode::TOO_MANY_REQUESTS,
            error_to_api_response::<()>(
                error_codes::RATE_LIMIT,
                format!(
                    "请求过于频繁，请在{}秒后重试",
                    limiter.config.rate_limit_window().as_secs()
                ),
            ),
        )
            .into_response());
    }

    Ok(next.run(req).await)
}
