use config::Config;
use feed::FeedHub;
use redis::Client as RedisClient;
use sqlx::PgPool;
use std::sync::Arc;

pub mod client;
pub mod config;
pub mod error;
pub mod feed;
pub mod middleware;
pub mod models;
pub mod result;
pub mod router;
pub mod routes;
pub mod session;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub redis: Arc<RedisClient>,
    pub feed: FeedHub,
}
