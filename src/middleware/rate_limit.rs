use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::AsyncCommands;

use crate::{config::Config, error::AppError};

/// Fixed-window request counter per client IP.
#[derive(Clone)]
pub struct RateLimiter {
    redis: Arc<redis::Client>,
    config: Arc<Config>,
}

fn client_ip(req: &Request<Body>) -> String {
    let remote_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());

    req.headers()
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
        })
        .or(remote_ip.as_deref())
        .unwrap_or("unknown")
        .trim()
        .to_string()
}

impl RateLimiter {
    pub fn new(redis: Arc<redis::Client>, config: Config) -> Self {
        Self {
            redis,
            config: Arc::new(config),
        }
    }

    /// Counts this hit and returns the running total for the window.
    async fn hit(&self, ip: &str) -> Result<i64, redis::RedisError> {
        let key = format!("rate_limit:{}", ip);
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let count: i64 = conn.incr(&key, 1).await?;
        if count == 1 {
            let _: () = conn
                .expire(&key, self.config.rate_limit_window().as_secs() as i64)
                .await?;
        }
        Ok(count)
    }

    pub async fn check_rate_limit(self: Arc<Self>, req: Request<Body>, next: Next) -> Response {
        let ip = client_ip(&req);

        match self.hit(&ip).await {
            Ok(count) if count > i64::from(self.config.rate_limit_requests) => {
                tracing::warn!(ip = %ip, count, "rate limit exceeded");
                return AppError::RateLimited(self.config.rate_limit_window().as_secs())
                    .into_response();
            }
            Ok(_) => {}
            // redis trouble must not take the API down with it
            Err(e) => tracing::warn!("rate limiter unavailable: {}", e),
        }

        next.run(req).await
    }
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    limiter.check_rate_limit(req, next).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn prefers_real_ip_then_forwarded_for() {
        let req = request(&[("x-real-ip", "10.0.0.1"), ("x-forwarded-for", "10.0.0.2")]);
        assert_eq!(client_ip(&req), "10.0.0.1");

        let req = request(&[("x-forwarded-for", " 10.0.0.2, 10.0.0.3")]);
        assert_eq!(client_ip(&req), "10.0.0.2");
    }

    #[test]
    fn falls_back_to_connect_info() {
        let mut req = request(&[]);
        assert_eq!(client_ip(&req), "unknown");

        let addr: SocketAddr = "192.168.1.9:4000".parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        assert_eq!(client_ip(&req), "192.168.1.9");
    }
}
