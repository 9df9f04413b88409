//! Per-IP request rate limiting.
//!
//! Token bucket per client address. A denied request carries a
//! `Retry-After` estimate so well-behaved clients can back off instead of
//! hammering. Only the socket address identifies the client: forwarding
//! headers are spoofable and this server is not expected to sit behind a
//! trusted proxy.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ConnectInfo;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Take one token, or report how many seconds until one is available.
    fn take(&mut self, rate: f64, burst: f64) -> Result<(), f64> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;

        self.tokens = (self.tokens + elapsed * rate).min(burst);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err((1.0 - self.tokens) / rate)
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<IpAddr, Bucket>>>,
    rate: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(rate: f64, burst: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate,
            burst,
        }
    }

    /// `Ok` consumes a token; `Err` carries the retry-after estimate in
    /// seconds.
    pub async fn try_acquire(&self, ip: IpAddr) -> Result<(), f64> {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(ip)
            .or_insert_with(|| Bucket::new(self.burst));
        bucket.take(self.rate, self.burst)
    }

    /// Evict buckets that have been idle longer than `max_idle_secs`.
    pub async fn purge_idle(&self, max_idle_secs: f64) {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        buckets.retain(|_, bucket| {
            now.duration_since(bucket.last_refill).as_secs_f64() < max_idle_secs
        });
    }
}

pub async fn rate_limit_middleware(
    axum::extract::State(limiter): axum::extract::State<RateLimiter>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(ip) = client_ip(&req) else {
        return next.run(req).await;
    };

    match limiter.try_acquire(ip).await {
        Ok(()) => next.run(req).await,
        Err(retry_after) => {
            warn!(ip = %ip, "Rate limit exceeded");
            let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
            let secs = retry_after.ceil().max(1.0) as u64;
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
        }
    }
}

fn client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|connect_info| connect_info.0.ip())
}
