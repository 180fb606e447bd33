#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, HeaderValue, Method, Request},
    response::Response,
    Router,
};
use callback_relay::{
    DispatchError, Dispatcher, HttpSettings, Notification, RateLimitSettings, CALLBACK_PATH,
};
use lettre::message::Mailbox;
use std::{
    io,
    num::NonZeroU32,
    sync::{Arc, Mutex},
    time::Duration,
};
use tower::ServiceExt;

pub const ALLOWED_ORIGIN: &str = "https://www.example.com";

#[derive(Debug, Clone)]
pub struct Delivery {
    pub notification: Notification,
    pub recipient_override: Option<Mailbox>,
}

/// Records every notification it is asked to deliver; optionally fails each one.
#[derive(Default)]
pub struct RecordingDispatcher {
    deliveries: Mutex<Vec<Delivery>>,
    fail_with_timeout: Option<Duration>,
}

impl RecordingDispatcher {
    pub fn failing_with_timeout(timeout: Duration) -> Self {
        Self {
            fail_with_timeout: Some(timeout),
            ..Default::default()
        }
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn deliver(
        &self,
        notification: &Notification,
        recipient_override: Option<&Mailbox>,
    ) -> Result<(), DispatchError> {
        self.deliveries.lock().unwrap().push(Delivery {
            notification: notification.clone(),
            recipient_override: recipient_override.cloned(),
        });
        match self.fail_with_timeout {
            Some(timeout) => Err(DispatchError::TimedOut(timeout)),
            None => Ok(()),
        }
    }
}

pub fn http_settings() -> HttpSettings {
    HttpSettings {
        port: 0,
        allowed_origin: HeaderValue::from_static(ALLOWED_ORIGIN),
        rate_limit: RateLimitSettings::default(),
    }
}

pub fn http_settings_with_rate_limit(max_requests: u32) -> HttpSettings {
    HttpSettings {
        rate_limit: RateLimitSettings {
            max_requests: NonZeroU32::new(max_requests).unwrap(),
            window: Duration::from_secs(60 * 60),
        },
        ..http_settings()
    }
}

pub async fn post_callback(app: &Router, body: impl Into<String>) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(CALLBACK_PATH)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.into()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn json_body(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Collects formatted log output so tests can check what the server logged.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        let logs = self.clone();
        tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || logs.clone())
            .finish()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
