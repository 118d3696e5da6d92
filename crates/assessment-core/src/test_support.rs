// Shared fixtures for unit tests: sample results, a tiny_http mock sink,
// and a scripted in-process channel.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::channel::Channel;
use crate::types::{empty_scores, ChannelId, DeliveryOutcome, GiftType, ScoreResult};

pub fn sample_result(email: Option<&str>) -> ScoreResult {
    let mut scores = empty_scores();
    for (gift, total) in [
        (GiftType::Perceiver, 30),
        (GiftType::Server, 25),
        (GiftType::Teacher, 58),
        (GiftType::Exhorter, 40),
        (GiftType::Giver, 51),
        (GiftType::Administrator, 35),
        (GiftType::Compassion, 20),
    ] {
        scores.insert(gift, total);
    }
    ScoreResult {
        id: "r-1".into(),
        user_id: "u-1".into(),
        scores,
        dominant_gift: GiftType::Teacher,
        secondary_gift: GiftType::Giver,
        timestamp: 1_700_000_000_000,
        full_name: Some("Ada Lovelace".into()),
        email: email.map(str::to_string),
        first_name: Some("Ada".into()),
    }
}

/// URL on a local port nothing listens on
pub fn unreachable_url() -> String {
    let port = TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .unwrap_or(9);
    format!("http://127.0.0.1:{}/unreachable", port)
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub body: String,
}

/// Local HTTP sink recording every request it receives
pub struct MockSink {
    base: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockSink {
    /// Reply to every request with a fixed status and body
    pub fn respond(status: u16, body: &'static str) -> Self {
        Self::with(move |_| (status, body.to_string()))
    }

    /// Reply 200 only after `delay`
    pub fn slow(delay: Duration) -> Self {
        Self::with(move |_| {
            std::thread::sleep(delay);
            (200, "OK".to_string())
        })
    }

    /// Reply based on the request body
    pub fn with<F>(responder: F) -> Self
    where
        F: Fn(&str) -> (u16, String) + Send + 'static,
    {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("bind mock sink");
        let addr = server.server_addr().to_ip().expect("mock sink ip address");
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        std::thread::spawn(move || {
            for mut request in server.incoming_requests() {
                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);
                recorded.lock().unwrap().push(RecordedRequest {
                    path: request.url().to_string(),
                    body: body.clone(),
                });

                let (status, reply) = responder(&body);
                let response = tiny_http::Response::from_string(reply).with_status_code(status);
                let _ = request.respond(response);
            }
        });

        Self {
            base: format!("http://{}", addr),
            requests,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// In-process channel returning queued outcomes (then a default)
pub struct ScriptedChannel {
    id: ChannelId,
    outcomes: Mutex<VecDeque<bool>>,
    default_success: bool,
    delay: Duration,
    calls: AtomicUsize,
    delivered: Mutex<Vec<String>>,
}

impl ScriptedChannel {
    pub fn new(id: ChannelId, default_success: bool) -> Self {
        Self {
            id,
            outcomes: Mutex::new(VecDeque::new()),
            default_success,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn with_script(self, outcomes: &[bool]) -> Self {
        *self.outcomes.lock().unwrap() = outcomes.iter().copied().collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Result ids this channel was asked to deliver
    pub fn delivered_ids(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for ScriptedChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    async fn deliver(&self, result: &ScoreResult) -> DeliveryOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.delivered.lock().unwrap().push(result.id.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let success = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default_success);
        if success {
            DeliveryOutcome::delivered(format!("{} ok", self.id))
        } else {
            DeliveryOutcome::failed(format!("{} sink unavailable", self.id))
        }
    }
}
