//! in-process stand-ins for the time service, telemetry sink, status
//! service and report endpoint, plus helpers to wire an agent against them.

#![allow(dead_code)]

use axum::{
    extract::{Query, RawQuery, State},
    http::StatusCode,
    routing::get,
    Router,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use telemetry_agent::config::AgentConfig;
use telemetry_agent::hal::MockHal;
use telemetry_agent::network::ManualLink;
use telemetry_agent::sampling::SamplingLoop;

#[derive(Debug, Clone)]
pub struct SinkHit {
    pub params: HashMap<String, String>,
    pub raw_query: String,
}

#[derive(Default)]
pub struct Services {
    pub time_hits: AtomicUsize,
    /// scripted (status, body) answers; falls back to `default_time`
    pub time_script: Mutex<VecDeque<(u16, String)>>,
    pub default_time: Mutex<String>,
    pub sink_hits: Mutex<Vec<SinkHit>>,
    pub sink_status: Mutex<u16>,
    pub status_body: Mutex<String>,
    pub report_hits: Mutex<Vec<HashMap<String, String>>>,
}

impl Services {
    pub fn script_time(&self, status: u16, body: &str) {
        self.time_script.lock().unwrap().push_back((status, body.to_string()));
    }

    pub fn sink_hits(&self) -> Vec<SinkHit> {
        self.sink_hits.lock().unwrap().clone()
    }

    pub fn time_hits(&self) -> usize {
        self.time_hits.load(Ordering::SeqCst)
    }
}

pub struct MockServer {
    pub base: String,
    pub services: Arc<Services>,
}

async fn time_handler(State(s): State<Arc<Services>>) -> (StatusCode, String) {
    s.time_hits.fetch_add(1, Ordering::SeqCst);
    let scripted = s.time_script.lock().unwrap().pop_front();
    let (code, body) = scripted.unwrap_or_else(|| {
        let dt = s.default_time.lock().unwrap().clone();
        (200, format!("{{\"dateTime\":\"{}\",\"timeZone\":\"UTC\"}}", dt))
    });
    (StatusCode::from_u16(code).unwrap(), body)
}

async fn sink_handler(
    State(s): State<Arc<Services>>,
    Query(params): Query<HashMap<String, String>>,
    RawQuery(raw): RawQuery,
) -> (StatusCode, String) {
    s.sink_hits.lock().unwrap().push(SinkHit {
        params,
        raw_query: raw.unwrap_or_default(),
    });
    let code = *s.sink_status.lock().unwrap();
    let body = if code == 200 { "{\"status\":\"ok\"}" } else { "error" };
    (StatusCode::from_u16(code).unwrap(), body.to_string())
}

async fn status_handler(State(s): State<Arc<Services>>) -> String {
    s.status_body.lock().unwrap().clone()
}

async fn report_handler(State(s): State<Arc<Services>>, Query(params): Query<HashMap<String, String>>) -> &'static str {
    s.report_hits.lock().unwrap().push(params);
    "ok"
}

pub async fn start() -> MockServer {
    let services = Arc::new(Services::default());
    *services.default_time.lock().unwrap() = "2025-01-01T12:00:00.000Z".to_string();
    *services.sink_status.lock().unwrap() = 200;
    *services.status_body.lock().unwrap() = "{\"led\":\"OFF\",\"rgb\":0}".to_string();

    let app = Router::new()
        .route("/time", get(time_handler))
        .route("/insert", get(sink_handler))
        .route("/status", get(status_handler))
        .route("/report", get(report_handler))
        .with_state(Arc::clone(&services));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockServer {
        base: format!("http://{}", addr),
        services,
    }
}

pub const BUTTON_CHANNEL: &str = r#"
[[channels]]
name = "button"
node_name = "node_2"
input_pin = 5
trigger = "falling"
sensor = "climate"
sensor_pin = 6
"#;

pub const TILT_CHANNEL: &str = r#"
[[channels]]
name = "tilt"
node_name = "node_1"
input_pin = 7
trigger = "rising"
sensor = "light"
sensor_pin = 0
"#;

/// agent config pointed at the mock server; `extra` is appended verbatim
pub fn config(server: &MockServer, extra: &str) -> AgentConfig {
    let text = format!(
        r#"
[network]
time_api_url = "{base}/time"
sink_url = "{base}/insert"
status_url = "{base}/status"
report_url = "{base}/report"
request_timeout_ms = 2000

[timing]
debounce_ms = 50
dht_min_interval_ms = 0
dht_retry_grace_ms = 5
dht_read_timeout_ms = 2000
loop_interval_ms = 5
time_retry = {{ max_attempts = 0, interval_ms = 10 }}
{extra}
"#,
        base = server.base,
        extra = extra
    );
    AgentConfig::parse(&text).unwrap()
}

pub struct Agent {
    pub hal: Arc<MockHal>,
    pub link: Arc<ManualLink>,
    pub sampling: SamplingLoop,
}

pub fn agent(config: &AgentConfig) -> Agent {
    let hal = Arc::new(MockHal::default());
    let link = Arc::new(ManualLink::new(true));
    let sampling = SamplingLoop::from_config(config, hal.clone(), link.clone(), reqwest::Client::new());
    Agent { hal, link, sampling }
}
