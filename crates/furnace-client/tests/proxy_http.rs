use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use furnace_client::backend::{HttpBackend, ProfilingBackend, StopParams};
use furnace_client::registry::Target;
use furnace_client::runner::{self, RecordRequest, StopTrigger};
use furnace_client::selection::{ColorScheme, RecordingOptions};
use furnace_client::session::{Phase, SessionController, SessionSettings};

const REGISTERED: &str = r#"[{"namespace":"default","podName":"a"},{"namespace":"default","podName":"b"},{"namespace":"batch","podName":"worker-0"}]"#;

/// Minimal stand-in for the furnace proxy: one request per connection.
struct FakeProxy {
    base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
    statuses: Arc<Mutex<VecDeque<&'static str>>>,
}

#[derive(Clone, Copy)]
struct Behaviour {
    start_code: u16,
    stop_code: u16,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            start_code: 200,
            stop_code: 200,
        }
    }
}

impl FakeProxy {
    fn spawn(behaviour: Behaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind proxy");
        let port = listener.local_addr().expect("local addr").port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let statuses = Arc::new(Mutex::new(VecDeque::new()));
        let (reqs, stats) = (Arc::clone(&requests), Arc::clone(&statuses));
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                serve(stream, behaviour, &reqs, &stats);
            }
        });
        Self {
            base_url: format!("http://127.0.0.1:{port}"),
            requests,
            statuses,
        }
    }

    fn script_statuses(&self, seq: &[&'static str]) {
        self.statuses.lock().unwrap().extend(seq.iter().copied());
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.requests().iter().filter(|r| r.starts_with(prefix)).count()
    }

    fn backend(&self) -> HttpBackend {
        HttpBackend::new(&self.base_url, Duration::from_secs(5)).expect("backend")
    }
}

fn serve(
    stream: TcpStream,
    behaviour: Behaviour,
    requests: &Mutex<Vec<String>>,
    statuses: &Mutex<VecDeque<&'static str>>,
) {
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    loop {
        let mut header = String::new();
        match reader.read_line(&mut header) {
            Ok(0) | Err(_) => break,
            Ok(_) if header == "\r\n" => break,
            Ok(_) => {}
        }
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let uri = parts.next().unwrap_or_default().to_string();
    requests.lock().unwrap().push(format!("{method} {uri}"));

    let path = uri.split('?').next().unwrap_or_default();
    let (code, body): (u16, String) = match (method.as_str(), path) {
        ("GET", "/proxy/registered") => (200, REGISTERED.to_string()),
        ("POST", "/proxy/start") => (behaviour.start_code, "perf is not installed".into()),
        ("POST", "/proxy/stop") => (behaviour.stop_code, String::new()),
        ("GET", "/proxy/status") => {
            let next = statuses.lock().unwrap().pop_front().unwrap_or("idle");
            (200, format!("{next}\n"))
        }
        ("GET", "/proxy/chart") => (200, "<svg>flame</svg>".into()),
        _ => (404, "not found".into()),
    };
    let reason = if code < 300 { "OK" } else { "Error" };
    let response = format!(
        "HTTP/1.1 {code} {reason}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let mut stream = stream;
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

fn wait_for(timeout: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("timed out waiting for condition");
}

fn fast_settings() -> SessionSettings {
    SessionSettings {
        registry_refresh: Duration::from_millis(200),
        status_poll: Duration::from_millis(50),
        ..SessionSettings::default()
    }
}

#[test]
fn lists_registered_targets() {
    let proxy = FakeProxy::spawn(Behaviour::default());
    let targets = proxy.backend().list_targets().unwrap();
    assert_eq!(targets.len(), 3);
    assert!(targets.contains(&Target::new("batch", "worker-0")));
    assert_eq!(proxy.requests(), vec!["GET /proxy/registered".to_string()]);
}

#[test]
fn stop_posts_every_option() {
    let proxy = FakeProxy::spawn(Behaviour::default());
    let opts = RecordingOptions::default()
        .with_colors(ColorScheme::Hot)
        .with_inverted(true);
    proxy
        .backend()
        .stop(&Target::new("default", "a"), &StopParams::new(1000, 20, opts))
        .unwrap();
    assert_eq!(
        proxy.requests(),
        vec![
            "POST /proxy/stop?namespace=default&pod=a&width=980&colors=hot&inverted=true&symfs=false"
                .to_string()
        ]
    );
}

#[test]
fn status_body_is_trimmed() {
    let proxy = FakeProxy::spawn(Behaviour::default());
    proxy.script_statuses(&["stackcollapse"]);
    let raw = proxy.backend().status(&Target::new("default", "a")).unwrap();
    assert_eq!(raw, "stackcollapse");
}

#[test]
fn error_status_carries_code_and_body() {
    let proxy = FakeProxy::spawn(Behaviour {
        start_code: 500,
        ..Behaviour::default()
    });
    let err = proxy
        .backend()
        .start(&Target::new("default", "a"))
        .unwrap_err()
        .to_string();
    assert!(err.contains("500"), "{err}");
    assert!(err.contains("perf is not installed"), "{err}");
}

#[test]
fn chart_download_returns_svg() {
    let proxy = FakeProxy::spawn(Behaviour::default());
    let body = proxy
        .backend()
        .chart(&Target::new("default", "a"), 1_700_000_000_000, true)
        .unwrap();
    assert_eq!(body, b"<svg>flame</svg>");
    assert_eq!(
        proxy.requests(),
        vec!["GET /proxy/chart?namespace=default&pod=a&time=1700000000000&download=true".to_string()]
    );
}

#[test]
fn unreachable_proxy_is_an_error() {
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let backend = HttpBackend::new(&format!("http://127.0.0.1:{port}"), Duration::from_secs(2)).unwrap();
    assert!(backend.list_targets().is_err());
}

#[test]
fn threaded_controller_fills_registry_and_refreshes() {
    let proxy = FakeProxy::spawn(Behaviour::default());
    let mut ctl = SessionController::threaded(Arc::new(proxy.backend()), fast_settings());
    ctl.open(Instant::now());
    wait_for(Duration::from_secs(5), || {
        ctl.tick(Instant::now());
        !ctl.registry().is_empty()
    });
    assert_eq!(ctl.registry().namespaces(), vec!["batch", "default"]);
    assert_eq!(ctl.registry().targets_in("default"), vec!["a", "b"]);

    wait_for(Duration::from_secs(5), || {
        ctl.tick(Instant::now());
        proxy.count("GET /proxy/registered") >= 2
    });
    ctl.shutdown();
}

#[test]
fn threaded_controller_runs_a_full_cycle() {
    let proxy = FakeProxy::spawn(Behaviour::default());
    proxy.script_statuses(&["perf record", "perf script", "flamegraph", "idle"]);
    let mut ctl = SessionController::threaded(Arc::new(proxy.backend()), fast_settings());
    ctl.select_namespace("default").unwrap();
    ctl.select_target("a").unwrap();

    ctl.start().unwrap();
    wait_for(Duration::from_secs(5), || {
        ctl.tick(Instant::now());
        !ctl.busy()
    });
    assert_eq!(ctl.phase(), Phase::Recording);

    ctl.stop(1000).unwrap();
    wait_for(Duration::from_secs(10), || {
        ctl.tick(Instant::now());
        ctl.phase() == Phase::ArtifactReady
    });
    let polls = proxy.count("GET /proxy/status");
    assert_eq!(polls, 4);
    let artifact = ctl.artifact().expect("artifact");
    assert_eq!(artifact.target, Target::new("default", "a"));

    let until = Instant::now() + Duration::from_millis(300);
    while Instant::now() < until {
        ctl.tick(Instant::now());
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(proxy.count("GET /proxy/status"), polls);
}

#[test]
fn headless_record_writes_chart() {
    let proxy = FakeProxy::spawn(Behaviour::default());
    proxy.script_statuses(&["perf script", "stackcollapse", "idle"]);
    let tmp = tempfile::tempdir().expect("tempdir");
    let out = tmp.path().join("charts").join("a.svg");

    let req = RecordRequest {
        target: Target::new("default", "a"),
        options: RecordingOptions::default().with_colors(ColorScheme::Java),
        viewport_width: 1300,
        output: Some(out.clone()),
    };
    let outcome = runner::record(
        Arc::new(proxy.backend()),
        fast_settings(),
        &req,
        StopTrigger::After(Duration::from_millis(100)),
    )
    .unwrap();

    assert_eq!(outcome.path, out);
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "<svg>flame</svg>");
    assert!(outcome.artifact.epoch > 0);

    let reqs = proxy.requests();
    assert_eq!(reqs[0], "POST /proxy/start?namespace=default&pod=a");
    assert!(reqs.contains(
        &"POST /proxy/stop?namespace=default&pod=a&width=1280&colors=java&inverted=true&symfs=false"
            .to_string()
    ));
    let chart = reqs.last().unwrap();
    assert!(chart.starts_with("GET /proxy/chart?namespace=default&pod=a&time="), "{chart}");
    assert!(chart.ends_with("&download=true"), "{chart}");
}

#[test]
fn headless_record_reports_start_failure() {
    let proxy = FakeProxy::spawn(Behaviour {
        start_code: 503,
        ..Behaviour::default()
    });
    let req = RecordRequest {
        target: Target::new("default", "a"),
        options: RecordingOptions::default(),
        viewport_width: 1000,
        output: None,
    };
    let err = runner::record(
        Arc::new(proxy.backend()),
        fast_settings(),
        &req,
        StopTrigger::After(Duration::from_millis(10)),
    )
    .unwrap_err()
    .to_string();
    assert!(err.contains("start on default/a failed"), "{err}");
    assert_eq!(proxy.count("POST /proxy/stop"), 0);
}

#[test]
fn headless_record_reports_stop_failure() {
    let proxy = FakeProxy::spawn(Behaviour {
        stop_code: 500,
        ..Behaviour::default()
    });
    let req = RecordRequest {
        target: Target::new("default", "a"),
        options: RecordingOptions::default(),
        viewport_width: 1000,
        output: None,
    };
    let err = runner::record(
        Arc::new(proxy.backend()),
        fast_settings(),
        &req,
        StopTrigger::After(Duration::from_millis(10)),
    )
    .unwrap_err()
    .to_string();
    assert!(err.contains("stop on default/a failed"), "{err}");
    assert_eq!(proxy.count("GET /proxy/status"), 0);
}
