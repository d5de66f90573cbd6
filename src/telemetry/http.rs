use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::thread;

use serde::Serialize;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

use super::{ScalarPoint, TelemetrySink};

type SeriesMap = BTreeMap<String, Vec<ScalarPoint>>;

#[derive(Serialize)]
struct ScalarsBody<'a> {
    experiment: &'a str,
    series: &'a SeriesMap,
}

#[derive(Serialize)]
struct SeriesBody<'a> {
    experiment: &'a str,
    name: &'a str,
    points: &'a [ScalarPoint],
}

/// Keeps every series in memory and serves them as JSON:
///
/// * `GET /scalars` returns all series.
/// * `GET /scalars/{name}` returns one series, or 404.
///
/// Requests are answered on a background thread; the server is unblocked
/// when the sink is dropped.
///
/// Series are unbounded: one point per `telemetry_interval` steps for the
/// whole run is kept in memory.
pub struct HttpTelemetry {
    series: Arc<Mutex<SeriesMap>>,
    server: Arc<Server>,
}

impl HttpTelemetry {
    pub fn bind(addr: &str, experiment: &str) -> Result<HttpTelemetry, Box<dyn std::error::Error + Send + Sync>> {
        let server = Arc::new(Server::http(addr)?);
        let series: Arc<Mutex<SeriesMap>> = Arc::new(Mutex::new(BTreeMap::new()));

        let worker_server = Arc::clone(&server);
        let worker_series = Arc::clone(&series);
        let experiment = experiment.to_string();
        thread::spawn(move || {
            for request in worker_server.incoming_requests() {
                serve(request, &worker_series, &experiment);
            }
        });

        Ok(HttpTelemetry { series, server })
    }

    /// Copy of everything recorded so far.
    pub fn snapshot(&self) -> SeriesMap {
        self.series.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

impl TelemetrySink for HttpTelemetry {
    fn add_scalar(&mut self, name: &str, value: f64, step: u64) {
        if let Ok(mut map) = self.series.lock() {
            map.entry(name.to_string()).or_default().push(ScalarPoint { step, value });
        }
    }
}

impl Drop for HttpTelemetry {
    fn drop(&mut self) {
        self.server.unblock();
    }
}

fn serve(request: Request, series: &Mutex<SeriesMap>, experiment: &str) {
    let (status, body) = if *request.method() != Method::Get {
        (405, "{\"error\":\"method not allowed\"}".to_string())
    } else {
        match series.lock() {
            Ok(map) => route(request.url(), &map, experiment),
            Err(_) => (500, "{\"error\":\"telemetry state poisoned\"}".to_string()),
        }
    };
    if let Err(e) = request.respond(json_response(status, body)) {
        tracing::debug!("telemetry response failed: {e}");
    }
}

/// Status code and JSON body for a request path.
fn route(url: &str, map: &SeriesMap, experiment: &str) -> (u16, String) {
    let path = url.split('?').next().unwrap_or("");
    let encoded = if path == "/scalars" {
        serde_json::to_string(&ScalarsBody { experiment, series: map })
    } else if let Some(name) = path.strip_prefix("/scalars/") {
        match map.get(name) {
            Some(points) => serde_json::to_string(&SeriesBody { experiment, name, points }),
            None => return (404, format!("{{\"error\":\"unknown series: {}\"}}", name)),
        }
    } else {
        return (404, "{\"error\":\"not found\"}".to_string());
    };
    match encoded {
        Ok(body) => (200, body),
        Err(e) => (500, format!("{{\"error\":\"{}\"}}", e)),
    }
}

fn json_response(status: u16, body: String) -> Response<Cursor<Vec<u8>>> {
    let bytes = body.into_bytes();
    let len = bytes.len();
    let headers: Vec<Header> = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .into_iter()
        .collect();
    Response::new(StatusCode(status), headers, Cursor::new(bytes), Some(len), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SeriesMap {
        let mut map = SeriesMap::new();
        map.insert("train_loss".into(), vec![ScalarPoint { step: 0, value: 2.0 }, ScalarPoint { step: 10, value: 1.5 }]);
        map.insert("learning_rate".into(), vec![ScalarPoint { step: 0, value: 0.001 }]);
        map
    }

    #[test]
    fn routes_all_and_single_series() {
        let map = sample();
        let (status, body) = route("/scalars", &map, "exp");
        assert_eq!(status, 200);
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["experiment"], "exp");
        assert_eq!(v["series"]["train_loss"][1]["step"], 10);

        let (status, body) = route("/scalars/learning_rate?x=1", &map, "exp");
        assert_eq!(status, 200);
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["points"][0]["value"], 0.001);

        assert_eq!(route("/scalars/missing", &map, "exp").0, 404);
        assert_eq!(route("/", &map, "exp").0, 404);
    }

    #[test]
    fn records_points_in_order() {
        let mut sink = HttpTelemetry::bind("127.0.0.1:0", "exp").unwrap();
        sink.add_scalar("train_loss", 3.0, 0);
        sink.add_scalars(&[("train_loss", 2.0), ("learning_rate", 0.01)], 10);
        let snap = sink.snapshot();
        assert_eq!(snap["train_loss"], vec![ScalarPoint { step: 0, value: 3.0 }, ScalarPoint { step: 10, value: 2.0 }]);
        assert_eq!(snap["learning_rate"].len(), 1);
    }

    #[test]
    fn bad_address_fails_to_bind() {
        assert!(HttpTelemetry::bind("not an address", "exp").is_err());
    }
}
