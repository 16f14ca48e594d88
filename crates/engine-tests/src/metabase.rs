//! Loopback HTTP stub speaking the subset of the Metabase API the connector uses.

use serde_json::{Value, json};
use std::{
    collections::HashSet,
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tracing::debug;

pub const STUB_DATABASE_ID: u64 = 7;
pub const STUB_DATABASE_NAME: &str = "Growth Team Clickhouse Connection";
pub const NATIVE_CARD: u64 = 5;
pub const GUI_CARD: u64 = 6;

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub session: Option<String>,
    pub body: Value,
}

impl Recorded {
    /// SQL text of a `/api/dataset` request.
    pub fn sql(&self) -> Option<&str> {
        self.body["native"]["query"].as_str()
    }
}

#[derive(Default)]
struct StubState {
    requests: Vec<Recorded>,
    next_token: usize,
    valid: HashSet<String>,
    datasets: usize,
}

struct Stub {
    total_rows: u64,
    revoke_after: Option<usize>,
    state: Mutex<StubState>,
}

struct Reply {
    status: u16,
    body: Value,
}

impl Reply {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn status(status: u16) -> Self {
        Self {
            status,
            body: json!({ "message": "stub error" }),
        }
    }
}

pub struct StubMetabase {
    addr: SocketAddr,
    stub: Arc<Stub>,
    task: JoinHandle<()>,
}

impl StubMetabase {
    pub async fn start(total_rows: u64) -> Self {
        Self::spawn(total_rows, None).await
    }

    /// Invalidates the calling token once `datasets` dataset requests were served.
    pub async fn revoking_after(total_rows: u64, datasets: usize) -> Self {
        Self::spawn(total_rows, Some(datasets)).await
    }

    async fn spawn(total_rows: u64, revoke_after: Option<usize>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stub = Arc::new(Stub {
            total_rows,
            revoke_after,
            state: Mutex::new(StubState::default()),
        });

        let server = stub.clone();
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let stub = server.clone();
                tokio::spawn(async move {
                    if let Err(err) = stub.handle(socket).await {
                        debug!("stub connection error: {err}");
                    }
                });
            }
        });

        Self { addr, stub, task }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.stub.state.lock().unwrap().requests.clone()
    }

    pub fn requests_to(&self, method: &str, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }

    /// Tokens issued and not yet logged out.
    pub fn open_sessions(&self) -> usize {
        self.stub.state.lock().unwrap().valid.len()
    }
}

impl Drop for StubMetabase {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Stub {
    async fn handle(&self, mut socket: TcpStream) -> std::io::Result<()> {
        let mut buf = Vec::with_capacity(4096);
        let header_end = loop {
            let mut tmp = [0_u8; 1024];
            let n = socket.read(&mut tmp).await?;
            if n == 0 {
                return Ok(());
            }
            buf.extend_from_slice(&tmp[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let mut lines = head.lines();
        let mut request_line = lines.next().unwrap_or_default().split_whitespace();
        let method = request_line.next().unwrap_or_default().to_string();
        let path = request_line.next().unwrap_or_default().to_string();

        let mut content_length = 0;
        let mut session = None;
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            match name.trim().to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.trim().parse().unwrap_or(0),
                "x-metabase-session" => session = Some(value.trim().to_string()),
                _ => {}
            }
        }

        let mut body = buf[header_end..].to_vec();
        while body.len() < content_length {
            let mut tmp = [0_u8; 4096];
            let n = socket.read(&mut tmp).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&tmp[..n]);
        }
        let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

        let reply = self.route(Recorded {
            method,
            path,
            session,
            body,
        });

        let payload = reply.body.to_string();
        let response = format!(
            "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            reply.status,
            payload.len(),
            payload
        );
        socket.write_all(response.as_bytes()).await?;
        socket.shutdown().await
    }

    fn route(&self, request: Recorded) -> Reply {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());

        if request.method == "POST" && request.path == "/api/session" {
            state.next_token += 1;
            let token = format!("tok-{}", state.next_token);
            state.valid.insert(token.clone());
            return Reply::ok(json!({ "id": token }));
        }

        let Some(token) = request.session.clone().filter(|t| state.valid.contains(t)) else {
            return Reply::status(401);
        };

        match (request.method.as_str(), request.path.as_str()) {
            ("DELETE", "/api/session") => {
                state.valid.remove(&token);
                Reply::ok(Value::Null)
            }
            ("GET", "/api/database") => Reply::ok(json!({
                "data": [
                    { "id": 3, "name": "Sample Database" },
                    { "id": STUB_DATABASE_ID, "name": STUB_DATABASE_NAME }
                ]
            })),
            ("GET", path) if path == format!("/api/card/{NATIVE_CARD}") => Reply::ok(json!({
                "name": "Events",
                "dataset_query": {
                    "type": "native",
                    "native": { "query": "SELECT id, name FROM events ORDER BY id;" }
                }
            })),
            ("GET", path) if path == format!("/api/card/{GUI_CARD}") => Reply::ok(json!({
                "name": "Events by hand",
                "dataset_query": { "type": "query", "query": { "source-table": 4 } }
            })),
            ("POST", path) if path == format!("/api/card/{GUI_CARD}/query") => {
                Reply::ok(self.dataset(0, self.total_rows, false))
            }
            ("POST", "/api/dataset") => {
                state.datasets += 1;
                if self.revoke_after.is_some_and(|n| state.datasets > n) {
                    state.valid.remove(&token);
                    // Only the first request past the limit is rejected.
                    state.datasets = 0;
                    return Reply::status(401);
                }
                Reply::ok(self.native(&request.body))
            }
            _ => Reply::status(404),
        }
    }

    fn native(&self, body: &Value) -> Value {
        let sql = body["native"]["query"].as_str().unwrap_or_default();
        if sql.starts_with("SELECT COUNT(*)") {
            return json!({
                "status": "completed",
                "data": {
                    "rows": [[self.total_rows]],
                    "cols": [{ "name": "total_rows", "base_type": "type/Integer" }]
                }
            });
        }

        match window(sql) {
            Some((limit, offset)) => {
                let end = (offset + limit).min(self.total_rows);
                self.dataset(offset.min(end), end, false)
            }
            None => {
                let cap = body["constraints"]["max-results"]
                    .as_u64()
                    .unwrap_or(u64::MAX);
                self.dataset(0, self.total_rows.min(cap), self.total_rows > cap)
            }
        }
    }

    fn dataset(&self, start: u64, end: u64, truncated: bool) -> Value {
        let rows: Vec<Value> = (start..end)
            .map(|id| json!([id, format!("row-{id}")]))
            .collect();
        json!({
            "status": "completed",
            "data": {
                "rows": rows,
                "cols": [
                    { "name": "id", "base_type": "type/Integer" },
                    { "name": "name", "base_type": "type/Text" }
                ],
                "results_truncated": truncated
            }
        })
    }
}

/// Parses a trailing `LIMIT n OFFSET m` line.
fn window(sql: &str) -> Option<(u64, u64)> {
    let last = sql.lines().last()?;
    let mut parts = last.split_whitespace();
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("LIMIT"), Some(limit), Some("OFFSET"), Some(offset)) => {
            Some((limit.parse().ok()?, offset.parse().ok()?))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectors::{
        error::AuthError,
        metabase::{MetabaseClient, MetabaseConfig, MetabaseQueryService, MetabaseSessionProvider},
        session::SessionProvider,
        upstream::QueryService,
    };
    use engine_config::FetchOptions;
    use engine_core::error::FetchError;
    use engine_runtime::{WarehouseFetcher, fetch};
    use model::{
        plan::{Strategy, Thresholds},
        query::{DatabaseTarget, QueryParameter, QuerySpec, Team},
    };
    use std::time::Duration;
    use tracing_test::traced_test;

    fn connect(stub: &StubMetabase) -> (Arc<dyn SessionProvider>, Arc<dyn QueryService>) {
        let client =
            MetabaseClient::new(MetabaseConfig::new(stub.url(), "analyst", "secret")).unwrap();
        (
            Arc::new(MetabaseSessionProvider::new(client.clone())),
            Arc::new(MetabaseQueryService::new(client)),
        )
    }

    fn options(large: u64) -> FetchOptions {
        FetchOptions::default()
            .with_thresholds(Thresholds { small: 10, large })
            .with_page_size(100)
            .with_workers(3)
            .with_retry_delays(Duration::from_millis(1), Duration::from_millis(5))
    }

    fn growth(sql: &str) -> QuerySpec {
        QuerySpec::native(sql, DatabaseTarget::Team(Team::Growth))
    }

    fn ids(rows: &[Vec<Value>]) -> Vec<u64> {
        rows.iter().map(|r| r[0].as_u64().unwrap()).collect()
    }

    #[test]
    fn test_window_parsing() {
        assert_eq!(window("SELECT 1\nLIMIT 100 OFFSET 200"), Some((100, 200)));
        assert_eq!(window("SELECT 1"), None);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_sequential_fetch_over_http() {
        let stub = StubMetabase::start(250).await;
        let (provider, service) = connect(&stub);

        let outcome = fetch(
            provider,
            service,
            growth("SELECT id, name FROM events ORDER BY id;"),
            options(1000),
        )
        .await
        .unwrap();

        assert_eq!(outcome.strategy_used, Strategy::SequentialPaginate);
        assert_eq!(ids(&outcome.rows), (0..250).collect::<Vec<_>>());
        assert_eq!(outcome.column_names(), vec!["id", "name"]);
        assert_eq!(outcome.columns[0].base_type.as_deref(), Some("type/Integer"));

        let datasets = stub.requests_to("POST", "/api/dataset");
        let sql: Vec<&str> = datasets.iter().filter_map(Recorded::sql).collect();
        assert_eq!(
            sql,
            vec![
                "SELECT COUNT(*) AS total_rows FROM (\nSELECT id, name FROM events ORDER BY id\n) AS subquery",
                "SELECT id, name FROM events ORDER BY id\nLIMIT 100 OFFSET 0",
                "SELECT id, name FROM events ORDER BY id\nLIMIT 100 OFFSET 100",
                "SELECT id, name FROM events ORDER BY id\nLIMIT 100 OFFSET 200",
            ]
        );
        for request in &datasets {
            assert_eq!(request.body["database"], json!(STUB_DATABASE_ID));
            assert_eq!(request.body["type"], json!("native"));
            assert!(request.session.is_some());
        }
        assert_eq!(datasets[1].body["constraints"]["max-results"], json!(100));

        assert_eq!(stub.requests_to("GET", "/api/database").len(), 1);
        assert_eq!(stub.open_sessions(), 0);
    }

    #[traced_test]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_fetch_over_http() {
        let stub = StubMetabase::start(250).await;
        let (provider, service) = connect(&stub);

        let outcome = WarehouseFetcher::new(provider, service)
            .fetch(growth("SELECT id, name FROM events"), options(100))
            .await
            .unwrap();

        assert_eq!(outcome.strategy_used, Strategy::ParallelPaginate);
        assert_eq!(outcome.plan.worker_count, 3);
        assert_eq!(ids(&outcome.rows), (0..250).collect::<Vec<_>>());
        assert!(!outcome.is_partial());

        // One control session plus one per worker, all closed again.
        let logins = stub.requests_to("POST", "/api/session").len();
        assert_eq!(logins, 4);
        assert_eq!(stub.requests_to("DELETE", "/api/session").len(), logins);
        // Database ids are looked up once per provider.
        assert_eq!(stub.requests_to("GET", "/api/database").len(), 1);
        assert_eq!(stub.open_sessions(), 0);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_parameters_become_template_tags() {
        let stub = StubMetabase::start(5).await;
        let (provider, service) = connect(&stub);

        let spec = growth("SELECT id, name FROM events WHERE city_id = {{city_id}}")
            .with_parameter(QueryParameter::new("city_id", 12));
        fetch(provider, service, spec, options(1000)).await.unwrap();

        let datasets = stub.requests_to("POST", "/api/dataset");
        let body = &datasets[0].body;
        assert_eq!(body["native"]["template-tags"]["city_id"]["type"], json!("number"));
        assert_eq!(
            body["parameters"][0],
            json!({
                "type": "category",
                "target": ["variable", ["template-tag", "city_id"]],
                "value": 12
            })
        );
    }

    #[traced_test]
    #[tokio::test]
    async fn test_native_saved_question_is_paginated() {
        let stub = StubMetabase::start(250).await;
        let (provider, service) = connect(&stub);

        let spec = QuerySpec::saved_question(NATIVE_CARD, DatabaseTarget::Team(Team::Growth));
        let outcome = fetch(provider, service, spec, options(1000)).await.unwrap();

        assert_eq!(outcome.strategy_used, Strategy::SequentialPaginate);
        assert_eq!(outcome.total_rows, 250);
        let datasets = stub.requests_to("POST", "/api/dataset");
        assert_eq!(
            datasets[1].sql(),
            Some("SELECT id, name FROM events ORDER BY id\nLIMIT 100 OFFSET 0")
        );
        assert!(stub.requests_to("POST", "/api/card/5/query").is_empty());
    }

    #[traced_test]
    #[tokio::test]
    async fn test_gui_saved_question_runs_in_one_call() {
        let stub = StubMetabase::start(250).await;
        let (provider, service) = connect(&stub);

        let spec = QuerySpec::saved_question(GUI_CARD, DatabaseTarget::Team(Team::Growth));
        let outcome = fetch(provider, service, spec, options(1000)).await.unwrap();

        assert_eq!(outcome.strategy_used, Strategy::Single);
        assert_eq!(ids(&outcome.rows), (0..250).collect::<Vec<_>>());
        assert_eq!(stub.requests_to("POST", "/api/card/6/query").len(), 1);
        assert!(stub.requests_to("POST", "/api/dataset").is_empty());
        assert_eq!(stub.open_sessions(), 0);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_unknown_database_closes_session() {
        let stub = StubMetabase::start(10).await;
        let (provider, service) = connect(&stub);

        let spec = QuerySpec::native("SELECT 1", DatabaseTarget::Named("Finance".into()));
        let err = fetch(provider, service, spec, options(1000))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FetchError::Auth(AuthError::DatabaseNotFound(ref name)) if name == "Finance"
        ));
        assert_eq!(stub.requests_to("DELETE", "/api/session").len(), 1);
        assert_eq!(stub.open_sessions(), 0);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_revoked_token_is_replaced() {
        // Count query and page 0 succeed; page 1 is rejected with 401.
        let stub = StubMetabase::revoking_after(250, 2).await;
        let (provider, service) = connect(&stub);

        let outcome = fetch(
            provider,
            service,
            growth("SELECT id, name FROM events"),
            options(1000),
        )
        .await
        .unwrap();

        assert!(!outcome.is_partial());
        assert_eq!(outcome.total_rows, 250);
        assert_eq!(outcome.retries, 1);
        assert_eq!(stub.requests_to("POST", "/api/session").len(), 2);
        assert_eq!(stub.open_sessions(), 0);
    }
}
