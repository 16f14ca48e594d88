use async_trait::async_trait;
use connectors::{
    error::{AuthError, QueryError},
    session::{SessionHandle, SessionProvider},
    upstream::{QueryService, ResolvedQuery},
};
use model::{
    page::{Column, PageWindow, QueryRows, Record},
    query::{DatabaseTarget, QuerySpec},
};
use serde_json::json;
use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Failure injected into a query call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Status(u16),
    Unauthorized,
    /// The upstream accepts the request but the query does not complete.
    Failed,
    /// Never answers; only a timeout ends the call.
    Hang,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountBehavior {
    Exact,
    Fixed(u64),
    Fail,
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Acquire,
    Release(u64),
    Resolve,
    Count,
    Query { offset: u64, limit: u64, session: u64 },
    QueryAll { max_rows: u64 },
}

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    faults: HashMap<u64, (Fault, usize)>,
    next_session: u64,
    acquisitions: usize,
    live: HashSet<u64>,
    revoked: HashSet<u64>,
    query_calls: usize,
    served: usize,
}

/// In-memory warehouse serving `total_rows` rows of `[id, "row-id"]`.
///
/// Acts as both the session provider and the query service. Query calls are
/// keyed by row offset; an unpaginated call counts as offset 0.
pub struct MockWarehouse {
    total_rows: u64,
    count: CountBehavior,
    opaque: bool,
    latency: Duration,
    slow: HashMap<u64, Duration>,
    columns_at: HashMap<u64, Vec<Column>>,
    revoke_on_query: Option<usize>,
    acquire_limit: Option<usize>,
    cancel_after: Option<(usize, CancellationToken)>,
    state: Mutex<MockState>,
}

impl MockWarehouse {
    pub fn new(total_rows: u64) -> Self {
        Self {
            total_rows,
            count: CountBehavior::Exact,
            opaque: false,
            latency: Duration::ZERO,
            slow: HashMap::new(),
            columns_at: HashMap::new(),
            revoke_on_query: None,
            acquire_limit: None,
            cancel_after: None,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn with_count(mut self, count: CountBehavior) -> Self {
        self.count = count;
        self
    }

    /// Behaves like a saved question that cannot be windowed or counted.
    pub fn opaque(mut self) -> Self {
        self.opaque = true;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn slow_at(mut self, offset: u64, delay: Duration) -> Self {
        self.slow.insert(offset, delay);
        self
    }

    pub fn fail_at(self, offset: u64, times: usize, fault: Fault) -> Self {
        self.lock().faults.insert(offset, (fault, times));
        self
    }

    pub fn columns_at(mut self, offset: u64, names: &[&str]) -> Self {
        self.columns_at
            .insert(offset, names.iter().map(|n| Column::new(*n)).collect());
        self
    }

    /// Revokes the calling session on the `nth` query call (1-based).
    pub fn revoke_on_query(mut self, nth: usize) -> Self {
        self.revoke_on_query = Some(nth);
        self
    }

    /// Rejects every acquisition after the first `limit`.
    pub fn acquire_limit(mut self, limit: usize) -> Self {
        self.acquire_limit = Some(limit);
        self
    }

    /// Cancels `token` once `served` query calls have succeeded.
    pub fn cancel_after(mut self, served: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((served, token));
        self
    }

    pub fn expected_rows(&self) -> Vec<Record> {
        (0..self.total_rows).map(row).collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn query_offsets(&self) -> Vec<u64> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Query { offset, .. } => Some(*offset),
                _ => None,
            })
            .collect()
    }

    pub fn query_calls(&self) -> usize {
        self.query_offsets().len()
    }

    pub fn count_calls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Count))
            .count()
    }

    pub fn acquisitions(&self) -> usize {
        self.lock().acquisitions
    }

    pub fn live_sessions(&self) -> usize {
        self.lock().live.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn schema(&self, offset: u64) -> Vec<Column> {
        self.columns_at
            .get(&offset)
            .cloned()
            .unwrap_or_else(|| {
                vec![
                    Column::new("id").with_type("type/Integer"),
                    Column::new("name").with_type("type/Text"),
                ]
            })
    }

    /// Records the call and decides whether it is served or faulted.
    fn admit(&self, call: Call, session: u64, offset: u64) -> Result<Duration, Fault> {
        let mut state = self.lock();
        state.calls.push(call);
        state.query_calls += 1;

        if state.revoked.contains(&session) || !state.live.contains(&session) {
            return Err(Fault::Unauthorized);
        }
        if self.revoke_on_query == Some(state.query_calls) {
            state.revoked.insert(session);
            return Err(Fault::Unauthorized);
        }
        if let Some((fault, remaining)) = state.faults.get_mut(&offset)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(*fault);
        }

        Ok(self.latency + self.slow.get(&offset).copied().unwrap_or_default())
    }

    async fn serve(&self, call: Call, session: u64, offset: u64) -> Result<(), QueryError> {
        match self.admit(call, session, offset) {
            Ok(delay) => {
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                Ok(())
            }
            Err(Fault::Hang) => {
                sleep(Duration::from_secs(3600)).await;
                Err(QueryError::Timeout)
            }
            Err(Fault::Status(status)) => Err(QueryError::Status {
                status,
                message: "injected".to_string(),
            }),
            Err(Fault::Unauthorized) => Err(QueryError::Unauthorized),
            Err(Fault::Failed) => Err(QueryError::Failed {
                status: "failed".to_string(),
                message: "injected".to_string(),
            }),
        }
    }

    fn served(&self) {
        let served = {
            let mut state = self.lock();
            state.served += 1;
            state.served
        };
        if let Some((after, token)) = &self.cancel_after
            && served == *after
        {
            token.cancel();
        }
    }
}

fn row(id: u64) -> Record {
    vec![json!(id), json!(format!("row-{id}"))]
}

#[async_trait]
impl SessionProvider for MockWarehouse {
    async fn acquire(&self, database: &DatabaseTarget) -> Result<SessionHandle, AuthError> {
        let mut state = self.lock();
        state.calls.push(Call::Acquire);
        if self
            .acquire_limit
            .is_some_and(|limit| state.acquisitions >= limit)
        {
            return Err(AuthError::Rejected {
                status: 401,
                message: "invalid credentials".to_string(),
            });
        }

        state.acquisitions += 1;
        state.next_session += 1;
        let id = state.next_session;
        state.live.insert(id);
        Ok(SessionHandle::new(
            id,
            format!("token-{id}"),
            7,
            database.clone(),
        ))
    }

    async fn release(&self, handle: SessionHandle) {
        let mut state = self.lock();
        state.calls.push(Call::Release(handle.id()));
        state.live.remove(&handle.id());
    }
}

#[async_trait]
impl QueryService for MockWarehouse {
    async fn resolve(
        &self,
        _handle: &SessionHandle,
        spec: &QuerySpec,
    ) -> Result<ResolvedQuery, QueryError> {
        self.lock().calls.push(Call::Resolve);
        if self.opaque {
            Ok(ResolvedQuery::opaque(spec.clone()))
        } else {
            Ok(ResolvedQuery::paginable(spec.clone()))
        }
    }

    async fn count(&self, _handle: &SessionHandle, _spec: &QuerySpec) -> Result<u64, QueryError> {
        self.lock().calls.push(Call::Count);
        if self.opaque {
            return Err(QueryError::Unsupported("opaque question".to_string()));
        }

        match self.count {
            CountBehavior::Exact => Ok(self.total_rows),
            CountBehavior::Fixed(rows) => Ok(rows),
            CountBehavior::Fail => Err(QueryError::Status {
                status: 500,
                message: "count failed".to_string(),
            }),
            CountBehavior::Hang => {
                sleep(Duration::from_secs(3600)).await;
                Err(QueryError::Timeout)
            }
        }
    }

    async fn query(
        &self,
        handle: &SessionHandle,
        _spec: &QuerySpec,
        window: PageWindow,
    ) -> Result<QueryRows, QueryError> {
        let call = Call::Query {
            offset: window.offset,
            limit: window.limit,
            session: handle.id(),
        };
        self.serve(call, handle.id(), window.offset).await?;

        let end = (window.offset + window.limit).min(self.total_rows);
        let rows: Vec<Record> = (window.offset.min(end)..end).map(row).collect();
        self.served();

        Ok(QueryRows {
            columns: self.schema(window.offset),
            rows,
            truncated: false,
        })
    }

    async fn query_all(
        &self,
        handle: &SessionHandle,
        _spec: &QuerySpec,
        max_rows: u64,
    ) -> Result<QueryRows, QueryError> {
        self.serve(Call::QueryAll { max_rows }, handle.id(), 0).await?;

        let end = self.total_rows.min(max_rows);
        self.served();

        Ok(QueryRows {
            columns: self.schema(0),
            rows: (0..end).map(row).collect(),
            truncated: self.total_rows > max_rows,
        })
    }
}
