use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::AppConfig;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    #[error("backend not configured")]
    NotConfigured,
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("remote error {status}: {message}")]
    Remote { status: u16, message: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("decode: {0}")]
    Decode(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Neq(String, Value),
    IsNull(String),
    In(String, Vec<Value>),
    /// Case-insensitive substring match.
    ILike(String, String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Row selection: columns, filters, ordering and window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub columns: String,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Query {
    pub fn select(columns: &str) -> Self {
        Self { columns: columns.to_string(), ..Self::default() }
    }

    /// Filter-only query used by update and delete.
    pub fn matching() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.into(), value.into()));
        self
    }

    pub fn neq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Neq(column.into(), value.into()));
        self
    }

    pub fn is_null(mut self, column: &str) -> Self {
        self.filters.push(Filter::IsNull(column.into()));
        self
    }

    pub fn any_of<V: Into<Value>>(mut self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.filters.push(Filter::In(column.into(), values.into_iter().map(Into::into).collect()));
        self
    }

    pub fn ilike(mut self, column: &str, needle: &str) -> Self {
        self.filters.push(Filter::ILike(column.into(), needle.into()));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(Order { column: column.into(), ascending });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: usize) -> Self {
        self.offset = Some(n);
        self
    }

    /// Render as PostgREST query-string pairs.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if !self.columns.is_empty() {
            out.push(("select".to_string(), compact_columns(&self.columns)));
        }
        for f in &self.filters {
            let pair = match f {
                Filter::Eq(c, v) => (c.clone(), format!("eq.{}", scalar(v))),
                Filter::Neq(c, v) => (c.clone(), format!("neq.{}", scalar(v))),
                Filter::IsNull(c) => (c.clone(), "is.null".to_string()),
                Filter::In(c, vs) => {
                    let items: Vec<String> = vs.iter().map(scalar).collect();
                    (c.clone(), format!("in.({})", items.join(",")))
                }
                Filter::ILike(c, needle) => (c.clone(), format!("ilike.*{}*", needle)),
            };
            out.push(pair);
        }
        if !self.order.is_empty() {
            let order: Vec<String> = self
                .order
                .iter()
                .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
                .collect();
            out.push(("order".to_string(), order.join(",")));
        }
        if let Some(l) = self.limit {
            out.push(("limit".to_string(), l.to_string()));
        }
        if let Some(o) = self.offset {
            out.push(("offset".to_string(), o.to_string()));
        }
        out
    }
}

fn scalar(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn compact_columns(cols: &str) -> String {
    cols.split_whitespace().collect::<Vec<_>>().join("")
}

/// Generic data-access interface to the hosted backend.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn select(&self, table: &str, query: &Query) -> GatewayResult<Vec<Value>>;
    async fn count(&self, table: &str, query: &Query) -> GatewayResult<u64>;
    /// Insert one row and return its stored representation.
    async fn insert(&self, table: &str, row: Value) -> GatewayResult<Value>;
    async fn upsert(&self, table: &str, row: Value, on_conflict: &str) -> GatewayResult<()>;
    async fn update(&self, table: &str, filter: &Query, patch: Value) -> GatewayResult<()>;
    async fn delete(&self, table: &str, filter: &Query) -> GatewayResult<()>;
    async fn rpc(&self, function: &str, params: Value) -> GatewayResult<Value>;
    /// Client acting on behalf of the holder of `access_token`.
    fn authorized(&self, access_token: &str) -> Arc<dyn Gateway>;
    fn is_configured(&self) -> bool {
        true
    }
}

fn decode<T: DeserializeOwned>(v: Value) -> GatewayResult<T> {
    serde_json::from_value(v).map_err(|e| GatewayError::Decode(e.to_string()))
}

pub async fn select_as<T: DeserializeOwned>(gw: &dyn Gateway, table: &str, query: &Query) -> GatewayResult<Vec<T>> {
    gw.select(table, query).await?.into_iter().map(decode).collect()
}

pub async fn first_as<T: DeserializeOwned>(gw: &dyn Gateway, table: &str, query: &Query) -> GatewayResult<Option<T>> {
    let q = query.clone().limit(1);
    match gw.select(table, &q).await?.into_iter().next() {
        Some(row) => decode(row).map(Some),
        None => Ok(None),
    }
}

pub async fn insert_as<T: DeserializeOwned>(gw: &dyn Gateway, table: &str, row: Value) -> GatewayResult<T> {
    decode(gw.insert(table, row).await?)
}

/// Rpc returning a set of rows.
pub async fn rpc_rows<T: DeserializeOwned>(gw: &dyn Gateway, function: &str, params: Value) -> GatewayResult<Vec<T>> {
    match gw.rpc(function, params).await? {
        Value::Null => Ok(Vec::new()),
        Value::Array(rows) => rows.into_iter().map(decode).collect(),
        single => Ok(vec![decode(single)?]),
    }
}

// ---------------- REST implementation (PostgREST) ----------------

#[derive(Clone)]
pub struct RestGateway {
    http: reqwest::Client,
    base: String,
    anon_key: String,
    access_token: Option<String>,
}

#[derive(serde::Deserialize, Default)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl RestGateway {
    pub fn new(base: &str, anon_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            access_token: None,
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base, table)
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> GatewayResult<reqwest::Response> {
        let resp = req.send().await.map_err(|e| GatewayError::Transport(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body: PostgrestError = resp.json().await.unwrap_or_default();
        let message = body.message.unwrap_or_else(|| status.to_string());
        debug!(status = status.as_u16(), code = ?body.code, %message, "postgrest error");
        Err(match (status.as_u16(), body.code.as_deref()) {
            (_, Some("PGRST116")) | (404, _) => GatewayError::NotFound,
            (_, Some("23505")) | (409, _) => GatewayError::Conflict(message),
            (401, _) | (403, _) => GatewayError::Unauthorized(message),
            (s, _) => GatewayError::Remote { status: s, message },
        })
    }

    async fn json_body(resp: reqwest::Response) -> GatewayResult<Value> {
        let text = resp.text().await.map_err(|e| GatewayError::Transport(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

/// Total from a `Content-Range` header such as `0-9/42` or `*/0`.
fn parse_content_range(header: &str) -> Option<u64> {
    header.rsplit('/').next()?.trim().parse().ok()
}

#[async_trait]
impl Gateway for RestGateway {
    async fn select(&self, table: &str, query: &Query) -> GatewayResult<Vec<Value>> {
        let req = self.request(reqwest::Method::GET, self.table_url(table)).query(&query.to_params());
        match Self::json_body(self.send(req).await?).await? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Ok(vec![other]),
        }
    }

    async fn count(&self, table: &str, query: &Query) -> GatewayResult<u64> {
        let mut q = query.clone();
        if q.columns.is_empty() {
            q.columns = "*".into();
        }
        q.limit = Some(0);
        let req = self
            .request(reqwest::Method::GET, self.table_url(table))
            .header("Prefer", "count=exact")
            .query(&q.to_params());
        let resp = self.send(req).await?;
        resp.headers()
            .get("content-range")
            .and_then(|h| h.to_str().ok())
            .and_then(parse_content_range)
            .ok_or_else(|| GatewayError::Decode("missing content-range".into()))
    }

    async fn insert(&self, table: &str, row: Value) -> GatewayResult<Value> {
        let req = self
            .request(reqwest::Method::POST, self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&row);
        match Self::json_body(self.send(req).await?).await? {
            Value::Array(mut rows) if !rows.is_empty() => Ok(rows.swap_remove(0)),
            Value::Array(_) | Value::Null => Err(GatewayError::Decode("insert returned no row".into())),
            other => Ok(other),
        }
    }

    async fn upsert(&self, table: &str, row: Value, on_conflict: &str) -> GatewayResult<()> {
        let req = self
            .request(reqwest::Method::POST, self.table_url(table))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .query(&[("on_conflict", on_conflict)])
            .json(&row);
        self.send(req).await.map(|_| ())
    }

    async fn update(&self, table: &str, filter: &Query, patch: Value) -> GatewayResult<()> {
        let req = self
            .request(reqwest::Method::PATCH, self.table_url(table))
            .header("Prefer", "return=minimal")
            .query(&filter.to_params())
            .json(&patch);
        self.send(req).await.map(|_| ())
    }

    async fn delete(&self, table: &str, filter: &Query) -> GatewayResult<()> {
        let req = self
            .request(reqwest::Method::DELETE, self.table_url(table))
            .query(&filter.to_params());
        self.send(req).await.map(|_| ())
    }

    async fn rpc(&self, function: &str, params: Value) -> GatewayResult<Value> {
        let url = format!("{}/rest/v1/rpc/{}", self.base, function);
        let req = self.request(reqwest::Method::POST, url).json(&params);
        Self::json_body(self.send(req).await?).await
    }

    fn authorized(&self, access_token: &str) -> Arc<dyn Gateway> {
        let mut scoped = self.clone();
        scoped.access_token = Some(access_token.to_string());
        Arc::new(scoped)
    }
}

// ---------------- Stub used while credentials are missing ----------------

/// Never fails a read (empty results), refuses every write.
#[derive(Clone, Default)]
pub struct UnconfiguredGateway;

#[async_trait]
impl Gateway for UnconfiguredGateway {
    async fn select(&self, _table: &str, _query: &Query) -> GatewayResult<Vec<Value>> {
        Ok(Vec::new())
    }
    async fn count(&self, _table: &str, _query: &Query) -> GatewayResult<u64> {
        Ok(0)
    }
    async fn insert(&self, _table: &str, _row: Value) -> GatewayResult<Value> {
        Err(GatewayError::NotConfigured)
    }
    async fn upsert(&self, _table: &str, _row: Value, _on_conflict: &str) -> GatewayResult<()> {
        Err(GatewayError::NotConfigured)
    }
    async fn update(&self, _table: &str, _filter: &Query, _patch: Value) -> GatewayResult<()> {
        Err(GatewayError::NotConfigured)
    }
    async fn delete(&self, _table: &str, _filter: &Query) -> GatewayResult<()> {
        Err(GatewayError::NotConfigured)
    }
    async fn rpc(&self, _function: &str, _params: Value) -> GatewayResult<Value> {
        Ok(Value::Array(Vec::new()))
    }
    fn authorized(&self, _access_token: &str) -> Arc<dyn Gateway> {
        Arc::new(self.clone())
    }
    fn is_configured(&self) -> bool {
        false
    }
}

// Factory used in main; falls back to the stub instead of failing startup
pub fn build_gateway(config: &AppConfig) -> Arc<dyn Gateway> {
    match &config.backend {
        Some(creds) => Arc::new(RestGateway::new(&creds.url, &creds.anon_key)),
        None => {
            for var in &config.missing {
                error!("missing backend variable {var}");
            }
            error!("backend not configured; every page will show the setup guide");
            Arc::new(UnconfiguredGateway)
        }
    }
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    //! Process-local tables with just enough PostgREST semantics for tests and demos.
    use super::*;
    use std::cmp::Ordering;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Mutex, PoisonError};

    pub type RpcHandler = Arc<dyn Fn(&Value) -> GatewayResult<Value> + Send + Sync>;

    // (table, embed name, local column, target table)
    const EMBEDS: &[(&str, &str, &str, &str)] = &[
        ("videos", "profiles", "user_id", "profiles"),
        ("comments", "profiles", "user_id", "profiles"),
        ("watch_later", "videos", "video_id", "videos"),
    ];

    const UNIQUE_KEYS: &[(&str, &[&str])] = &[
        ("profiles", &["id"]),
        ("profiles", &["username"]),
        ("video_likes", &["user_id", "video_id"]),
        ("subscriptions", &["subscriber_id", "channel_id"]),
        ("watch_later", &["user_id", "video_id"]),
    ];

    #[derive(Default)]
    struct State {
        tables: HashMap<String, Vec<Value>>,
        rpcs: HashMap<String, RpcHandler>,
        failing: HashSet<(String, String)>,
        calls: Vec<String>,
    }

    #[derive(Clone, Default)]
    pub struct InMemGateway {
        state: Arc<Mutex<State>>,
    }

    impl InMemGateway {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, State> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Seed a row without recording a call.
        pub fn seed(&self, table: &str, row: Value) {
            self.lock().tables.entry(table.to_string()).or_default().push(row);
        }

        pub fn rows(&self, table: &str) -> Vec<Value> {
            self.lock().tables.get(table).cloned().unwrap_or_default()
        }

        pub fn register_rpc<F>(&self, name: &str, handler: F)
        where
            F: Fn(&Value) -> GatewayResult<Value> + Send + Sync + 'static,
        {
            self.lock().rpcs.insert(name.to_string(), Arc::new(handler));
        }

        /// Make every `op` ("select", "insert", "rpc", ...) on `target` fail until cleared.
        pub fn fail_on(&self, op: &str, target: &str) {
            self.lock().failing.insert((op.to_string(), target.to_string()));
        }

        pub fn clear_failures(&self) {
            self.lock().failing.clear();
        }

        /// Every call made so far as `op:target`.
        pub fn calls(&self) -> Vec<String> {
            self.lock().calls.clone()
        }

        fn enter(&self, op: &str, target: &str) -> GatewayResult<std::sync::MutexGuard<'_, State>> {
            let mut s = self.lock();
            s.calls.push(format!("{op}:{target}"));
            if s.failing.contains(&(op.to_string(), target.to_string())) {
                return Err(GatewayError::Remote { status: 500, message: format!("injected {op} failure on {target}") });
            }
            Ok(s)
        }
    }

    fn matches(row: &Value, filters: &[Filter]) -> bool {
        filters.iter().all(|f| match f {
            Filter::Eq(c, v) => row.get(c).map(|x| same(x, v)).unwrap_or(false),
            Filter::Neq(c, v) => !row.get(c).map(|x| same(x, v)).unwrap_or(false),
            Filter::IsNull(c) => row.get(c).map(Value::is_null).unwrap_or(true),
            Filter::In(c, vs) => row.get(c).map(|x| vs.iter().any(|v| same(x, v))).unwrap_or(false),
            Filter::ILike(c, needle) => row
                .get(c)
                .and_then(Value::as_str)
                .map(|s| s.to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(false),
        })
    }

    fn same(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
            _ => a == b,
        }
    }

    fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
        match (a, b) {
            (Some(Value::Number(x)), Some(Value::Number(y))) => {
                x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal)
            }
            (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
            (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            _ => Ordering::Equal,
        }
    }

    fn embed(state: &State, table: &str, columns: &str, row: &mut Value) {
        for (t, name, local, target) in EMBEDS {
            if *t != table || !columns.contains(name) {
                continue;
            }
            let key = row.get(*local).cloned();
            let found = state
                .tables
                .get(*target)
                .and_then(|rows| rows.iter().find(|r| r.get("id") == key.as_ref()))
                .cloned();
            if let Some(mut related) = found {
                embed(state, target, columns, &mut related);
                row[*name] = related;
            }
        }
    }

    fn conflicts(existing: &[Value], table: &str, row: &Value) -> bool {
        UNIQUE_KEYS.iter().filter(|(t, _)| *t == table).any(|(_, cols)| {
            existing.iter().any(|r| cols.iter().all(|c| row.get(*c).is_some() && r.get(*c) == row.get(*c)))
        })
    }

    #[async_trait]
    impl Gateway for InMemGateway {
        async fn select(&self, table: &str, query: &Query) -> GatewayResult<Vec<Value>> {
            let s = self.enter("select", table)?;
            let mut rows: Vec<Value> = s
                .tables
                .get(table)
                .map(|rows| rows.iter().filter(|r| matches(r, &query.filters)).cloned().collect())
                .unwrap_or_default();
            for o in query.order.iter().rev() {
                rows.sort_by(|a, b| {
                    let ord = compare(a.get(&o.column), b.get(&o.column));
                    if o.ascending { ord } else { ord.reverse() }
                });
            }
            let start = query.offset.unwrap_or(0).min(rows.len());
            let end = query.limit.map(|l| (start + l).min(rows.len())).unwrap_or(rows.len());
            let mut page: Vec<Value> = rows[start..end].to_vec();
            for row in page.iter_mut() {
                embed(&s, table, &query.columns, row);
            }
            Ok(page)
        }

        async fn count(&self, table: &str, query: &Query) -> GatewayResult<u64> {
            let s = self.enter("count", table)?;
            Ok(s.tables
                .get(table)
                .map(|rows| rows.iter().filter(|r| matches(r, &query.filters)).count() as u64)
                .unwrap_or(0))
        }

        async fn insert(&self, table: &str, mut row: Value) -> GatewayResult<Value> {
            let mut s = self.enter("insert", table)?;
            if row.get("id").is_none() && !matches!(table, "video_likes" | "subscriptions" | "watch_later") {
                row["id"] = Value::String(uuid::Uuid::new_v4().to_string());
            }
            if row.get("created_at").map(Value::is_null).unwrap_or(true) {
                row["created_at"] = Value::String(chrono::Utc::now().to_rfc3339());
            }
            let rows = s.tables.entry(table.to_string()).or_default();
            if conflicts(rows, table, &row) {
                return Err(GatewayError::Conflict(format!("duplicate key in {table}")));
            }
            rows.push(row.clone());
            embed(&s, table, "profiles videos", &mut row);
            Ok(row)
        }

        async fn upsert(&self, table: &str, mut row: Value, on_conflict: &str) -> GatewayResult<()> {
            let mut s = self.enter("upsert", table)?;
            let keys: Vec<&str> = on_conflict.split(',').map(str::trim).collect();
            let rows = s.tables.entry(table.to_string()).or_default();
            let existing = rows
                .iter_mut()
                .find(|r| keys.iter().all(|k| r.get(*k).is_some() && r.get(*k) == row.get(*k)));
            match (existing, row.as_object()) {
                (Some(current), Some(patch)) => {
                    for (k, v) in patch {
                        current[k.as_str()] = v.clone();
                    }
                }
                _ => {
                    if row.get("created_at").is_none() {
                        row["created_at"] = Value::String(chrono::Utc::now().to_rfc3339());
                    }
                    rows.push(row);
                }
            }
            Ok(())
        }

        async fn update(&self, table: &str, filter: &Query, patch: Value) -> GatewayResult<()> {
            let mut s = self.enter("update", table)?;
            let Some(rows) = s.tables.get_mut(table) else { return Ok(()) };
            let Some(patch) = patch.as_object() else {
                return Err(GatewayError::Decode("patch must be an object".into()));
            };
            for row in rows.iter_mut().filter(|r| matches(r, &filter.filters)) {
                for (k, v) in patch {
                    row[k.as_str()] = v.clone();
                }
            }
            Ok(())
        }

        async fn delete(&self, table: &str, filter: &Query) -> GatewayResult<()> {
            let mut s = self.enter("delete", table)?;
            if let Some(rows) = s.tables.get_mut(table) {
                rows.retain(|r| !matches(r, &filter.filters));
            }
            Ok(())
        }

        async fn rpc(&self, function: &str, params: Value) -> GatewayResult<Value> {
            let handler = {
                let s = self.enter("rpc", function)?;
                s.rpcs.get(function).cloned()
            };
            match handler {
                Some(h) => h(&params),
                None => Err(GatewayError::Remote { status: 404, message: format!("no function {function}") }),
            }
        }

        fn authorized(&self, _access_token: &str) -> Arc<dyn Gateway> {
            Arc::new(self.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_postgrest_params() {
        let q = Query::select("id, title,\n profiles ( username )")
            .eq("is_public", true)
            .neq("id", "abc")
            .is_null("parent_id")
            .any_of("id", ["a", "b"])
            .ilike("title", "rust")
            .order("created_at", false)
            .limit(10)
            .offset(20);
        let p = q.to_params();
        assert_eq!(p[0], ("select".into(), "id,title,profiles(username)".into()));
        assert!(p.contains(&("is_public".into(), "eq.true".into())));
        assert!(p.contains(&("id".into(), "neq.abc".into())));
        assert!(p.contains(&("parent_id".into(), "is.null".into())));
        assert!(p.contains(&("id".into(), "in.(a,b)".into())));
        assert!(p.contains(&("title".into(), "ilike.*rust*".into())));
        assert!(p.contains(&("order".into(), "created_at.desc".into())));
        assert!(p.contains(&("limit".into(), "10".into())));
        assert!(p.contains(&("offset".into(), "20".into())));
    }

    #[test]
    fn content_range_total() {
        assert_eq!(parse_content_range("0-9/42"), Some(42));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("*/*"), None);
    }

    #[tokio::test]
    async fn unconfigured_reads_are_empty_and_writes_refused() {
        let gw = UnconfiguredGateway;
        assert!(gw.select("videos", &Query::select("*")).await.unwrap().is_empty());
        assert_eq!(gw.insert("videos", json!({})).await.unwrap_err(), GatewayError::NotConfigured);
        assert!(!gw.is_configured());
    }

    #[cfg(feature = "inmem-store")]
    #[tokio::test]
    async fn inmem_enforces_composite_keys_and_embeds() {
        use inmem::InMemGateway;
        let gw = InMemGateway::new();
        let user = uuid::Uuid::new_v4().to_string();
        gw.seed("profiles", json!({"id": user, "username": "ann", "created_at": "2024-01-01T00:00:00Z"}));
        let v = gw
            .insert("videos", json!({"user_id": user, "title": "t", "is_public": true}))
            .await
            .unwrap();
        assert_eq!(v["profiles"]["username"], "ann");

        let like = json!({"user_id": user, "video_id": v["id"], "is_like": true});
        gw.insert("video_likes", like.clone()).await.unwrap();
        assert!(matches!(gw.insert("video_likes", like).await, Err(GatewayError::Conflict(_))));

        gw.upsert("video_likes", json!({"user_id": user, "video_id": v["id"], "is_like": false}), "user_id,video_id")
            .await
            .unwrap();
        let rows = gw.rows("video_likes");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["is_like"], false);

        gw.fail_on("select", "videos");
        assert!(gw.select("videos", &Query::select("*")).await.is_err());
        gw.clear_failures();
        assert_eq!(gw.select("videos", &Query::select("*")).await.unwrap().len(), 1);
    }
}
