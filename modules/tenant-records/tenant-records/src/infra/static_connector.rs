//! In-memory connector serving per-tenant record tables.
//!
//! Every tenant owns one table per page. Pages answer the standard record
//! operations (`Read`, `ReadMultiple`, `ReadAll`, `Create`, `Update`,
//! `Delete`) plus any custom operation registered on them, and the system
//! page answers tenant discovery. Faults, refusals and delays can be
//! injected per tenant to exercise the engine's failure handling.
//!
//! Note: state lives behind a `parking_lot::Mutex` that is never held across
//! an `.await`; injected delays sleep before the lock is taken.

use std::collections::{BTreeMap, BTreeSet};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tenant_records_sdk::{
    ConnectorError, EndpointConnector, EndpointRequest, FieldValue, Fields, FilterCondition,
    FilterOp, RemoteHandle, RemoteKey, RemoteRecord, RemoteResponse, ServiceMethod, TenantId,
};
use tracing::trace;

/// Handler of a custom operation: receives the calling tenant and the
/// named arguments.
pub type OperationHandler =
    Arc<dyn Fn(&TenantId, &Fields) -> Result<RemoteResponse, ConnectorError> + Send + Sync>;

const DEFAULT_KEY_FIELD: &str = "Key";
const DEFAULT_SYSTEM_PAGE: &str = "SystemService";
const DEFAULT_DISCOVERY_METHOD: &str = "Companies";

/// In-memory [`EndpointConnector`]. Clones share the same state.
#[derive(Clone)]
pub struct StaticConnector {
    state: Arc<Mutex<State>>,
}

struct CustomOperation {
    signature: ServiceMethod,
    handler: OperationHandler,
}

struct State {
    key_field: String,
    system_page: String,
    discovery_method: String,
    companies: Vec<String>,
    discovery_fault: Option<ConnectorError>,
    tables: BTreeMap<(TenantId, String), Vec<RemoteRecord>>,
    signatures: BTreeMap<(String, String), ServiceMethod>,
    operations: BTreeMap<(String, String), CustomOperation>,
    faults: BTreeMap<(TenantId, String), ConnectorError>,
    connect_faults: BTreeSet<TenantId>,
    describe_faults: BTreeSet<String>,
    refusals: BTreeSet<TenantId>,
    delays: BTreeMap<TenantId, Duration>,
    calls: BTreeMap<(TenantId, String), usize>,
    next_key: u64,
}

impl StaticConnector {
    /// A connector whose system page lists `companies`.
    #[must_use]
    pub fn new<I, S>(companies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: Arc::new(Mutex::new(State {
                key_field: DEFAULT_KEY_FIELD.to_owned(),
                system_page: DEFAULT_SYSTEM_PAGE.to_owned(),
                discovery_method: DEFAULT_DISCOVERY_METHOD.to_owned(),
                companies: companies.into_iter().map(Into::into).collect(),
                discovery_fault: None,
                tables: BTreeMap::new(),
                signatures: BTreeMap::new(),
                operations: BTreeMap::new(),
                faults: BTreeMap::new(),
                connect_faults: BTreeSet::new(),
                describe_faults: BTreeSet::new(),
                refusals: BTreeSet::new(),
                delays: BTreeMap::new(),
                calls: BTreeMap::new(),
                next_key: 1,
            })),
        }
    }

    /// Field carrying the generated record key. Defaults to `Key`.
    #[must_use]
    pub fn with_key_field(self, field: impl Into<String>) -> Self {
        self.state.lock().key_field = field.into();
        self
    }

    /// Replace the tenant list the system page answers with.
    pub fn set_companies<I, S>(&self, companies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.lock().companies = companies.into_iter().map(Into::into).collect();
    }

    /// Make discovery fail with `error`, or succeed again with `None`.
    pub fn set_discovery_fault(&self, error: Option<ConnectorError>) {
        self.state.lock().discovery_fault = error;
    }

    /// Store `fields` in `tenant`'s table for `page` under a fresh key.
    pub fn insert(&self, tenant: &TenantId, page: &str, fields: Fields) -> RemoteKey {
        let mut state = self.state.lock();
        let (key, row) = state.keyed_row(fields);
        state.table_mut(tenant, page).push(row);
        key
    }

    /// Current rows of `tenant`'s table for `page`, keys included.
    #[must_use]
    pub fn rows(&self, tenant: &TenantId, page: &str) -> Vec<RemoteRecord> {
        self.state
            .lock()
            .tables
            .get(&(tenant.clone(), page.to_owned()))
            .cloned()
            .unwrap_or_default()
    }

    /// Advertise `signature` on `page`, replacing the standard one of the same name.
    pub fn set_signature(&self, page: &str, signature: ServiceMethod) {
        let name = signature.name.to_lowercase();
        self.state
            .lock()
            .signatures
            .insert((page.to_owned(), name), signature);
    }

    /// Serve a custom operation on `page`.
    pub fn register_operation<F>(&self, page: &str, signature: ServiceMethod, handler: F)
    where
        F: Fn(&TenantId, &Fields) -> Result<RemoteResponse, ConnectorError> + Send + Sync + 'static,
    {
        let name = signature.name.to_lowercase();
        let handler: OperationHandler = Arc::new(handler);
        self.state
            .lock()
            .operations
            .insert((page.to_owned(), name), CustomOperation { signature, handler });
    }

    /// Fail every call of `method` in `tenant` with `error`.
    pub fn fail(&self, tenant: &TenantId, method: &str, error: ConnectorError) {
        self.state
            .lock()
            .faults
            .insert((tenant.clone(), method.to_lowercase()), error);
    }

    pub fn clear_fault(&self, tenant: &TenantId, method: &str) {
        self.state
            .lock()
            .faults
            .remove(&(tenant.clone(), method.to_lowercase()));
    }

    /// Refuse to open any endpoint of `tenant`.
    pub fn fail_connect(&self, tenant: &TenantId) {
        self.state.lock().connect_faults.insert(tenant.clone());
    }

    /// Fail the description of `page`.
    pub fn fail_describe(&self, page: &str) {
        self.state.lock().describe_faults.insert(page.to_owned());
    }

    /// Answer deletes in `tenant` with `false` and keep the row.
    pub fn refuse_deletes(&self, tenant: &TenantId) {
        self.state.lock().refusals.insert(tenant.clone());
    }

    /// Delay every call in `tenant` by `delay`.
    pub fn delay(&self, tenant: &TenantId, delay: Duration) {
        self.state.lock().delays.insert(tenant.clone(), delay);
    }

    /// How many times `method` was invoked in `tenant`, failed calls included.
    #[must_use]
    pub fn calls(&self, tenant: &TenantId, method: &str) -> usize {
        self.state
            .lock()
            .calls
            .get(&(tenant.clone(), method.to_lowercase()))
            .copied()
            .unwrap_or_default()
    }

    /// How many times `method` was invoked across all tenants.
    #[must_use]
    pub fn total_calls(&self, method: &str) -> usize {
        let method = method.to_lowercase();
        self.state
            .lock()
            .calls
            .iter()
            .filter(|((_, m), _)| *m == method)
            .map(|(_, count)| count)
            .sum()
    }
}

impl Default for StaticConnector {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}

impl fmt::Debug for StaticConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("StaticConnector")
            .field("companies", &state.companies)
            .field("tables", &state.tables.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EndpointConnector for StaticConnector {
    async fn connect(
        &self,
        request: EndpointRequest<'_>,
    ) -> Result<Arc<dyn RemoteHandle>, ConnectorError> {
        let tenant = request.tenant.cloned().unwrap_or_else(TenantId::unscoped);
        if self.state.lock().connect_faults.contains(&tenant) {
            return Err(ConnectorError::connection(
                request.url,
                format!("tenant {tenant} is unreachable"),
            ));
        }
        Ok(Arc::new(StaticHandle {
            url: request.url.to_owned(),
            page: request.page.to_owned(),
            tenant,
            state: Arc::clone(&self.state),
        }))
    }
}

/// One page of one tenant.
struct StaticHandle {
    url: String,
    page: String,
    tenant: TenantId,
    state: Arc<Mutex<State>>,
}

impl fmt::Debug for StaticHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticHandle")
            .field("url", &self.url)
            .field("tenant", &self.tenant)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteHandle for StaticHandle {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn invoke(&self, method: &str, args: Fields) -> Result<RemoteResponse, ConnectorError> {
        let delay = self.state.lock().delays.get(&self.tenant).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let name = method.to_lowercase();
        let custom = {
            let mut state = self.state.lock();
            *state
                .calls
                .entry((self.tenant.clone(), name.clone()))
                .or_default() += 1;
            if let Some(error) = state.faults.get(&(self.tenant.clone(), name.clone())) {
                trace!(tenant = %self.tenant, method, "Injected fault");
                return Err(error.clone());
            }
            state
                .operations
                .get(&(self.page.clone(), name.clone()))
                .map(|op| Arc::clone(&op.handler))
        };
        if let Some(handler) = custom {
            return handler(&self.tenant, &args);
        }

        let mut state = self.state.lock();
        if self.page == state.system_page {
            return state.discover(&name);
        }
        match name.as_str() {
            "read" => state.read(&self.tenant, &self.page, &args),
            "readmultiple" => state.read_multiple(&self.tenant, &self.page, &args),
            "readall" => Ok(RemoteResponse::Records(
                state.table(&self.tenant, &self.page).to_vec(),
            )),
            "create" => Ok(state.create(&self.tenant, &self.page, args)),
            "update" => state.update(&self.tenant, &self.page, args),
            "delete" => state.delete(&self.tenant, &self.page, &args),
            _ => Err(ConnectorError::Fault(format!(
                "{} has no operation '{method}'",
                self.page
            ))),
        }
    }

    async fn describe(&self) -> Result<Vec<ServiceMethod>, ConnectorError> {
        let state = self.state.lock();
        if state.describe_faults.contains(&self.page) {
            return Err(ConnectorError::Transport(format!(
                "description of {} is unavailable",
                self.page
            )));
        }
        if self.page == state.system_page {
            return Ok(vec![ServiceMethod::new(state.discovery_method.clone(), &[])]);
        }

        let mut methods: BTreeMap<String, ServiceMethod> = BTreeMap::new();
        if self.page.starts_with("Page/") {
            for name in ["Read", "ReadMultiple", "ReadAll", "Create", "Update", "Delete"] {
                methods.insert(name.to_lowercase(), ServiceMethod::new(name, &[]));
            }
        }
        for ((page, name), signature) in &state.signatures {
            if *page == self.page {
                methods.insert(name.clone(), signature.clone());
            }
        }
        for ((page, name), op) in &state.operations {
            if *page == self.page {
                methods.insert(name.clone(), op.signature.clone());
            }
        }
        Ok(methods.into_values().collect())
    }
}

impl State {
    fn table(&self, tenant: &TenantId, page: &str) -> &[RemoteRecord] {
        self.tables
            .get(&(tenant.clone(), page.to_owned()))
            .map_or(&[], Vec::as_slice)
    }

    fn table_mut(&mut self, tenant: &TenantId, page: &str) -> &mut Vec<RemoteRecord> {
        self.tables
            .entry((tenant.clone(), page.to_owned()))
            .or_default()
    }

    fn keyed_row(&mut self, mut fields: Fields) -> (RemoteKey, RemoteRecord) {
        let key = RemoteKey::new(format!("{};K", self.next_key));
        self.next_key += 1;
        fields.insert(self.key_field.clone(), key.clone().into());
        (key, fields)
    }

    fn key_arg(&self, args: &Fields) -> Result<RemoteKey, ConnectorError> {
        args.get(&self.key_field)
            .and_then(RemoteKey::from_value)
            .ok_or_else(|| ConnectorError::Fault(format!("'{}' is required", self.key_field)))
    }

    fn position(&self, tenant: &TenantId, page: &str, key: &RemoteKey) -> Option<usize> {
        self.table(tenant, page).iter().position(|row| {
            row.get(&self.key_field).and_then(RemoteKey::from_value).as_ref() == Some(key)
        })
    }

    fn discover(&self, method: &str) -> Result<RemoteResponse, ConnectorError> {
        if method != self.discovery_method.to_lowercase() {
            return Err(ConnectorError::Fault(format!(
                "{} has no operation '{method}'",
                self.system_page
            )));
        }
        if let Some(error) = &self.discovery_fault {
            return Err(error.clone());
        }
        Ok(RemoteResponse::Value(FieldValue::Array(
            self.companies
                .iter()
                .cloned()
                .map(FieldValue::String)
                .collect(),
        )))
    }

    fn read(
        &self,
        tenant: &TenantId,
        page: &str,
        criteria: &Fields,
    ) -> Result<RemoteResponse, ConnectorError> {
        let mut matches: Vec<RemoteRecord> = self
            .table(tenant, page)
            .iter()
            .filter(|row| {
                criteria
                    .iter()
                    .all(|(field, value)| row.get(field).unwrap_or(&FieldValue::Null) == value)
            })
            .cloned()
            .collect();
        match matches.len() {
            0 => Err(ConnectorError::NotFound),
            1 => Ok(RemoteResponse::Record(matches.remove(0))),
            _ => Ok(RemoteResponse::Records(matches)),
        }
    }

    fn read_multiple(
        &self,
        tenant: &TenantId,
        page: &str,
        args: &Fields,
    ) -> Result<RemoteResponse, ConnectorError> {
        let conditions: Vec<FilterCondition> = match args.get("filter") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| ConnectorError::Fault(format!("invalid filter: {e}")))?,
            None => Vec::new(),
        };
        let rows = self
            .table(tenant, page)
            .iter()
            .filter(|row| conditions.iter().all(|c| matches_condition(row, c)))
            .cloned()
            .collect();
        Ok(RemoteResponse::Records(rows))
    }

    fn create(&mut self, tenant: &TenantId, page: &str, mut args: Fields) -> RemoteResponse {
        args.remove(&self.key_field);
        let (_, row) = self.keyed_row(args);
        self.table_mut(tenant, page).push(row.clone());
        RemoteResponse::Record(row)
    }

    fn update(
        &mut self,
        tenant: &TenantId,
        page: &str,
        mut args: Fields,
    ) -> Result<RemoteResponse, ConnectorError> {
        let key = self.key_arg(&args)?;
        let index = self
            .position(tenant, page, &key)
            .ok_or_else(|| ConnectorError::Fault(format!("record {key} does not exist")))?;
        args.remove(&self.key_field);
        let row = &mut self.table_mut(tenant, page)[index];
        row.extend(args);
        Ok(RemoteResponse::Record(row.clone()))
    }

    fn delete(
        &mut self,
        tenant: &TenantId,
        page: &str,
        args: &Fields,
    ) -> Result<RemoteResponse, ConnectorError> {
        let key = self.key_arg(args)?;
        let index = self
            .position(tenant, page, &key)
            .ok_or_else(|| ConnectorError::Fault(format!("record {key} does not exist")))?;
        if self.refusals.contains(tenant) {
            return Ok(RemoteResponse::Flag(false));
        }
        self.table_mut(tenant, page).remove(index);
        Ok(RemoteResponse::Flag(true))
    }
}

fn matches_condition(row: &RemoteRecord, condition: &FilterCondition) -> bool {
    let actual = row.get(&condition.field).unwrap_or(&FieldValue::Null);
    let expected = &condition.value;
    match condition.op {
        FilterOp::Eq => actual == expected,
        FilterOp::Ne => actual != expected,
        FilterOp::Gt => compare(actual, expected) == Some(Ordering::Greater),
        FilterOp::Ge => matches!(
            compare(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOp::Lt => compare(actual, expected) == Some(Ordering::Less),
        FilterOp::Le => matches!(
            compare(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOp::Contains => text_pair(actual, expected).is_some_and(|(a, e)| a.contains(e)),
        FilterOp::StartsWith => text_pair(actual, expected).is_some_and(|(a, e)| a.starts_with(e)),
        FilterOp::EndsWith => text_pair(actual, expected).is_some_and(|(a, e)| a.ends_with(e)),
    }
}

fn compare(actual: &FieldValue, expected: &FieldValue) -> Option<Ordering> {
    match (actual, expected) {
        (FieldValue::Number(a), FieldValue::Number(e)) => a.as_f64()?.partial_cmp(&e.as_f64()?),
        (FieldValue::String(a), FieldValue::String(e)) => Some(a.cmp(e)),
        _ => None,
    }
}

fn text_pair<'a>(actual: &'a FieldValue, expected: &'a FieldValue) -> Option<(&'a str, &'a str)> {
    Some((actual.as_str()?, expected.as_str()?))
}
