//! In-memory stand-ins for the policy store, the Hydra admin API and the run store.
#![allow(dead_code)]

use async_trait::async_trait;
use hydra_reconciler::config::ReconcileConfig;
use hydra_reconciler::error::{RemoteError, StoreError};
use hydra_reconciler::reconcile::coordinator::RunCoordinator;
use hydra_reconciler::reconcile::diff::Update;
use hydra_reconciler::reconcile::model::{
    AccountType, CanonicalClient, CanonicalScope, ClientRecord, EntityKind, ScopeRecord,
};
use hydra_reconciler::reconcile::ports::{AdminApi, Page, PolicyStore, RunStore};
use hydra_reconciler::reconcile::run::RunRecord;
use hydra_reconciler::reconcile::wire;
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub fn client(id: &str, scopes: &[&str]) -> ClientRecord {
    let mut record = ClientRecord::service(id);
    record.scopes = scopes.iter().map(|s| s.to_string()).collect();
    record
}

pub fn browser_client(id: &str, redirect: &str) -> ClientRecord {
    let mut record = ClientRecord::service(id);
    record.account_type = AccountType::Browser;
    record.grant_types = vec!["authorization_code".into(), "refresh_token".into()];
    record.response_types = vec!["code".into()];
    record.redirect_uris = vec![redirect.into()];
    record.skip_consent = false;
    record
}

pub fn scope(name: &str) -> ScopeRecord {
    ScopeRecord::new(name, format!("{name} access"))
}

/// Fast retries so transient-failure tests finish quickly.
pub fn test_config(max_in_flight: usize) -> ReconcileConfig {
    ReconcileConfig {
        max_in_flight,
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
        schedule_interval_secs: 0,
    }
}

#[derive(Default)]
pub struct FakePolicyStore {
    clients: Mutex<Vec<ClientRecord>>,
    scopes: Mutex<Vec<ScopeRecord>>,
    broken: Mutex<bool>,
}

impl FakePolicyStore {
    pub fn new(clients: Vec<ClientRecord>, scopes: Vec<ScopeRecord>) -> Arc<Self> {
        Arc::new(Self {
            clients: Mutex::new(clients),
            scopes: Mutex::new(scopes),
            broken: Mutex::new(false),
        })
    }

    pub fn set(&self, clients: Vec<ClientRecord>, scopes: Vec<ScopeRecord>) {
        *self.clients.lock().unwrap() = clients;
        *self.scopes.lock().unwrap() = scopes;
    }

    pub fn break_reads(&self) {
        *self.broken.lock().unwrap() = true;
    }
}

#[async_trait]
impl PolicyStore for FakePolicyStore {
    async fn list_active_clients(&self) -> Result<Vec<ClientRecord>, StoreError> {
        if *self.broken.lock().unwrap() {
            return Err(StoreError::corrupt("service_accounts", "1", "broken"));
        }
        Ok(self.clients.lock().unwrap().clone())
    }

    async fn list_active_scopes(&self) -> Result<Vec<ScopeRecord>, StoreError> {
        Ok(self.scopes.lock().unwrap().clone())
    }
}

/// One call observed by [`FakeHydra`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub op: &'static str,
    pub entity: EntityKind,
    pub identity: String,
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        self.op != "list"
    }
}

#[derive(Clone, Copy)]
enum Fault {
    Status(StatusCode),
    Timeout,
}

impl Fault {
    fn error(self) -> RemoteError {
        match self {
            Fault::Status(status) => RemoteError::http(status, "injected"),
            Fault::Timeout => RemoteError::Timeout(Duration::from_millis(1)),
        }
    }
}

type Hook = Box<dyn Fn(&Call) + Send + Sync>;

#[derive(Default)]
struct HydraState {
    clients: BTreeMap<String, Value>,
    scopes: BTreeMap<String, Value>,
    calls: Vec<Call>,
    /// (op, identity) -> remaining failures; `None` count fails forever.
    faults: HashMap<(&'static str, String), (Fault, Option<u32>)>,
    list_fault: Option<Fault>,
    page_size: usize,
    repeat_cursor: bool,
    /// How long each mutation stays in flight.
    latency: Duration,
    in_flight: usize,
    peak_in_flight: usize,
}

/// Hydra admin API kept in memory. Stores exactly what the wire layer
/// sends, plus server-generated noise, and applies JSON-Patch updates.
pub struct FakeHydra {
    state: Mutex<HydraState>,
    hook: Mutex<Option<Hook>>,
}

impl Default for FakeHydra {
    fn default() -> Self {
        Self {
            state: Mutex::new(HydraState {
                page_size: 2,
                ..HydraState::default()
            }),
            hook: Mutex::new(None),
        }
    }
}

impl FakeHydra {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed_client(&self, record: &ClientRecord) {
        use hydra_reconciler::reconcile::canonical::Canonicalize;
        let mut payload = wire::client_payload(&record.canonicalize());
        add_noise(&mut payload);
        self.state
            .lock()
            .unwrap()
            .clients
            .insert(record.client_id.clone(), payload);
    }

    pub fn seed_raw_client(&self, id: &str, raw: Value) {
        self.state.lock().unwrap().clients.insert(id.into(), raw);
    }

    pub fn seed_scope(&self, record: &ScopeRecord) {
        use hydra_reconciler::reconcile::canonical::Canonicalize;
        let payload = wire::scope_payload(&record.canonicalize());
        self.state
            .lock()
            .unwrap()
            .scopes
            .insert(record.name.clone(), payload);
    }

    pub fn client(&self, id: &str) -> Option<Value> {
        self.state.lock().unwrap().clients.get(id).cloned()
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().clients.keys().cloned().collect()
    }

    pub fn scope_names(&self) -> Vec<String> {
        self.state.lock().unwrap().scopes.keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Fail `op` on `identity` with `status` for the next `times` calls.
    pub fn fail_times(&self, op: &'static str, identity: &str, status: StatusCode, times: u32) {
        self.state
            .lock()
            .unwrap()
            .faults
            .insert((op, identity.into()), (Fault::Status(status), Some(times)));
    }

    pub fn fail_always(&self, op: &'static str, identity: &str, status: StatusCode) {
        self.state
            .lock()
            .unwrap()
            .faults
            .insert((op, identity.into()), (Fault::Status(status), None));
    }

    pub fn time_out_always(&self, op: &'static str, identity: &str) {
        self.state
            .lock()
            .unwrap()
            .faults
            .insert((op, identity.into()), (Fault::Timeout, None));
    }

    pub fn fail_listing(&self, status: StatusCode) {
        self.state.lock().unwrap().list_fault = Some(Fault::Status(status));
    }

    pub fn repeat_cursor(&self) {
        self.state.lock().unwrap().repeat_cursor = true;
    }

    /// Hold every mutation open for `latency` before it is recorded.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = latency;
    }

    /// Most mutations that were in flight at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.state.lock().unwrap().peak_in_flight
    }

    /// Runs after every recorded call, outside the state lock.
    pub fn on_call(&self, hook: impl Fn(&Call) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    fn record(&self, op: &'static str, entity: EntityKind, identity: &str) -> Result<(), RemoteError> {
        let call = Call {
            op,
            entity,
            identity: identity.to_string(),
        };
        let outcome = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(call.clone());
            let key = (op, identity.to_string());
            match state.faults.get_mut(&key) {
                Some((fault, None)) => Err(fault.error()),
                Some((fault, Some(left))) if *left > 0 => {
                    *left -= 1;
                    Err(fault.error())
                }
                _ => Ok(()),
            }
        };
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(&call);
        }
        outcome
    }

    async fn mutation(
        &self,
        op: &'static str,
        entity: EntityKind,
        identity: &str,
    ) -> Result<(), RemoteError> {
        let latency = {
            let mut state = self.state.lock().unwrap();
            state.in_flight += 1;
            state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.state.lock().unwrap().in_flight -= 1;
        self.record(op, entity, identity)
    }

    fn page(&self, kind: EntityKind, cursor: Option<&str>) -> Result<Page, RemoteError> {
        self.record("list", kind, cursor.unwrap_or(""))?;
        let state = self.state.lock().unwrap();
        if let Some(fault) = state.list_fault {
            return Err(fault.error());
        }
        let items: Vec<Value> = match kind {
            EntityKind::Client => state.clients.values().cloned().collect(),
            EntityKind::Scope => state.scopes.values().cloned().collect(),
        };
        let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = (offset + state.page_size).min(items.len());
        let next_cursor = if state.repeat_cursor {
            Some("1".to_string())
        } else {
            (end < items.len()).then(|| end.to_string())
        };
        Ok(Page {
            items: items[offset.min(end)..end].to_vec(),
            next_cursor,
        })
    }
}

fn add_noise(payload: &mut Value) {
    if let Some(object) = payload.as_object_mut() {
        object.insert("created_at".into(), json!("2024-01-01T00:00:00Z"));
        object.insert("client_secret_expires_at".into(), json!(0));
        object.insert("jwks".into(), json!({}));
    }
}

fn apply_patch(target: &mut Value, patch: &Value) {
    let (Some(object), Some(ops)) = (target.as_object_mut(), patch.as_array()) else {
        return;
    };
    for op in ops {
        assert_eq!(op["op"], "replace", "only replace ops are expected");
        let key = op["path"].as_str().unwrap().trim_start_matches('/');
        object.insert(key.to_string(), op["value"].clone());
    }
}

#[async_trait]
impl AdminApi for FakeHydra {
    async fn list_clients(&self, cursor: Option<&str>) -> Result<Page, RemoteError> {
        self.page(EntityKind::Client, cursor)
    }

    async fn create_client(&self, client: &CanonicalClient) -> Result<(), RemoteError> {
        self.mutation("create", EntityKind::Client, &client.client_id).await?;
        let mut state = self.state.lock().unwrap();
        if state.clients.contains_key(&client.client_id) {
            return Err(RemoteError::http(StatusCode::CONFLICT, "client exists"));
        }
        let mut payload = wire::client_payload(client);
        add_noise(&mut payload);
        state.clients.insert(client.client_id.clone(), payload);
        Ok(())
    }

    async fn update_client(
        &self,
        client_id: &str,
        update: &Update<CanonicalClient>,
    ) -> Result<(), RemoteError> {
        self.mutation("update", EntityKind::Client, client_id).await?;
        let mut state = self.state.lock().unwrap();
        let Some(existing) = state.clients.get_mut(client_id) else {
            return Err(RemoteError::http(StatusCode::NOT_FOUND, "no such client"));
        };
        apply_patch(existing, &wire::client_patch(update));
        Ok(())
    }

    async fn delete_client(&self, client_id: &str) -> Result<(), RemoteError> {
        self.mutation("delete", EntityKind::Client, client_id).await?;
        match self.state.lock().unwrap().clients.remove(client_id) {
            Some(_) => Ok(()),
            None => Err(RemoteError::http(StatusCode::NOT_FOUND, "no such client")),
        }
    }

    async fn list_scopes(&self, cursor: Option<&str>) -> Result<Page, RemoteError> {
        self.page(EntityKind::Scope, cursor)
    }

    async fn create_scope(&self, scope: &CanonicalScope) -> Result<(), RemoteError> {
        self.mutation("create", EntityKind::Scope, &scope.name).await?;
        let mut state = self.state.lock().unwrap();
        if state.scopes.contains_key(&scope.name) {
            return Err(RemoteError::http(StatusCode::CONFLICT, "scope exists"));
        }
        state
            .scopes
            .insert(scope.name.clone(), wire::scope_payload(scope));
        Ok(())
    }

    async fn update_scope(
        &self,
        name: &str,
        update: &Update<CanonicalScope>,
    ) -> Result<(), RemoteError> {
        self.mutation("update", EntityKind::Scope, name).await?;
        let mut state = self.state.lock().unwrap();
        let Some(existing) = state.scopes.get_mut(name) else {
            return Err(RemoteError::http(StatusCode::NOT_FOUND, "no such scope"));
        };
        apply_patch(existing, &wire::scope_patch(update));
        Ok(())
    }

    async fn delete_scope(&self, name: &str) -> Result<(), RemoteError> {
        self.mutation("delete", EntityKind::Scope, name).await?;
        match self.state.lock().unwrap().scopes.remove(name) {
            Some(_) => Ok(()),
            None => Err(RemoteError::http(StatusCode::NOT_FOUND, "no such scope")),
        }
    }

    async fn health(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryRunStore {
    runs: Mutex<Vec<RunRecord>>,
    saves: Mutex<u32>,
}

impl MemoryRunStore {
    pub fn save_count(&self) -> u32 {
        *self.saves.lock().unwrap()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn save(&self, record: &RunRecord) -> Result<(), StoreError> {
        *self.saves.lock().unwrap() += 1;
        let mut runs = self.runs.lock().unwrap();
        match runs.iter_mut().find(|r| r.id() == record.id()) {
            Some(existing) => *existing = record.clone(),
            None => runs.push(record.clone()),
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RunRecord>, StoreError> {
        Ok(self.runs.lock().unwrap().iter().find(|r| r.id() == id).cloned())
    }

    async fn recent(&self, limit: u64) -> Result<Vec<RunRecord>, StoreError> {
        let runs = self.runs.lock().unwrap();
        Ok(runs.iter().rev().take(limit as usize).cloned().collect())
    }
}

pub struct Harness {
    pub store: Arc<FakePolicyStore>,
    pub hydra: Arc<FakeHydra>,
    pub runs: Arc<MemoryRunStore>,
    pub coordinator: RunCoordinator,
}

pub fn harness(clients: Vec<ClientRecord>, scopes: Vec<ScopeRecord>) -> Harness {
    harness_with(clients, scopes, test_config(4))
}

pub fn harness_with(
    clients: Vec<ClientRecord>,
    scopes: Vec<ScopeRecord>,
    config: ReconcileConfig,
) -> Harness {
    let store = FakePolicyStore::new(clients, scopes);
    let hydra = FakeHydra::new();
    let runs = Arc::new(MemoryRunStore::default());
    let coordinator = RunCoordinator::new(store.clone(), hydra.clone(), runs.clone(), &config);
    Harness {
        store,
        hydra,
        runs,
        coordinator,
    }
}
