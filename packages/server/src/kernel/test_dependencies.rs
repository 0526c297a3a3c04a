// TestDependencies - in-memory implementations for testing
//
// Provides mock services that can be injected into ServerDeps for tests.
// Every mock writes to one shared CallLog so tests can assert the order of
// calls across services (e.g. compensation running newest step first).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use super::{
    AuthorizationState, BaseAuthorizationService, BaseCacheService, BaseKeyValueStore,
    BaseNotificationService, BaseSecondaryDataService, Clock, MergeConfirmationEmail,
    RollbackRoleMergeRequest, RollbackUserDataRequest, ServerDeps,
};
use crate::domains::account_merge::models::{
    IdentityLink, MergeRequest, MergeRequestStatus, NewMergeRequest, StatusUpdate, User,
};
use crate::domains::account_merge::repository::{IdentityStore, MergeRequestRepository};

// =============================================================================
// Shared call log and failure injection
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Entries starting with `prefix`, in call order
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.matching(prefix).len()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// How many upcoming calls of one operation should fail
#[derive(Debug, Default)]
pub struct FailurePlan {
    remaining: Mutex<u32>,
}

impl FailurePlan {
    pub fn fail_always(&self) {
        *self.remaining.lock().unwrap() = u32::MAX;
    }

    pub fn fail_times(&self, times: u32) {
        *self.remaining.lock().unwrap() = times;
    }

    pub fn reset(&self) {
        *self.remaining.lock().unwrap() = 0;
    }

    /// Consumes one planned failure, if any
    pub fn should_fail(&self) -> bool {
        let mut remaining = self.remaining.lock().unwrap();
        match *remaining {
            0 => false,
            u32::MAX => true,
            _ => {
                *remaining -= 1;
                true
            }
        }
    }
}

// =============================================================================
// Mock Clock
// =============================================================================

/// Settable clock; defaults to 2025-03-01T12:00:00Z
pub struct MockClock {
    now: Mutex<DateTime<Utc>>,
}

impl MockClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::at(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap())
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// =============================================================================
// In-memory Key-Value Store
// =============================================================================

/// TTLs are measured against the injected clock
pub struct InMemoryKeyValueStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
    pub get_failures: FailurePlan,
}

impl InMemoryKeyValueStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
            get_failures: FailurePlan::default(),
        }
    }

    /// Stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }
}

#[async_trait]
impl BaseKeyValueStore for InMemoryKeyValueStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let expires_at = self.clock.now() + chrono::Duration::from_std(ttl)?;
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        if self.get_failures.should_fail() {
            anyhow::bail!("key_value_entries read failed");
        }
        let now = self.clock.now();
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok((before - entries.len()) as u64)
    }
}

// =============================================================================
// In-memory Merge Request Repository
// =============================================================================

pub struct InMemoryMergeRequestRepository {
    clock: Arc<dyn Clock>,
    next_id: AtomicI64,
    rows: Mutex<BTreeMap<i64, MergeRequest>>,
    transitions: Mutex<Vec<(i64, MergeRequestStatus, MergeRequestStatus)>>,
    pub create_failures: FailurePlan,
}

impl InMemoryMergeRequestRepository {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            next_id: AtomicI64::new(1),
            rows: Mutex::new(BTreeMap::new()),
            transitions: Mutex::new(Vec::new()),
            create_failures: FailurePlan::default(),
        }
    }

    pub fn get(&self, id: i64) -> Option<MergeRequest> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<MergeRequest> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    /// Every applied (id, from, to) status change, in order
    pub fn transitions(&self) -> Vec<(i64, MergeRequestStatus, MergeRequestStatus)> {
        self.transitions.lock().unwrap().clone()
    }
}

#[async_trait]
impl MergeRequestRepository for InMemoryMergeRequestRepository {
    async fn create(&self, new: &NewMergeRequest) -> Result<MergeRequest> {
        if self.create_failures.should_fail() {
            anyhow::bail!("merge_requests insert failed");
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = MergeRequest {
            id,
            target_user_id: new.target_user_id,
            source_user_id: new.source_user_id,
            provider: new.provider.clone(),
            provider_id: new.provider_id.clone(),
            status: MergeRequestStatus::PendingEmailVerification,
            error_message: None,
            retry_count: 0,
            email_verified_at: None,
            completed_at: None,
            created_at: new.created_at,
            updated_at: new.created_at,
        };
        self.rows.lock().unwrap().insert(id, request.clone());
        Ok(request)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<MergeRequest>> {
        Ok(self.get(id))
    }

    async fn find_pending_duplicate(
        &self,
        source_user_id: Uuid,
        target_user_id: Uuid,
        provider: &str,
        created_after: DateTime<Utc>,
    ) -> Result<Option<MergeRequest>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|r| {
                r.source_user_id == source_user_id
                    && r.target_user_id == target_user_id
                    && r.provider == provider
                    && r.status == MergeRequestStatus::PendingEmailVerification
                    && r.created_at >= created_after
            })
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn update_status(
        &self,
        id: i64,
        expected: MergeRequestStatus,
        update: &StatusUpdate,
    ) -> Result<Option<MergeRequest>> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(&id) else {
            return Ok(None);
        };
        if row.status != expected {
            return Ok(None);
        }

        update.apply(row, self.clock.now());
        self.transitions
            .lock()
            .unwrap()
            .push((id, expected, update.status()));
        Ok(Some(row.clone()))
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.rows.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn find_stale_in_progress(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<MergeRequest>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|r| {
                r.status == MergeRequestStatus::InProgress && r.updated_at < updated_before
            })
            .cloned()
            .collect())
    }
}

// =============================================================================
// In-memory Identity Store
// =============================================================================

pub struct InMemoryIdentityStore {
    log: CallLog,
    clock: Arc<dyn Clock>,
    users: Mutex<HashMap<Uuid, User>>,
    links: Mutex<Vec<IdentityLink>>,
    pub update_link_failures: FailurePlan,
    pub soft_delete_failures: FailurePlan,
    pub restore_failures: FailurePlan,
}

impl InMemoryIdentityStore {
    pub fn new(log: CallLog, clock: Arc<dyn Clock>) -> Self {
        Self {
            log,
            clock,
            users: Mutex::new(HashMap::new()),
            links: Mutex::new(Vec::new()),
            update_link_failures: FailurePlan::default(),
            soft_delete_failures: FailurePlan::default(),
            restore_failures: FailurePlan::default(),
        }
    }

    pub fn add_user(&self, email: &str) -> User {
        let now = self.clock.now();
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            display_name: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        self.users.lock().unwrap().insert(user.id, user.clone());
        user
    }

    pub fn add_link(&self, user_id: Uuid, provider: &str, provider_id: &str) -> IdentityLink {
        let link = IdentityLink {
            id: Uuid::new_v4(),
            user_id,
            provider: provider.to_string(),
            provider_id: provider_id.to_string(),
            created_at: self.clock.now(),
        };
        self.links.lock().unwrap().push(link.clone());
        link
    }

    pub fn user(&self, id: Uuid) -> Option<User> {
        self.users.lock().unwrap().get(&id).cloned()
    }

    /// (provider, provider_id) pairs owned by `user_id`
    pub fn links_of(&self, user_id: Uuid) -> Vec<(String, String)> {
        self.links
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.user_id == user_id)
            .map(|l| (l.provider.clone(), l.provider_id.clone()))
            .collect()
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.user(id))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.deleted_at.is_none() && u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_identity_links(&self, user_id: Uuid) -> Result<Vec<IdentityLink>> {
        Ok(self
            .links
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_identity_link(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> Result<Option<IdentityLink>> {
        Ok(self
            .links
            .lock()
            .unwrap()
            .iter()
            .find(|l| l.provider == provider && l.provider_id == provider_id)
            .cloned())
    }

    async fn update_identity_link(
        &self,
        provider: &str,
        provider_id: &str,
        user_id: Uuid,
    ) -> Result<()> {
        self.log.record(format!(
            "identity.update_identity_link {}:{} -> {}",
            provider, provider_id, user_id
        ));
        if self.update_link_failures.should_fail() {
            anyhow::bail!("identity store unavailable");
        }

        let mut links = self.links.lock().unwrap();
        let Some(link) = links
            .iter_mut()
            .find(|l| l.provider == provider && l.provider_id == provider_id)
        else {
            anyhow::bail!("no {} identity link with id {}", provider, provider_id);
        };
        link.user_id = user_id;
        Ok(())
    }

    async fn soft_delete(&self, user_id: Uuid) -> Result<()> {
        self.log.record(format!("identity.soft_delete {}", user_id));
        if self.soft_delete_failures.should_fail() {
            anyhow::bail!("identity store unavailable");
        }

        let now = self.clock.now();
        if let Some(user) = self.users.lock().unwrap().get_mut(&user_id) {
            user.deleted_at.get_or_insert(now);
            user.updated_at = now;
        }
        Ok(())
    }

    async fn restore(&self, user_id: Uuid) -> Result<()> {
        self.log.record(format!("identity.restore {}", user_id));
        if self.restore_failures.should_fail() {
            anyhow::bail!("identity store unavailable");
        }

        if let Some(user) = self.users.lock().unwrap().get_mut(&user_id) {
            user.deleted_at = None;
            user.updated_at = self.clock.now();
        }
        Ok(())
    }
}

// =============================================================================
// Mock Authorization Service
// =============================================================================

pub struct MockAuthorizationService {
    log: CallLog,
    states: Mutex<HashMap<Uuid, AuthorizationState>>,
    rollbacks: Mutex<Vec<RollbackRoleMergeRequest>>,
    timeouts: Mutex<Vec<Duration>>,
    pub fetch_failures: FailurePlan,
    pub merge_failures: FailurePlan,
    pub rollback_failures: FailurePlan,
    /// Merge calls that never answer, so the caller's timeout fires
    pub merge_hangs: FailurePlan,
}

impl MockAuthorizationService {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            states: Mutex::new(HashMap::new()),
            rollbacks: Mutex::new(Vec::new()),
            timeouts: Mutex::new(Vec::new()),
            fetch_failures: FailurePlan::default(),
            merge_failures: FailurePlan::default(),
            rollback_failures: FailurePlan::default(),
            merge_hangs: FailurePlan::default(),
        }
    }

    pub fn with_roles(&self, user_id: Uuid, roles: &[&str]) {
        self.states.lock().unwrap().insert(
            user_id,
            AuthorizationState {
                user_id,
                roles: roles.iter().map(|r| r.to_string()).collect(),
                permissions: Vec::new(),
            },
        );
    }

    pub fn rollbacks(&self) -> Vec<RollbackRoleMergeRequest> {
        self.rollbacks.lock().unwrap().clone()
    }

    /// Timeouts passed to merge calls
    pub fn timeouts(&self) -> Vec<Duration> {
        self.timeouts.lock().unwrap().clone()
    }
}

#[async_trait]
impl BaseAuthorizationService for MockAuthorizationService {
    async fn fetch_authorization_state(
        &self,
        user_id: Uuid,
        _timeout: Duration,
    ) -> Result<AuthorizationState> {
        self.log
            .record(format!("authorization.fetch_authorization_state {}", user_id));
        if self.fetch_failures.should_fail() {
            anyhow::bail!("authorization service unavailable");
        }
        Ok(self
            .states
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or(AuthorizationState {
                user_id,
                roles: Vec::new(),
                permissions: Vec::new(),
            }))
    }

    async fn merge_roles(
        &self,
        source_user_id: Uuid,
        target_user_id: Uuid,
        timeout: Duration,
    ) -> Result<()> {
        self.log.record("authorization.merge_roles");
        self.timeouts.lock().unwrap().push(timeout);
        if self.merge_hangs.should_fail() {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.merge_failures.should_fail() {
            anyhow::bail!("authorization service returned 503");
        }

        let mut states = self.states.lock().unwrap();
        if let Some(source) = states.get(&source_user_id).cloned() {
            let target = states
                .entry(target_user_id)
                .or_insert_with(|| AuthorizationState {
                    user_id: target_user_id,
                    roles: Vec::new(),
                    permissions: Vec::new(),
                });
            for role in source.roles {
                if !target.roles.contains(&role) {
                    target.roles.push(role);
                }
            }
        }
        Ok(())
    }

    async fn rollback_role_merge(
        &self,
        rollback: &RollbackRoleMergeRequest,
        _timeout: Duration,
    ) -> Result<()> {
        self.log.record("authorization.rollback_role_merge");
        self.rollbacks.lock().unwrap().push(rollback.clone());
        if self.rollback_failures.should_fail() {
            anyhow::bail!("authorization service returned 500");
        }
        Ok(())
    }
}

// =============================================================================
// Mock Secondary Data Service
// =============================================================================

pub struct MockSecondaryDataService {
    log: CallLog,
    rollbacks: Mutex<Vec<RollbackUserDataRequest>>,
    timeouts: Mutex<Vec<Duration>>,
    pub merge_failures: FailurePlan,
    pub rollback_failures: FailurePlan,
}

impl MockSecondaryDataService {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            rollbacks: Mutex::new(Vec::new()),
            timeouts: Mutex::new(Vec::new()),
            merge_failures: FailurePlan::default(),
            rollback_failures: FailurePlan::default(),
        }
    }

    pub fn rollbacks(&self) -> Vec<RollbackUserDataRequest> {
        self.rollbacks.lock().unwrap().clone()
    }

    pub fn timeouts(&self) -> Vec<Duration> {
        self.timeouts.lock().unwrap().clone()
    }
}

#[async_trait]
impl BaseSecondaryDataService for MockSecondaryDataService {
    async fn merge_user_data(
        &self,
        _source_user_id: Uuid,
        _target_user_id: Uuid,
        timeout: Duration,
    ) -> Result<()> {
        self.log.record("secondary_data.merge_user_data");
        self.timeouts.lock().unwrap().push(timeout);
        if self.merge_failures.should_fail() {
            anyhow::bail!("secondary data service returned 503");
        }
        Ok(())
    }

    async fn rollback_merge(
        &self,
        rollback: &RollbackUserDataRequest,
        _timeout: Duration,
    ) -> Result<()> {
        self.log.record("secondary_data.rollback_merge");
        self.rollbacks.lock().unwrap().push(rollback.clone());
        if self.rollback_failures.should_fail() {
            anyhow::bail!("secondary data service returned 500");
        }
        Ok(())
    }
}

// =============================================================================
// Mock Notification Service
// =============================================================================

pub struct MockNotificationService {
    log: CallLog,
    sent: Mutex<Vec<MergeConfirmationEmail>>,
    pub failures: FailurePlan,
}

impl MockNotificationService {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            sent: Mutex::new(Vec::new()),
            failures: FailurePlan::default(),
        }
    }

    pub fn sent(&self) -> Vec<MergeConfirmationEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_sent(&self) -> Option<MergeConfirmationEmail> {
        self.sent.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl BaseNotificationService for MockNotificationService {
    async fn send_merge_confirmation(&self, email: &MergeConfirmationEmail) -> Result<()> {
        self.log
            .record(format!("notifications.send_merge_confirmation {}", email.to));
        if self.failures.should_fail() {
            anyhow::bail!("mail relay refused connection");
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

// =============================================================================
// Mock Cache Service
// =============================================================================

pub struct MockCacheService {
    log: CallLog,
    invalidated: Mutex<Vec<String>>,
    pub failures: FailurePlan,
}

impl MockCacheService {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            invalidated: Mutex::new(Vec::new()),
            failures: FailurePlan::default(),
        }
    }

    pub fn invalidated(&self) -> Vec<String> {
        self.invalidated.lock().unwrap().clone()
    }
}

#[async_trait]
impl BaseCacheService for MockCacheService {
    async fn invalidate(&self, key: &str) -> Result<()> {
        self.log.record(format!("cache.invalidate {}", key));
        if self.failures.should_fail() {
            anyhow::bail!("cache unreachable");
        }
        self.invalidated.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

// =============================================================================
// TestDependencies - Builder for test dependencies
// =============================================================================

#[derive(Clone)]
pub struct TestDependencies {
    pub log: CallLog,
    pub clock: Arc<MockClock>,
    pub merge_requests: Arc<InMemoryMergeRequestRepository>,
    pub identities: Arc<InMemoryIdentityStore>,
    pub kv_store: Arc<InMemoryKeyValueStore>,
    pub authorization: Arc<MockAuthorizationService>,
    pub secondary_data: Arc<MockSecondaryDataService>,
    pub notifications: Arc<MockNotificationService>,
    pub cache: Arc<MockCacheService>,
    pub confirm_base_url: String,
}

impl TestDependencies {
    pub fn new() -> Self {
        let log = CallLog::new();
        let clock = Arc::new(MockClock::default());

        Self {
            merge_requests: Arc::new(InMemoryMergeRequestRepository::new(clock.clone())),
            identities: Arc::new(InMemoryIdentityStore::new(log.clone(), clock.clone())),
            kv_store: Arc::new(InMemoryKeyValueStore::new(clock.clone())),
            authorization: Arc::new(MockAuthorizationService::new(log.clone())),
            secondary_data: Arc::new(MockSecondaryDataService::new(log.clone())),
            notifications: Arc::new(MockNotificationService::new(log.clone())),
            cache: Arc::new(MockCacheService::new(log.clone())),
            confirm_base_url: "https://id.example.test/account/merge/confirm".to_string(),
            log,
            clock,
        }
    }

    /// Set the confirmation link base
    pub fn confirm_base_url(mut self, url: impl Into<String>) -> Self {
        self.confirm_base_url = url.into();
        self
    }

    /// Convert into ServerDeps; the mocks stay reachable through `self`'s clones
    pub fn into_deps(self) -> ServerDeps {
        ServerDeps::new(
            self.merge_requests,
            self.identities,
            self.kv_store,
            self.authorization,
            self.secondary_data,
            self.notifications,
            self.cache,
            self.clock,
            self.confirm_base_url,
        )
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
