//! Ship lifecycle orchestration: the allocation core.
//!
//! `acquire` is the heart of the system. For a given session it will, in
//! order: return the ship it already holds, revive its stopped ship from
//! the data volume, claim a pre-warmed ship from the pool, or create a
//! fresh container subject to the global cap. Allocation is serialized per
//! session id; cross-session races are resolved by the atomic statements
//! in the repository.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, oneshot};
use tracing::{error, info, warn};

use crate::config::{CapacityPolicy, Settings};
use crate::driver::ContainerDriver;
use crate::error::{BayError, BayResult};
use crate::history::models::{ExecType, ExecutionRecord};
use crate::history::repository::HistoryRepository;
use crate::session::models::Session;
use crate::session::repository::SessionRepository;

use super::client::ShipClient;
use super::models::{CreateShipRequest, ExecRequest, ExecResponse, Ship, ShipSpec, ShipStatus};
use super::models::UploadFileResponse;

/// Per-field ceiling for recorded exec output.
const MAX_HISTORY_FIELD: usize = 64 * 1024;

/// FIFO queue of allocators blocked on the global ship cap.
#[derive(Default)]
struct CapacityQueue {
    waiters: std::sync::Mutex<VecDeque<oneshot::Sender<()>>>,
}

impl CapacityQueue {
    fn subscribe(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().expect("capacity queue poisoned").push_back(tx);
        rx
    }

    /// Wake the longest-waiting allocator, skipping ones that gave up.
    fn notify_release(&self) {
        let mut waiters = self.waiters.lock().expect("capacity queue poisoned");
        while let Some(tx) = waiters.pop_front() {
            if tx.send(()).is_ok() {
                break;
            }
        }
    }
}

pub struct ShipService {
    ships: super::repository::ShipRepository,
    sessions: SessionRepository,
    history: HistoryRepository,
    driver: Arc<dyn ContainerDriver>,
    client: ShipClient,
    settings: Arc<Settings>,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    capacity: CapacityQueue,
}

impl ShipService {
    pub fn new(
        ships: super::repository::ShipRepository,
        sessions: SessionRepository,
        history: HistoryRepository,
        driver: Arc<dyn ContainerDriver>,
        client: ShipClient,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            ships,
            sessions,
            history,
            driver,
            client,
            settings,
            session_locks: Mutex::new(HashMap::new()),
            capacity: CapacityQueue::default(),
        }
    }

    pub fn ships(&self) -> &super::repository::ShipRepository {
        &self.ships
    }

    pub fn sessions(&self) -> &SessionRepository {
        &self.sessions
    }

    pub fn history(&self) -> &HistoryRepository {
        &self.history
    }

    fn default_spec(&self) -> ShipSpec {
        ShipSpec {
            cpus: Some(self.settings.default_ship_cpus),
            memory: Some(self.settings.default_ship_memory.clone()),
            disk: None,
        }
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Allocate (or retrieve) the ship for a session.
    pub async fn acquire(
        &self,
        session_id: &str,
        request: &CreateShipRequest,
    ) -> BayResult<Ship> {
        if request.ttl <= 0 {
            return Err(BayError::invalid("ttl must be positive"));
        }
        let spec = request.spec.clone().unwrap_or_else(|| self.default_spec());
        self.driver.validate_spec(&spec)?;

        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        if !request.force_create {
            if let Some(ship) = self.try_existing(session_id, request.ttl, &spec).await? {
                return Ok(ship);
            }
            if self.settings.warm_pool_enabled
                && let Some(ship) = self.try_claim_pool(session_id, request.ttl).await?
            {
                info!(session_id, ship_id = %ship.id, "allocated warm pool ship");
                return Ok(ship);
            }
        } else {
            info!(session_id, "force_create set, skipping reuse");
        }

        self.create_fresh(session_id, request.ttl, &spec).await
    }

    /// Steps 1 and 2: the session's current ship, running or revivable.
    async fn try_existing(
        &self,
        session_id: &str,
        ttl: i64,
        spec: &ShipSpec,
    ) -> BayResult<Option<Ship>> {
        let Some(session) = self.sessions.get_by_session_id(session_id).await? else {
            return Ok(None);
        };
        let Some(ship) = self.ships.get(&session.ship_id).await? else {
            // Dangling binding; a fresh allocation will replace it.
            return Ok(None);
        };

        if ship.status == ShipStatus::Running {
            let alive = match &ship.container_id {
                Some(cid) => self.driver.is_running(cid).await.unwrap_or(false),
                None => false,
            };
            if alive {
                let expires_at = Utc::now() + chrono::Duration::seconds(ttl);
                self.sessions.touch(session_id).await?;
                self.sessions
                    .refresh_expiry(session_id, expires_at, Some(ttl))
                    .await?;
                self.ships.extend_expiry(&ship.id, expires_at).await?;
                info!(session_id, ship_id = %ship.id, "session reusing running ship");
                return Ok(self.ships.get(&ship.id).await?);
            }

            warn!(ship_id = %ship.id, "container vanished under a running ship");
            self.ships.mark_stopped(&ship.id).await?;
            self.capacity.notify_release();
        }

        let Some(ship) = self.ships.get(&session.ship_id).await? else {
            return Ok(None);
        };
        if ship.status == ShipStatus::Stopped && self.driver.data_exists(&ship.id).await {
            info!(session_id, ship_id = %ship.id, "reviving stopped ship");
            match self.revive(&ship, session_id, ttl, spec).await {
                Ok(ship) => return Ok(Some(ship)),
                Err(e) => {
                    // Best-effort; a fresh allocation is still possible.
                    warn!(ship_id = %ship.id, error = %e, "revive failed, falling through");
                }
            }
        }

        Ok(None)
    }

    /// Step 3: atomic warm-pool claim plus binding.
    async fn try_claim_pool(&self, session_id: &str, ttl: i64) -> BayResult<Option<Ship>> {
        let expires_at = Utc::now() + chrono::Duration::seconds(ttl);
        let Some(ship) = self.ships.claim_warm_pool(ttl, expires_at).await? else {
            return Ok(None);
        };
        self.bind(session_id, &ship.id, ttl).await?;
        Ok(self.ships.get(&ship.id).await?)
    }

    /// Step 4: insert under the cap (the authoritative check), create the
    /// container, probe it, bind.
    async fn create_fresh(
        &self,
        session_id: &str,
        ttl: i64,
        spec: &ShipSpec,
    ) -> BayResult<Ship> {
        let ship = Ship::new(ttl, spec, false);
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.settings.ship_wait_timeout);

        loop {
            if self
                .ships
                .insert_within_cap(&ship, self.settings.max_ship_num)
                .await?
            {
                break;
            }

            match self.settings.behavior_after_max_ship {
                CapacityPolicy::Reject => {
                    return Err(BayError::CapacityExhausted(format!(
                        "maximum number of ships reached ({})",
                        self.settings.max_ship_num
                    )));
                }
                CapacityPolicy::Wait => {
                    let rx = self.capacity.subscribe();
                    // A slot may have freed between the failed insert and
                    // the subscription; don't sleep through it.
                    if self.ships.count_active().await? < self.settings.max_ship_num {
                        continue;
                    }
                    let Some(remaining) =
                        deadline.checked_duration_since(tokio::time::Instant::now())
                    else {
                        return Err(BayError::WaitTimeout(
                            "timed out waiting for a ship slot".to_string(),
                        ));
                    };
                    if tokio::time::timeout(remaining, rx).await.is_err() {
                        return Err(BayError::WaitTimeout(
                            "timed out waiting for a ship slot".to_string(),
                        ));
                    }
                }
            }
        }

        match self.provision(&ship, spec, false).await {
            Ok(()) => {
                self.bind(session_id, &ship.id, ttl).await?;
                info!(session_id, ship_id = %ship.id, "ship created");
                self.ships
                    .get(&ship.id)
                    .await?
                    .ok_or_else(|| BayError::not_found("ship vanished after creation"))
            }
            Err(e) => {
                error!(ship_id = %ship.id, error = %e, "ship creation failed");
                let _ = self.ships.delete(&ship.id).await;
                self.capacity.notify_release();
                Err(e)
            }
        }
    }

    /// Drive the container up and probe it; transitions the row to Running.
    async fn provision(&self, ship: &Ship, spec: &ShipSpec, warm_pool: bool) -> BayResult<()> {
        let info = self.driver.create(&ship.id, ship.ttl, spec).await?;

        if !self.client.wait_for_ready(&info.endpoint).await {
            let _ = self.driver.stop(&info.container_id).await;
            return Err(BayError::unready(format!(
                "ship {} failed its readiness probe within {}s",
                ship.id, self.settings.ship_health_check_timeout
            )));
        }

        let expires_at = Utc::now() + chrono::Duration::seconds(ship.ttl);
        self.ships
            .mark_running(&ship.id, &info.container_id, &info.endpoint, expires_at, warm_pool)
            .await?;
        Ok(())
    }

    /// Re-create a stopped ship's container against its existing volume.
    async fn revive(
        &self,
        ship: &Ship,
        session_id: &str,
        ttl: i64,
        spec: &ShipSpec,
    ) -> BayResult<Ship> {
        let info = match self.driver.create(&ship.id, ttl, spec).await {
            Ok(info) => info,
            Err(e) => return Err(e.into()),
        };

        if !self.client.wait_for_ready(&info.endpoint).await {
            let _ = self.driver.stop(&info.container_id).await;
            self.ships.mark_stopped(&ship.id).await?;
            return Err(BayError::unready(format!(
                "revived ship {} failed its readiness probe",
                ship.id
            )));
        }

        let expires_at = Utc::now() + chrono::Duration::seconds(ttl);
        self.ships
            .mark_running(&ship.id, &info.container_id, &info.endpoint, expires_at, false)
            .await?;

        if self.sessions.get_binding(session_id, &ship.id).await?.is_some() {
            self.sessions.touch(session_id).await?;
            self.sessions
                .refresh_expiry(session_id, expires_at, Some(ttl))
                .await?;
        } else {
            self.bind(session_id, &ship.id, ttl).await?;
        }

        self.ships
            .get(&ship.id)
            .await?
            .ok_or_else(|| BayError::not_found("ship vanished after revive"))
    }

    /// Replace whatever binding the session had with one to `ship_id`.
    async fn bind(&self, session_id: &str, ship_id: &str, ttl: i64) -> BayResult<()> {
        self.sessions.delete_by_session_id(session_id).await?;
        self.sessions
            .create(&Session::new(session_id, ship_id, ttl))
            .await?;
        Ok(())
    }

    pub async fn get(&self, ship_id: &str) -> BayResult<Ship> {
        self.ships
            .get(ship_id)
            .await?
            .ok_or_else(|| BayError::not_found(format!("ship not found: {ship_id}")))
    }

    pub async fn list_active(&self) -> BayResult<Vec<Ship>> {
        Ok(self.ships.list_active().await?)
    }

    pub async fn list_all(&self) -> BayResult<Vec<Ship>> {
        Ok(self.ships.list_all().await?)
    }

    /// Recover a Stopped ship on demand.
    pub async fn start(&self, ship_id: &str, session_id: &str, ttl: i64) -> BayResult<Ship> {
        if ttl <= 0 {
            return Err(BayError::invalid("ttl must be positive"));
        }
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let ship = self.get(ship_id).await?;
        match ship.status {
            ShipStatus::Running => Ok(ship),
            ShipStatus::Creating => Err(BayError::unready(format!(
                "ship {ship_id} is still being created"
            ))),
            ShipStatus::Stopped => {
                if let Some(existing) = self.sessions.get_by_session_id(session_id).await?
                    && existing.ship_id != ship.id
                {
                    return Err(BayError::invalid(format!(
                        "session {session_id} is bound to another ship"
                    )));
                }
                let spec = ship.spec();
                self.revive(&ship, session_id, ttl, &spec).await
            }
        }
    }

    /// Soft stop: container goes away, the row and the data volume stay.
    pub async fn stop(&self, ship_id: &str) -> BayResult<()> {
        let ship = self.get(ship_id).await?;
        if ship.status == ShipStatus::Stopped {
            return Err(BayError::not_found(format!(
                "ship {ship_id} is already stopped"
            )));
        }

        if let Some(ref container_id) = ship.container_id
            && let Err(e) = self.driver.stop(container_id).await
        {
            error!(ship_id, error = %e, "container stop failed");
        }

        self.ships.mark_stopped(ship_id).await?;
        let expired = self.sessions.expire_for_ship(ship_id).await?;
        if expired > 0 {
            info!(ship_id, expired, "expired sessions for stopped ship");
        }
        self.capacity.notify_release();
        Ok(())
    }

    /// Remove the row and every dependent session. The data volume is kept;
    /// reclaiming it is an operator decision.
    pub async fn delete_permanent(&self, ship_id: &str) -> BayResult<()> {
        let ship = self.get(ship_id).await?;

        if let Some(ref container_id) = ship.container_id
            && let Err(e) = self.driver.stop(container_id).await
        {
            error!(ship_id, error = %e, "container stop failed");
        }

        for session in self.sessions.list_for_ship(ship_id).await? {
            self.history.delete_for_session(&session.session_id).await?;
        }
        let deleted = self.sessions.delete_for_ship(ship_id).await?;
        if deleted > 0 {
            info!(ship_id, deleted, "deleted sessions for ship");
        }

        self.ships.delete(ship_id).await?;
        self.capacity.notify_release();
        Ok(())
    }

    /// Bump the ship's expiry to `now + ttl`, never shortening it.
    pub async fn extend_ttl(&self, ship_id: &str, ttl: i64) -> BayResult<Ship> {
        if ttl <= 0 {
            return Err(BayError::invalid("ttl must be positive"));
        }
        let ship = self.get(ship_id).await?;
        if ship.status == ShipStatus::Stopped {
            return Err(BayError::not_found(format!(
                "ship {ship_id} is stopped and has no expiry to extend"
            )));
        }

        let expires_at = Utc::now() + chrono::Duration::seconds(ttl);
        self.ships.extend_expiry(ship_id, expires_at).await?;
        self.get(ship_id).await
    }

    /// Forward an exec into the ship, recording ipython/shell operations.
    pub async fn execute(
        &self,
        ship_id: &str,
        session_id: &str,
        request: &ExecRequest,
    ) -> BayResult<ExecResponse> {
        let (ship, _session) = self.authorize(ship_id, session_id).await?;
        let endpoint = ship
            .endpoint
            .clone()
            .ok_or_else(|| BayError::unready(format!("ship {ship_id} has no endpoint")))?;

        self.sessions.touch(session_id).await?;

        let started = std::time::Instant::now();
        let result = self.client.exec(&endpoint, request, session_id).await;
        let elapsed_ms = started.elapsed().as_millis() as i64;

        let execution_id = self
            .record_execution(session_id, ship_id, request, &result, elapsed_ms)
            .await;

        if result.success {
            self.refresh_after_activity(session_id, ship_id).await;
        }

        Ok(ExecResponse {
            success: result.success,
            data: result.data,
            error: result.error,
            execution_id,
        })
    }

    pub async fn upload(
        &self,
        ship_id: &str,
        session_id: &str,
        content: Vec<u8>,
        file_path: &str,
    ) -> BayResult<UploadFileResponse> {
        if content.len() > self.settings.max_upload_size {
            return Err(BayError::PayloadTooLarge(format!(
                "file size ({} bytes) exceeds maximum allowed size ({} bytes)",
                content.len(),
                self.settings.max_upload_size
            )));
        }

        let (ship, _session) = self.authorize(ship_id, session_id).await?;
        let endpoint = ship
            .endpoint
            .clone()
            .ok_or_else(|| BayError::unready(format!("ship {ship_id} has no endpoint")))?;

        self.sessions.touch(session_id).await?;
        let response = self
            .client
            .upload(&endpoint, content, file_path, session_id)
            .await;
        if response.success {
            self.refresh_after_activity(session_id, ship_id).await;
        }
        Ok(response)
    }

    pub async fn download(
        &self,
        ship_id: &str,
        session_id: &str,
        file_path: &str,
    ) -> BayResult<Vec<u8>> {
        let (ship, _session) = self.authorize(ship_id, session_id).await?;
        let endpoint = ship
            .endpoint
            .clone()
            .ok_or_else(|| BayError::unready(format!("ship {ship_id} has no endpoint")))?;

        self.sessions.touch(session_id).await?;
        let bytes = self.client.download(&endpoint, file_path, session_id).await?;
        self.refresh_after_activity(session_id, ship_id).await;
        Ok(bytes)
    }

    /// Log tail: the live service tail for a Running ship, the container
    /// tail from the driver otherwise.
    pub async fn logs(&self, ship_id: &str, tail: Option<u32>) -> BayResult<String> {
        let ship = self.get(ship_id).await?;
        if ship.status == ShipStatus::Running
            && let Some(ref endpoint) = ship.endpoint
        {
            return self.client.logs(endpoint, tail).await;
        }
        match ship.container_id {
            Some(ref container_id) => Ok(self.driver.logs(container_id, tail).await?),
            None => Ok(String::new()),
        }
    }

    /// The ship must be Running and bound to this session.
    pub async fn authorize(
        &self,
        ship_id: &str,
        session_id: &str,
    ) -> BayResult<(Ship, Session)> {
        let ship = self.get(ship_id).await?;
        if ship.status != ShipStatus::Running {
            return Err(BayError::unready(format!(
                "ship {ship_id} is not running"
            )));
        }
        let session = self
            .sessions
            .get_binding(session_id, ship_id)
            .await?
            .ok_or_else(|| {
                BayError::Forbidden(format!(
                    "session {session_id} does not have access to ship {ship_id}"
                ))
            })?;
        Ok((ship, session))
    }

    /// Delete a session binding and its history. The ship keeps running
    /// until its TTL expires or it is stopped explicitly.
    pub async fn delete_session(&self, session_id: &str) -> BayResult<()> {
        if self.sessions.get_by_session_id(session_id).await?.is_none() {
            return Err(BayError::not_found(format!(
                "session not found: {session_id}"
            )));
        }
        self.history.delete_for_session(session_id).await?;
        self.sessions.delete_by_session_id(session_id).await?;
        Ok(())
    }

    /// Successful activity re-arms the session window and, transitively,
    /// the ship's expiry. Failures here never fail the user call.
    async fn refresh_after_activity(&self, session_id: &str, ship_id: &str) {
        let refresh = async {
            let Some(session) = self.sessions.get_binding(session_id, ship_id).await? else {
                return Ok::<_, BayError>(());
            };
            let expires_at = Utc::now() + chrono::Duration::seconds(session.initial_ttl);
            self.sessions.refresh_expiry(session_id, expires_at, None).await?;
            self.ships.extend_expiry(ship_id, expires_at).await?;
            Ok(())
        };
        if let Err(e) = refresh.await {
            warn!(session_id, ship_id, error = %e, "activity refresh failed");
        }
    }

    /// Record an ipython/shell execution; other exec types are not history.
    async fn record_execution(
        &self,
        session_id: &str,
        ship_id: &str,
        request: &ExecRequest,
        result: &super::client::ShipExecResult,
        elapsed_ms: i64,
    ) -> Option<String> {
        let payload = request.payload.as_ref();
        let (exec_type, code) = match request.exec_type.as_str() {
            "ipython/exec" => (
                ExecType::Python,
                payload.and_then(|p| p.get("code")).and_then(|c| c.as_str()),
            ),
            "shell/exec" => (
                ExecType::Shell,
                payload
                    .and_then(|p| p.get("command"))
                    .and_then(|c| c.as_str()),
            ),
            _ => return None,
        };
        let code = code.unwrap_or_default();

        let output = result
            .data
            .as_ref()
            .map(|d| truncate_field(&d.to_string()));
        let error = result.error.as_ref().map(|e| truncate_field(e));

        let record = ExecutionRecord::new(
            session_id,
            ship_id,
            exec_type,
            code,
            result.success,
            elapsed_ms,
            output,
            error,
        );
        match self.history.insert(&record).await {
            Ok(()) => Some(record.id),
            Err(e) => {
                // History must never fail the user request.
                error!(session_id, error = %e, "failed to record execution history");
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Warm pool and reaper entry points
    // ------------------------------------------------------------------

    /// Create one unbound pool ship within the global budget.
    pub async fn create_warm_ship(&self) -> BayResult<Ship> {
        let spec = self.default_spec();
        let ship = Ship::new(self.settings.warm_pool_ttl, &spec, true);

        if !self
            .ships
            .insert_within_cap(&ship, self.settings.max_ship_num)
            .await?
        {
            return Err(BayError::CapacityExhausted(
                "ship budget exhausted, skipping pool top-up".to_string(),
            ));
        }

        match self.provision(&ship, &spec, true).await {
            Ok(()) => {
                info!(ship_id = %ship.id, "warm pool ship ready");
                self.ships
                    .get(&ship.id)
                    .await?
                    .ok_or_else(|| BayError::not_found("pool ship vanished after creation"))
            }
            Err(e) => {
                let _ = self.ships.delete(&ship.id).await;
                self.capacity.notify_release();
                Err(e)
            }
        }
    }

    /// Evict a pool ship, unless an allocator claimed it first.
    pub async fn evict_warm_ship(&self, ship_id: &str) -> BayResult<bool> {
        let Some(ship) = self.ships.claim_pool_ship_by_id(ship_id).await? else {
            return Ok(false);
        };
        if let Some(ref container_id) = ship.container_id {
            let _ = self.driver.stop(container_id).await;
        }
        self.ships.delete(&ship.id).await?;
        self.capacity.notify_release();
        Ok(true)
    }

    /// Stop one expired ship and remove its session bindings; errors are
    /// logged and retried on the reaper's next tick.
    pub async fn reap(&self, ship: &Ship) -> BayResult<()> {
        if let Some(ref container_id) = ship.container_id {
            match tokio::time::timeout(Duration::from_secs(30), self.driver.stop(container_id))
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(ship_id = %ship.id, error = %e, "reaper: container stop failed");
                }
                Err(_) => {
                    warn!(ship_id = %ship.id, "reaper: container stop timed out");
                }
            }
        }

        self.ships.mark_stopped(&ship.id).await?;
        let deleted = self.sessions.delete_for_ship(&ship.id).await?;
        info!(ship_id = %ship.id, sessions = deleted, "reaped expired ship");
        self.capacity.notify_release();
        Ok(())
    }

    pub async fn expired_ships(&self, now: DateTime<Utc>) -> BayResult<Vec<Ship>> {
        Ok(self.ships.list_expired(now).await?)
    }
}

/// Bound a recorded field: over-size content is replaced by a marker that
/// keeps the original length.
fn truncate_field(s: &str) -> String {
    if s.len() > MAX_HISTORY_FIELD {
        format!("[truncated: {} bytes]", s.len())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_field_keeps_small_values() {
        assert_eq!(truncate_field("hello"), "hello");
    }

    #[test]
    fn truncate_field_replaces_oversize_values() {
        let big = "x".repeat(MAX_HISTORY_FIELD + 1);
        let out = truncate_field(&big);
        assert_eq!(out, format!("[truncated: {} bytes]", big.len()));
    }
}
