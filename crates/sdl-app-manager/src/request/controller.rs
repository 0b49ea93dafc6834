//! `RequestController` (§4.2): worker pool + deadline timer driving
//! mobile and HMI requests.
//!
//! Three background tasks per instance: a fixed-size worker pool that
//! dequeues mobile requests and runs them, and a single deadline timer
//! that fires `on_timeout` for whichever tracked request's deadline
//! elapses first. HMI-originated requests skip the pending queue
//! entirely — §4.2 gates only mobile enqueue, so HMI requests are
//! tracked and run inline.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ApplicationManagerConfig;
use crate::error::CoreError;
use crate::ids::{ConnectionKey, CorrelationId};
use crate::model::HmiLevel;
use crate::request::command::RequestPtr;
use crate::request::info::{RequestInfo, RequestType};
use crate::request::info_set::RequestInfoSet;

type ReqKey = (ConnectionKey, CorrelationId);

/// The sentinel `connection_key` used for HMI-originated requests,
/// mirroring the original's `app_id == 0` convention (spec §3).
pub const HMI_CONNECTION_KEY: ConnectionKey = ConnectionKey(0);

/// A `RequestInfoSet` paired with the actual command object each entry
/// tracks, plus a set of keys whose `on_timeout` has already fired so
/// the deadline scan never calls it twice on the same expired entry
/// while waiting for the completion path to erase it (spec §4.2: "the
/// iterator is reset to begin() because onTimeOut may have invalidated
/// it" — our async equivalent is skipping already-fired keys instead of
/// re-scanning a container that may have shrunk out from under us).
#[derive(Default)]
struct TrackedRequests {
    info: RequestInfoSet,
    commands: HashMap<ReqKey, RequestPtr>,
    fired: HashSet<ReqKey>,
}

impl TrackedRequests {
    fn insert(&mut self, info: RequestInfo, command: RequestPtr) -> bool {
        let key = info.key();
        if !self.info.add(info) {
            return false;
        }
        self.commands.insert(key, command);
        true
    }

    fn erase(&mut self, key: ReqKey) -> Option<RequestPtr> {
        self.info.erase(key.0, key.1);
        self.fired.remove(&key);
        self.commands.remove(&key)
    }

    fn keys_of_type(&self, request_type: RequestType) -> Vec<ReqKey> {
        self.info
            .iter()
            .filter(|i| i.request_type == request_type)
            .map(RequestInfo::key)
            .collect()
    }

    fn keys_of_connection(&self, connection_key: ConnectionKey) -> Vec<ReqKey> {
        self.info
            .iter()
            .filter(|i| i.connection_key == connection_key)
            .map(RequestInfo::key)
            .collect()
    }
}

pub struct RequestController {
    config: ApplicationManagerConfig,
    tracked: Mutex<TrackedRequests>,
    notifications: Mutex<TrackedRequests>,
    pending: Mutex<VecDeque<(RequestPtr, HmiLevel)>>,
    pending_signal: Notify,
    deadline_signal: Notify,
    low_voltage: AtomicBool,
}

pub type RequestControllerHandle = Arc<RequestController>;

impl RequestController {
    #[must_use]
    pub fn new(config: ApplicationManagerConfig) -> Self {
        Self {
            config,
            tracked: Mutex::new(TrackedRequests::default()),
            notifications: Mutex::new(TrackedRequests::default()),
            pending: Mutex::new(VecDeque::new()),
            pending_signal: Notify::new(),
            deadline_signal: Notify::new(),
            low_voltage: AtomicBool::new(false),
        }
    }

    /// Builds the controller and spawns its worker pool and deadline
    /// timer. Tasks stop when `cancel` is cancelled.
    #[must_use]
    pub fn spawn(
        config: ApplicationManagerConfig,
        cancel: CancellationToken,
    ) -> (RequestControllerHandle, Vec<JoinHandle<()>>) {
        let controller = Arc::new(Self::new(config));
        let worker_count = controller.config.thread_pool_size.max(1);
        let mut handles = Vec::with_capacity(worker_count + 1);

        for worker_id in 0..worker_count {
            let controller = Arc::clone(&controller);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                controller.worker_loop(worker_id, cancel).await;
            }));
        }

        let controller_for_timer = Arc::clone(&controller);
        let timer_cancel = cancel;
        handles.push(tokio::spawn(async move {
            controller_for_timer.deadline_loop(timer_cancel).await;
        }));

        (controller, handles)
    }

    // ── Mobile enqueue (rate-gated) ──────────────────────────────

    /// §4.2's rate-limit gate, then enqueue. First matching rule wins.
    pub async fn add_mobile_request(
        &self,
        request: RequestPtr,
        hmi_level: HmiLevel,
    ) -> Result<(), CoreError> {
        self.check_rate_limit(request.connection_key(), hmi_level).await?;

        {
            let mut pending = self.pending.lock().await;
            if self.config.pending_requests_amount != 0
                && pending.len() >= self.config.pending_requests_amount as usize
            {
                return Err(CoreError::TooManyPendingRequests);
            }
            pending.push_back((request, hmi_level));
        }
        self.pending_signal.notify_one();
        Ok(())
    }

    async fn check_rate_limit(
        &self,
        connection_key: ConnectionKey,
        hmi_level: HmiLevel,
    ) -> Result<(), CoreError> {
        let tracked = self.tracked.lock().await;
        let now = std::time::Instant::now();

        if self.config.app_hmi_level_none_time_scale_max_requests != 0 && hmi_level == HmiLevel::None {
            let count = tracked.info.count_in_window_at_level(
                connection_key,
                HmiLevel::None,
                now,
                self.config.app_hmi_level_none_time_scale,
            );
            if count >= self.config.app_hmi_level_none_time_scale_max_requests as usize {
                return Err(CoreError::NoneHmiLevelManyRequests);
            }
        } else if self.config.app_time_scale_max_requests != 0 {
            let count = tracked.info.count_in_window(connection_key, now, self.config.app_time_scale);
            if count >= self.config.app_time_scale_max_requests as usize {
                return Err(CoreError::TooManyRequests);
            }
        }
        Ok(())
    }

    // ── HMI enqueue (untracked, no gate) ─────────────────────────

    /// Tracks the request immediately and runs it inline — HMI
    /// requests are not rate-gated (spec §4.2).
    pub async fn add_hmi_request(self: &Arc<Self>, request: RequestPtr) {
        self.track(HMI_CONNECTION_KEY, RequestType::Hmi, HmiLevel::None, Arc::clone(&request))
            .await;

        if self.low_voltage.load(Ordering::SeqCst) {
            debug!("skipping HMI request run: low voltage asserted");
            return;
        }
        let controller = Arc::clone(self);
        let request_for_task = request;
        tokio::spawn(async move {
            controller.execute(request_for_task).await;
        });
    }

    /// Tracks a fire-and-forget HMI-to-mobile notification for expiry
    /// only; it never participates in rate limiting (spec §4.2).
    pub async fn track_notification(&self, request: RequestPtr, timeout: Duration) {
        let info = RequestInfo::new(
            request.connection_key(),
            request.correlation_id(),
            RequestType::Notification,
            HmiLevel::None,
            zero_is_untracked(timeout),
        );
        {
            let mut notifications = self.notifications.lock().await;
            notifications.insert(info, request);
        }
        self.deadline_signal.notify_one();
    }

    pub async fn terminate_notification(
        &self,
        connection_key: ConnectionKey,
        correlation_id: CorrelationId,
    ) -> bool {
        let mut notifications = self.notifications.lock().await;
        notifications.erase((connection_key, correlation_id)).is_some()
    }

    // ── Termination ───────────────────────────────────────────────

    pub async fn terminate_mobile_request(
        &self,
        connection_key: ConnectionKey,
        correlation_id: CorrelationId,
    ) -> bool {
        let mut tracked = self.tracked.lock().await;
        tracked.erase((connection_key, correlation_id)).is_some()
    }

    pub async fn terminate_hmi_request(&self, correlation_id: CorrelationId) -> bool {
        let mut tracked = self.tracked.lock().await;
        tracked.erase((HMI_CONNECTION_KEY, correlation_id)).is_some()
    }

    /// Removes every tracked request (mobile and HMI) belonging to one
    /// connection, used on app unregistration.
    pub async fn terminate_app_requests(&self, connection_key: ConnectionKey) -> usize {
        let mut tracked = self.tracked.lock().await;
        let keys = tracked.keys_of_connection(connection_key);
        let count = keys.len();
        for key in keys {
            tracked.erase(key);
        }
        count
    }

    pub async fn terminate_all_hmi(&self) -> usize {
        let mut tracked = self.tracked.lock().await;
        let keys = tracked.keys_of_type(RequestType::Hmi);
        let count = keys.len();
        for key in keys {
            tracked.erase(key);
        }
        count
    }

    pub async fn terminate_all_mobile(&self) -> usize {
        let mut tracked = self.tracked.lock().await;
        let keys = tracked.keys_of_type(RequestType::Mobile);
        let count = keys.len();
        for key in keys {
            tracked.erase(key);
        }
        count
    }

    pub async fn update_request_timeout(
        &self,
        connection_key: ConnectionKey,
        correlation_id: CorrelationId,
        new_timeout: Duration,
    ) -> bool {
        let mut tracked = self.tracked.lock().await;
        let key = (connection_key, correlation_id);
        let Some(mut info) = tracked.info.find(connection_key, correlation_id).cloned() else {
            return false;
        };
        let Some(command) = tracked.commands.get(&key).cloned() else {
            return false;
        };
        tracked.erase(key);
        info.timeout = zero_is_untracked(new_timeout);
        tracked.insert(info, command);
        drop(tracked);
        self.deadline_signal.notify_one();
        true
    }

    // ── Low voltage ───────────────────────────────────────────────

    pub fn on_low_voltage(&self) {
        self.low_voltage.store(true, Ordering::SeqCst);
        info!("low voltage asserted; worker pool will stop executing Run()");
    }

    /// Clears the low-voltage flag and purges every tracked request —
    /// responses arriving afterward for a purged request are silently
    /// dropped by the caller's correlation-id lookup (spec §9, "Open
    /// questions": this is deliberately kept, not a bug).
    pub async fn on_wake_up(&self) -> (usize, usize) {
        self.low_voltage.store(false, Ordering::SeqCst);
        let mobile = self.terminate_all_mobile().await;
        let hmi = self.terminate_all_hmi().await;
        info!(mobile, hmi, "wake-up: purged stale tracked requests");
        (mobile, hmi)
    }

    // ── Internals ─────────────────────────────────────────────────

    async fn track(
        &self,
        connection_key: ConnectionKey,
        request_type: RequestType,
        hmi_level: HmiLevel,
        request: RequestPtr,
    ) {
        let timeout = zero_is_untracked(request.default_timeout());
        let info = RequestInfo::new(connection_key, request.correlation_id(), request_type, hmi_level, timeout);
        {
            let mut tracked = self.tracked.lock().await;
            tracked.insert(info, request);
        }
        self.deadline_signal.notify_one();
    }

    #[instrument(skip(self, request), fields(connection_key = %request.connection_key(), correlation_id = %request.correlation_id()))]
    async fn execute(self: &Arc<Self>, request: RequestPtr) {
        if !request.check_permissions() {
            warn!("policy check failed; aborting request without Run()");
            request.clean_up().await;
            self.terminate_mobile_request(request.connection_key(), request.correlation_id())
                .await;
            self.terminate_hmi_request(request.correlation_id()).await;
            return;
        }
        if self.low_voltage.load(Ordering::SeqCst) {
            debug!("skipping run: low voltage asserted");
            return;
        }
        request.run().await;
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize, cancel: CancellationToken) {
        debug!(worker_id, "request worker started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = self.pending_signal.notified() => {}
            }
            loop {
                let next = {
                    let mut pending = self.pending.lock().await;
                    pending.pop_front()
                };
                let Some((request, hmi_level)) = next else {
                    break;
                };
                if !request.init().await {
                    warn!("request Init() rejected; dropping without tracking");
                    continue;
                }
                self.track(request.connection_key(), RequestType::Mobile, hmi_level, Arc::clone(&request))
                    .await;
                self.execute(request).await;
            }
        }
        debug!(worker_id, "request worker stopped");
    }

    async fn next_wake(&self) -> Option<std::time::Instant> {
        let tracked_front = self.tracked.lock().await.info.front().and_then(RequestInfo::end_time);
        let notif_front = self.notifications.lock().await.info.front().and_then(RequestInfo::end_time);
        match (tracked_front, notif_front) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        }
    }

    async fn deadline_loop(self: Arc<Self>, cancel: CancellationToken) {
        const IDLE_SLEEP: Duration = Duration::from_secs(24 * 3600);
        loop {
            let wake_at = self.next_wake().await;
            tokio::select! {
                () = cancel.cancelled() => break,
                () = self.deadline_signal.notified() => continue,
                () = sleep_until_or_forever(wake_at, IDLE_SLEEP) => {}
            }
            self.expire_due().await;
        }
    }

    async fn expire_due(&self) {
        let now = std::time::Instant::now();
        loop {
            let key = {
                let tracked = self.tracked.lock().await;
                tracked.info.front().filter(|i| i.is_expired_at(now)).map(RequestInfo::key)
            };
            let Some(key) = key else { break };

            let (command, already_fired, request_type) = {
                let mut tracked = self.tracked.lock().await;
                let request_type = tracked.info.find(key.0, key.1).map(|i| i.request_type);
                let already_fired = !tracked.fired.insert(key);
                (tracked.commands.get(&key).cloned(), already_fired, request_type)
            };

            if already_fired {
                // Still expired and still tracked: a mobile request
                // waits for its completion path to call Terminate.
                // Stop scanning rather than re-firing on_timeout.
                break;
            }

            if let Some(command) = command {
                command.on_timeout().await;
            }

            if request_type == Some(RequestType::Hmi) {
                let mut tracked = self.tracked.lock().await;
                tracked.erase(key);
            }
        }

        loop {
            let key = {
                let notifications = self.notifications.lock().await;
                notifications
                    .info
                    .front()
                    .filter(|i| i.is_expired_at(now))
                    .map(RequestInfo::key)
            };
            let Some(key) = key else { break };
            let command = {
                let mut notifications = self.notifications.lock().await;
                let command = notifications.commands.get(&key).cloned();
                notifications.erase(key);
                command
            };
            if let Some(command) = command {
                command.on_timeout().await;
            }
        }
    }
}

fn zero_is_untracked(d: Duration) -> Option<Duration> {
    if d.is_zero() { None } else { Some(d) }
}

async fn sleep_until_or_forever(at: Option<std::time::Instant>, idle_sleep: Duration) {
    match at {
        Some(instant) => tokio::time::sleep_until(instant.into()).await,
        None => tokio::time::sleep(idle_sleep).await,
    }
}
