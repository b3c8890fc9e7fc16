//! Connection supervisor.
//!
//! Two layers:
//!
//! - [`ConnectionMachine`] is the synchronous state machine. It consumes
//!   link events and timer expiries and answers with [`Action`]s. Reconnects
//!   are tracked by ticket, so a timer that fires after the link reopened is
//!   recognised as stale and ignored.
//! - [`Supervisor`] is the async driver. It owns the transport session,
//!   consumes its event stream in emission order, executes actions and
//!   coordinates the vault, the store, the router, pairing and the call
//!   guard.
//!
//! A connect attempt runs as one arm of the driver's `select!`, so shutdown
//! and timers stay live while it is in flight. One deadline covers the
//! connect call and the handshake that follows it, until the link opens.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use herald_net::{
    BlockAction, CallEvent, ConnectOptions, Connection, Credentials, CredsUpdate,
    ConnectionUpdate, DisconnectInfo, LinkState, OutboundMessage, Transport, TransportError,
    TransportEvent, TransportHandle,
};
use herald_shared::constants::{LOGGED_OUT_STATUS, RECONNECT_JITTER};
use herald_shared::HeraldError;
use herald_store::Store;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use tracing::{debug, error, info, warn};

use crate::call_guard::CallGuard;
use crate::context::AppContext;
use crate::ingest::{ingest, StoreLookup};
use crate::pairing::PairingNegotiator;
use crate::router::Router;
use crate::vault::CredentialVault;

// ---------------------------------------------------------------------------
// Disconnect classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Credentials were revoked; they must be discarded.
    LoggedOut,
    /// Anything else: network drop, server restart, failed connect.
    Transient { status_code: Option<u16> },
}

impl DisconnectReason {
    pub fn classify(info: Option<&DisconnectInfo>) -> Self {
        match info.and_then(|i| i.status_code) {
            Some(LOGGED_OUT_STATUS) => DisconnectReason::LoggedOut,
            status_code => DisconnectReason::Transient { status_code },
        }
    }

    pub fn to_error(&self) -> HeraldError {
        match self {
            DisconnectReason::LoggedOut => HeraldError::AuthRevoked {
                status: LOGGED_OUT_STATUS,
            },
            DisconnectReason::Transient { .. } => HeraldError::Connection(self.to_string()),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::LoggedOut => write!(f, "logged out"),
            DisconnectReason::Transient {
                status_code: Some(code),
            } => write!(f, "closed with status {code}"),
            DisconnectReason::Transient { status_code: None } => write!(f, "closed"),
        }
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed(DisconnectReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open a new transport session with the vault's credentials.
    Connect,
    /// Tell the bot's own chat that it is online.
    AnnounceLiveness,
    /// Drop every stored credential.
    WipeCredentials,
    /// Arm the reconnect timer.
    ScheduleReconnect { ticket: u64, attempt: u32 },
    /// Disarm the reconnect timer.
    CancelReconnect,
}

#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    attempt: u32,
    next_ticket: u64,
    pending: Option<u64>,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            attempt: 0,
            next_ticket: 0,
            pending: None,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Consecutive failed attempts since the link was last open.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn pending_reconnect(&self) -> Option<u64> {
        self.pending
    }

    pub fn start(&mut self) -> Vec<Action> {
        match self.state {
            ConnectionState::Idle => vec![Action::Connect],
            _ => Vec::new(),
        }
    }

    /// Enter `Connecting`. Refused while an attempt is in flight or the
    /// link is open, which keeps attempts serialized.
    pub fn begin_connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Idle | ConnectionState::Closed(_) => {
                self.state = ConnectionState::Connecting;
                true
            }
            ConnectionState::Connecting | ConnectionState::Open => false,
        }
    }

    pub fn on_open(&mut self) -> Vec<Action> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Closed(_) => {
                self.state = ConnectionState::Open;
                self.attempt = 0;
                let mut actions = Vec::new();
                if self.pending.take().is_some() {
                    actions.push(Action::CancelReconnect);
                }
                actions.push(Action::AnnounceLiveness);
                actions
            }
            ConnectionState::Idle | ConnectionState::Open => Vec::new(),
        }
    }

    pub fn on_closed(&mut self, reason: DisconnectReason) -> Vec<Action> {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            return Vec::new();
        }

        self.state = ConnectionState::Closed(reason.clone());
        match reason {
            DisconnectReason::LoggedOut => vec![Action::WipeCredentials, self.schedule_reconnect()],
            DisconnectReason::Transient { .. } => vec![self.schedule_reconnect()],
        }
    }

    fn schedule_reconnect(&mut self) -> Action {
        self.attempt = self.attempt.saturating_add(1);
        self.next_ticket += 1;
        self.pending = Some(self.next_ticket);
        Action::ScheduleReconnect {
            ticket: self.next_ticket,
            attempt: self.attempt,
        }
    }

    /// A connect attempt failed or timed out.
    pub fn on_connect_failed(&mut self) -> Vec<Action> {
        self.on_closed(DisconnectReason::Transient { status_code: None })
    }

    /// The reconnect timer for `ticket` fired.
    pub fn on_reconnect_due(&mut self, ticket: u64) -> Vec<Action> {
        if self.pending == Some(ticket) {
            self.pending = None;
            vec![Action::Connect]
        } else {
            Vec::new()
        }
    }

    pub fn stop(&mut self) {
        self.state = ConnectionState::Idle;
        self.pending = None;
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Capped exponential backoff with symmetric jitter.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    jitter: f64,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, jitter: f64) -> Self {
        Self {
            base,
            cap,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Delay before `attempt` (1-based) without jitter.
    pub fn nominal(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(1 << exp).min(self.cap)
    }

    /// Nominal delay scaled by `1 + jitter * unit`, `unit` in `[-1, 1]`.
    pub fn with_jitter(&self, attempt: u32, unit: f64) -> Duration {
        let factor = 1.0 + self.jitter * unit.clamp(-1.0, 1.0);
        self.nominal(attempt).mul_f64(factor)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let unit = rand::thread_rng().gen_range(-1.0..=1.0);
        self.with_jitter(attempt, unit)
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

type ReconnectTimer = Option<(u64, Pin<Box<Sleep>>)>;
type ConnectDeadline = Option<Pin<Box<Sleep>>>;
type PendingConnect =
    Option<Pin<Box<dyn Future<Output = Result<Connection, TransportError>> + Send>>>;

pub struct Supervisor {
    ctx: Arc<AppContext>,
    transport: Arc<dyn Transport>,
    vault: CredentialVault,
    store: Store,
    router: Router,
    call_guard: CallGuard,
    machine: ConnectionMachine,
    backoff: Backoff,
    state_tx: watch::Sender<ConnectionState>,
    credentials: Credentials,
    connection: Option<Connection>,
    pairing: Option<JoinHandle<()>>,
    reconnect: ReconnectTimer,
    pending_connect: PendingConnect,
    deadline: ConnectDeadline,
}

impl Supervisor {
    pub fn new(
        ctx: Arc<AppContext>,
        transport: Arc<dyn Transport>,
        vault: CredentialVault,
        store: Store,
        router: Router,
    ) -> Self {
        let config = &ctx.config;
        let backoff = Backoff::new(config.reconnect_base, config.reconnect_cap, RECONNECT_JITTER);
        let call_guard = CallGuard::new(config.call_cooldown);
        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        Self {
            ctx,
            transport,
            vault,
            store,
            router,
            call_guard,
            machine: ConnectionMachine::new(),
            backoff,
            state_tx,
            credentials: Credentials::empty(),
            connection: None,
            pairing: None,
            reconnect: None,
            pending_connect: None,
            deadline: None,
        }
    }

    /// Observe connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Drive the session until `shutdown` resolves, then close the link and
    /// flush the store one last time.
    pub async fn run<S>(mut self, shutdown: S) -> Result<(), HeraldError>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(bot = %self.ctx.bot_name, "connection supervisor started");

        let actions = self.machine.start();
        self.apply(actions).await;

        loop {
            let actions = tokio::select! {
                _ = &mut shutdown => break,
                result = connect_done(&mut self.pending_connect) => self.on_connect_result(result),
                _ = deadline_due(&mut self.deadline) => self.on_connect_deadline().await,
                event = next_event(&mut self.connection) => self.on_event(event).await,
                ticket = reconnect_due(&mut self.reconnect) => {
                    debug!(ticket, "reconnect timer fired");
                    self.machine.on_reconnect_due(ticket)
                }
            };
            self.apply(actions).await;
        }

        self.shutdown().await
    }

    async fn shutdown(&mut self) -> Result<(), HeraldError> {
        info!("supervisor shutting down");
        if let Some(task) = self.pairing.take() {
            task.abort();
        }
        self.reconnect = None;
        self.pending_connect = None;
        self.deadline = None;
        if let Some(conn) = self.connection.take() {
            conn.handle.close().await;
        }
        self.machine.stop();
        self.publish();

        let stats = self.store.flush().await?;
        info!(
            messages = stats.messages,
            contacts = stats.contacts,
            "final store flush"
        );
        Ok(())
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.machine.state().clone());
    }

    async fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            debug!(?action, "supervisor action");
            match action {
                Action::Connect => self.connect().await,
                Action::AnnounceLiveness => self.announce_liveness(),
                Action::WipeCredentials => self.wipe_credentials().await,
                Action::ScheduleReconnect { ticket, attempt } => {
                    let delay = self.backoff.delay(attempt);
                    info!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "reconnect scheduled"
                    );
                    self.reconnect = Some((ticket, Box::pin(tokio::time::sleep(delay))));
                }
                Action::CancelReconnect => {
                    debug!("pending reconnect cancelled");
                    self.reconnect = None;
                }
            }
            self.publish();
        }

        if *self.machine.state() != ConnectionState::Connecting {
            self.pending_connect = None;
            self.deadline = None;
        }
    }

    /// Start a connect attempt. The result arrives through the driver loop.
    async fn connect(&mut self) {
        if !self.machine.begin_connect() {
            debug!("connect requested while an attempt is active, ignoring");
            return;
        }
        self.publish();

        if let Some(old) = self.connection.take() {
            old.handle.close().await;
        }
        if let Some(task) = self.pairing.take() {
            task.abort();
        }

        self.credentials = match self.vault.load().await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(error = %e, "credential vault unreadable, pairing from scratch");
                Credentials::empty()
            }
        };

        let options = self.connect_options();
        info!(
            registered = self.credentials.registered,
            attempt = self.machine.attempt(),
            "connecting"
        );

        let transport = Arc::clone(&self.transport);
        let credentials = self.credentials.clone();
        self.pending_connect = Some(Box::pin(async move {
            transport.connect(&credentials, &options).await
        }));
        self.arm_deadline();
    }

    fn arm_deadline(&mut self) {
        let at = Instant::now() + self.ctx.config.connect_timeout;
        match self.deadline.as_mut() {
            Some(sleep) => sleep.as_mut().reset(at),
            None => self.deadline = Some(Box::pin(tokio::time::sleep_until(at))),
        }
    }

    fn on_connect_result(&mut self, result: Result<Connection, TransportError>) -> Vec<Action> {
        match result {
            Ok(conn) => {
                debug!(registered = conn.handle.is_registered(), "transport session started");
                self.start_pairing(&conn.handle);
                if self.pairing.is_some() {
                    // The handshake now waits on the operator entering the code.
                    self.deadline = None;
                } else {
                    self.arm_deadline();
                }
                self.connection = Some(conn);
                Vec::new()
            }
            Err(e) => {
                let err = HeraldError::from(e);
                warn!(error = %err, kind = ?err.kind(), "connect failed");
                self.machine.on_connect_failed()
            }
        }
    }

    /// Neither the connect call nor the handshake finished in time.
    async fn on_connect_deadline(&mut self) -> Vec<Action> {
        let stage = if self.pending_connect.take().is_some() {
            "connect"
        } else {
            "handshake"
        };
        warn!(
            stage,
            timeout_ms = self.ctx.config.connect_timeout.as_millis() as u64,
            "connect timed out"
        );
        if let Some(task) = self.pairing.take() {
            task.abort();
        }
        if let Some(conn) = self.connection.take() {
            conn.handle.close().await;
        }
        self.machine.on_connect_failed()
    }

    fn connect_options(&self) -> ConnectOptions {
        let config = &self.ctx.config;
        ConnectOptions {
            print_qr: !config.pairing_code,
            mobile: config.mobile,
            browser: Some(self.ctx.bot_name.clone()),
            mark_online: true,
            message_lookup: Some(Arc::new(StoreLookup::new(self.store.clone()))),
        }
    }

    fn start_pairing(&mut self, handle: &Arc<dyn TransportHandle>) {
        if !self.ctx.config.pairing_code || handle.is_registered() {
            return;
        }
        let Some(phone) = self.ctx.owner.clone() else {
            // validate() guarantees a number in pairing mode
            return;
        };
        let negotiator = PairingNegotiator::new(phone, self.ctx.config.pairing_delay);
        self.pairing = Some(negotiator.spawn(Arc::clone(handle)));
    }

    async fn wipe_credentials(&mut self) {
        if let Some(task) = self.pairing.take() {
            task.abort();
        }
        if let Some(conn) = self.connection.take() {
            conn.handle.close().await;
        }
        self.credentials = Credentials::empty();
        if let Err(e) = self.vault.wipe().await {
            error!(error = %e, dir = %self.vault.dir().display(), "could not wipe credential vault");
        }
    }

    fn announce_liveness(&self) {
        let Some(conn) = self.connection.as_ref() else {
            return;
        };
        let Some(own) = conn.handle.own_jid() else {
            warn!("own address unknown, skipping liveness announcement");
            return;
        };

        let handle = Arc::clone(&conn.handle);
        let text = self.ctx.liveness_text(Local::now());
        tokio::spawn(async move {
            let to = own.normalized();
            if let Err(e) = handle.send_message(&to, OutboundMessage::text(text)).await {
                warn!(error = %e, "liveness announcement failed");
            }
        });
    }

    async fn on_event(&mut self, event: Option<TransportEvent>) -> Vec<Action> {
        let Some(event) = event else {
            self.connection = None;
            if matches!(
                self.machine.state(),
                ConnectionState::Open | ConnectionState::Connecting
            ) {
                warn!("transport event stream ended unexpectedly");
                return self.machine.on_closed(DisconnectReason::Transient { status_code: None });
            }
            return Vec::new();
        };

        match event {
            TransportEvent::ConnectionUpdate(update) => self.on_connection_update(update),
            TransportEvent::CredsUpdate(update) => {
                self.persist_credentials(update).await;
                Vec::new()
            }
            TransportEvent::Call(calls) => {
                self.on_calls(calls);
                Vec::new()
            }
            other => {
                ingest(&self.store, &other).await;
                if let Some(conn) = self.connection.as_ref() {
                    self.router.route(&conn.handle, other);
                }
                Vec::new()
            }
        }
    }

    fn on_connection_update(&mut self, update: ConnectionUpdate) -> Vec<Action> {
        // Handshake progress (QR refreshes, connecting) pushes the deadline back.
        if self.deadline.is_some() && *self.machine.state() == ConnectionState::Connecting {
            self.arm_deadline();
        }

        if let Some(qr) = update.qr.as_deref() {
            if !self.ctx.config.pairing_code {
                info!(qr = %qr, "scan this QR code from the phone's linked devices screen");
            }
        }

        match update.state {
            Some(LinkState::Connecting) => {
                debug!("transport connecting");
                Vec::new()
            }
            Some(LinkState::Open) => {
                let own = self
                    .connection
                    .as_ref()
                    .and_then(|c| c.handle.own_jid())
                    .map(|j| j.to_string());
                info!(own = ?own, "connection open");
                self.machine.on_open()
            }
            Some(LinkState::Close) => {
                let reason = DisconnectReason::classify(update.last_disconnect.as_ref());
                let err = reason.to_error();
                match reason {
                    DisconnectReason::LoggedOut => {
                        error!(error = %err, "session logged out, wiping credentials and re-pairing");
                    }
                    DisconnectReason::Transient { .. } => {
                        warn!(error = %err, kind = ?err.kind(), "connection closed");
                    }
                }
                self.machine.on_closed(reason)
            }
            None => Vec::new(),
        }
    }

    async fn persist_credentials(&mut self, update: CredsUpdate) {
        self.credentials.apply(&update);
        match self.vault.persist_update(&self.credentials, &update).await {
            Ok(()) => debug!(
                registered = self.credentials.registered,
                items = update.items.len(),
                "credentials persisted"
            ),
            Err(e) => error!(error = %e, "could not persist credentials"),
        }
    }

    fn on_calls(&mut self, calls: Vec<CallEvent>) {
        if !self.ctx.config.anticall {
            debug!(count = calls.len(), "anti-call disabled, ignoring calls");
            return;
        }
        let Some(conn) = self.connection.as_ref() else {
            return;
        };

        for call in calls {
            if !call.is_incoming_offer() {
                debug!(call = %call.id, status = ?call.status, "call state change ignored");
                continue;
            }
            info!(caller = %call.from, video = call.is_video, "rejecting incoming call");

            let handle = Arc::clone(&conn.handle);
            let block_delay = self.ctx.config.call_block_delay;
            let (id, from) = (call.id.clone(), call.from.clone());
            tokio::spawn(async move {
                if let Err(e) = handle.reject_call(&id, &from).await {
                    warn!(caller = %from, error = %e, "call reject failed");
                }
                tokio::time::sleep(block_delay).await;
                if let Err(e) = handle.update_block_status(&from, BlockAction::Block).await {
                    warn!(caller = %from, error = %e, "block failed");
                }
            });

            if self.call_guard.should_notify(&call.from) {
                let handle = Arc::clone(&conn.handle);
                let text = self.ctx.call_rejected_text();
                let to = call.from.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle.send_message(&to, OutboundMessage::text(text)).await {
                        warn!(caller = %to, error = %e, "call notice failed");
                    }
                });
            } else {
                debug!(caller = %call.from, "caller already notified within cooldown");
            }
        }
    }
}

async fn next_event(connection: &mut Option<Connection>) -> Option<TransportEvent> {
    match connection {
        Some(conn) => conn.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn connect_done(pending: &mut PendingConnect) -> Result<Connection, TransportError> {
    match pending {
        Some(attempt) => {
            let result = attempt.as_mut().await;
            *pending = None;
            result
        }
        None => std::future::pending().await,
    }
}

async fn deadline_due(deadline: &mut ConnectDeadline) {
    match deadline {
        Some(sleep) => {
            sleep.as_mut().await;
            *deadline = None;
        }
        None => std::future::pending().await,
    }
}

async fn reconnect_due(timer: &mut ReconnectTimer) -> u64 {
    match timer {
        Some((ticket, sleep)) => {
            sleep.as_mut().await;
            let ticket = *ticket;
            *timer = None;
            ticket
        }
        None => std::future::pending().await,
    }
}
