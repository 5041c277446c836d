//! The caller-facing client.

use std::sync::Arc;

use tokio::sync::watch;
use zkpool_core::{Providers, TaskProvider, TimeProvider, TokioProviders};
use zkpool_proto::{
    Acl, CreateMode, ErrorCode, MultiOp, Op, OpResult, Request, Response, Stat, Version,
};

use crate::config::ClientConfig;
use crate::engine::Engine;
use crate::ensemble::{ConnectionString, EnsembleMember};
use crate::path::validate_path;
use crate::session::SessionState;
use crate::watch::{WatchKind, WatchRegistration, WatchResult};
use crate::{ZkError, ZkResult};

/// Releases the engine when the last [`Client`] clone goes away.
struct ClientHandle<P: Providers> {
    engine: Arc<Engine<P>>,
}

impl<P: Providers> Drop for ClientHandle<P> {
    fn drop(&mut self) {
        self.engine.close_local();
    }
}

/// A connection to a coordination ensemble.
///
/// Cheap to clone; every clone shares one session. All methods may be
/// called concurrently. The session ends when [`Client::close`] is called or
/// the last clone is dropped.
///
/// Every operation resolves exactly once: with its value, an ensemble
/// outcome (`NoNode`, `BadVersion`, ...), `ConnectionLoss` when the
/// connection carrying it broke, `SessionExpired` or `Closed`. Operations
/// are never retried by the client.
///
/// # Examples
///
/// ```no_run
/// use zkpool::{Client, ClientConfig, CreateMode, Version};
///
/// # async fn demo() -> zkpool::ZkResult<()> {
/// let client = Client::connect("127.0.0.1:2181/app", ClientConfig::default()).await?;
/// client.create("/a", b"x".to_vec(), CreateMode::NORMAL).await?;
/// let stat = client.set("/a", b"y".to_vec(), Version::Exact(0)).await?;
/// assert_eq!(stat.version, 1);
/// client.close().await;
/// # Ok(())
/// # }
/// ```
pub struct Client<P: Providers = TokioProviders> {
    handle: Arc<ClientHandle<P>>,
}

impl<P: Providers> Clone for Client<P> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
        }
    }
}

impl Client {
    /// Connect with the Tokio providers.
    ///
    /// Resolves once the first session is established.
    pub async fn connect(connection: &str, config: ClientConfig) -> ZkResult<Self> {
        Self::connect_with(TokioProviders::new(), connection, config).await
    }
}

impl<P: Providers> Client<P> {
    /// Connect using a custom provider bundle.
    ///
    /// Waits at most the requested session timeout for the first session;
    /// fails with `ConnectionLoss` if no member could be reached by then.
    pub async fn connect_with(providers: P, connection: &str, config: ClientConfig) -> ZkResult<Self> {
        config.validate()?;
        let connection: ConnectionString = connection.parse()?;
        let wait = config.session_timeout;
        let engine = Engine::new(providers.clone(), config, connection);
        let states = engine.session.subscribe();
        providers
            .task()
            .spawn_task("zk_session", engine.clone().run());

        let client = Self {
            handle: Arc::new(ClientHandle { engine }),
        };
        match providers.time().timeout(wait, settled(states)).await {
            Ok(SessionState::Connected) => Ok(client),
            Ok(SessionState::Expired) => Err(ZkError::SessionExpired),
            Ok(_) => Err(ZkError::Closed),
            Err(_) => {
                tracing::warn!(timeout = ?wait, "no ensemble member reachable");
                Err(ZkError::ConnectionLoss)
            }
        }
    }

    fn engine(&self) -> &Engine<P> {
        &self.handle.engine
    }

    async fn call(&self, request: Request, watch: Option<WatchRegistration>) -> ZkResult<Response> {
        self.engine().submit(&request, watch)?.await
    }

    fn path(&self, path: &str) -> ZkResult<String> {
        validate_path(path, false)?;
        Ok(self.engine().chroot.apply(path))
    }

    /// Read a node's data and stat.
    pub async fn get(&self, path: &str) -> ZkResult<(Vec<u8>, Stat)> {
        let path = self.path(path)?;
        match self.call(Request::GetData { path, watch: false }, None).await? {
            Response::GetData { data, stat } => Ok((data, stat)),
            other => Err(unexpected(other)),
        }
    }

    /// Read a node and leave a data watch behind.
    pub async fn watch(&self, path: &str) -> ZkResult<WatchResult<(Vec<u8>, Stat)>> {
        let path = self.path(path)?;
        let (registration, next) = WatchRegistration::new(path.clone(), WatchKind::Data);
        match self
            .call(Request::GetData { path, watch: true }, Some(registration))
            .await?
        {
            Response::GetData { data, stat } => Ok(WatchResult {
                initial: (data, stat),
                next,
            }),
            other => Err(unexpected(other)),
        }
    }

    /// List a node's children (unordered) and its stat.
    pub async fn get_children(&self, path: &str) -> ZkResult<(Vec<String>, Stat)> {
        let path = self.path(path)?;
        match self.call(Request::GetChildren { path, watch: false }, None).await? {
            Response::GetChildren { children, stat } => Ok((children, stat)),
            other => Err(unexpected(other)),
        }
    }

    /// List a node's children and leave a child watch behind.
    pub async fn watch_children(&self, path: &str) -> ZkResult<WatchResult<(Vec<String>, Stat)>> {
        let path = self.path(path)?;
        let (registration, next) = WatchRegistration::new(path.clone(), WatchKind::Children);
        match self
            .call(Request::GetChildren { path, watch: true }, Some(registration))
            .await?
        {
            Response::GetChildren { children, stat } => Ok(WatchResult {
                initial: (children, stat),
                next,
            }),
            other => Err(unexpected(other)),
        }
    }

    /// Stat a node. Absence is `Ok(None)`, not an error.
    pub async fn exists(&self, path: &str) -> ZkResult<Option<Stat>> {
        let path = self.path(path)?;
        exists_result(self.call(Request::Exists { path, watch: false }, None).await)
    }

    /// Stat a node and leave a watch for its creation, change or deletion.
    ///
    /// The watch is left whether or not the node exists.
    pub async fn watch_exists(&self, path: &str) -> ZkResult<WatchResult<Option<Stat>>> {
        let path = self.path(path)?;
        let (registration, next) = WatchRegistration::new(path.clone(), WatchKind::Exists);
        let initial =
            exists_result(self.call(Request::Exists { path, watch: true }, Some(registration)).await)?;
        Ok(WatchResult { initial, next })
    }

    /// Create a node readable and writable by anyone.
    ///
    /// Returns the actual path (with the suffix for sequential nodes) and its stat.
    pub async fn create(
        &self,
        path: &str,
        data: impl Into<Vec<u8>>,
        mode: CreateMode,
    ) -> ZkResult<(String, Stat)> {
        self.create_with_acl(path, data, Acl::open_unsafe(), mode).await
    }

    /// Create a node with an explicit ACL.
    pub async fn create_with_acl(
        &self,
        path: &str,
        data: impl Into<Vec<u8>>,
        acl: Vec<Acl>,
        mode: CreateMode,
    ) -> ZkResult<(String, Stat)> {
        validate_path(path, mode.is_sequential())?;
        let request = Request::Create {
            path: self.engine().chroot.apply(path),
            data: data.into(),
            acl,
            mode,
        };
        match self.call(request, None).await? {
            Response::Create { path, stat } => Ok((
                self.engine().chroot.strip(&path),
                stat.unwrap_or_default(),
            )),
            other => Err(unexpected(other)),
        }
    }

    /// Replace a node's data, optionally only at an expected version.
    pub async fn set(
        &self,
        path: &str,
        data: impl Into<Vec<u8>>,
        version: impl Into<Version>,
    ) -> ZkResult<Stat> {
        let request = Request::SetData {
            path: self.path(path)?,
            data: data.into(),
            version: version.into(),
        };
        match self.call(request, None).await? {
            Response::SetData { stat } => Ok(stat),
            other => Err(unexpected(other)),
        }
    }

    /// Delete a node, optionally only at an expected version.
    pub async fn erase(&self, path: &str, version: impl Into<Version>) -> ZkResult<()> {
        let request = Request::Delete {
            path: self.path(path)?,
            version: version.into(),
        };
        self.call(request, None).await.map(|_| ())
    }

    /// Make later reads on this client observe every update committed before the call.
    ///
    /// Not linearizable across a leader change.
    pub async fn load_fence(&self) -> ZkResult<()> {
        let path = self.engine().chroot.apply("/");
        self.call(Request::Sync { path }, None).await.map(|_| ())
    }

    /// Apply a batch atomically.
    ///
    /// On failure nothing was applied and the error is
    /// [`ZkError::Transaction`] naming the first failing operation.
    pub async fn commit(&self, mut txn: MultiOp) -> ZkResult<Vec<OpResult>> {
        let chroot = &self.engine().chroot;
        for op in txn.ops_mut() {
            let sequential = matches!(op, Op::Create { mode, .. } if mode.is_sequential());
            validate_path(op.path(), sequential)?;
            let scoped = chroot.apply(op.path());
            *op.path_mut() = scoped;
        }
        match self.call(Request::Multi(txn), None).await? {
            Response::Multi(response) => Ok(response
                .results
                .into_iter()
                .map(|result| match result {
                    OpResult::Create { path, stat } => OpResult::Create {
                        path: chroot.strip(&path),
                        stat,
                    },
                    other => other,
                })
                .collect()),
            other => Err(unexpected(other)),
        }
    }

    /// End the session.
    ///
    /// Sends a close-session request (bounded by `close_timeout`) so the
    /// ensemble drops ephemeral nodes right away, then fails every
    /// outstanding operation and watch with `Closed`. Affects every clone.
    pub async fn close(&self) {
        let engine = self.engine();
        if engine.session.state().is_terminal() {
            return;
        }
        engine.begin_close();
        if engine.session.state() == SessionState::Connected {
            if let Ok(reply) = engine.submit(&Request::CloseSession, None) {
                let timeout = engine.config.close_timeout;
                if let Err(_) | Ok(Err(_)) = engine.providers.time().timeout(timeout, reply).await {
                    tracing::debug!("close-session request not acknowledged");
                }
            }
        }
        engine.close_local();
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.engine().session.state()
    }

    /// Stream of session state changes.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.engine().session.subscribe()
    }

    /// Session id assigned by the ensemble, once one exists.
    pub fn session_id(&self) -> Option<i64> {
        self.engine().session.session_id()
    }

    /// Ensemble members in connection order, with liveness bookkeeping.
    pub fn ensemble(&self) -> Vec<EnsembleMember> {
        self.engine().members()
    }
}

/// Wait until the session is connected or can never be.
async fn settled(mut states: watch::Receiver<SessionState>) -> SessionState {
    loop {
        let state = *states.borrow_and_update();
        if state == SessionState::Connected || state.is_terminal() {
            return state;
        }
        if states.changed().await.is_err() {
            return SessionState::Closed;
        }
    }
}

fn exists_result(result: ZkResult<Response>) -> ZkResult<Option<Stat>> {
    match result {
        Ok(Response::Exists { stat }) => Ok(Some(stat)),
        Err(ZkError::NoNode) => Ok(None),
        Ok(other) => Err(unexpected(other)),
        Err(error) => Err(error),
    }
}

fn unexpected(response: Response) -> ZkError {
    tracing::error!(?response, "reply body does not match the request");
    ZkError::Server(ErrorCode::MarshallingError)
}
