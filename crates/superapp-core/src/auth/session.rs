//! The session state machine.
//!
//! `SessionManager` is the single owner of the process-wide `SessionState`.
//! Front-ends read snapshots or subscribe to changes; only the four
//! operations below mutate it:
//!
//! ```text
//! Loading --load_stored_session--> Authenticated | Unauthenticated
//! Unauthenticated --sign_up / sign_in--> Authenticated
//! Authenticated --sign_out--> Unauthenticated
//! ```
//!
//! Operations are serialized: a call that arrives while another is running
//! waits for it to finish. Every store call is bounded by a timeout so a
//! stuck backend cannot leave the session loading forever.
//!
//! A timeout does not mean the store call failed. The call keeps running in
//! the background and may still land; it must settle before the store is
//! touched again, so two store calls never overlap.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use argon2::Argon2;
use serde::de::DeserializeOwned;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{AuthError, SessionState, StoredCredential, User, CREDENTIALS_KEY, USER_KEY};
use crate::store::{KeyValueStore, StoreError};

/// Default bound on a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

const LOAD_FAILED: &str = "Failed to load user data";
const SIGN_UP_FAILED: &str = "Failed to create account";
const SIGN_OUT_FAILED: &str = "Failed to sign out";

/// A store call that outlived its timeout and is still running.
struct Abandoned {
    key: &'static str,
    /// Resolves to whether the call succeeded.
    handle: JoinHandle<bool>,
}

/// What the account keys held before a sign-up started writing.
struct Snapshot {
    credentials: Option<String>,
    user: Option<String>,
}

pub struct SessionManager {
    store: Arc<dyn KeyValueStore>,
    state: watch::Sender<SessionState>,
    /// Held for the whole of each mutating operation.
    op_lock: Mutex<()>,
    /// At most one, since nothing else reaches the store until it settles.
    abandoned: StdMutex<Option<Abandoned>>,
    store_timeout: Duration,
    argon2: Argon2<'static>,
}

impl SessionManager {
    /// Create a manager in the `Loading` state. Call `load_stored_session` next.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let (state, _) = watch::channel(SessionState::loading());
        Self {
            store,
            state,
            op_lock: Mutex::new(()),
            abandoned: StdMutex::new(None),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            argon2: Argon2::default(),
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Replace the password hasher used for new credentials.
    pub fn with_hasher(mut self, argon2: Argon2<'static>) -> Self {
        self.argon2 = argon2;
        self
    }

    // =========================================================================
    // Read side
    // =========================================================================

    /// Snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receive every state change. The receiver starts at the current state.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn user(&self) -> Option<User> {
        self.state.borrow().user().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading()
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error().map(str::to_string)
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Restore the session persisted by a previous run.
    ///
    /// Failures are recorded in the state, never returned: the user simply
    /// has to sign in again.
    pub async fn load_stored_session(&self) {
        let _guard = self.op_lock.lock().await;
        self.update(|s| s.begin(false));

        let next = match self.read_user().await {
            Ok(Some(user)) => {
                debug!(user_id = %user.id, "Restored stored session");
                SessionState::authenticated(user)
            }
            Ok(None) => {
                debug!("No stored session");
                SessionState::unauthenticated()
            }
            Err(e) => {
                warn!(error = %e, "Failed to restore stored session");
                SessionState::unauthenticated_with_error(LOAD_FAILED)
            }
        };
        self.publish(next);
    }

    /// Register a new account on this device and sign it in.
    ///
    /// Any existing account record is replaced.
    pub async fn sign_up(&self, email: &str, username: &str, password: &str) -> Result<(), AuthError> {
        let _guard = self.op_lock.lock().await;
        self.update(|s| s.begin(true));

        match self.register(email, username, password).await {
            Ok(user) => {
                info!(user_id = %user.id, "Account created");
                self.publish(SessionState::authenticated(user));
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Sign-up failed");
                self.update(|s| s.failed(SIGN_UP_FAILED));
                Err(e)
            }
        }
    }

    /// Sign in to the account registered on this device.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let _guard = self.op_lock.lock().await;
        self.update(|s| s.begin(true));

        match self.authenticate(email, password).await {
            Ok(user) => {
                info!(user_id = %user.id, "Signed in");
                self.publish(SessionState::authenticated(user));
                Ok(())
            }
            Err(e) => {
                debug!(error = %e, "Sign-in failed");
                let message = e.to_string();
                self.update(|s| s.failed(message));
                Err(e)
            }
        }
    }

    /// End the session. The account record is kept so the user can sign in
    /// again without registering.
    ///
    /// The in-memory session always ends; a store failure only leaves an
    /// error message behind.
    pub async fn sign_out(&self) {
        let _guard = self.op_lock.lock().await;
        self.update(|s| s.begin(false));

        match self.remove(USER_KEY).await {
            Ok(()) => {
                info!("Signed out");
                self.publish(SessionState::unauthenticated());
            }
            Err(e) => {
                warn!(error = %e, "Failed to clear stored session");
                self.publish(SessionState::unauthenticated_with_error(SIGN_OUT_FAILED));
            }
        }
    }

    // =========================================================================
    // Operation bodies
    // =========================================================================

    async fn register(&self, email: &str, username: &str, password: &str) -> Result<User, AuthError> {
        let user = User::new(email, username);
        let credential = self.hash_credential(&user, password).await?;
        let credential_json = to_json(CREDENTIALS_KEY, &credential)?;
        let user_json = to_json(USER_KEY, &user)?;

        // Nothing is written unless the current records are known, otherwise
        // a failed registration could not put them back
        let snapshot = Snapshot {
            credentials: self.read(CREDENTIALS_KEY).await?,
            user: self.read(USER_KEY).await?,
        };

        // The account record carries the user, so this one write creates the account.
        // The user key only marks the active session.
        let written = async {
            self.write(CREDENTIALS_KEY, &credential_json).await?;
            self.write(USER_KEY, &user_json).await
        }
        .await;

        if let Err(e) = written {
            self.roll_back(snapshot).await;
            return Err(e);
        }

        Ok(user)
    }

    /// Put both account keys back the way they were. A timed-out write
    /// settles first, so it cannot land on top of the restored records.
    async fn roll_back(&self, snapshot: Snapshot) {
        for (key, previous) in [
            (CREDENTIALS_KEY, snapshot.credentials),
            (USER_KEY, snapshot.user),
        ] {
            let result = match previous {
                Some(raw) => self.write(key, &raw).await,
                None => self.remove(key).await,
            };
            if let Err(e) = result {
                warn!(key, error = %e, "Failed to roll back account record");
            }
        }
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let raw = self
            .read(CREDENTIALS_KEY)
            .await?
            .ok_or_else(AuthError::no_account)?;
        let credential: StoredCredential = parse(CREDENTIALS_KEY, &raw)?;

        if !self.verify_credential(&credential, email, password).await? {
            return Err(AuthError::InvalidCredentials);
        }

        let user = match credential.account_user() {
            Some(user) => user.clone(),
            None => self.read_user().await?.ok_or_else(AuthError::no_user_data)?,
        };

        self.write(USER_KEY, &to_json(USER_KEY, &user)?).await?;

        if credential.is_plaintext() {
            self.upgrade_credential(&user, password).await;
        }

        Ok(user)
    }

    /// Replace a plaintext account record with a hashed one. Failure leaves the old record.
    async fn upgrade_credential(&self, user: &User, password: &str) {
        let result = async {
            let credential = self.hash_credential(user, password).await?;
            self.write(CREDENTIALS_KEY, &to_json(CREDENTIALS_KEY, &credential)?)
                .await
        }
        .await;

        match result {
            Ok(()) => info!(user_id = %user.id, "Upgraded plaintext account record"),
            Err(e) => warn!(error = %e, "Failed to upgrade plaintext account record"),
        }
    }

    // Argon2 is deliberately slow, keep it off the async workers

    async fn hash_credential(&self, user: &User, password: &str) -> Result<StoredCredential, AuthError> {
        let argon2 = self.argon2.clone();
        let user = user.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || StoredCredential::hash(&argon2, &user, &password))
            .await
            .map_err(|_| AuthError::Hash)?
    }

    async fn verify_credential(
        &self,
        credential: &StoredCredential,
        email: &str,
        password: &str,
    ) -> Result<bool, AuthError> {
        let argon2 = self.argon2.clone();
        let credential = credential.clone();
        let email = email.to_string();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || credential.verify(&argon2, &email, &password))
            .await
            .map_err(|_| AuthError::Hash)
    }

    // =========================================================================
    // Store access
    // =========================================================================

    async fn read_user(&self) -> Result<Option<User>, AuthError> {
        match self.read(USER_KEY).await? {
            Some(raw) => Ok(Some(parse(USER_KEY, &raw)?)),
            None => Ok(None),
        }
    }

    async fn read(&self, key: &'static str) -> Result<Option<String>, AuthError> {
        debug!(key, "Store read");
        let store = self.store.clone();
        self.call(key, async move { store.get(key).await })
            .await?
            .map_err(|source| AuthError::StoreRead { key, source })
    }

    async fn write(&self, key: &'static str, value: &str) -> Result<(), AuthError> {
        debug!(key, "Store write");
        let store = self.store.clone();
        let value = value.to_string();
        self.call(key, async move { store.set(key, &value).await })
            .await?
            .map_err(|source| AuthError::StoreWrite { key, source })
    }

    async fn remove(&self, key: &'static str) -> Result<(), AuthError> {
        debug!(key, "Store remove");
        let store = self.store.clone();
        self.call(key, async move { store.remove(key).await })
            .await?
            .map_err(|source| AuthError::StoreWrite { key, source })
    }

    /// Run one store call as its own task, bounded by the store timeout.
    ///
    /// The task is not cancelled on timeout; it is kept in `abandoned` and
    /// the next call waits for it first.
    async fn call<T, F>(&self, key: &'static str, op: F) -> Result<Result<T, StoreError>, AuthError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        self.settle_abandoned().await?;

        let mut handle = tokio::spawn(op);
        let finished = tokio::time::timeout(self.store_timeout, &mut handle).await;
        match finished {
            Ok(joined) => Ok(joined.unwrap_or_else(|e| {
                Err(StoreError::Unavailable(format!("store task failed: {}", e)))
            })),
            Err(_) => {
                warn!(key, "Store call timed out, it may still complete");
                let handle = tokio::spawn(async move { matches!(handle.await, Ok(Ok(_))) });
                *self.abandoned_slot() = Some(Abandoned { key, handle });
                Err(self.timed_out(key))
            }
        }
    }

    /// Wait, up to the store timeout, for a previously timed-out call to finish.
    async fn settle_abandoned(&self) -> Result<(), AuthError> {
        let pending = self.abandoned_slot().take();
        let Some(mut abandoned) = pending else {
            return Ok(());
        };

        let settled = tokio::time::timeout(self.store_timeout, &mut abandoned.handle).await;
        match settled {
            Ok(landed) => {
                debug!(
                    key = abandoned.key,
                    succeeded = matches!(landed, Ok(true)),
                    "Timed-out store call finished"
                );
                Ok(())
            }
            Err(_) => {
                let key = abandoned.key;
                *self.abandoned_slot() = Some(abandoned);
                Err(self.timed_out(key))
            }
        }
    }

    fn abandoned_slot(&self) -> std::sync::MutexGuard<'_, Option<Abandoned>> {
        self.abandoned.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timed_out(&self, key: &'static str) -> AuthError {
        AuthError::Timeout {
            key,
            after: self.store_timeout,
        }
    }

    // =========================================================================
    // State transitions
    // =========================================================================

    fn publish(&self, next: SessionState) {
        debug!(
            authenticated = next.is_authenticated(),
            loading = next.is_loading(),
            error = ?next.error(),
            "Session state changed"
        );
        self.state.send_replace(next);
    }

    fn update(&self, transition: impl FnOnce(&SessionState) -> SessionState) {
        let next = transition(&self.state.borrow());
        self.publish(next);
    }
}

fn parse<T: DeserializeOwned>(key: &'static str, raw: &str) -> Result<T, AuthError> {
    serde_json::from_str(raw).map_err(|source| AuthError::Parse { key, source })
}

fn to_json<T: serde::Serialize>(key: &'static str, value: &T) -> Result<String, AuthError> {
    serde_json::to_string(value).map_err(|source| AuthError::Parse { key, source })
}
