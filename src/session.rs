//! The provisioning session engine.
//!
//! One session drives one provisioning action against one site for one
//! project, end to end: resolve stored credentials, authenticate (resolving
//! any second-factor challenge), run the action, persist what it produced,
//! sign out.  Teardown runs on every exit path; nothing is retried
//! automatically.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::browser::UiDriver;
use crate::error::{Error, Result};
use crate::otp::OtpGenerator;
use crate::prompt::Confirm;
use crate::secret::{CredentialPath, SecretString};
use crate::sites::SiteAdapter;
use crate::store::{SecretStore, resolve_credential};

/// How long the post-login success marker may take to show up.
pub const POST_LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period between challenge probes; a delayed second challenge tends
/// to surface within a couple of seconds of the first clean probe.
pub const CHALLENGE_GRACE: Duration = Duration::from_secs(2);

/// How long the delayed second one-time-code prompt needs before the site
/// will accept a fresh code.
pub const DELAYED_OTP_WAIT: Duration = Duration::from_secs(35);

/// Bounded window for manual out-of-band device/email verification.
pub const DEVICE_VERIFICATION_WAIT: Duration = Duration::from_secs(60);

/// Cap on the total time spent resolving challenges before proceeding
/// optimistically and letting the post-login marker decide.
pub const MAX_CHALLENGE_WAIT: Duration = Duration::from_secs(120);

/// Second-factor state of the page right after submitting the login form,
/// resolved by one polling probe per iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Challenge {
    /// No challenge on screen.
    None,
    /// One-time-code prompt; answerable from the stored shared seed.
    Otp,
    /// Device/email verification; only completable out of band.
    DeviceVerification,
    /// The second, delayed one-time-code prompt some sites show while
    /// rolling out mandatory 2FA.
    DelayedOtp,
}

/// Lifecycle of one provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Authenticating,
    AuthFailed,
    Authenticated,
    ActionInProgress,
    ActionSkipped,
    ActionSucceeded,
    ActionFailed,
    SignedOut,
}

/// What a provisioning action did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// New secrets were created and persisted under the listed item names.
    Created { items: Vec<String> },
    /// Existing secrets were regenerated (the old ones are now invalid).
    Rotated { items: Vec<String> },
    /// A capability was enrolled (e.g. 2FA) and its secrets persisted.
    Enrolled { items: Vec<String> },
    /// Namespace snapshot activation summary.
    SnapshotsEnabled { enabled: usize, skipped: usize },
    /// The resource already existed; nothing was touched.
    AlreadyProvisioned,
    /// The operator declined a destructive regeneration.
    Declined,
}

impl ActionOutcome {
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::AlreadyProvisioned | Self::Declined)
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created { items } => write!(f, "created: {}", items.join(", ")),
            Self::Rotated { items } => write!(f, "rotated: {}", items.join(", ")),
            Self::Enrolled { items } => write!(f, "enrolled: {}", items.join(", ")),
            Self::SnapshotsEnabled { enabled, skipped } => write!(
                f,
                "snapshots enabled on {} namespace(s), {} already active",
                enabled, skipped
            ),
            Self::AlreadyProvisioned => write!(f, "already provisioned, skipped"),
            Self::Declined => write!(f, "declined by operator, nothing changed"),
        }
    }
}

/// Everything needed to create a brand-new account.
pub struct AccountProfile {
    pub username: SecretString,
    pub password: SecretString,
    pub email: SecretString,
}

/// One site- and action-specific provisioning step, run by the session once
/// the browser context is authenticated.
#[async_trait]
pub trait ProvisioningAction: Send + Sync {
    fn describe(&self) -> String;

    /// Signup-style actions create the account during the authentication
    /// phase instead of logging in.
    fn bootstraps_account(&self) -> bool {
        false
    }

    async fn run(&self, session: &mut ProvisioningSession<'_>) -> Result<ActionOutcome>;
}

/// Orchestrates one provisioning run.  Owns no OS resources itself; the
/// driver, store and generators are borrowed capabilities.
pub struct ProvisioningSession<'a> {
    adapter: &'a dyn SiteAdapter,
    ui: &'a mut dyn UiDriver,
    store: &'a dyn SecretStore,
    otp: &'a dyn OtpGenerator,
    confirm: &'a dyn Confirm,
    project: String,
    realm: String,
    downloads_dir: PathBuf,
    state: SessionState,
    account_created: bool,
}

impl<'a> ProvisioningSession<'a> {
    pub fn new(
        adapter: &'a dyn SiteAdapter,
        ui: &'a mut dyn UiDriver,
        store: &'a dyn SecretStore,
        otp: &'a dyn OtpGenerator,
        confirm: &'a dyn Confirm,
        project: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        Self {
            adapter,
            ui,
            store,
            otp,
            confirm,
            project: project.into(),
            realm: realm.into(),
            downloads_dir: PathBuf::from("."),
            state: SessionState::NotStarted,
            account_created: false,
        }
    }

    pub fn with_downloads_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.downloads_dir = dir.into();
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    pub fn account_created(&self) -> bool {
        self.account_created
    }

    pub fn ui(&mut self) -> &mut dyn UiDriver {
        self.ui
    }

    pub fn confirm(&self) -> &dyn Confirm {
        self.confirm
    }

    /// Store address for one of this session's items.
    pub fn credential_path(&self, item: &str) -> CredentialPath {
        CredentialPath::new(
            self.realm.clone(),
            self.project.clone(),
            self.adapter.site(),
            item,
        )
    }

    /// Read a required credential; empty means absent and is an error.
    pub async fn resolve_credential(&self, item: &str) -> Result<SecretString> {
        resolve_credential(self.store, &self.credential_path(item)).await
    }

    /// Read a credential that may legitimately be absent (empty result).
    pub async fn read_secret(&self, item: &str) -> Result<SecretString> {
        self.store.read(&self.credential_path(item)).await
    }

    /// Current one-time code from this project's stored 2FA seed.
    pub async fn otp_code(&self) -> Result<String> {
        let seed = self.resolve_credential("2FA-seed").await?;
        self.otp.code(seed.expose())
    }

    /// Current one-time code from a seed that is already in hand (2FA
    /// enrollment, before the seed round-trips through the store).
    pub fn otp_from_seed(&self, seed: &str) -> Result<String> {
        self.otp.code(seed)
    }

    /// Persist a freshly extracted secret, refusing empty values: an empty
    /// extraction means the UI flow silently failed, and storing it would
    /// paper over that.
    pub async fn persist_secret(&mut self, item: &str, value: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(Error::EmptySecret {
                item: item.to_string(),
            });
        }
        self.store.write(&self.credential_path(item), value).await?;
        info!(item, "secret stored");
        Ok(())
    }

    /// Run the action end to end.  Teardown (sign-out, browser close) runs
    /// exactly once, on success and on failure alike.
    pub async fn run(mut self, action: &dyn ProvisioningAction) -> Result<ActionOutcome> {
        let result = self.drive(action).await;
        self.teardown().await;
        result
    }

    async fn drive(&mut self, action: &dyn ProvisioningAction) -> Result<ActionOutcome> {
        info!(
            project = %self.project,
            site = self.adapter.site(),
            action = %action.describe(),
            "starting provisioning"
        );

        // Required for every flow; must fail before any navigation happens.
        let username = self.resolve_credential("username").await?;
        let password = self.resolve_credential("password").await?;

        self.state = SessionState::Authenticating;

        let bootstrap =
            action.bootstraps_account() && !self.adapter.account_exists(username.expose()).await?;
        let auth_result = if bootstrap {
            info!("account does not exist yet, signing up");
            match self.resolve_credential("email").await {
                Ok(email) => {
                    let profile = AccountProfile {
                        username: username.clone(),
                        password: password.clone(),
                        email,
                    };
                    let registered = self.adapter.register(self.ui, &profile).await;
                    if registered.is_ok() {
                        self.account_created = true;
                    }
                    registered
                }
                Err(e) => Err(e),
            }
        } else {
            self.authenticate(&username, &password).await
        };
        if let Err(e) = auth_result {
            self.state = SessionState::AuthFailed;
            return Err(e);
        }

        let marker = self.adapter.home_marker();
        if let Err(e) = self.ui.wait_visible(&marker, POST_LOGIN_TIMEOUT).await {
            self.state = SessionState::AuthFailed;
            return Err(e);
        }
        self.state = SessionState::Authenticated;
        info!("authenticated");

        self.state = SessionState::ActionInProgress;
        match action.run(self).await {
            Ok(outcome) => {
                self.state = if outcome.is_skip() {
                    SessionState::ActionSkipped
                } else {
                    SessionState::ActionSucceeded
                };
                info!(%outcome, "action finished");
                Ok(outcome)
            }
            Err(e) => {
                self.state = SessionState::ActionFailed;
                Err(e)
            }
        }
    }

    async fn authenticate(&mut self, username: &SecretString, password: &SecretString) -> Result<()> {
        if username.is_blank() || password.is_blank() {
            return Err(Error::InvalidCredentials);
        }

        let url = self.adapter.login_url();
        let nav = self.ui.navigate(&url).await?;
        if !nav.ok() {
            return Err(Error::PageLoad {
                url,
                status: nav.status,
            });
        }
        info!(url = %nav.url, "login page loaded");

        self.adapter
            .submit_login(self.ui, username.expose(), password.expose())
            .await?;

        self.resolve_challenges().await
    }

    /// Resolve zero or more second-factor challenges by polling one probe.
    ///
    /// A single clean probe is not proof of success: a delayed second
    /// challenge can surface moments after login.  Two consecutive clean
    /// probes (one grace period apart) end the loop; the total wait is
    /// capped, after which we proceed optimistically and let the post-login
    /// marker check decide.
    async fn resolve_challenges(&mut self) -> Result<()> {
        let mut waited = Duration::ZERO;
        let mut clean_probes = 0u32;

        while waited < MAX_CHALLENGE_WAIT {
            match self.adapter.probe_challenge(self.ui).await? {
                Challenge::None => {
                    clean_probes += 1;
                    if clean_probes >= 2 {
                        return Ok(());
                    }
                    self.adapter.dismiss_interstitials(self.ui).await?;
                    self.ui.settle(CHALLENGE_GRACE).await;
                    waited += CHALLENGE_GRACE;
                }
                Challenge::Otp => {
                    clean_probes = 0;
                    info!("one-time-code challenge");
                    let code = self.otp_code().await?;
                    self.adapter.submit_otp(self.ui, &code).await?;
                    self.adapter.dismiss_interstitials(self.ui).await?;
                    self.ui.settle(CHALLENGE_GRACE).await;
                    waited += CHALLENGE_GRACE;
                }
                Challenge::DeviceVerification => {
                    clean_probes = 0;
                    warn!(
                        "device verification challenge, complete it out of band \
                         (waiting {:?})",
                        DEVICE_VERIFICATION_WAIT
                    );
                    self.ui.settle(DEVICE_VERIFICATION_WAIT).await;
                    waited += DEVICE_VERIFICATION_WAIT;
                }
                Challenge::DelayedOtp => {
                    clean_probes = 0;
                    info!("delayed second one-time-code challenge, waiting out the code window");
                    self.ui.settle(DELAYED_OTP_WAIT).await;
                    waited += DELAYED_OTP_WAIT;
                    // The previous code window has lapsed by now.
                    let code = self.otp_code().await?;
                    self.adapter.submit_delayed_otp(self.ui, &code).await?;
                }
            }
        }

        warn!("challenge resolution hit its time cap, proceeding");
        Ok(())
    }

    /// Best-effort sign-out (only if we got past login), then close the
    /// browser.  Failures here are logged, never fatal.
    async fn teardown(&mut self) {
        let authenticated = matches!(
            self.state,
            SessionState::Authenticated
                | SessionState::ActionInProgress
                | SessionState::ActionSkipped
                | SessionState::ActionSucceeded
                | SessionState::ActionFailed
        );

        if authenticated {
            if let Err(e) = self.adapter.sign_out(self.ui).await {
                warn!("sign-out failed: {}", e);
            }
        }

        if let Err(e) = self.ui.close().await {
            warn!("browser teardown failed: {}", e);
        }

        self.state = SessionState::SignedOut;
    }
}
