//! GitHub: classic personal-access tokens, SSH keys, 2FA enrollment and
//! account signup for service accounts.

use std::time::Duration;

use async_trait::async_trait;
use colored::Colorize;
use tracing::{info, warn};

use crate::browser::{DEFAULT_STEP_TIMEOUT, UiDriver};
use crate::error::{Error, Result};
use crate::secret::{SecretString, project_short_name};
use crate::selector::Selector;
use crate::session::{
    AccountProfile, ActionOutcome, Challenge, ProvisioningAction, ProvisioningSession,
};
use crate::sites::SiteAdapter;

pub const SITE: &str = "github.com";

// Scope checkboxes are labelled with the scope id followed by its
// description; the whitespace-normalized form is what the page exposes.
const SCOPE_REPO: &str = "repo Full control of private repositories";
const SCOPE_WORKFLOW: &str = "workflow Update GitHub Action workflows";
const SCOPE_ADMIN_ORG: &str =
    "admin:org Full control of orgs and teams, read and write org projects";
const SCOPE_ADMIN_ORG_HOOK: &str = "admin:org_hook Full control of organization hooks";
const SCOPE_DELETE_REPO: &str = "delete_repo Delete repositories";
const SCOPE_REPO_STATUS: &str = "repo:status Access commit status";
const SCOPE_PUBLIC_REPO: &str = "public_repo Access public repositories";
const SCOPE_ADMIN_REPO_HOOK: &str = "admin:repo_hook Full control of repository hooks";

pub struct GitHub;

impl GitHub {
    async fn open_nav_menu(ui: &mut dyn UiDriver) -> Result<()> {
        ui.click(&Selector::label("Open user navigation menu")).await
    }

    /// Land on the settings page unless we're already somewhere under it.
    pub(crate) async fn open_settings(ui: &mut dyn UiDriver) -> Result<()> {
        if !ui.is_visible(&Selector::text("Your personal account")).await? {
            Self::open_nav_menu(ui).await?;
            ui.click(&Selector::role_exact("link", "Settings")).await?;
        }
        Ok(())
    }

    async fn nav_to_token_settings(ui: &mut dyn UiDriver) -> Result<()> {
        Self::open_settings(ui).await?;
        ui.click(&Selector::role("link", "Developer settings")).await?;
        ui.click(&Selector::role("button", "Personal access tokens"))
            .await?;
        ui.click(&Selector::role("link", "Tokens (classic)")).await
    }

    async fn fill_login_form(
        ui: &mut dyn UiDriver,
        username: &str,
        password: &str,
    ) -> Result<()> {
        ui.fill(&Selector::label("Username or email address"), username)
            .await?;
        ui.fill(&Selector::label("Password"), password).await?;
        ui.click(&Selector::role_exact("button", "Sign in")).await
    }
}

#[async_trait]
impl SiteAdapter for GitHub {
    fn site(&self) -> &'static str {
        SITE
    }

    fn login_url(&self) -> String {
        format!("https://{}/login", SITE)
    }

    async fn submit_login(
        &self,
        ui: &mut dyn UiDriver,
        username: &str,
        password: &str,
    ) -> Result<()> {
        Self::fill_login_form(ui, username, password).await
    }

    async fn probe_challenge(&self, ui: &mut dyn UiDriver) -> Result<Challenge> {
        // The delayed rollout prompt also carries a "Two-factor
        // authentication" heading, so its button is checked first.
        if ui
            .is_visible(&Selector::role("button", "Verify 2FA now"))
            .await?
        {
            return Ok(Challenge::DelayedOtp);
        }
        if ui
            .is_visible(&Selector::role("heading", "Device verification"))
            .await?
        {
            return Ok(Challenge::DeviceVerification);
        }
        if ui
            .is_visible(&Selector::role("heading", "Two-factor authentication"))
            .await?
        {
            return Ok(Challenge::Otp);
        }
        Ok(Challenge::None)
    }

    async fn submit_otp(&self, ui: &mut dyn UiDriver, code: &str) -> Result<()> {
        // The form auto-submits once six digits are typed.
        ui.fill(&Selector::placeholder("XXXXXX"), code).await
    }

    async fn submit_delayed_otp(&self, ui: &mut dyn UiDriver, code: &str) -> Result<()> {
        ui.click(&Selector::role("button", "Verify 2FA now")).await?;
        ui.fill(&Selector::placeholder("XXXXXX"), code).await?;
        ui.click(&Selector::role("button", "Verify")).await?;

        if ui
            .is_visible(&Selector::role("heading", "2FA verification successful!"))
            .await?
        {
            ui.click(&Selector::role("link", "Done")).await?;
        }
        Ok(())
    }

    async fn dismiss_interstitials(&self, ui: &mut dyn UiDriver) -> Result<()> {
        if ui
            .is_visible(&Selector::text("Confirm your account recovery settings"))
            .await?
        {
            info!("confirming account recovery settings");
            ui.click(&Selector::role("button", "Confirm")).await?;
        }
        Ok(())
    }

    fn home_marker(&self) -> Selector {
        Selector::role_exact("heading", "Home")
    }

    async fn sign_out(&self, ui: &mut dyn UiDriver) -> Result<()> {
        Self::open_nav_menu(ui).await?;
        ui.click(&Selector::role("link", "Sign out")).await?;
        ui.click(&Selector::role_exact("button", "Sign out from all accounts"))
            .await
    }

    async fn account_exists(&self, username: &str) -> Result<bool> {
        let url = format!("https://{}/{}", SITE, username.trim());
        let response = reqwest::Client::new()
            .head(&url)
            .send()
            .await
            .map_err(|e| Error::Browser(format!("account probe failed: {}", e)))?;
        let status = response.status();
        info!(%url, status = status.as_u16(), "account probe");
        Ok(status.as_u16() == 200)
    }

    async fn register(&self, ui: &mut dyn UiDriver, profile: &AccountProfile) -> Result<()> {
        let url = format!("https://{}/signup", SITE);
        let nav = ui.navigate(&url).await?;
        if !nav.ok() {
            return Err(Error::PageLoad {
                url,
                status: nav.status,
            });
        }

        ui.wait_visible(&Selector::css("#email"), DEFAULT_STEP_TIMEOUT)
            .await?;
        ui.fill(&Selector::css("#email"), profile.email.expose())
            .await?;
        ui.click(&Selector::role("button", "Continue")).await?;
        ui.fill(&Selector::css("#password"), profile.password.expose())
            .await?;
        ui.click(&Selector::role("button", "Continue")).await?;
        ui.fill(&Selector::css("#login"), profile.username.expose())
            .await?;
        ui.click(&Selector::role("button", "Continue")).await?;

        // Email preferences step: the Continue button only shows up after
        // the checkbox has settled, sometimes needing several rounds.
        for _ in 0..10 {
            if !ui
                .is_visible(&Selector::text("Receive occasional product"))
                .await?
            {
                break;
            }
            ui.settle(Duration::from_secs(2)).await;
            ui.set_checked(&Selector::label("Email preferences"), false)
                .await?;
            ui.settle(Duration::from_secs(2)).await;
            ui.set_checked(&Selector::label("Email preferences"), false)
                .await?;
            ui.click(&Selector::role("button", "Continue")).await?;
        }

        println!(
            "{}",
            "Manual steps: click \"Verify\", solve the captcha, create the \
             account and enter the launch code."
                .yellow()
                .bold()
        );

        ui.wait_visible(
            &Selector::role("heading", "Sign in to GitHub"),
            Duration::from_secs(60),
        )
        .await?;
        Self::fill_login_form(ui, profile.username.expose(), profile.password.expose()).await?;

        if ui
            .is_visible(&Selector::role("link", "Skip personalization"))
            .await?
        {
            ui.click(&Selector::role("link", "Skip personalization"))
                .await?;
        }
        ui.settle(Duration::from_secs(2)).await;
        Ok(())
    }
}

/// A classic personal-access-token request: UI note, store item name, and
/// the scope checkboxes to tick.
#[derive(Debug, Clone)]
pub struct TokenProfile {
    pub note: String,
    pub store_item: String,
    pub scopes: Vec<&'static str>,
}

impl TokenProfile {
    pub fn otterdog() -> Self {
        Self {
            note: "otterdog".to_string(),
            store_item: "otterdog-token".to_string(),
            scopes: vec![
                SCOPE_REPO,
                SCOPE_WORKFLOW,
                SCOPE_ADMIN_ORG,
                SCOPE_ADMIN_ORG_HOOK,
                SCOPE_DELETE_REPO,
            ],
        }
    }

    pub fn renovate() -> Self {
        Self {
            note: "renovate".to_string(),
            store_item: "renovate-token".to_string(),
            scopes: vec![SCOPE_REPO, SCOPE_WORKFLOW],
        }
    }

    pub fn jenkins(project: &str) -> Self {
        let short_name = project_short_name(project);
        Self {
            note: format!(
                "Jenkins GitHub Plugin token https://ci.eclipse.org/{}",
                short_name
            ),
            store_item: "api-token".to_string(),
            scopes: vec![
                SCOPE_REPO_STATUS,
                SCOPE_PUBLIC_REPO,
                SCOPE_ADMIN_REPO_HOOK,
                SCOPE_ADMIN_ORG_HOOK,
            ],
        }
    }

    /// Resolve a profile by name; unknown names get a plain repo/workflow
    /// token stored under `<name>-token`.
    pub fn for_name(name: &str, project: &str) -> Self {
        match name {
            "otterdog" => Self::otterdog(),
            "renovate" => Self::renovate(),
            "jenkins" => Self::jenkins(project),
            other => Self {
                note: other.to_string(),
                store_item: format!("{}-token", other),
                scopes: vec![SCOPE_REPO, SCOPE_WORKFLOW],
            },
        }
    }
}

/// Create (or, with operator confirmation, regenerate) a classic PAT.
pub struct CreateToken {
    pub profile: TokenProfile,
}

#[async_trait]
impl ProvisioningAction for CreateToken {
    fn describe(&self) -> String {
        format!("create token '{}'", self.profile.note)
    }

    async fn run(&self, session: &mut ProvisioningSession<'_>) -> Result<ActionOutcome> {
        let ui = session.ui();
        GitHub::nav_to_token_settings(ui).await?;

        // Without this click the token list below is not queryable.
        ui.click(&Selector::role("heading", "Personal access tokens (classic)"))
            .await?;

        let existing = Selector::role("link", &self.profile.note);
        let rotated = if ui.is_visible(&existing).await? {
            info!(token = %self.profile.note, "token already exists");
            if !session.confirm().ask(&format!(
                "Token '{}' already exists. Regenerate it? (yes/no):",
                self.profile.note
            )) {
                return Ok(ActionOutcome::Declined);
            }

            // Regeneration invalidates the previous token; the operator has
            // just acknowledged that.
            info!(token = %self.profile.note, "regenerating");
            let ui = session.ui();
            ui.click(&existing).await?;
            ui.click(&Selector::role("link", "Regenerate token")).await?;
            ui.click(&Selector::role("button", "30 days")).await?;
            ui.click(&Selector::role("menuitemradio", "No expiration"))
                .await?;
            ui.click(&Selector::role("button", "Regenerate token")).await?;
            ui.click(&Selector::role("button", "Copy token")).await?;
            true
        } else {
            info!(token = %self.profile.note, "creating");
            ui.click(&Selector::role("button", "Generate new token")).await?;
            ui.click(&Selector::role(
                "menuitem",
                "Generate new token (classic) For general use",
            ))
            .await?;
            ui.fill(&Selector::label("Note"), &self.profile.note).await?;
            ui.click(&Selector::role("button", "30 days")).await?;
            ui.click(&Selector::role("menuitemradio", "No expiration"))
                .await?;
            for scope in &self.profile.scopes {
                ui.set_checked(&Selector::label(*scope), true).await?;
            }
            ui.click(&Selector::role("button", "Generate token")).await?;
            ui.click(&Selector::role("button", "Copy token")).await?;
            false
        };

        let token = session.ui().read_clipboard().await?;
        session
            .persist_secret(&self.profile.store_item, token.trim())
            .await?;

        let items = vec![self.profile.store_item.clone()];
        Ok(if rotated {
            ActionOutcome::Rotated { items }
        } else {
            ActionOutcome::Created { items }
        })
    }
}

/// Register the project's SSH public key, generating an Ed25519 keypair
/// first if the store doesn't hold one yet.
pub struct RegisterSshKey;

fn generate_ed25519(comment: &str) -> Result<(String, String)> {
    use ssh_key::private::PrivateKey;

    let private = PrivateKey::random(&mut ssh_key::rand_core::OsRng, ssh_key::Algorithm::Ed25519)
        .map_err(|e| Error::Key(format!("keypair generation failed: {}", e)))?;

    let private_pem = private
        .to_openssh(ssh_key::LineEnding::LF)
        .map_err(|e| Error::Key(format!("private key encoding failed: {}", e)))?
        .to_string();

    let public = private
        .public_key()
        .to_openssh()
        .map_err(|e| Error::Key(format!("public key encoding failed: {}", e)))?;

    Ok((private_pem, format!("{} {}", public, comment)))
}

#[async_trait]
impl ProvisioningAction for RegisterSshKey {
    fn describe(&self) -> String {
        "register SSH key".to_string()
    }

    async fn run(&self, session: &mut ProvisioningSession<'_>) -> Result<ActionOutcome> {
        let email = session.resolve_credential("email").await?;

        let mut pubkey = session.read_secret("id_ed25519.pub").await?;
        if pubkey.is_blank() {
            info!("no stored SSH key, generating an Ed25519 keypair");
            let comment = format!("{}@{}", session.project(), SITE);
            let (private_pem, public) = generate_ed25519(&comment)?;
            session.persist_secret("id_ed25519", &private_pem).await?;
            session.persist_secret("id_ed25519.pub", &public).await?;
            pubkey = SecretString::new(public);
        }

        let ui = session.ui();
        GitHub::open_settings(ui).await?;
        ui.click(&Selector::role("link", "SSH and GPG keys")).await?;

        // Same queryability quirk as the token list.
        ui.click(&Selector::role("heading", "SSH keys")).await?;
        if ui
            .is_visible(&Selector::role("heading", "Authentication keys"))
            .await?
            && ui.is_visible(&Selector::text(email.expose())).await?
        {
            info!("SSH key already registered");
            return Ok(ActionOutcome::AlreadyProvisioned);
        }

        ui.click(&Selector::role("link", "New SSH key")).await?;
        ui.fill(
            &Selector::placeholder("Begins with 'ssh-rsa'"),
            pubkey.expose(),
        )
        .await?;
        ui.click(&Selector::role("button", "Add SSH key")).await?;

        Ok(ActionOutcome::Created {
            items: vec!["id_ed25519.pub".to_string()],
        })
    }
}

/// Enroll TOTP 2FA: persist the setup seed and the recovery codes, verify
/// with a freshly computed code, keep an offline copy of the codes file.
pub struct EnrollTwoFactor;

#[async_trait]
impl ProvisioningAction for EnrollTwoFactor {
    fn describe(&self) -> String {
        "enroll 2FA".to_string()
    }

    async fn run(&self, session: &mut ProvisioningSession<'_>) -> Result<ActionOutcome> {
        let ui = session.ui();
        GitHub::open_settings(ui).await?;
        ui.click(&Selector::role("link", "Password and authentication"))
            .await?;

        ui.click(&Selector::role_exact("heading", "Two-factor authentication"))
            .await?;
        if !ui
            .is_visible(&Selector::role(
                "heading",
                "Two-factor authentication is not enabled yet.",
            ))
            .await?
        {
            info!("2FA is already set up, skipping");
            return Ok(ActionOutcome::AlreadyProvisioned);
        }

        ui.click(&Selector::role("link", "Enable two-factor authentication"))
            .await?;
        ui.click(&Selector::role("button", "setup key")).await?;

        ui.wait_visible(
            &Selector::role("dialog", "Your two-factor secret"),
            DEFAULT_STEP_TIMEOUT,
        )
        .await?;
        ui.settle(Duration::from_secs(2)).await;

        let seed_sel =
            Selector::css("[data-target=\"two-factor-setup-verification.mashedSecret\"]");
        let mut seed = ui.texts_of(&seed_sel).await?.join(" ");
        if seed.trim().is_empty() {
            // The dialog occasionally renders empty; reopen it once.
            warn!("2FA seed not rendered, reopening the dialog");
            ui.press("Escape").await?;
            ui.click(&Selector::role("button", "setup key")).await?;
            ui.settle(Duration::from_secs(2)).await;
            seed = ui.texts_of(&seed_sel).await?.join(" ");
        }
        if seed.trim().is_empty() {
            return Err(Error::EmptySecret {
                item: "2FA-seed".to_string(),
            });
        }

        let seed = seed.trim().to_string();
        session.persist_secret("2FA-seed", &seed).await?;
        let code = session.otp_from_seed(&seed)?;

        let ui = session.ui();
        ui.click(&Selector::role("button", "Close")).await?;
        ui.fill(
            &Selector::role("textbox", "Verify the code from the app"),
            &code,
        )
        .await?;

        let codes_sel = Selector::css(".two-factor-recovery-code");
        ui.wait_visible(&codes_sel, DEFAULT_STEP_TIMEOUT).await?;
        let recovery_codes = ui.texts_of(&codes_sel).await?.join("\n");
        session
            .persist_secret("2FA-recovery-codes", &recovery_codes)
            .await?;

        // Offline copy of the codes file.
        let downloads_dir = session.downloads_dir().to_path_buf();
        let ui = session.ui();
        ui.allow_downloads(&downloads_dir).await?;
        ui.click(&Selector::role("button", "Download")).await?;
        ui.settle(Duration::from_secs(1)).await;
        info!(dir = %downloads_dir.display(), "recovery codes downloaded");

        ui.click(&Selector::role("button", "I have saved my recovery codes"))
            .await?;
        ui.click(&Selector::role("button", "Done")).await?;

        Ok(ActionOutcome::Enrolled {
            items: vec!["2FA-seed".to_string(), "2FA-recovery-codes".to_string()],
        })
    }
}

/// Make sure the service account exists: signs up (with manual captcha /
/// launch-code steps) when the account probe comes back empty, otherwise
/// just logs in.
pub struct EnsureAccount;

#[async_trait]
impl ProvisioningAction for EnsureAccount {
    fn describe(&self) -> String {
        "sign up the service account".to_string()
    }

    fn bootstraps_account(&self) -> bool {
        true
    }

    async fn run(&self, session: &mut ProvisioningSession<'_>) -> Result<ActionOutcome> {
        if session.account_created() {
            Ok(ActionOutcome::Created {
                items: vec!["account".to_string()],
            })
        } else {
            info!("account already exists");
            Ok(ActionOutcome::AlreadyProvisioned)
        }
    }
}
