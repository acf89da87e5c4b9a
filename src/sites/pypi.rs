//! PyPI.

use async_trait::async_trait;
use tracing::info;

use crate::browser::UiDriver;
use crate::error::Result;
use crate::selector::Selector;
use crate::session::{ActionOutcome, Challenge, ProvisioningAction, ProvisioningSession};
use crate::sites::SiteAdapter;

pub const SITE: &str = "pypi.org";

pub struct Pypi;

impl Pypi {
    async fn open_settings(ui: &mut dyn UiDriver) -> Result<()> {
        if !ui.is_visible(&Selector::text("Account settings")).await? {
            ui.click(&Selector::label("View menu")).await?;
            ui.click(&Selector::role("link", "Account settings")).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SiteAdapter for Pypi {
    fn site(&self) -> &'static str {
        SITE
    }

    fn login_url(&self) -> String {
        format!("https://{}/account/login", SITE)
    }

    async fn submit_login(
        &self,
        ui: &mut dyn UiDriver,
        username: &str,
        password: &str,
    ) -> Result<()> {
        ui.fill(&Selector::placeholder("Your username"), username)
            .await?;
        ui.fill(&Selector::placeholder("Your password"), password)
            .await?;
        ui.click(&Selector::role("button", "Log in")).await
    }

    async fn probe_challenge(&self, ui: &mut dyn UiDriver) -> Result<Challenge> {
        if ui
            .is_visible(&Selector::role("heading", "Two-factor authentication"))
            .await?
        {
            return Ok(Challenge::Otp);
        }
        Ok(Challenge::None)
    }

    async fn submit_otp(&self, ui: &mut dyn UiDriver, code: &str) -> Result<()> {
        ui.fill(&Selector::label("Enter authentication code ("), code)
            .await?;
        ui.click(&Selector::role("button", "Verify")).await
    }

    fn home_marker(&self) -> Selector {
        Selector::label("View menu")
    }

    async fn sign_out(&self, ui: &mut dyn UiDriver) -> Result<()> {
        ui.click(&Selector::label("View menu")).await?;
        ui.click(&Selector::role("button", "Log out")).await
    }
}

/// Create an account-scoped API token.  PyPI rejects duplicate token names,
/// so an existing token of the same name is a skip, not a rotation.
pub struct CreateToken {
    pub name: String,
}

#[async_trait]
impl ProvisioningAction for CreateToken {
    fn describe(&self) -> String {
        format!("create PyPI token '{}'", self.name)
    }

    async fn run(&self, session: &mut ProvisioningSession<'_>) -> Result<ActionOutcome> {
        let ui = session.ui();
        Pypi::open_settings(ui).await?;

        if ui.is_visible(&Selector::text(&self.name)).await? {
            info!(token = %self.name, "token already exists, skipping");
            return Ok(ActionOutcome::AlreadyProvisioned);
        }

        ui.click(&Selector::role("link", "Add API token")).await?;
        ui.fill(&Selector::label("Token name"), &self.name).await?;
        ui.select_option(&Selector::label("Scope"), "Entire account (all projects)")
            .await?;
        ui.click(&Selector::role("button", "Create token")).await?;

        // The token is shown once; the page's Copy button is the only
        // reliable way to get the full value.
        ui.click(&Selector::role("button", "Copy token")).await?;
        let token = ui.read_clipboard().await?;
        session.persist_secret("api-token", token.trim()).await?;

        Ok(ActionOutcome::Created {
            items: vec!["api-token".to_string()],
        })
    }
}
