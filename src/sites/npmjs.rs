//! npm registry.

use async_trait::async_trait;
use tracing::info;

use crate::browser::UiDriver;
use crate::error::Result;
use crate::selector::Selector;
use crate::session::{ActionOutcome, Challenge, ProvisioningAction, ProvisioningSession};
use crate::sites::SiteAdapter;

pub const SITE: &str = "npmjs.com";

pub struct Npmjs;

#[async_trait]
impl SiteAdapter for Npmjs {
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
        ui.fill(&Selector::label("Username"), username).await?;
        ui.fill(&Selector::label("Password"), password).await?;
        ui.click(&Selector::role("button", "Sign In")).await
    }

    async fn probe_challenge(&self, ui: &mut dyn UiDriver) -> Result<Challenge> {
        if ui
            .is_visible(&Selector::role("heading", "Enter One-time Password"))
            .await?
        {
            return Ok(Challenge::Otp);
        }
        Ok(Challenge::None)
    }

    async fn submit_otp(&self, ui: &mut dyn UiDriver, code: &str) -> Result<()> {
        ui.fill(&Selector::label("One-Time Password"), code).await?;
        ui.click(&Selector::role("button", "Login")).await
    }

    fn home_marker(&self) -> Selector {
        Selector::label("Profile menu")
    }

    async fn sign_out(&self, ui: &mut dyn UiDriver) -> Result<()> {
        ui.click(&Selector::label("Profile menu")).await?;
        ui.click(&Selector::role("link", "Sign Out")).await
    }
}

/// Create a granular access token for CI publishing.  The token value is
/// only shown once, on the confirmation page.
pub struct CreateToken {
    pub name: String,
}

#[async_trait]
impl ProvisioningAction for CreateToken {
    fn describe(&self) -> String {
        format!("create npm token '{}'", self.name)
    }

    async fn run(&self, session: &mut ProvisioningSession<'_>) -> Result<ActionOutcome> {
        let ui = session.ui();
        ui.click(&Selector::label("Profile menu")).await?;
        ui.click(&Selector::role("link", "Access Tokens")).await?;

        let existing = Selector::text(&self.name);
        let replaced = ui.is_visible(&existing).await?;
        if replaced {
            info!(token = %self.name, "token already exists");
            if !session.confirm().ask(&format!(
                "Token '{}' already exists. Create a replacement? (yes/no):",
                self.name
            )) {
                return Ok(ActionOutcome::Declined);
            }
        }

        let ui = session.ui();
        ui.click(&Selector::role("button", "Generate New Token")).await?;
        ui.click(&Selector::role("link", "Granular Access Token")).await?;
        ui.fill(&Selector::label("Token name"), &self.name).await?;
        ui.click(&Selector::role("button", "Generate Token")).await?;

        // Shown once, in a copyable code block on the confirmation page.
        let token = ui.text_of(&Selector::css("code")).await?;
        session.persist_secret("api-token", token.trim()).await?;

        let items = vec!["api-token".to_string()];
        Ok(if replaced {
            ActionOutcome::Rotated { items }
        } else {
            ActionOutcome::Created { items }
        })
    }
}
