//! Maven Central publishing portal.
//!
//! Credentials are filed under the documentation-site name the accounts were
//! originally registered against; the console itself lives on the `.com`
//! domain.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::browser::{DEFAULT_STEP_TIMEOUT, UiDriver};
use crate::error::{Error, Result};
use crate::selector::Selector;
use crate::session::{ActionOutcome, ProvisioningAction, ProvisioningSession};
use crate::sites::SiteAdapter;

pub const SITE: &str = "central.sonatype.org";
const AUTH_SITE: &str = "central.sonatype.com";

pub struct CentralPortal;

impl CentralPortal {
    async fn open_nav_menu(ui: &mut dyn UiDriver) -> Result<()> {
        ui.click(&Selector::role("button", "Avatar")).await
    }

    async fn nav_to_token_settings(ui: &mut dyn UiDriver) -> Result<()> {
        Self::open_nav_menu(ui).await?;
        ui.click(&Selector::role("link", "View User Tokens")).await
    }
}

#[async_trait]
impl SiteAdapter for CentralPortal {
    fn site(&self) -> &'static str {
        SITE
    }

    fn login_url(&self) -> String {
        format!("https://{}/api/auth/login", AUTH_SITE)
    }

    async fn submit_login(
        &self,
        ui: &mut dyn UiDriver,
        username: &str,
        password: &str,
    ) -> Result<()> {
        ui.fill(
            &Selector::role("textbox", "Username or email address"),
            username,
        )
        .await?;
        ui.fill(&Selector::role("textbox", "Password"), password)
            .await?;
        ui.click(&Selector::role_exact("button", "Continue")).await
    }

    fn home_marker(&self) -> Selector {
        Selector::role_exact("link", "Home")
    }

    async fn sign_out(&self, ui: &mut dyn UiDriver) -> Result<()> {
        Self::open_nav_menu(ui).await?;
        ui.click(
            &Selector::test_id("header-dropdown")
                .within(Selector::role_exact("link", "Sign out")),
        )
        .await
    }
}

/// Read the portal-generated user token pair out of the token modal and
/// store it.  The portal shows the same pair on every visit, so re-running
/// is naturally idempotent.
pub struct CreateToken;

#[async_trait]
impl ProvisioningAction for CreateToken {
    fn describe(&self) -> String {
        "store the portal user token".to_string()
    }

    async fn run(&self, session: &mut ProvisioningSession<'_>) -> Result<ActionOutcome> {
        let ui = session.ui();
        CentralPortal::nav_to_token_settings(ui).await?;

        ui.click(&Selector::test_id("name-code")).await?;
        let token_username = ui.input_value(&Selector::test_id("name-code")).await?;
        let token_password = ui.input_value(&Selector::test_id("pass-code")).await?;

        // Validate both halves before the first store write so a selector
        // mismatch can't leave a half-written credential pair behind.
        if token_username.trim().is_empty() {
            return Err(Error::EmptySecret {
                item: "token-username".to_string(),
            });
        }
        if token_password.trim().is_empty() {
            return Err(Error::EmptySecret {
                item: "token-password".to_string(),
            });
        }
        info!(token_name = %token_username.trim(), "registering portal token");

        session
            .persist_secret("token-username", token_username.trim())
            .await?;
        session
            .persist_secret("token-password", token_password.trim())
            .await?;

        session
            .ui()
            .click(&Selector::test_id("close-view-token-modal"))
            .await?;

        Ok(ActionOutcome::Created {
            items: vec!["token-username".to_string(), "token-password".to_string()],
        })
    }
}

/// Activate SNAPSHOT publishing on every namespace that doesn't carry the
/// badge yet.
pub struct EnableSnapshots;

impl EnableSnapshots {
    async fn enable_row(ui: &mut dyn UiDriver, row: &Selector) -> Result<()> {
        ui.click(&row.clone().within(Selector::role("button", "More Actions...")))
            .await?;
        ui.click(&Selector::test_id("enable-snapshot-btn")).await?;
        ui.click(&Selector::test_id("confirm-btn")).await?;
        ui.press("Escape").await?;
        ui.settle(Duration::from_secs(1)).await;
        Ok(())
    }
}

#[async_trait]
impl ProvisioningAction for EnableSnapshots {
    fn describe(&self) -> String {
        "enable namespace snapshots".to_string()
    }

    async fn run(&self, session: &mut ProvisioningSession<'_>) -> Result<ActionOutcome> {
        let project = session.project().to_string();
        let ui = session.ui();

        let publish = Selector::role("link", "Publish");
        ui.wait_visible(&publish, DEFAULT_STEP_TIMEOUT).await?;
        if ui.click(&publish).await.is_err() {
            warn!(project = %project, "no publisher configured");
            return Ok(ActionOutcome::AlreadyProvisioned);
        }

        ui.click(&Selector::test_id("namespace-tab")).await?;
        ui.settle(Duration::from_secs(2)).await;

        let rows = Selector::test_id("namespace-item");
        let count = ui.count(&rows).await?;
        if count == 0 {
            info!(project = %project, "no namespace found");
            return Ok(ActionOutcome::SnapshotsEnabled {
                enabled: 0,
                skipped: 0,
            });
        }
        info!(project = %project, namespaces = count, "checking namespaces");

        let mut enabled = 0;
        let mut skipped = 0;
        for index in 0..count {
            let row = rows.clone().nth(index);
            let row_text = ui.text_of(&row).await?;
            let namespace = row_text.lines().next().unwrap_or("").trim().to_string();

            if row_text.contains("SNAPSHOTs enabled") {
                info!(namespace = %namespace, "snapshots already active, skipping");
                skipped += 1;
                continue;
            }

            info!(namespace = %namespace, "activating snapshots");
            match Self::enable_row(ui, &row).await {
                Ok(()) => enabled += 1,
                // One broken row should not abort the sweep over the rest.
                Err(e) => warn!(namespace = %namespace, "snapshot activation failed: {}", e),
            }
        }

        Ok(ActionOutcome::SnapshotsEnabled { enabled, skipped })
    }
}
