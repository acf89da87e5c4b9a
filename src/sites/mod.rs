//! Per-site adapters.
//!
//! The four consoles this tool provisions differ only in selectors and minor
//! flow order, so one orchestration engine ([`crate::session`]) drives a
//! small per-site capability set.  Adapters hold no state; everything
//! page-related goes through the borrowed [`UiDriver`].

use async_trait::async_trait;

use crate::browser::UiDriver;
use crate::error::{Error, Result};
use crate::selector::Selector;
use crate::session::{AccountProfile, Challenge};

pub mod central;
pub mod github;
pub mod npmjs;
pub mod pypi;

/// Site-specific login/challenge/sign-out choreography.
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// Site name as used in store paths (e.g. `github.com`).
    fn site(&self) -> &'static str;

    fn login_url(&self) -> String;

    /// Fill and submit the login form.  The page is already on
    /// [`Self::login_url`] when this is called.
    async fn submit_login(
        &self,
        ui: &mut dyn UiDriver,
        username: &str,
        password: &str,
    ) -> Result<()>;

    /// Inspect the page for a second-factor challenge.  Called repeatedly;
    /// must not mutate page state.
    async fn probe_challenge(&self, _ui: &mut dyn UiDriver) -> Result<Challenge> {
        Ok(Challenge::None)
    }

    async fn submit_otp(&self, _ui: &mut dyn UiDriver, _code: &str) -> Result<()> {
        Err(Error::Unsupported("one-time-code challenge".to_string()))
    }

    /// The delayed second prompt defaults to the regular code submission.
    async fn submit_delayed_otp(&self, ui: &mut dyn UiDriver, code: &str) -> Result<()> {
        self.submit_otp(ui, code).await
    }

    /// Dismiss non-challenge interstitials (confirmation banners etc.).
    async fn dismiss_interstitials(&self, _ui: &mut dyn UiDriver) -> Result<()> {
        Ok(())
    }

    /// Element that proves login succeeded.
    fn home_marker(&self) -> Selector;

    async fn sign_out(&self, ui: &mut dyn UiDriver) -> Result<()>;

    /// Whether an account with this username already exists (pre-signup
    /// probe).  Sites without signup support report `true`.
    async fn account_exists(&self, _username: &str) -> Result<bool> {
        Ok(true)
    }

    /// Create a brand-new account.  Ends logged in.
    async fn register(&self, _ui: &mut dyn UiDriver, _profile: &AccountProfile) -> Result<()> {
        Err(Error::Unsupported("account signup".to_string()))
    }
}
