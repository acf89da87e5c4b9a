//! Orchestration tests against a scripted page, store and OTP generator.
//!
//! The real consoles are an unstable external contract, so these tests pin
//! down the engine's behavior instead: credential resolution order, page
//! load failures, idempotency skips, empty-secret aborts and teardown.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use provisio::browser::{NavStatus, UiDriver};
use provisio::error::{Error, Result};
use provisio::otp::OtpGenerator;
use provisio::prompt::Confirm;
use provisio::secret::{CredentialPath, SecretString};
use provisio::selector::Selector;
use provisio::session::{ActionOutcome, ProvisioningSession, SessionState};
use provisio::sites::central::{self, CentralPortal};
use provisio::sites::github::{self, GitHub, TokenProfile};
use provisio::store::SecretStore;

// ── Fakes ───────────────────────────────────────────────────────────────────

/// Scripted page: visibility is a set of selector strings, actions append to
/// a log, and click/fill side effects can flip visibility.
struct FakeDriver {
    nav_status: u16,
    visible: HashSet<String>,
    input_values: HashMap<String, String>,
    texts: HashMap<String, Vec<String>>,
    clipboard: String,
    hide_on_click: HashMap<String, Vec<String>>,
    hide_on_fill: HashMap<String, Vec<String>>,
    log: Vec<String>,
    closes: usize,
}

impl FakeDriver {
    fn new() -> Self {
        Self {
            nav_status: 200,
            visible: HashSet::new(),
            input_values: HashMap::new(),
            texts: HashMap::new(),
            clipboard: String::new(),
            hide_on_click: HashMap::new(),
            hide_on_fill: HashMap::new(),
            log: Vec::new(),
            closes: 0,
        }
    }

    fn show(&mut self, sel: &Selector) {
        self.visible.insert(sel.to_string());
    }

    fn navigations(&self) -> usize {
        self.log.iter().filter(|l| l.starts_with("navigate:")).count()
    }

    fn clicks_of(&self, sel: &Selector) -> usize {
        let needle = format!("click:{}", sel);
        self.log.iter().filter(|l| **l == needle).count()
    }

    fn fills(&self) -> Vec<&String> {
        self.log.iter().filter(|l| l.starts_with("fill:")).collect()
    }
}

#[async_trait]
impl UiDriver for FakeDriver {
    async fn navigate(&mut self, url: &str) -> Result<NavStatus> {
        self.log.push(format!("navigate:{}", url));
        Ok(NavStatus {
            url: url.to_string(),
            status: self.nav_status,
        })
    }

    async fn is_visible(&mut self, sel: &Selector) -> Result<bool> {
        Ok(self.visible.contains(&sel.to_string()))
    }

    async fn click(&mut self, sel: &Selector) -> Result<()> {
        let key = sel.to_string();
        self.log.push(format!("click:{}", key));
        if let Some(hidden) = self.hide_on_click.get(&key).cloned() {
            for h in hidden {
                self.visible.remove(&h);
            }
        }
        Ok(())
    }

    async fn fill(&mut self, sel: &Selector, text: &str) -> Result<()> {
        let key = sel.to_string();
        self.log.push(format!("fill:{}={}", key, text));
        if let Some(hidden) = self.hide_on_fill.get(&key).cloned() {
            for h in hidden {
                self.visible.remove(&h);
            }
        }
        Ok(())
    }

    async fn set_checked(&mut self, sel: &Selector, checked: bool) -> Result<()> {
        self.log.push(format!("check:{}={}", sel, checked));
        Ok(())
    }

    async fn select_option(&mut self, sel: &Selector, label: &str) -> Result<()> {
        self.log.push(format!("select:{}={}", sel, label));
        Ok(())
    }

    async fn press(&mut self, key: &str) -> Result<()> {
        self.log.push(format!("press:{}", key));
        Ok(())
    }

    async fn text_of(&mut self, sel: &Selector) -> Result<String> {
        self.texts
            .get(&sel.to_string())
            .map(|v| v.join("\n"))
            .ok_or_else(|| Error::ui_state(sel.to_string(), Duration::ZERO))
    }

    async fn texts_of(&mut self, sel: &Selector) -> Result<Vec<String>> {
        Ok(self.texts.get(&sel.to_string()).cloned().unwrap_or_default())
    }

    async fn input_value(&mut self, sel: &Selector) -> Result<String> {
        self.input_values
            .get(&sel.to_string())
            .cloned()
            .ok_or_else(|| Error::ui_state(sel.to_string(), Duration::ZERO))
    }

    async fn count(&mut self, sel: &Selector) -> Result<usize> {
        Ok(usize::from(self.visible.contains(&sel.to_string())))
    }

    async fn read_clipboard(&mut self) -> Result<String> {
        Ok(self.clipboard.clone())
    }

    async fn allow_downloads(&mut self, dir: &Path) -> Result<()> {
        self.log.push(format!("downloads:{}", dir.display()));
        Ok(())
    }

    async fn settle(&mut self, _wait: Duration) {}

    async fn close(&mut self) -> Result<()> {
        self.closes += 1;
        Ok(())
    }
}

/// In-memory store recording every write.
struct MemStore {
    data: Mutex<HashMap<String, String>>,
    writes: Mutex<Vec<(String, String)>>,
}

impl MemStore {
    fn new(entries: &[(&str, &str)]) -> Self {
        let data = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            data: Mutex::new(data),
            writes: Mutex::new(Vec::new()),
        }
    }

    fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    fn written(&self, path: &str) -> Option<String> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(p, _)| p == path)
            .map(|(_, v)| v.clone())
    }
}

#[async_trait]
impl SecretStore for MemStore {
    async fn read(&self, path: &CredentialPath) -> Result<SecretString> {
        let data = self.data.lock().unwrap();
        Ok(SecretString::new(
            data.get(&path.to_string()).cloned().unwrap_or_default(),
        ))
    }

    async fn write(&self, path: &CredentialPath, value: &str) -> Result<()> {
        self.data
            .lock()
            .unwrap()
            .insert(path.to_string(), value.to_string());
        self.writes
            .lock()
            .unwrap()
            .push((path.to_string(), value.to_string()));
        Ok(())
    }
}

struct FixedOtp(&'static str);

impl OtpGenerator for FixedOtp {
    fn code(&self, _seed: &str) -> Result<String> {
        Ok(self.0.to_string())
    }
}

struct CannedConfirm {
    answer: bool,
    asked: Mutex<Vec<String>>,
}

impl CannedConfirm {
    fn new(answer: bool) -> Self {
        Self {
            answer,
            asked: Mutex::new(Vec::new()),
        }
    }

    fn times_asked(&self) -> usize {
        self.asked.lock().unwrap().len()
    }
}

impl Confirm for CannedConfirm {
    fn ask(&self, message: &str) -> bool {
        self.asked.lock().unwrap().push(message.to_string());
        self.answer
    }
}

// ── Scenario helpers ────────────────────────────────────────────────────────

const PROJECT: &str = "acme.widgets";

fn github_creds() -> Vec<(&'static str, &'static str)> {
    vec![
        ("bots/acme.widgets/github.com/username", "acme-widgets-bot"),
        ("bots/acme.widgets/github.com/password", "hunter2"),
    ]
}

fn show_github_home(ui: &mut FakeDriver) {
    ui.show(&GitHub.home_marker_sel());
}

/// The adapters expose their markers only through the trait; small shims
/// keep the tests readable.
trait MarkerExt {
    fn home_marker_sel(&self) -> Selector;
}

impl MarkerExt for GitHub {
    fn home_marker_sel(&self) -> Selector {
        use provisio::sites::SiteAdapter;
        self.home_marker()
    }
}

impl MarkerExt for CentralPortal {
    fn home_marker_sel(&self) -> Selector {
        use provisio::sites::SiteAdapter;
        self.home_marker()
    }
}

// ── Credential resolution gates navigation ──────────────────────────────────

#[tokio::test]
async fn empty_password_fails_before_any_navigation() {
    let store = MemStore::new(&[("bots/acme.widgets/github.com/username", "acme-widgets-bot")]);
    let otp = FixedOtp("000000");
    let confirm = CannedConfirm::new(true);
    let mut ui = FakeDriver::new();

    let session = ProvisioningSession::new(
        &GitHub, &mut ui, &store, &otp, &confirm, PROJECT, "bots",
    );
    let action = github::CreateToken {
        profile: TokenProfile::renovate(),
    };
    let err = session.run(&action).await.unwrap_err();

    match err {
        Error::MissingCredential { path } => {
            assert_eq!(path, "bots/acme.widgets/github.com/password");
        }
        other => panic!("expected MissingCredential, got {:?}", other),
    }
    assert_eq!(ui.navigations(), 0, "must fail before navigating");
    assert_eq!(ui.fills().len(), 0);
    assert_eq!(ui.closes, 1, "browser must still be torn down");
    assert_eq!(store.write_count(), 0);
}

// ── Page load failures ──────────────────────────────────────────────────────

#[tokio::test]
async fn failed_login_navigation_never_fills_credentials() {
    let store = MemStore::new(&github_creds());
    let otp = FixedOtp("000000");
    let confirm = CannedConfirm::new(true);
    let mut ui = FakeDriver::new();
    ui.nav_status = 503;

    let session = ProvisioningSession::new(
        &GitHub, &mut ui, &store, &otp, &confirm, PROJECT, "bots",
    );
    let action = github::CreateToken {
        profile: TokenProfile::renovate(),
    };
    let err = session.run(&action).await.unwrap_err();

    match err {
        Error::PageLoad { url, status } => {
            assert_eq!(url, "https://github.com/login");
            assert_eq!(status, 503);
        }
        other => panic!("expected PageLoad, got {:?}", other),
    }
    assert_eq!(ui.navigations(), 1);
    assert_eq!(ui.fills().len(), 0, "credentials must not touch a dead page");
    assert_eq!(ui.closes, 1);
}

// ── Idempotency ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn existing_token_with_declined_regeneration_is_a_skip() {
    let store = MemStore::new(&github_creds());
    let otp = FixedOtp("000000");
    let confirm = CannedConfirm::new(false);
    let mut ui = FakeDriver::new();
    show_github_home(&mut ui);
    ui.show(&Selector::role("link", "otterdog"));

    let session = ProvisioningSession::new(
        &GitHub, &mut ui, &store, &otp, &confirm, PROJECT, "bots",
    );
    let action = github::CreateToken {
        profile: TokenProfile::otterdog(),
    };
    let outcome = session.run(&action).await.unwrap();

    assert_eq!(outcome, ActionOutcome::Declined);
    assert!(outcome.is_skip());
    assert_eq!(confirm.times_asked(), 1);
    assert_eq!(store.write_count(), 0, "skip must not write to the store");
    assert_eq!(
        ui.clicks_of(&Selector::role("link", "Regenerate token")),
        0,
        "declining must prevent the destructive step"
    );
}

#[tokio::test]
async fn confirmed_regeneration_rotates_and_stores_the_token() {
    let store = MemStore::new(&github_creds());
    let otp = FixedOtp("000000");
    let confirm = CannedConfirm::new(true);
    let mut ui = FakeDriver::new();
    show_github_home(&mut ui);
    ui.show(&Selector::role("link", "otterdog"));
    ui.clipboard = "ghp_rotated_token_value".to_string();

    let session = ProvisioningSession::new(
        &GitHub, &mut ui, &store, &otp, &confirm, PROJECT, "bots",
    );
    let action = github::CreateToken {
        profile: TokenProfile::otterdog(),
    };
    let outcome = session.run(&action).await.unwrap();

    assert_eq!(
        outcome,
        ActionOutcome::Rotated {
            items: vec!["otterdog-token".to_string()]
        }
    );
    assert_eq!(
        ui.clicks_of(&Selector::role("link", "Regenerate token")),
        1
    );
    assert_eq!(
        store.written("bots/acme.widgets/github.com/otterdog-token"),
        Some("ghp_rotated_token_value".to_string())
    );
}

#[tokio::test]
async fn fresh_token_creation_checks_the_profile_scopes() {
    let store = MemStore::new(&github_creds());
    let otp = FixedOtp("000000");
    let confirm = CannedConfirm::new(true);
    let mut ui = FakeDriver::new();
    show_github_home(&mut ui);
    ui.clipboard = "ghp_fresh_token_value".to_string();

    let session = ProvisioningSession::new(
        &GitHub, &mut ui, &store, &otp, &confirm, PROJECT, "bots",
    );
    let action = github::CreateToken {
        profile: TokenProfile::renovate(),
    };
    let outcome = session.run(&action).await.unwrap();

    assert_eq!(
        outcome,
        ActionOutcome::Created {
            items: vec!["renovate-token".to_string()]
        }
    );
    assert_eq!(confirm.times_asked(), 0, "fresh creation needs no approval");
    let scope_checks = ui
        .log
        .iter()
        .filter(|l| l.starts_with("check:") && l.ends_with("=true"))
        .count();
    assert_eq!(scope_checks, 2, "renovate profile ticks repo + workflow");
    assert_eq!(
        store.written("bots/acme.widgets/github.com/renovate-token"),
        Some("ghp_fresh_token_value".to_string())
    );
}

#[tokio::test]
async fn existing_pypi_token_is_skipped_without_prompting() {
    use provisio::sites::pypi::{self, Pypi};

    let store = MemStore::new(&[
        ("bots/acme.widgets/pypi.org/username", "acme-widgets-bot"),
        ("bots/acme.widgets/pypi.org/password", "hunter2"),
    ]);
    let otp = FixedOtp("000000");
    let confirm = CannedConfirm::new(true);
    let mut ui = FakeDriver::new();
    ui.show(&Selector::label("View menu"));
    ui.show(&Selector::text("Account settings"));
    ui.show(&Selector::text("ci-publish"));

    let session = ProvisioningSession::new(
        &Pypi, &mut ui, &store, &otp, &confirm, PROJECT, "bots",
    );
    let action = pypi::CreateToken {
        name: "ci-publish".to_string(),
    };
    let outcome = session.run(&action).await.unwrap();

    assert_eq!(outcome, ActionOutcome::AlreadyProvisioned);
    assert_eq!(store.write_count(), 0);
    assert_eq!(confirm.times_asked(), 0);
}

// ── Empty extracted secrets ─────────────────────────────────────────────────

#[tokio::test]
async fn empty_extracted_secret_aborts_without_store_writes() {
    let store = MemStore::new(&[
        ("bots/acme.widgets/central.sonatype.org/username", "central-bot"),
        ("bots/acme.widgets/central.sonatype.org/password", "hunter2"),
    ]);
    let otp = FixedOtp("000000");
    let confirm = CannedConfirm::new(true);
    let mut ui = FakeDriver::new();
    ui.show(&CentralPortal.home_marker_sel());
    ui.input_values.insert(
        Selector::test_id("name-code").to_string(),
        "central-token-user".to_string(),
    );
    ui.input_values
        .insert(Selector::test_id("pass-code").to_string(), String::new());

    let session = ProvisioningSession::new(
        &CentralPortal, &mut ui, &store, &otp, &confirm, PROJECT, "bots",
    );
    let err = session.run(&central::CreateToken).await.unwrap_err();

    match err {
        Error::EmptySecret { item } => assert_eq!(item, "token-password"),
        other => panic!("expected EmptySecret, got {:?}", other),
    }
    assert_eq!(
        store.write_count(),
        0,
        "neither half of the pair may be stored when one is empty"
    );
    assert_eq!(ui.closes, 1);
}

// ── Teardown ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn teardown_runs_exactly_once_when_the_action_fails() {
    let store = MemStore::new(&[
        ("bots/acme.widgets/central.sonatype.org/username", "central-bot"),
        ("bots/acme.widgets/central.sonatype.org/password", "hunter2"),
    ]);
    let otp = FixedOtp("000000");
    let confirm = CannedConfirm::new(true);
    let mut ui = FakeDriver::new();
    ui.show(&CentralPortal.home_marker_sel());
    // No input values scripted: the token modal read fails mid-action.

    let session = ProvisioningSession::new(
        &CentralPortal, &mut ui, &store, &otp, &confirm, PROJECT, "bots",
    );
    let result = session.run(&central::CreateToken).await;

    assert!(result.is_err());
    assert_eq!(ui.closes, 1, "close must run exactly once");
    let sign_out_clicks = ui.clicks_of(
        &Selector::test_id("header-dropdown").within(Selector::role_exact("link", "Sign out")),
    );
    assert_eq!(sign_out_clicks, 1, "sign-out must run exactly once");
}

#[tokio::test]
async fn no_sign_out_before_authentication_succeeded() {
    let store = MemStore::new(&github_creds());
    let otp = FixedOtp("000000");
    let confirm = CannedConfirm::new(true);
    let mut ui = FakeDriver::new();
    ui.nav_status = 500;

    let session = ProvisioningSession::new(
        &GitHub, &mut ui, &store, &otp, &confirm, PROJECT, "bots",
    );
    let action = github::CreateToken {
        profile: TokenProfile::renovate(),
    };
    assert!(session.run(&action).await.is_err());

    assert_eq!(ui.closes, 1);
    assert_eq!(
        ui.clicks_of(&Selector::role("link", "Sign out")),
        0,
        "an unauthenticated session has nothing to sign out of"
    );
}

// ── Second-factor challenges ────────────────────────────────────────────────

#[tokio::test]
async fn otp_challenge_is_answered_with_the_generated_code() {
    let mut creds = github_creds();
    creds.push((
        "bots/acme.widgets/github.com/2FA-seed",
        "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ",
    ));
    let store = MemStore::new(&creds);
    let otp = FixedOtp("246810");
    let confirm = CannedConfirm::new(false);
    let mut ui = FakeDriver::new();
    show_github_home(&mut ui);
    ui.show(&Selector::role("link", "renovate"));

    // The challenge heading disappears once the code is typed (the form
    // auto-submits).
    let challenge = Selector::role("heading", "Two-factor authentication");
    ui.show(&challenge);
    ui.hide_on_fill.insert(
        Selector::placeholder("XXXXXX").to_string(),
        vec![challenge.to_string()],
    );

    let session = ProvisioningSession::new(
        &GitHub, &mut ui, &store, &otp, &confirm, PROJECT, "bots",
    );
    let action = github::CreateToken {
        profile: TokenProfile::renovate(),
    };
    let outcome = session.run(&action).await.unwrap();

    assert_eq!(outcome, ActionOutcome::Declined);
    let code_fill = format!("fill:{}=246810", Selector::placeholder("XXXXXX"));
    assert!(
        ui.log.contains(&code_fill),
        "the generated code must be typed into the challenge field"
    );
}

#[tokio::test]
async fn delayed_second_challenge_is_polled_and_resolved() {
    let mut creds = github_creds();
    creds.push((
        "bots/acme.widgets/github.com/2FA-seed",
        "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ",
    ));
    let store = MemStore::new(&creds);
    let otp = FixedOtp("135791");
    let confirm = CannedConfirm::new(false);
    let mut ui = FakeDriver::new();
    show_github_home(&mut ui);
    ui.show(&Selector::role("link", "renovate"));

    let verify_now = Selector::role("button", "Verify 2FA now");
    ui.show(&verify_now);
    ui.hide_on_click
        .insert(verify_now.to_string(), vec![verify_now.to_string()]);

    let session = ProvisioningSession::new(
        &GitHub, &mut ui, &store, &otp, &confirm, PROJECT, "bots",
    );
    let action = github::CreateToken {
        profile: TokenProfile::renovate(),
    };
    let outcome = session.run(&action).await.unwrap();

    assert_eq!(outcome, ActionOutcome::Declined);
    assert_eq!(ui.clicks_of(&verify_now), 1);
    let code_fill = format!("fill:{}=135791", Selector::placeholder("XXXXXX"));
    assert!(ui.log.contains(&code_fill));
    assert_eq!(ui.clicks_of(&Selector::role("button", "Verify")), 1);
}

#[tokio::test]
async fn missing_otp_seed_fails_the_challenge() {
    let store = MemStore::new(&github_creds());
    let otp = FixedOtp("246810");
    let confirm = CannedConfirm::new(false);
    let mut ui = FakeDriver::new();
    ui.show(&Selector::role("heading", "Two-factor authentication"));

    let session = ProvisioningSession::new(
        &GitHub, &mut ui, &store, &otp, &confirm, PROJECT, "bots",
    );
    let action = github::CreateToken {
        profile: TokenProfile::renovate(),
    };
    let err = session.run(&action).await.unwrap_err();

    match err {
        Error::MissingCredential { path } => {
            assert_eq!(path, "bots/acme.widgets/github.com/2FA-seed");
        }
        other => panic!("expected MissingCredential, got {:?}", other),
    }
    assert_eq!(ui.closes, 1);
}

// ── State machine sanity ────────────────────────────────────────────────────

#[tokio::test]
async fn session_starts_in_not_started() {
    let store = MemStore::new(&[]);
    let otp = FixedOtp("000000");
    let confirm = CannedConfirm::new(true);
    let mut ui = FakeDriver::new();

    let session = ProvisioningSession::new(
        &GitHub, &mut ui, &store, &otp, &confirm, PROJECT, "bots",
    );
    assert_eq!(session.state(), SessionState::NotStarted);
}
