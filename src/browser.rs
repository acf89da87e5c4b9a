//! Browser engine access.
//!
//! [`UiDriver`] is the narrow capability surface the orchestration and the
//! site adapters drive pages through; [`ChromiumDriver`] implements it over
//! chromiumoxide (CDP).  Tests substitute a scripted in-memory driver.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::{
    GrantPermissionsParams, PermissionType, SetDownloadBehaviorBehavior,
    SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::browser_protocol::network::{EventResponseReceived, ResourceType};
use chromiumoxide::element::Element;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::selector::{JS_PRELUDE, Selector};

/// Attribute briefly planted on a matched element so CDP can resolve it for
/// native (trusted) clicks and keystrokes.
const MARK_ATTR: &str = "data-provisio-target";

/// Default per-step timeout, matching the consoles' slowest common widgets.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Visibility poll interval.
pub const UI_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Outcome of a navigation, as reported for the document response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavStatus {
    pub url: String,
    pub status: u16,
}

impl NavStatus {
    pub fn ok(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

/// What the orchestration needs from a browser page.
#[async_trait]
pub trait UiDriver: Send + Sync {
    async fn navigate(&mut self, url: &str) -> Result<NavStatus>;

    async fn is_visible(&mut self, sel: &Selector) -> Result<bool>;

    /// Poll until the element is visible or the timeout elapses.
    async fn wait_visible(&mut self, sel: &Selector, timeout: Duration) -> Result<()> {
        let mut waited = Duration::ZERO;
        loop {
            if self.is_visible(sel).await? {
                return Ok(());
            }
            if waited >= timeout {
                return Err(Error::ui_state(sel.to_string(), timeout));
            }
            self.settle(UI_POLL_INTERVAL).await;
            waited += UI_POLL_INTERVAL;
        }
    }

    async fn click(&mut self, sel: &Selector) -> Result<()>;

    /// Clear the target control and type `text` into it.
    async fn fill(&mut self, sel: &Selector, text: &str) -> Result<()>;

    async fn set_checked(&mut self, sel: &Selector, checked: bool) -> Result<()>;

    /// Pick the `<select>` option whose visible text contains `label`.
    async fn select_option(&mut self, sel: &Selector, label: &str) -> Result<()>;

    async fn press(&mut self, key: &str) -> Result<()>;

    async fn text_of(&mut self, sel: &Selector) -> Result<String>;

    async fn texts_of(&mut self, sel: &Selector) -> Result<Vec<String>>;

    async fn input_value(&mut self, sel: &Selector) -> Result<String>;

    async fn count(&mut self, sel: &Selector) -> Result<usize>;

    /// Read the page clipboard (for secrets only exposed via a Copy button).
    async fn read_clipboard(&mut self) -> Result<String>;

    /// Route subsequent downloads into `dir`.
    async fn allow_downloads(&mut self, dir: &Path) -> Result<()>;

    /// Let the page reach eventual consistency.  Fakes fast-forward this.
    async fn settle(&mut self, wait: Duration);

    /// Tear down the page and the underlying browser process.
    async fn close(&mut self) -> Result<()>;
}

/// CDP-backed driver owning one browser process and one page.
pub struct ChromiumDriver {
    browser: Browser,
    page: Page,
    handler_task: tokio::task::JoinHandle<()>,
    step_timeout: Duration,
    clipboard_granted: bool,
    closed: bool,
}

impl ChromiumDriver {
    /// Launch a browser and open a blank page.
    pub async fn launch(headless: bool) -> Result<Self> {
        let mut builder = BrowserConfig::builder().viewport(None);
        if !headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(Error::Browser)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| Error::Browser(format!("failed to launch browser: {}", e)))?;

        // The handler stream must be drained for the browser to function.
        let handler_task = tokio::spawn(async move {
            while let Some(_event) = handler.next().await {}
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| Error::Browser(format!("failed to open page: {}", e)))?;

        Ok(Self {
            browser,
            page,
            handler_task,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            clipboard_granted: false,
            closed: false,
        })
    }

    pub fn set_step_timeout(&mut self, timeout: Duration) {
        self.step_timeout = timeout;
    }

    /// Wrap a selector's collected (visible) matches with a result script.
    fn script(sel: &Selector, tail: &str) -> String {
        format!(
            "(() => {{{prelude}\nconst __els = {expr}.filter(__visible);\n{tail}\n}})()",
            prelude = JS_PRELUDE,
            expr = sel.collect_expr("document", 0),
        )
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, script: String) -> Result<T> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| Error::Browser(format!("script evaluation failed: {}", e)))?
            .into_value()
            .map_err(|e| Error::Browser(format!("unexpected script result: {}", e)))
    }

    /// Mark the first visible match (after running `prepare` on it) and
    /// resolve it to a CDP element handle for native input.
    async fn locate(&mut self, sel: &Selector, prepare: &str) -> Result<Element> {
        self.wait_visible(sel, self.step_timeout).await?;

        let mark = format!(
            "if (!__els.length) return false;\nconst el = __els[0];\n{prepare}\n\
             el.setAttribute('{MARK_ATTR}', '');\nreturn true;"
        );
        let marked: bool = self.eval(Self::script(sel, &mark)).await?;
        if !marked {
            return Err(Error::ui_state(sel.to_string(), self.step_timeout));
        }

        let element = self
            .page
            .find_element(format!("[{}]", MARK_ATTR))
            .await
            .map_err(|e| Error::Browser(format!("unable to resolve {}: {}", sel, e)))?;

        let _ = self
            .page
            .evaluate(format!(
                "document.querySelectorAll('[{MARK_ATTR}]')\
                 .forEach(el => el.removeAttribute('{MARK_ATTR}'))"
            ))
            .await;

        Ok(element)
    }

    async fn ensure_clipboard_access(&mut self) -> Result<()> {
        if self.clipboard_granted {
            return Ok(());
        }
        let params = GrantPermissionsParams::builder()
            .permission(PermissionType::ClipboardReadWrite)
            .permission(PermissionType::ClipboardSanitizedWrite)
            .build()
            .map_err(Error::Browser)?;
        self.browser
            .execute(params)
            .await
            .map_err(|e| Error::Browser(format!("unable to grant clipboard access: {}", e)))?;
        self.clipboard_granted = true;
        Ok(())
    }
}

#[async_trait]
impl UiDriver for ChromiumDriver {
    async fn navigate(&mut self, url: &str) -> Result<NavStatus> {
        let parsed = url::Url::parse(url)
            .map_err(|e| Error::Browser(format!("invalid url {}: {}", url, e)))?;
        debug!(url = %parsed, "navigating");

        // Register before goto so the document response is not missed.
        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| Error::Browser(format!("event listener failed: {}", e)))?;

        self.page
            .goto(parsed.as_str())
            .await
            .map_err(|e| Error::Browser(format!("navigation to {} failed: {}", url, e)))?;

        // Same-document navigations produce no document response; assume ok.
        let mut status: u16 = 200;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(1500), responses.next()).await
        {
            if event.r#type == ResourceType::Document {
                status = event.response.status as u16;
                break;
            }
        }

        Ok(NavStatus {
            url: url.to_string(),
            status,
        })
    }

    async fn is_visible(&mut self, sel: &Selector) -> Result<bool> {
        self.eval(Self::script(sel, "return __els.length > 0;")).await
    }

    async fn click(&mut self, sel: &Selector) -> Result<()> {
        let element = self.locate(sel, "").await?;
        element
            .click()
            .await
            .map_err(|e| Error::Browser(format!("click on {} failed: {}", sel, e)))?;
        debug!(selector = %sel, "clicked");
        Ok(())
    }

    async fn fill(&mut self, sel: &Selector, text: &str) -> Result<()> {
        let element = self.locate(sel, "if ('value' in el) el.value = '';").await?;
        element
            .click()
            .await
            .map_err(|e| Error::Browser(format!("focus on {} failed: {}", sel, e)))?;
        element
            .type_str(text)
            .await
            .map_err(|e| Error::Browser(format!("typing into {} failed: {}", sel, e)))?;
        debug!(selector = %sel, chars = text.len(), "filled");
        Ok(())
    }

    async fn set_checked(&mut self, sel: &Selector, checked: bool) -> Result<()> {
        self.wait_visible(sel, self.step_timeout).await?;
        let tail = format!(
            "if (!__els.length) return false;\nconst el = __els[0];\n\
             if (!!el.checked !== {checked}) el.click();\nreturn true;"
        );
        let done: bool = self.eval(Self::script(sel, &tail)).await?;
        if !done {
            return Err(Error::ui_state(sel.to_string(), self.step_timeout));
        }
        Ok(())
    }

    async fn select_option(&mut self, sel: &Selector, label: &str) -> Result<()> {
        self.wait_visible(sel, self.step_timeout).await?;
        let tail = format!(
            "if (!__els.length) return false;\nconst el = __els[0];\n\
             const idx = Array.from(el.options ?? [])\
             .findIndex(o => __norm(o.textContent).includes({label}));\n\
             if (idx < 0) return false;\n\
             el.selectedIndex = idx;\n\
             el.dispatchEvent(new Event('change', {{ bubbles: true }}));\n\
             return true;",
            label = serde_json::to_string(label).unwrap_or_else(|_| "\"\"".to_string()),
        );
        let done: bool = self.eval(Self::script(sel, &tail)).await?;
        if !done {
            return Err(Error::ui_state(
                format!("{} option \"{}\"", sel, label),
                self.step_timeout,
            ));
        }
        Ok(())
    }

    async fn press(&mut self, key: &str) -> Result<()> {
        let key_down = DispatchKeyEventParams::builder()
            .key(key.to_string())
            .r#type(DispatchKeyEventType::KeyDown)
            .build()
            .map_err(Error::Browser)?;
        self.page
            .execute(key_down)
            .await
            .map_err(|e| Error::Browser(format!("key down failed: {}", e)))?;

        let key_up = DispatchKeyEventParams::builder()
            .key(key.to_string())
            .r#type(DispatchKeyEventType::KeyUp)
            .build()
            .map_err(Error::Browser)?;
        self.page
            .execute(key_up)
            .await
            .map_err(|e| Error::Browser(format!("key up failed: {}", e)))?;
        Ok(())
    }

    async fn text_of(&mut self, sel: &Selector) -> Result<String> {
        let text: Option<String> = self
            .eval(Self::script(sel, "return __els.length ? __els[0].innerText : null;"))
            .await?;
        text.ok_or_else(|| Error::ui_state(sel.to_string(), Duration::ZERO))
    }

    async fn texts_of(&mut self, sel: &Selector) -> Result<Vec<String>> {
        self.eval(Self::script(sel, "return __els.map(el => el.innerText);"))
            .await
    }

    async fn input_value(&mut self, sel: &Selector) -> Result<String> {
        let value: Option<String> = self
            .eval(Self::script(
                sel,
                "return __els.length ? String(__els[0].value ?? '') : null;",
            ))
            .await?;
        value.ok_or_else(|| Error::ui_state(sel.to_string(), Duration::ZERO))
    }

    async fn count(&mut self, sel: &Selector) -> Result<usize> {
        self.eval(Self::script(sel, "return __els.length;")).await
    }

    async fn read_clipboard(&mut self) -> Result<String> {
        self.ensure_clipboard_access().await?;
        self.eval("navigator.clipboard.readText()".to_string()).await
    }

    async fn allow_downloads(&mut self, dir: &Path) -> Result<()> {
        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(dir.display().to_string())
            .build()
            .map_err(Error::Browser)?;
        self.browser
            .execute(params)
            .await
            .map_err(|e| Error::Browser(format!("unable to set download dir: {}", e)))?;
        Ok(())
    }

    async fn settle(&mut self, wait: Duration) {
        tokio::time::sleep(wait).await;
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Err(e) = self.page.clone().close().await {
            warn!("page close failed: {}", e);
        }
        if let Err(e) = self.browser.close().await {
            warn!("browser close failed: {}", e);
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nav_status_ranges() {
        let ok = NavStatus {
            url: "https://github.com/login".to_string(),
            status: 200,
        };
        assert!(ok.ok());

        let redirect = NavStatus {
            url: "https://github.com/login".to_string(),
            status: 302,
        };
        assert!(redirect.ok());

        let missing = NavStatus {
            url: "https://github.com/login".to_string(),
            status: 404,
        };
        assert!(!missing.ok());
    }

    #[test]
    fn scripts_embed_prelude_and_tail() {
        let script = ChromiumDriver::script(
            &Selector::role("button", "Sign in"),
            "return __els.length;",
        );
        assert!(script.contains("const __accname"));
        assert!(script.contains("filter(__visible)"));
        assert!(script.trim_end().ends_with("})()"));
    }
}
