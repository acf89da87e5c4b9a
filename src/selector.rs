//! Page-element selectors.
//!
//! Site adapters describe elements the way the target consoles label them
//! (ARIA role + accessible name, form label, placeholder, `data-test` hook)
//! instead of raw CSS, since that is what survives third-party UI churn
//! longest.  Each selector compiles to a JavaScript expression that collects
//! matching elements; the browser driver wraps that expression into probe,
//! action and extraction scripts.

use std::fmt;

/// JS helpers shared by every compiled selector expression.
pub(crate) const JS_PRELUDE: &str = r#"
const __norm = s => (s || '').replace(/\s+/g, ' ').trim();
const __accname = el => {
  const aria = el.getAttribute && el.getAttribute('aria-label');
  if (aria) return __norm(aria);
  if (el.labels && el.labels.length)
    return __norm(Array.from(el.labels).map(l => l.textContent).join(' '));
  if (el.tagName === 'INPUT' || el.tagName === 'TEXTAREA')
    return __norm(el.getAttribute('placeholder') || el.value || '');
  return __norm(el.textContent);
};
const __labelname = el => {
  const aria = el.getAttribute && el.getAttribute('aria-label');
  if (aria) return __norm(aria);
  if (el.labels && el.labels.length)
    return __norm(Array.from(el.labels).map(l => l.textContent).join(' '));
  const wrap = el.closest && el.closest('label');
  if (wrap) return __norm(wrap.textContent);
  return '';
};
const __visible = el => !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length);
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Raw CSS selector.
    Css(String),
    /// `[data-test="…"]` hook, the convention the Central portal uses.
    TestId(String),
    /// ARIA role plus accessible-name match.
    Role {
        role: String,
        name: String,
        exact: bool,
    },
    /// Form control (or labelled link/button) by its label text.
    Label(String),
    /// Input by placeholder text.
    Placeholder(String),
    /// Innermost element whose text contains the string.
    Text(String),
    /// Match `inner` only below elements matched by the scope selector.
    Within(Box<Selector>, Box<Selector>),
    /// The n-th (0-based) match of the inner selector.
    Nth(Box<Selector>, usize),
}

impl Selector {
    pub fn css(css: impl Into<String>) -> Self {
        Self::Css(css.into())
    }

    pub fn test_id(id: impl Into<String>) -> Self {
        Self::TestId(id.into())
    }

    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            name: name.into(),
            exact: false,
        }
    }

    pub fn role_exact(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            name: name.into(),
            exact: true,
        }
    }

    pub fn label(text: impl Into<String>) -> Self {
        Self::Label(text.into())
    }

    pub fn placeholder(text: impl Into<String>) -> Self {
        Self::Placeholder(text.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn within(self, inner: Selector) -> Self {
        Self::Within(Box::new(self), Box::new(inner))
    }

    pub fn nth(self, index: usize) -> Self {
        Self::Nth(Box::new(self), index)
    }

    /// JS expression yielding an array of matching elements under `root`.
    pub(crate) fn collect_expr(&self, root: &str, depth: usize) -> String {
        match self {
            Self::Css(css) => {
                format!("Array.from({root}.querySelectorAll({}))", js_str(css))
            }
            Self::TestId(id) => {
                let css = format!("[data-test=\"{}\"]", id);
                format!("Array.from({root}.querySelectorAll({}))", js_str(&css))
            }
            Self::Role { role, name, exact } => {
                let base = format!(
                    "Array.from({root}.querySelectorAll({}))",
                    js_str(&role_query(role))
                );
                if name.is_empty() {
                    base
                } else if *exact {
                    format!("{base}.filter(el => __accname(el) === {})", js_str(name))
                } else {
                    format!(
                        "{base}.filter(el => __accname(el).toLowerCase().includes({}))",
                        js_str(&name.to_lowercase())
                    )
                }
            }
            Self::Label(text) => format!(
                "Array.from({root}.querySelectorAll('input, textarea, select, button, a, summary, [aria-label]'))\
                 .filter(el => __labelname(el).toLowerCase().includes({}))",
                js_str(&text.to_lowercase())
            ),
            Self::Placeholder(text) => format!(
                "Array.from({root}.querySelectorAll('input, textarea'))\
                 .filter(el => __norm(el.getAttribute('placeholder')).toLowerCase().includes({}))",
                js_str(&text.to_lowercase())
            ),
            Self::Text(text) => format!(
                "(() => {{ const all = Array.from({root}.querySelectorAll('*'))\
                 .filter(el => __norm(el.textContent).includes({t})); \
                 return all.filter(el => !all.some(o => o !== el && el.contains(o))); }})()",
                t = js_str(text)
            ),
            Self::Within(scope, inner) => {
                let var = format!("__r{depth}");
                format!(
                    "{}.flatMap({var} => {})",
                    scope.collect_expr(root, depth + 1),
                    inner.collect_expr(&var, depth + 1)
                )
            }
            Self::Nth(inner, index) => format!(
                "{}.slice({index}, {index} + 1)",
                inner.collect_expr(root, depth)
            ),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(css) => write!(f, "css={}", css),
            Self::TestId(id) => write!(f, "data-test={}", id),
            Self::Role { role, name, exact } => {
                if *exact {
                    write!(f, "role={}[name=\"{}\"][exact]", role, name)
                } else {
                    write!(f, "role={}[name=\"{}\"]", role, name)
                }
            }
            Self::Label(text) => write!(f, "label=\"{}\"", text),
            Self::Placeholder(text) => write!(f, "placeholder=\"{}\"", text),
            Self::Text(text) => write!(f, "text=\"{}\"", text),
            Self::Within(scope, inner) => write!(f, "{} >> {}", scope, inner),
            Self::Nth(inner, index) => write!(f, "{}[{}]", inner, index),
        }
    }
}

/// CSS query collecting candidates for an ARIA role, including the implicit
/// HTML mappings the target consoles rely on.
fn role_query(role: &str) -> String {
    match role {
        "button" => {
            "button, [role=\"button\"], input[type=\"submit\"], input[type=\"button\"], summary"
                .to_string()
        }
        "link" => "a[href], [role=\"link\"]".to_string(),
        "heading" => "h1, h2, h3, h4, h5, h6, [role=\"heading\"]".to_string(),
        "textbox" => "input:not([type]), input[type=\"text\"], input[type=\"email\"], \
                      input[type=\"password\"], input[type=\"search\"], input[type=\"tel\"], \
                      textarea, [role=\"textbox\"]"
            .to_string(),
        "checkbox" => "input[type=\"checkbox\"], [role=\"checkbox\"]".to_string(),
        "radio" => "input[type=\"radio\"], [role=\"radio\"]".to_string(),
        "dialog" => "dialog, [role=\"dialog\"]".to_string(),
        other => format!("[role=\"{}\"]", other),
    }
}

/// JSON-escape a string for embedding into generated JS.
fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}
