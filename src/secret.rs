use std::fmt;

use zeroize::Zeroizing;

/// Small secret wrapper with redacted debug output and automatic zeroization.
#[derive(Default)]
pub struct SecretString(Zeroizing<String>);

impl SecretString {
    pub fn new(value: String) -> Self {
        Self(Zeroizing::new(value))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    /// Empty or whitespace-only values count as absent, not as valid secrets.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value.to_string())
    }
}

impl Clone for SecretString {
    fn clone(&self) -> Self {
        Self::new(self.0.to_string())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Address of one named secret in the external store:
/// `{realm}/{project}/{site}/{item}`, e.g. `bots/acme.widgets/github.com/username`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPath {
    pub realm: String,
    pub project: String,
    pub site: String,
    pub item: String,
}

impl CredentialPath {
    pub fn new(
        realm: impl Into<String>,
        project: impl Into<String>,
        site: impl Into<String>,
        item: impl Into<String>,
    ) -> Self {
        Self {
            realm: realm.into(),
            project: project.into(),
            site: site.into(),
            item: item.into(),
        }
    }
}

impl fmt::Display for CredentialPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.realm, self.project, self.site, self.item
        )
    }
}

/// Last dot-separated segment of a project name: `technology.cbi` → `cbi`.
pub fn project_short_name(project: &str) -> &str {
    project.rsplit('.').next().unwrap_or(project)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_is_redacted() {
        let s = SecretString::new("hunter2".to_string());
        assert_eq!(format!("{:?}", s), "[REDACTED]");
        assert_eq!(s.expose(), "hunter2");
    }

    #[test]
    fn blank_detection() {
        assert!(SecretString::new(String::new()).is_blank());
        assert!(SecretString::new("  \n".to_string()).is_blank());
        assert!(!SecretString::new("x".to_string()).is_blank());
    }

    #[test]
    fn path_formatting() {
        let path = CredentialPath::new("bots", "acme.widgets", "github.com", "username");
        assert_eq!(path.to_string(), "bots/acme.widgets/github.com/username");
    }

    #[test]
    fn short_names() {
        assert_eq!(project_short_name("technology.cbi"), "cbi");
        assert_eq!(project_short_name("acme.widgets"), "widgets");
        assert_eq!(project_short_name("plain"), "plain");
    }
}
