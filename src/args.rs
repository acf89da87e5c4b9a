use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(
    name = "provisio",
    version,
    about = "Provision service accounts on package-publishing consoles"
)]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub site: SiteCommand,
}

// Global flags shared across every subcommand.
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Path to the config file (default: ~/.provisio/config.json)
    #[arg(
        short = 'c',
        long,
        value_name = "PATH",
        env = "PROVISIO_CONFIG",
        global = true
    )]
    pub config: Option<PathBuf>,

    /// Password-store directory override
    #[arg(
        long = "store-dir",
        value_name = "DIR",
        env = "PASSWORD_STORE_DIR",
        global = true
    )]
    pub store_dir: Option<PathBuf>,

    /// Store realm prefix (default: bots)
    #[arg(long, value_name = "NAME", global = true)]
    pub realm: Option<String>,

    /// Run the browser without a visible window
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    pub headless: bool,

    /// Where downloaded files (recovery codes) should land
    #[arg(long = "downloads-dir", value_name = "DIR", global = true)]
    pub downloads_dir: Option<PathBuf>,
}

impl CommonArgs {
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(dir) = &self.store_dir {
            config.password_store.dir = Some(dir.clone());
        }
        if let Some(realm) = &self.realm {
            config.realm = realm.clone();
        }
        if self.headless {
            config.headless = true;
        }
        if let Some(dir) = &self.downloads_dir {
            config.downloads_dir = Some(dir.clone());
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum SiteCommand {
    /// Maven Central publishing portal
    Central {
        #[command(subcommand)]
        action: CentralAction,
    },
    /// GitHub
    Github {
        #[command(subcommand)]
        action: GithubAction,
    },
    /// npm registry
    Npm {
        #[command(subcommand)]
        action: NpmAction,
    },
    /// PyPI
    Pypi {
        #[command(subcommand)]
        action: PypiAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum CentralAction {
    /// Read the portal-generated user token and store it
    CreateToken {
        /// Project name (e.g. technology.cbi)
        project: String,
    },
    /// Activate SNAPSHOT publishing on all namespaces
    EnableSnapshots {
        /// Project name
        project: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum GithubAction {
    /// Create (or regenerate) a classic personal access token
    CreateToken {
        /// Project name
        project: String,
        /// Token profile: otterdog, renovate, jenkins, or a custom name
        #[arg(long)]
        name: String,
    },
    /// Register the project's SSH public key
    RegisterSshKey {
        /// Project name
        project: String,
    },
    /// Enroll TOTP two-factor authentication
    #[command(name = "enroll-2fa")]
    Enroll2fa {
        /// Project name
        project: String,
    },
    /// Sign up the service account if it does not exist yet
    Signup {
        /// Project name
        project: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum NpmAction {
    /// Create a granular access token
    CreateToken {
        /// Project name
        project: String,
        /// Token name in the registry UI
        #[arg(long, default_value = "ci-publish")]
        name: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum PypiAction {
    /// Create an account-scoped API token
    CreateToken {
        /// Project name
        project: String,
        /// Token name in the registry UI
        #[arg(long, default_value = "ci-publish")]
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_invocation() {
        let cli = Cli::try_parse_from([
            "provisio",
            "--headless",
            "github",
            "create-token",
            "acme.widgets",
            "--name",
            "renovate",
        ])
        .unwrap();

        assert!(cli.common.headless);
        match cli.site {
            SiteCommand::Github {
                action: GithubAction::CreateToken { project, name },
            } => {
                assert_eq!(project, "acme.widgets");
                assert_eq!(name, "renovate");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn project_name_is_required() {
        let result = Cli::try_parse_from(["provisio", "central", "create-token"]);
        assert!(result.is_err());
    }

    #[test]
    fn overrides_apply() {
        let cli = Cli::try_parse_from([
            "provisio",
            "--store-dir",
            "/srv/cbi-pass",
            "--realm",
            "robots",
            "central",
            "enable-snapshots",
            "tools.cbi",
        ])
        .unwrap();

        let mut config = Config::default();
        cli.common.apply_overrides(&mut config);
        assert_eq!(config.password_store.dir, Some(PathBuf::from("/srv/cbi-pass")));
        assert_eq!(config.realm, "robots");
    }
}
