use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use provisio::args::{Cli, CentralAction, GithubAction, NpmAction, PypiAction, SiteCommand};
use provisio::browser::ChromiumDriver;
use provisio::config::Config;
use provisio::otp::TotpGenerator;
use provisio::prompt::StdinConfirm;
use provisio::session::{ProvisioningAction, ProvisioningSession};
use provisio::sites::{SiteAdapter, central, github, npmjs, pypi};
use provisio::store::PassStore;

type Dispatch = (Box<dyn SiteAdapter>, Box<dyn ProvisioningAction>, String);

fn dispatch(site: SiteCommand) -> Dispatch {
    match site {
        SiteCommand::Central { action } => match action {
            CentralAction::CreateToken { project } => (
                Box::new(central::CentralPortal),
                Box::new(central::CreateToken),
                project,
            ),
            CentralAction::EnableSnapshots { project } => (
                Box::new(central::CentralPortal),
                Box::new(central::EnableSnapshots),
                project,
            ),
        },
        SiteCommand::Github { action } => match action {
            GithubAction::CreateToken { project, name } => {
                let profile = github::TokenProfile::for_name(&name, &project);
                (
                    Box::new(github::GitHub),
                    Box::new(github::CreateToken { profile }),
                    project,
                )
            }
            GithubAction::RegisterSshKey { project } => (
                Box::new(github::GitHub),
                Box::new(github::RegisterSshKey),
                project,
            ),
            GithubAction::Enroll2fa { project } => (
                Box::new(github::GitHub),
                Box::new(github::EnrollTwoFactor),
                project,
            ),
            GithubAction::Signup { project } => (
                Box::new(github::GitHub),
                Box::new(github::EnsureAccount),
                project,
            ),
        },
        SiteCommand::Npm { action } => match action {
            NpmAction::CreateToken { project, name } => (
                Box::new(npmjs::Npmjs),
                Box::new(npmjs::CreateToken { name }),
                project,
            ),
        },
        SiteCommand::Pypi { action } => match action {
            PypiAction::CreateToken { project, name } => (
                Box::new(pypi::Pypi),
                Box::new(pypi::CreateToken { name }),
                project,
            ),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    provisio::logging::init_from_env();

    let cli = Cli::parse();

    let mut config = Config::load(cli.common.config.clone())?;
    cli.common.apply_overrides(&mut config);

    let (adapter, action, project) = dispatch(cli.site);
    println!("Project name: {}", project.bold());

    let store = PassStore::new(config.password_store.dir.clone())?;
    let otp = TotpGenerator;
    let confirm = StdinConfirm;

    println!("opening browser window");
    let mut ui = ChromiumDriver::launch(config.headless).await?;

    let session = ProvisioningSession::new(
        adapter.as_ref(),
        &mut ui,
        &store,
        &otp,
        &confirm,
        &project,
        &config.realm,
    )
    .with_downloads_dir(config.downloads_dir());

    let outcome = session.run(action.as_ref()).await?;
    println!("{}", outcome.to_string().green().bold());

    Ok(())
}
