use anyhow::{Context, Result, anyhow, bail};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::actions::plans::{ParsedAction, parse_plan};
use crate::aws::ec2::{InstanceState, mk_client as mk_ec2};
use crate::aws::load_sdk_config;
use crate::aws::scenarios::{Deployment, Ec2Api};
use crate::aws::tagged::{self, mk_client as mk_tagged};
use crate::config::BoxConfig;
use crate::ssh::client::Client;
use crate::ssh::output::{OutputHandler, StreamLogger};
use crate::ssh::shell;
use crate::wait::{SSH_PORT, WaitConfig, wait_for_port};

const DATA_PLATFORM_PLAN: &str = include_str!("../../plans/data-platform.plan");

async fn ec2_api(bc: &BoxConfig) -> Ec2Api {
    let sdk_config = load_sdk_config(bc).await;
    Ec2Api::new(mk_ec2(&sdk_config))
}

/// The address to dial, as long as the box is up and has one
fn running_host(d: &Deployment) -> Result<&str> {
    if d.machine.state != InstanceState::Running {
        bail!(
            "instance {} is {}, bring it up first with `boxup up`",
            d.machine.id,
            d.machine.state
        );
    }
    d.machine
        .ssh_host()
        .ok_or_else(|| anyhow!("instance {} has no public address", d.machine.id))
}

fn read_plan(planfile: &Path) -> Result<Vec<ParsedAction>> {
    let content = fs::read_to_string(planfile)
        .with_context(|| format!("reading plan {}", planfile.display()))?;
    let actions =
        parse_plan(&content).with_context(|| format!("parsing plan {}", planfile.display()))?;
    info!(plan = %planfile.display(), actions = actions.len(), "plan loaded");
    Ok(actions)
}

async fn connect(d: &Deployment, log_dir: Option<&Path>) -> Result<Client> {
    let key_file = d.config.check_key_file()?;
    let host = running_host(d)?;

    let logger = match log_dir {
        Some(dir) => {
            let logger = StreamLogger::new(host, dir)
                .with_context(|| format!("opening logs in {}", dir.display()))?;
            info!(host = logger.host_id(), dir = %dir.display(), "logging remote output");
            Some(Arc::new(logger) as Arc<dyn OutputHandler>)
        }
        None => None,
    };

    let client = Client::connect(host, SSH_PORT, &d.config.ssh_user, &key_file, logger)
        .await
        .with_context(|| format!("connecting to {}@{}", d.config.ssh_user, host))?;
    Ok(client)
}

/// Runs every action in order on one session and stops at the first failure.
async fn run_actions(d: &Deployment, actions: &[ParsedAction], log_dir: Option<&Path>) -> Result<()> {
    let client = connect(d, log_dir).await?;
    let total = actions.len();

    for (i, action) in actions.iter().enumerate() {
        let step = i + 1;
        info!(step, total, "{}", action);

        match action {
            ParsedAction::Execute { .. } | ParsedAction::Sudo { .. } => {
                let command = action
                    .remote_command()
                    .ok_or_else(|| anyhow!("step {} has no command", step))?;
                let status = client
                    .execute_and_print(&command)
                    .await
                    .with_context(|| format!("step {} `{}`", step, action))?;
                if status != 0 {
                    bail!("step {} `{}` exited with status {}", step, action, status);
                }
            }
            ParsedAction::Upload {
                source,
                destination,
            } => {
                let bytes = client
                    .upload(source, destination)
                    .await
                    .with_context(|| format!("step {} `{}`", step, action))?;
                info!(step, bytes, destination = %destination, "uploaded");
            }
            ParsedAction::Download {
                source,
                destination,
            } => {
                let bytes = client
                    .download(source, destination)
                    .await
                    .with_context(|| format!("step {} `{}`", step, action))?;
                info!(step, bytes, destination = %destination, "downloaded");
            }
        }
    }

    client.disconnect().await?;
    info!(total, "plan finished");
    Ok(())
}

pub async fn cmd_up(bc: &BoxConfig, no_wait: bool) -> Result<Deployment> {
    let api = ec2_api(bc).await;

    let deployment = match no_wait {
        true => Deployment::up(&api, bc, None).await?,
        false => Deployment::up(&api, bc, Some(&WaitConfig::instance_state())).await?,
    };

    if !no_wait {
        let host = running_host(&deployment)?;
        let wait = WaitConfig::ssh();
        if !wait_for_port(host, SSH_PORT, &wait).await {
            bail!(
                "ssh on {} did not answer within {}s",
                host,
                wait.timeout.as_secs()
            );
        }
    }

    println!("{}", deployment);
    Ok(deployment)
}

fn bundled_plan() -> Result<Vec<ParsedAction>> {
    parse_plan(DATA_PLATFORM_PLAN).context("parsing the bundled data-platform plan")
}

/// `up`, then provisioning with `planfile` or the bundled data-platform
/// plan. The plan is parsed before anything touches AWS.
pub async fn cmd_it(bc: &BoxConfig, planfile: Option<&Path>, log_dir: Option<&Path>) -> Result<()> {
    let actions = match planfile {
        Some(planfile) => read_plan(planfile)?,
        None => bundled_plan()?,
    };
    let deployment = cmd_up(bc, false).await?;
    run_actions(&deployment, &actions, log_dir).await
}

pub async fn cmd_down(bc: &BoxConfig) -> Result<()> {
    let api = ec2_api(bc).await;
    if let Some(machine) = Deployment::down(&api, bc, &WaitConfig::instance_state()).await? {
        info!(instance_id = %machine.id, "instance stopped");
    }
    Ok(())
}

pub async fn cmd_status(bc: &BoxConfig) -> Result<()> {
    let api = ec2_api(bc).await;
    let deployment = Deployment::load(&api, bc).await?;
    println!("{}", deployment);
    Ok(())
}

/// Interactive shell without arguments, otherwise runs them remotely.
/// Returns the exit status to hand back to the caller's shell.
pub async fn cmd_ssh(bc: &BoxConfig, command: &[String]) -> Result<i32> {
    let key_file = bc.check_key_file()?;
    let api = ec2_api(bc).await;
    let deployment = Deployment::load(&api, bc).await?;

    if command.is_empty() {
        let host = running_host(&deployment)?;
        let args = shell::ssh_args(&key_file, &bc.ssh_user, host);
        return shell::run_attached("ssh", &args)
            .await
            .context("running ssh");
    }

    let client = connect(&deployment, None).await?;
    let status = client.execute_and_print(&remote_line(command)).await?;
    client.disconnect().await?;
    Ok(local_status(status))
}

/// Trailing `ssh` arguments become one remote shell line
fn remote_line(command: &[String]) -> String {
    command.join(" ")
}

/// Remote statuses outside what a local process can exit with become 1
fn local_status(status: u32) -> i32 {
    match status {
        0..=255 => status as i32,
        _ => 1,
    }
}

pub async fn cmd_plan(bc: &BoxConfig, planfile: &Path, log_dir: Option<&Path>) -> Result<()> {
    let actions = read_plan(planfile)?;
    let api = ec2_api(bc).await;
    let deployment = Deployment::load(&api, bc).await?;
    run_actions(&deployment, &actions, log_dir).await
}

pub async fn cmd_rsync(bc: &BoxConfig, source: Option<PathBuf>) -> Result<()> {
    let source =
        source.ok_or_else(|| anyhow!("no source directory, pass --source or set SOURCE_PATH"))?;
    let key_file = bc.check_key_file()?;

    let api = ec2_api(bc).await;
    let deployment = Deployment::load(&api, bc).await?;
    let host = running_host(&deployment)?;

    let args = shell::rsync_args(&key_file, &bc.ssh_user, host, &source);
    let status = shell::run_attached("rsync", &args)
        .await
        .context("running rsync")?;
    if status != 0 {
        bail!("rsync exited with status {}", status);
    }
    Ok(())
}

pub async fn cmd_tagged(bc: &BoxConfig) -> Result<()> {
    let sdk_config = load_sdk_config(bc).await;
    let client = mk_tagged(&sdk_config);
    let arns = tagged::list_all_tagged(&client, &bc.instance_name).await?;

    match arns.len() {
        0 => warn!(name = %bc.instance_name, "no tagged resources found"),
        _ => {
            for arn in arns {
                println!("{}", arn);
            }
        }
    }
    Ok(())
}

pub async fn cmd_destroy(bc: &BoxConfig) -> Result<()> {
    let api = ec2_api(bc).await;
    if let Some(instance_id) = Deployment::destroy(&api, bc, &WaitConfig::instance_state()).await? {
        info!(instance_id = %instance_id, "instance destroyed");
    }
    Ok(())
}
