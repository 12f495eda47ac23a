use aws_sdk_ec2::Client;
use std::fmt;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

use crate::aws::ec2::{InstanceState, Instances, Machine, SecurityGroup, Volumes};
use crate::aws::errors::Ec2Error;
use crate::config::BoxConfig;
use crate::wait::WaitConfig;

/// The handful of EC2 calls the lifecycle needs, kept behind a trait so the
/// lifecycle can be exercised without AWS.
#[allow(async_fn_in_trait)]
#[cfg_attr(test, mockall::automock)]
pub trait InstanceApi {
    /// The live (not terminated) instance tagged `Name=name`, if any
    async fn find(&self, name: &str) -> Result<Option<Machine>, Ec2Error>;

    async fn describe(&self, instance_id: &str) -> Result<Option<Machine>, Ec2Error>;

    /// Ensures the security group and launches one instance
    async fn launch(&self, bc: &BoxConfig) -> Result<Machine, Ec2Error>;

    async fn start(&self, instance_id: &str) -> Result<(), Ec2Error>;

    async fn stop(&self, instance_id: &str) -> Result<(), Ec2Error>;

    async fn terminate(&self, instance_id: &str) -> Result<(), Ec2Error>;

    async fn delete_volumes(&self, volume_ids: Vec<String>) -> Result<(), Ec2Error>;
}

pub struct Ec2Api {
    client: Client,
}

impl Ec2Api {
    pub fn new(client: Client) -> Self {
        Ec2Api { client }
    }
}

impl InstanceApi for Ec2Api {
    async fn find(&self, name: &str) -> Result<Option<Machine>, Ec2Error> {
        let mut machines = Instances::tagged(&self.client, name).await?;
        if machines.len() > 1 {
            warn!(
                name,
                count = machines.len(),
                "several instances share the Name tag, using the first"
            );
        }
        Ok(match machines.is_empty() {
            true => None,
            false => Some(machines.swap_remove(0)),
        })
    }

    async fn describe(&self, instance_id: &str) -> Result<Option<Machine>, Ec2Error> {
        Instances::describe(&self.client, instance_id).await
    }

    async fn launch(&self, bc: &BoxConfig) -> Result<Machine, Ec2Error> {
        SecurityGroup::ensure(&self.client, bc).await?;
        Instances::create(&self.client, bc).await
    }

    async fn start(&self, instance_id: &str) -> Result<(), Ec2Error> {
        Instances::start(&self.client, instance_id).await
    }

    async fn stop(&self, instance_id: &str) -> Result<(), Ec2Error> {
        Instances::stop(&self.client, instance_id).await
    }

    async fn terminate(&self, instance_id: &str) -> Result<(), Ec2Error> {
        Instances::delete(&self.client, instance_id).await
    }

    async fn delete_volumes(&self, volume_ids: Vec<String>) -> Result<(), Ec2Error> {
        Volumes::delete_remaining(&self.client, &volume_ids).await
    }
}

/// Polls until the instance reaches `target`. An instance that vanishes while
/// we wait for termination counts as terminated.
pub async fn wait_for_state(
    api: &impl InstanceApi,
    machine: Machine,
    target: InstanceState,
    wait: &WaitConfig,
) -> Result<Machine, Ec2Error> {
    let started = Instant::now();
    let mut current = machine;

    loop {
        if current.state == target {
            info!(instance_id = %current.id, state = %current.state, "instance state");
            return Ok(current);
        }
        if started.elapsed() >= wait.timeout {
            return Err(Ec2Error::Timeout {
                instance_id: current.id,
                target,
                waited_secs: wait.timeout.as_secs(),
            });
        }

        info!(instance_id = %current.id, state = %current.state, "instance state");
        sleep(wait.interval).await;

        current = match api.describe(&current.id).await? {
            Some(machine) => machine,
            None if target == InstanceState::Terminated => {
                Machine::new(&current.id, InstanceState::Terminated)
            }
            None => {
                return Err(Ec2Error::Unexpected(format!(
                    "instance {} disappeared",
                    current.id
                )));
            }
        };
    }
}

/// The managed box together with the settings used to reach it
#[derive(Debug, Clone)]
pub struct Deployment {
    pub config: BoxConfig,
    pub machine: Machine,
}

impl fmt::Display for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let m = &self.machine;
        let none = || "none".to_string();
        let ssh = match m.ssh_host() {
            Some(host) => format!(
                "ssh -i {} {}@{}",
                self.config.key_filename, self.config.ssh_user, host
            ),
            None => none(),
        };

        write!(
            f,
            "INSTANCE ]-------------------------\n\
             Name:          {}\n\
             Instance Id:   {}\n\
             State:         {}\n\
             Public DNS:    {}\n\
             Ip Address:    {}\n\
             Architecture:  {}\n\
             Instance Type: {}\n\
             AMI:           {}\n\
             Zone:          {}\n\
             Volume:        {}\n\
             User:          {}\n\
             SSH:           {}",
            self.config.instance_name,
            m.id,
            m.state,
            m.public_dns.clone().unwrap_or_else(none),
            m.public_ip.clone().unwrap_or_else(none),
            m.architecture.clone().unwrap_or_else(none),
            m.instance_type.clone().unwrap_or_else(none),
            m.ami.clone().unwrap_or_else(none),
            m.zone.clone().unwrap_or_else(none),
            match m.volume_ids.is_empty() {
                true => none(),
                false => m.volume_ids.join(", "),
            },
            self.config.ssh_user,
            ssh,
        )
    }
}

impl Deployment {
    fn new(bc: &BoxConfig, machine: Machine) -> Self {
        Deployment {
            config: bc.to_owned(),
            machine,
        }
    }

    /// Finds the tagged box or fails with `NoInstance`
    pub async fn load(api: &impl InstanceApi, bc: &BoxConfig) -> Result<Self, Ec2Error> {
        match api.find(&bc.instance_name).await? {
            Some(machine) => Ok(Deployment::new(bc, machine)),
            None => Err(Ec2Error::NoInstance(bc.instance_name.clone())),
        }
    }

    /// Boots the existing box, or launches a new one when there is none.
    /// Without a `wait` budget the call returns as soon as EC2 accepts the
    /// request.
    pub async fn up(
        api: &impl InstanceApi,
        bc: &BoxConfig,
        wait: Option<&WaitConfig>,
    ) -> Result<Self, Ec2Error> {
        let machine = match api.find(&bc.instance_name).await? {
            None => {
                info!(name = %bc.instance_name, "no instance found, creating one");
                api.launch(bc).await?
            }
            Some(machine) => match machine.state {
                InstanceState::Running => {
                    info!(instance_id = %machine.id, "instance already running");
                    return Ok(Deployment::new(bc, machine));
                }
                InstanceState::Pending => machine,
                InstanceState::Stopped => Deployment::start(api, machine).await?,
                InstanceState::Stopping => match wait {
                    Some(wait) => {
                        let stopped =
                            wait_for_state(api, machine, InstanceState::Stopped, wait).await?;
                        Deployment::start(api, stopped).await?
                    }
                    None => {
                        return Err(Ec2Error::Unexpected(format!(
                            "instance {} is still stopping",
                            machine.id
                        )));
                    }
                },
                other => {
                    return Err(Ec2Error::Unexpected(format!(
                        "instance {} is {}, cannot bring it up",
                        machine.id, other
                    )));
                }
            },
        };

        let machine = match wait {
            Some(wait) => wait_for_state(api, machine, InstanceState::Running, wait).await?,
            None => machine,
        };

        Ok(Deployment::new(bc, machine))
    }

    async fn start(api: &impl InstanceApi, machine: Machine) -> Result<Machine, Ec2Error> {
        api.start(&machine.id).await?;
        Ok(Machine {
            state: InstanceState::Pending,
            ..machine
        })
    }

    /// Stops the box. Having nothing to stop is not an error.
    pub async fn down(
        api: &impl InstanceApi,
        bc: &BoxConfig,
        wait: &WaitConfig,
    ) -> Result<Option<Machine>, Ec2Error> {
        let Some(machine) = api.find(&bc.instance_name).await? else {
            warn!(name = %bc.instance_name, "no instance to stop");
            return Ok(None);
        };

        if machine.state != InstanceState::Stopped {
            api.stop(&machine.id).await?;
        }
        let machine = Machine {
            state: match machine.state {
                InstanceState::Stopped => InstanceState::Stopped,
                _ => InstanceState::Stopping,
            },
            ..machine
        };

        let stopped = wait_for_state(api, machine, InstanceState::Stopped, wait).await?;
        Ok(Some(stopped))
    }

    /// Terminates the box and deletes any of its volumes that survive it.
    /// Returns the terminated id, or None when there was nothing to destroy.
    pub async fn destroy(
        api: &impl InstanceApi,
        bc: &BoxConfig,
        wait: &WaitConfig,
    ) -> Result<Option<String>, Ec2Error> {
        let Some(machine) = api.find(&bc.instance_name).await? else {
            info!(name = %bc.instance_name, "nothing to destroy");
            return Ok(None);
        };

        let volume_ids = machine.volume_ids.clone();
        let instance_id = machine.id.clone();

        info!(instance_id = %instance_id, "destroying instance");
        api.terminate(&instance_id).await?;

        let machine = Machine {
            state: InstanceState::ShuttingDown,
            ..machine
        };
        wait_for_state(api, machine, InstanceState::Terminated, wait).await?;

        if !volume_ids.is_empty() {
            api.delete_volumes(volume_ids).await?;
        }

        Ok(Some(instance_id))
    }
}
