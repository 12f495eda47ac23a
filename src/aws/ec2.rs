use aws_sdk_ec2::{Client, types};
use std::fmt;
use tracing::{debug, info};

use crate::aws::errors::Ec2Error;
use crate::config::BoxConfig;

pub const ROOT_DEVICE: &str = "/dev/sda1";
pub const DEFAULT_SSH_CIDR: &str = "0.0.0.0/0";

pub fn mk_client(sdk_config: &aws_config::SdkConfig) -> Client {
    Client::new(sdk_config)
}

fn create_tag_spec(bc: &BoxConfig, rt: types::ResourceType) -> types::TagSpecification {
    types::TagSpecification::builder()
        .resource_type(rt)
        .tags(
            types::Tag::builder()
                .key("Name")
                .value(bc.instance_name.clone())
                .build(),
        )
        .build()
}

/// The instance lifecycle states EC2 reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
    Unknown(String),
}

impl From<&types::InstanceStateName> for InstanceState {
    fn from(name: &types::InstanceStateName) -> Self {
        match name {
            types::InstanceStateName::Pending => InstanceState::Pending,
            types::InstanceStateName::Running => InstanceState::Running,
            types::InstanceStateName::ShuttingDown => InstanceState::ShuttingDown,
            types::InstanceStateName::Terminated => InstanceState::Terminated,
            types::InstanceStateName::Stopping => InstanceState::Stopping,
            types::InstanceStateName::Stopped => InstanceState::Stopped,
            other => InstanceState::Unknown(other.as_str().to_string()),
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::ShuttingDown => "shutting-down",
            InstanceState::Terminated => "terminated",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
            InstanceState::Unknown(name) => name,
        };
        write!(f, "{}", name)
    }
}

/// What we know about the box after asking EC2
#[derive(Debug, Clone, PartialEq)]
pub struct Machine {
    pub id: String,
    pub state: InstanceState,
    pub public_dns: Option<String>,
    pub public_ip: Option<String>,
    pub architecture: Option<String>,
    pub instance_type: Option<String>,
    pub ami: Option<String>,
    pub zone: Option<String>,
    pub volume_ids: Vec<String>,
}

impl Machine {
    pub fn new(id: &str, state: InstanceState) -> Self {
        Machine {
            id: id.to_string(),
            state,
            public_dns: None,
            public_ip: None,
            architecture: None,
            instance_type: None,
            ami: None,
            zone: None,
            volume_ids: Vec::new(),
        }
    }

    pub fn from_instance(instance: &types::Instance) -> Option<Self> {
        let id = instance.instance_id()?;
        let state = instance
            .state()
            .and_then(|s| s.name())
            .map(InstanceState::from)
            .unwrap_or_else(|| InstanceState::Unknown("unknown".to_string()));

        let volume_ids = instance
            .block_device_mappings()
            .iter()
            .filter_map(|bdm| bdm.ebs().and_then(|ebs| ebs.volume_id()))
            .map(String::from)
            .collect();

        Some(Machine {
            id: id.to_string(),
            state,
            public_dns: instance
                .public_dns_name()
                .filter(|dns| !dns.is_empty())
                .map(String::from),
            public_ip: instance.public_ip_address().map(String::from),
            architecture: instance.architecture().map(|a| a.as_str().to_string()),
            instance_type: instance.instance_type().map(|t| t.as_str().to_string()),
            ami: instance.image_id().map(String::from),
            zone: instance
                .placement()
                .and_then(|p| p.availability_zone())
                .map(String::from),
            volume_ids,
        })
    }

    /// Host to dial for SSH, preferring the public address
    pub fn ssh_host(&self) -> Option<&str> {
        self.public_ip.as_deref().or(self.public_dns.as_deref())
    }
}

fn machines_from(reservations: &[types::Reservation]) -> Vec<Machine> {
    reservations
        .iter()
        .flat_map(|r| r.instances().iter().filter_map(Machine::from_instance))
        .collect()
}

// Security Groups

pub struct SecurityGroup {}
impl SecurityGroup {
    pub async fn find(client: &Client, group_name: &str) -> Result<Option<String>, Ec2Error> {
        debug!(group_name, "describing security group");

        let filter = types::Filter::builder()
            .name("group-name")
            .values(group_name)
            .build();

        let response = client
            .describe_security_groups()
            .filters(filter)
            .send()
            .await?;

        Ok(response
            .security_groups()
            .first()
            .and_then(|sg| sg.group_id())
            .map(String::from))
    }

    pub async fn create(client: &Client, bc: &BoxConfig) -> Result<String, Ec2Error> {
        let tag_specifications = create_tag_spec(bc, types::ResourceType::SecurityGroup);
        info!(group_name = %bc.security_group, "creating security group");

        let response = client
            .create_security_group()
            .group_name(&bc.security_group)
            .description("Allow SSH inbound traffic")
            .tag_specifications(tag_specifications)
            .send()
            .await?;

        let sg_id = response
            .group_id()
            .map(String::from)
            .ok_or_else(|| Ec2Error::Unexpected("security group created without id".into()))?;

        client
            .authorize_security_group_ingress()
            .group_id(&sg_id)
            .ip_permissions(
                types::IpPermission::builder()
                    .ip_protocol("tcp")
                    .from_port(22)
                    .to_port(22)
                    .ip_ranges(types::IpRange::builder().cidr_ip(DEFAULT_SSH_CIDR).build())
                    .build(),
            )
            .send()
            .await?;

        info!(security_group_id = %sg_id, "security group allows ssh");
        Ok(sg_id)
    }

    pub async fn ensure(client: &Client, bc: &BoxConfig) -> Result<String, Ec2Error> {
        match SecurityGroup::find(client, &bc.security_group).await? {
            Some(sg_id) => {
                debug!(security_group_id = %sg_id, "reusing security group");
                Ok(sg_id)
            }
            None => SecurityGroup::create(client, bc).await,
        }
    }
}

// Instances

pub struct Instances {}
impl Instances {
    pub async fn create(client: &Client, bc: &BoxConfig) -> Result<Machine, Ec2Error> {
        info!(
            instance_type = %bc.instance_type,
            ami = %bc.ami,
            key_pair = %bc.key_pair,
            "creating instance"
        );

        let root_volume = types::BlockDeviceMapping::builder()
            .device_name(ROOT_DEVICE)
            .ebs(
                types::EbsBlockDevice::builder()
                    .volume_size(bc.volume_size)
                    .delete_on_termination(true)
                    .build(),
            )
            .build();

        let response = client
            .run_instances()
            .image_id(&bc.ami)
            .instance_type(types::InstanceType::from(bc.instance_type.as_str()))
            .key_name(&bc.key_pair)
            .security_groups(&bc.security_group)
            .block_device_mappings(root_volume)
            .tag_specifications(create_tag_spec(bc, types::ResourceType::Instance))
            .min_count(1)
            .max_count(1)
            .send()
            .await?;

        let machine = response
            .instances()
            .first()
            .and_then(Machine::from_instance)
            .ok_or_else(|| Ec2Error::Unexpected("no instances created".into()))?;

        info!(instance_id = %machine.id, "instance created");
        Ok(machine)
    }

    /// Every instance carrying our Name tag that hasn't been terminated
    pub async fn tagged(client: &Client, name: &str) -> Result<Vec<Machine>, Ec2Error> {
        debug!(name, "describing tagged instances");

        let tag = types::Filter::builder().name("tag:Name").values(name).build();
        let live = types::Filter::builder()
            .name("instance-state-name")
            .values("pending")
            .values("running")
            .values("stopping")
            .values("stopped")
            .build();

        let response = client
            .describe_instances()
            .filters(tag)
            .filters(live)
            .send()
            .await?;

        Ok(machines_from(response.reservations()))
    }

    pub async fn describe(client: &Client, instance_id: &str) -> Result<Option<Machine>, Ec2Error> {
        let response = client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await?;

        Ok(machines_from(response.reservations()).into_iter().next())
    }

    pub async fn start(client: &Client, instance_id: &str) -> Result<(), Ec2Error> {
        info!(instance_id, "starting instance");
        client
            .start_instances()
            .instance_ids(instance_id)
            .send()
            .await?;
        Ok(())
    }

    pub async fn stop(client: &Client, instance_id: &str) -> Result<(), Ec2Error> {
        info!(instance_id, "stopping instance");
        client.stop_instances().instance_ids(instance_id).send().await?;
        Ok(())
    }

    pub async fn delete(client: &Client, instance_id: &str) -> Result<(), Ec2Error> {
        info!(instance_id, "terminating instance");
        client
            .terminate_instances()
            .instance_ids(instance_id)
            .send()
            .await?;
        Ok(())
    }
}

// Volumes

pub struct Volumes {}
impl Volumes {
    /// Deletes whichever of `volume_ids` still exist. Root volumes created
    /// with delete-on-termination are usually gone already.
    pub async fn delete_remaining(client: &Client, volume_ids: &[String]) -> Result<(), Ec2Error> {
        if volume_ids.is_empty() {
            return Ok(());
        }

        let filter = types::Filter::builder()
            .name("volume-id")
            .set_values(Some(volume_ids.to_vec()))
            .build();

        let response = client.describe_volumes().filters(filter).send().await?;

        for volume in response.volumes() {
            let Some(volume_id) = volume.volume_id() else {
                continue;
            };
            if matches!(
                volume.state(),
                Some(types::VolumeState::Deleting) | Some(types::VolumeState::Deleted)
            ) {
                continue;
            }
            info!(volume_id, "destroying EBS volume");
            client.delete_volume().volume_id(volume_id).send().await?;
        }

        Ok(())
    }
}
