use aws_sdk_ec2::error::{DisplayErrorContext, SdkError};
use aws_sdk_ec2::operation::{
    authorize_security_group_ingress::AuthorizeSecurityGroupIngressError,
    create_security_group::CreateSecurityGroupError, delete_volume::DeleteVolumeError,
    describe_instances::DescribeInstancesError,
    describe_security_groups::DescribeSecurityGroupsError, describe_volumes::DescribeVolumesError,
    run_instances::RunInstancesError, start_instances::StartInstancesError,
    stop_instances::StopInstancesError, terminate_instances::TerminateInstancesError,
};
use aws_sdk_resourcegroupstagging::operation::get_resources::GetResourcesError;
use thiserror::Error;

use crate::aws::ec2::InstanceState;

/// SDK errors are shown with their whole source chain so the operator sees
/// the service's own code and message.
#[derive(Debug, Error)]
pub enum Ec2Error {
    // Security Group
    #[error("Failed to create security group: {}", DisplayErrorContext(.0))]
    CreateSecurityGroup(#[from] SdkError<CreateSecurityGroupError>),
    #[error("Failed to describe security groups: {}", DisplayErrorContext(.0))]
    DescribeSecurityGroups(#[from] SdkError<DescribeSecurityGroupsError>),
    #[error("Failed to authorize ingress: {}", DisplayErrorContext(.0))]
    AuthorizeSecurityGroupIngress(#[from] SdkError<AuthorizeSecurityGroupIngressError>),

    // Instances
    #[error("Failed to create instance: {}", DisplayErrorContext(.0))]
    CreateInstances(#[from] SdkError<RunInstancesError>),
    #[error("Failed to describe instances: {}", DisplayErrorContext(.0))]
    DescribeInstances(#[from] SdkError<DescribeInstancesError>),
    #[error("Failed to start instance: {}", DisplayErrorContext(.0))]
    StartInstances(#[from] SdkError<StartInstancesError>),
    #[error("Failed to stop instance: {}", DisplayErrorContext(.0))]
    StopInstances(#[from] SdkError<StopInstancesError>),
    #[error("Failed to terminate instance: {}", DisplayErrorContext(.0))]
    TerminateInstances(#[from] SdkError<TerminateInstancesError>),

    // Volumes
    #[error("Failed to describe volumes: {}", DisplayErrorContext(.0))]
    DescribeVolumes(#[from] SdkError<DescribeVolumesError>),
    #[error("Failed to delete volume: {}", DisplayErrorContext(.0))]
    DeleteVolume(#[from] SdkError<DeleteVolumeError>),

    // Tagging
    #[error("Failed to list tagged resources: {}", DisplayErrorContext(.0))]
    GetResources(#[from] SdkError<GetResourcesError>),

    #[error("no instance tagged Name={0}")]
    NoInstance(String),

    #[error("timed out after {waited_secs}s waiting for {instance_id} to be {target}")]
    Timeout {
        instance_id: String,
        target: InstanceState,
        waited_secs: u64,
    },

    // No idea
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}
