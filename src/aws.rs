pub mod ec2;
pub mod errors;
pub mod scenarios;
pub mod tagged;

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_ec2::config::Credentials;

use crate::config::BoxConfig;

const CREDENTIALS_SOURCE: &str = "boxup-environment";

/// SDK settings built only from the loaded config, so region and credentials
/// always match what `AWS_*` said.
pub async fn load_sdk_config(bc: &BoxConfig) -> SdkConfig {
    let credentials = Credentials::new(
        bc.access_key_id.clone(),
        bc.secret_access_key.clone(),
        bc.session_token.clone(),
        None,
        CREDENTIALS_SOURCE,
    );

    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(bc.region.clone()))
        .credentials_provider(credentials)
        .load()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sdk_config_uses_box_region() {
        let bc = BoxConfig {
            instance_type: "t2.micro".to_string(),
            key_pair: "ops".to_string(),
            ami: "ami-c7d092f7".to_string(),
            key_filename: "/keys/ops.pem".to_string(),
            access_key_id: "AKIATEST".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: None,
            region: "eu-west-1".to_string(),
            instance_name: "data-platform".to_string(),
            security_group: "data-platform".to_string(),
            ssh_user: "centos".to_string(),
            volume_size: 120,
        };

        let sdk_config = load_sdk_config(&bc).await;
        assert_eq!(
            sdk_config.region().map(|r| r.as_ref()),
            Some("eu-west-1")
        );
        assert!(sdk_config.credentials_provider().is_some());
    }
}
