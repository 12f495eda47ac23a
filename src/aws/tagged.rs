use aws_sdk_resourcegroupstagging::Client;
use aws_sdk_resourcegroupstagging::types::TagFilter;
use tracing::{debug, info};

use crate::aws::errors::Ec2Error;

pub fn mk_client(sdk_config: &aws_config::SdkConfig) -> Client {
    Client::new(sdk_config)
}

pub fn mk_filter(tag_name: &str) -> TagFilter {
    TagFilter::builder().key("Name").values(tag_name).build()
}

/// ARNs of every resource carrying `Name=tag_name`, across all pages
pub async fn list_all_tagged(client: &Client, tag_name: &str) -> Result<Vec<String>, Ec2Error> {
    let mut arns = Vec::new();
    let mut token: Option<String> = None;

    loop {
        let response = client
            .get_resources()
            .tag_filters(mk_filter(tag_name))
            .set_pagination_token(token.take())
            .send()
            .await?;

        arns.extend(
            response
                .resource_tag_mapping_list()
                .iter()
                .filter_map(|r| r.resource_arn())
                .map(String::from),
        );

        match response.pagination_token() {
            Some(next) if !next.is_empty() => {
                debug!("fetching next page of tagged resources");
                token = Some(next.to_string());
            }
            _ => break,
        }
    }

    info!(tag_name, count = arns.len(), "tagged resources found");
    Ok(arns)
}
