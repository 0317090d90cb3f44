//! Deterministic resource names

use crate::errors::DeployError;

const MAX_NAME_LEN: usize = 63;

pub const COMPUTE_API: &str = "https://www.googleapis.com/compute/v1";

/// Normalize `raw` into a name valid for every resource type we create
pub fn safe_name(raw: &str) -> Result<String, DeployError> {
    let mut name = String::with_capacity(raw.len());
    for c in raw.to_lowercase().chars() {
        let c = match c {
            'a'..='z' | '0'..='9' | '-' => c,
            _ => '-',
        };
        if c == '-' && name.ends_with('-') {
            continue;
        }
        name.push(c);
    }

    let mut name = name.trim_matches('-').to_string();
    if name.len() > MAX_NAME_LEN {
        name.truncate(MAX_NAME_LEN);
        name = name.trim_end_matches('-').to_string();
    }

    if name.is_empty() {
        return Err(DeployError::ValidationError(format!(
            "'{}' does not yield a usable resource name",
            raw
        )));
    }
    Ok(name)
}

/// Resources a demo deployment owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoNames {
    pub bucket: String,
    pub backend: String,
}

impl DemoNames {
    pub fn for_site(website_name: &str) -> Result<Self, DeployError> {
        let s = safe_name(website_name)?;
        Ok(Self {
            bucket: format!("demo-{}-bucket-demo", s),
            backend: format!("demo-{}-backend-demo", s),
        })
    }
}

/// Resources a production deployment owns, all derived from its domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProdNames {
    pub ip: String,
    pub bucket: String,
    pub backend: String,
    pub url_map: String,
    pub ssl_cert: String,
    pub https_proxy: String,
    pub http_proxy: String,
    pub https_rule: String,
    pub http_rule: String,
    pub zone: String,
}

impl ProdNames {
    pub fn for_domain(domain: &str) -> Result<Self, DeployError> {
        let s = safe_name(domain)?;
        Ok(Self {
            ip: format!("{}-ip", s),
            bucket: format!("{}-bucket-prod", s),
            backend: format!("{}-backend-prod", s),
            url_map: format!("{}-url-map", s),
            ssl_cert: format!("{}-ssl-cert", s),
            https_proxy: format!("{}-https-proxy", s),
            http_proxy: format!("{}-http-proxy", s),
            https_rule: format!("{}-https-rule", s),
            http_rule: format!("{}-http-rule", s),
            zone: format!("{}-zone", s),
        })
    }
}

pub fn compute_self_link(project_id: &str, collection: &str, name: &str) -> String {
    format!(
        "{}/projects/{}/global/{}/{}",
        COMPUTE_API, project_id, collection, name
    )
}

/// Artifact Registry image for one deployment of a service
pub fn image_uri(
    region: &str,
    project_id: &str,
    repository: &str,
    website_name: &str,
    deployment_id: &str,
) -> Result<String, DeployError> {
    let tag: String = deployment_id.chars().take(8).collect();
    Ok(format!(
        "{}-docker.pkg.dev/{}/{}/{}:{}",
        region,
        project_id,
        repository,
        safe_name(website_name)?,
        tag
    ))
}
