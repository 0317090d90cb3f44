//! Prod mode: a dedicated load balancer per domain

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::cloud::naming::ProdNames;
use crate::cloud::{ResourceEnsurer, ResourceKind, ResourceRef, ResourceSpec};
use crate::errors::DeployError;
use crate::logstream::ProgressSink;
use crate::models::DeploymentMode;
use crate::provision::{
    backend_body, bucket_body, ensure_logged, policy_grant, self_link, CacheTarget,
    ProvisionRequest, ProvisionResult, Provisioner, Teardown, TeardownReport, BACKEND_FIELDS,
    BUCKET_FIELDS,
};
use crate::storage::settings::ProdSettings;

const DNS_TTL: u64 = 300;
const PATH_MATCHER: &str = "path-matcher-1";

pub struct ProdProvisioner {
    ensurer: ResourceEnsurer,
    settings: ProdSettings,
}

impl ProdProvisioner {
    pub fn new(ensurer: ResourceEnsurer, settings: ProdSettings) -> Self {
        Self { ensurer, settings }
    }

    async fn forwarding_rule(
        &self,
        name: &str,
        port: &str,
        ip_link: &str,
        target_link: &str,
        sink: &dyn ProgressSink,
    ) -> Result<(), DeployError> {
        let spec = ResourceSpec::create_only(
            ResourceRef::new(ResourceKind::ForwardingRule, name),
            json!({
                "name": name,
                "IPAddress": ip_link,
                "IPProtocol": "TCP",
                "portRange": port,
                "target": target_link,
                "loadBalancingScheme": "EXTERNAL",
            }),
        );
        ensure_logged(&self.ensurer, &spec, sink).await?;
        Ok(())
    }

    async fn dns(
        &self,
        names: &ProdNames,
        domain: &str,
        address: &str,
        sink: &dyn ProgressSink,
    ) -> Result<(), DeployError> {
        let dns_name = format!("{}.", domain);
        let zone = ensure_logged(
            &self.ensurer,
            &ResourceSpec::create_only(
                ResourceRef::new(ResourceKind::DnsZone, names.zone.clone()),
                json!({
                    "name": names.zone,
                    "dnsName": dns_name,
                    "description": format!("Managed zone for {}", domain),
                }),
            ),
            sink,
        )
        .await?;

        ensure_logged(
            &self.ensurer,
            &record_spec(&names.zone, &dns_name, "A", address),
            sink,
        )
        .await?;
        ensure_logged(
            &self.ensurer,
            &record_spec(&names.zone, &format!("www.{}", dns_name), "CNAME", &dns_name),
            sink,
        )
        .await?;

        if let Some(servers) = zone.get("nameServers").and_then(Value::as_array) {
            let servers: Vec<&str> = servers.iter().filter_map(Value::as_str).collect();
            sink.info(format!(
                "Point the registrar of {} at: {}",
                domain,
                servers.join(", ")
            ))
            .await;
        }
        Ok(())
    }
}

fn record_spec(zone: &str, dns_name: &str, record_type: &str, data: &str) -> ResourceSpec {
    ResourceSpec::with_fields(
        ResourceRef::record_set(zone, dns_name, record_type),
        json!({
            "name": dns_name,
            "type": record_type,
            "ttl": DNS_TTL,
            "rrdatas": [data],
        }),
        vec!["ttl", "rrdatas"],
    )
}

#[async_trait]
impl Provisioner for ProdProvisioner {
    fn mode(&self) -> DeploymentMode {
        DeploymentMode::Prod
    }

    async fn deploy(
        &self,
        request: &ProvisionRequest,
        sink: &dyn ProgressSink,
    ) -> Result<ProvisionResult, DeployError> {
        let domain = request.require_domain()?;
        let names = ProdNames::for_domain(domain)?;
        sink.info(format!(
            "Provisioning production infrastructure for '{}' on {}",
            request.website_name, domain
        ))
        .await;

        // Static IP
        let ip = ResourceRef::new(ResourceKind::GlobalAddress, names.ip.clone());
        let ip_state = ensure_logged(
            &self.ensurer,
            &ResourceSpec::create_only(ip.clone(), json!({ "name": names.ip, "ipVersion": "IPV4" })),
            sink,
        )
        .await?;
        let ip_link = self_link(&ip_state, &ip)?;
        let address = ip_state
            .get("address")
            .and_then(Value::as_str)
            .ok_or_else(|| DeployError::ProvisionError(format!("{} has no address", ip)))?
            .to_string();
        sink.info(format!("Static IP: {}", address)).await;

        // Bucket
        let bucket_spec = ResourceSpec::with_fields(
            ResourceRef::new(ResourceKind::StorageBucket, names.bucket.clone()),
            bucket_body(
                &names.bucket,
                &self.settings.bucket_location,
                &format!("https://{}", domain),
            ),
            BUCKET_FIELDS.to_vec(),
        );
        ensure_logged(&self.ensurer, &bucket_spec, sink).await?;
        ensure_logged(
            &self.ensurer,
            &policy_grant(
                ResourceRef::new(ResourceKind::BucketIamPolicy, names.bucket.clone()),
                "roles/storage.objectViewer",
                "allUsers",
            ),
            sink,
        )
        .await?;

        // Backend bucket
        let backend = ResourceRef::new(ResourceKind::BackendBucket, names.backend.clone());
        let backend_state = ensure_logged(
            &self.ensurer,
            &ResourceSpec::with_fields(
                backend.clone(),
                backend_body(&names.backend, &names.bucket),
                BACKEND_FIELDS.to_vec(),
            ),
            sink,
        )
        .await?;
        let backend_link = self_link(&backend_state, &backend)?;

        // URL map
        let url_map = ResourceRef::new(ResourceKind::UrlMap, names.url_map.clone());
        let url_map_state = ensure_logged(
            &self.ensurer,
            &ResourceSpec::with_fields(
                url_map.clone(),
                json!({
                    "name": names.url_map,
                    "defaultService": backend_link,
                    "hostRules": [{ "hosts": [domain], "pathMatcher": PATH_MATCHER }],
                    "pathMatchers": [{ "name": PATH_MATCHER, "defaultService": backend_link }],
                }),
                vec!["defaultService"],
            ),
            sink,
        )
        .await?;
        let url_map_link = self_link(&url_map_state, &url_map)?;

        // Certificate and HTTPS front end
        let https_proxy_link = if self.settings.auto_create_ssl_cert {
            let cert = ResourceRef::new(ResourceKind::SslCertificate, names.ssl_cert.clone());
            let cert_state = ensure_logged(
                &self.ensurer,
                &ResourceSpec::create_only(
                    cert.clone(),
                    json!({
                        "name": names.ssl_cert,
                        "type": "MANAGED",
                        "managed": { "domains": [domain] },
                    }),
                ),
                sink,
            )
            .await?;
            let cert_link = self_link(&cert_state, &cert)?;

            let proxy = ResourceRef::new(ResourceKind::TargetHttpsProxy, names.https_proxy.clone());
            let proxy_state = ensure_logged(
                &self.ensurer,
                &ResourceSpec::create_only(
                    proxy.clone(),
                    json!({
                        "name": names.https_proxy,
                        "urlMap": url_map_link,
                        "sslCertificates": [cert_link],
                    }),
                ),
                sink,
            )
            .await?;
            Some(self_link(&proxy_state, &proxy)?)
        } else {
            sink.info("Managed certificate disabled, serving HTTP only".to_string())
                .await;
            None
        };

        let http_proxy = ResourceRef::new(ResourceKind::TargetHttpProxy, names.http_proxy.clone());
        let http_proxy_state = ensure_logged(
            &self.ensurer,
            &ResourceSpec::create_only(
                http_proxy.clone(),
                json!({ "name": names.http_proxy, "urlMap": url_map_link }),
            ),
            sink,
        )
        .await?;
        let http_proxy_link = self_link(&http_proxy_state, &http_proxy)?;

        // Forwarding rules
        if let Some(https_proxy_link) = &https_proxy_link {
            self.forwarding_rule(&names.https_rule, "443", &ip_link, https_proxy_link, sink)
                .await?;
        }
        self.forwarding_rule(&names.http_rule, "80", &ip_link, &http_proxy_link, sink)
            .await?;

        if self.settings.auto_create_dns_zone {
            self.dns(&names, domain, &address, sink).await?;
        }

        let url = format!("https://{}/", domain);
        sink.info(format!("Production infrastructure ready: {}", url))
            .await;

        Ok(ProvisionResult {
            url,
            bucket: Some(names.bucket),
            object_prefix: String::new(),
            cache_target: Some(CacheTarget {
                url_map: names.url_map,
                path: "/*".to_string(),
            }),
            service: None,
        })
    }

    async fn delete(
        &self,
        request: &ProvisionRequest,
        sink: &dyn ProgressSink,
    ) -> Result<TeardownReport, DeployError> {
        let domain = request.require_domain()?;
        let names = ProdNames::for_domain(domain)?;
        let dns_name = format!("{}.", domain);
        let mut teardown = Teardown::new(&self.ensurer, sink);

        let steps = [
            (ResourceRef::record_set(&names.zone, &format!("www.{}", dns_name), "CNAME"), false),
            (ResourceRef::record_set(&names.zone, &dns_name, "A"), false),
            (ResourceRef::new(ResourceKind::DnsZone, names.zone.clone()), false),
            (ResourceRef::new(ResourceKind::ForwardingRule, names.https_rule.clone()), true),
            (ResourceRef::new(ResourceKind::ForwardingRule, names.http_rule.clone()), true),
            (ResourceRef::new(ResourceKind::TargetHttpsProxy, names.https_proxy.clone()), true),
            (ResourceRef::new(ResourceKind::TargetHttpProxy, names.http_proxy.clone()), true),
            (ResourceRef::new(ResourceKind::SslCertificate, names.ssl_cert.clone()), false),
            (ResourceRef::new(ResourceKind::UrlMap, names.url_map.clone()), false),
            (ResourceRef::new(ResourceKind::BackendBucket, names.backend.clone()), false),
            (ResourceRef::new(ResourceKind::StorageBucket, names.bucket.clone()), false),
            (ResourceRef::new(ResourceKind::GlobalAddress, names.ip.clone()), false),
        ];
        for (resource, critical) in &steps {
            teardown.remove(resource, *critical).await?;
        }

        Ok(teardown.finish())
    }
}
