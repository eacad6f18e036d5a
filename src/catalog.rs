//! Client for the Consul catalog API: service registration and deregistration.
use std::{collections::HashMap, sync::Mutex, time::Duration};

use rand::{Rng, SeedableRng, rngs::StdRng};
use reqwest::blocking::Client;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::error::SidecarError;

/// Catalog path for registering a service instance.
pub const REGISTER_ENDPOINT: &str = "/v1/catalog/register";

/// Catalog path for deregistering a service instance.
pub const DEREGISTER_ENDPOINT: &str = "/v1/catalog/deregister";

/// Timeout applied to every catalog request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Immutable description of the service instance the sidecar advertises.
///
/// Built once from the command line before the exporter is launched and
/// cloned into the registration hooks.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    name: String,
    tags: Vec<String>,
    address: String,
    port: u16,
    meta: HashMap<String, String>,
    identity: String,
}

impl ServiceDescriptor {
    /// Creates a descriptor, deriving the registration identity from the
    /// override when present and from `address:port` otherwise.
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        tags: Vec<String>,
        meta: HashMap<String, String>,
        override_id: Option<&str>,
    ) -> Self {
        let name = name.into();
        let address = address.into();
        let identity = match override_id {
            Some(id) if !id.is_empty() => id.to_lowercase().replace('/', "_"),
            _ => format!("{address}:{port}"),
        };

        Self {
            name,
            tags,
            address,
            port,
            meta,
            identity,
        }
    }

    /// The service name registered in the catalog.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The advertise address for the instance.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The port the exporter listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The identity under which the instance is registered and deregistered.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Tags as supplied, with the service name appended once when absent.
    ///
    /// Order is preserved; the auto-appended name always lands at the end.
    pub fn tags_with_self(&self) -> Vec<String> {
        let mut tags = self.tags.clone();
        if !tags.iter().any(|tag| tag == &self.name) {
            tags.push(self.name.clone());
        }
        tags
    }
}

/// Set of catalog base URLs with uniform random selection per request.
///
/// Addresses without a host component (e.g. `localhost:8500`, which parses
/// as a scheme-only URL) are tolerated at construction but never selected;
/// a pool consisting solely of such entries fails selection outright.
#[derive(Debug)]
pub struct EndpointPool {
    endpoints: Vec<Url>,
    rng: Mutex<StdRng>,
}

impl EndpointPool {
    /// Parses the supplied addresses into a pool with an entropy-seeded RNG.
    pub fn new(addrs: &[String]) -> Result<Self, SidecarError> {
        Self::with_rng(addrs, StdRng::from_entropy())
    }

    /// Parses the supplied addresses into a pool using the given RNG.
    pub fn with_rng(addrs: &[String], rng: StdRng) -> Result<Self, SidecarError> {
        let mut endpoints = Vec::with_capacity(addrs.len());
        for addr in addrs {
            let url =
                Url::parse(addr).map_err(|source| SidecarError::InvalidEndpoint {
                    url: addr.clone(),
                    source,
                })?;
            endpoints.push(url);
        }

        Ok(Self {
            endpoints,
            rng: Mutex::new(rng),
        })
    }

    /// Picks one endpoint uniformly at random and joins it with `path`.
    ///
    /// Entries lacking a host are excluded from the draw.
    pub fn select(&self, path: &str) -> Result<Url, SidecarError> {
        let candidates: Vec<&Url> =
            self.endpoints.iter().filter(|url| url.has_host()).collect();
        if candidates.is_empty() {
            return Err(SidecarError::NoValidEndpoint);
        }

        let index = self.rng.lock()?.gen_range(0..candidates.len());
        let mut url = candidates[index].clone();
        url.set_path(path);
        Ok(url)
    }
}

// Payload shapes for the catalog API:
// https://developer.hashicorp.com/consul/api-docs/catalog
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ServicePayload<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    service: &'a str,
    tags: Vec<String>,
    address: &'a str,
    meta: &'a HashMap<String, String>,
    port: u16,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RegisterServiceRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    datacenter: Option<&'a str>,
    node: &'a str,
    address: &'a str,
    service: ServicePayload<'a>,
    skip_node_update: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DeregisterServiceRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    datacenter: Option<&'a str>,
    node: &'a str,
    #[serde(rename = "ServiceID")]
    service_id: &'a str,
}

/// Stateless client for catalog register/deregister calls.
///
/// No retries happen at this layer; re-registering the same identity is an
/// idempotent overwrite in the catalog, so callers decide whether to retry.
pub struct CatalogClient {
    http: Client,
    pool: EndpointPool,
    node: String,
    datacenter: Option<String>,
}

impl CatalogClient {
    /// Creates a client targeting the given endpoint pool.
    pub fn new(
        pool: EndpointPool,
        node: impl Into<String>,
        datacenter: Option<String>,
    ) -> Result<Self, SidecarError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            pool,
            node: node.into(),
            datacenter,
        })
    }

    /// Registers the described service instance with the catalog.
    pub fn register(&self, descriptor: &ServiceDescriptor) -> Result<(), SidecarError> {
        let request = RegisterServiceRequest {
            datacenter: self.datacenter.as_deref(),
            node: &self.node,
            address: descriptor.address(),
            service: ServicePayload {
                id: descriptor.identity(),
                service: descriptor.name(),
                tags: descriptor.tags_with_self(),
                address: descriptor.address(),
                meta: &descriptor.meta,
                port: descriptor.port(),
            },
            skip_node_update: true,
        };

        self.put_json(REGISTER_ENDPOINT, &request)
    }

    /// Removes the service instance registered under `identity`.
    pub fn deregister(&self, identity: &str) -> Result<(), SidecarError> {
        let request = DeregisterServiceRequest {
            datacenter: self.datacenter.as_deref(),
            node: &self.node,
            service_id: identity,
        };

        self.put_json(DEREGISTER_ENDPOINT, &request)
    }

    /// Issues a PUT with a JSON body and maps non-2xx answers to errors.
    ///
    /// The response body is drained before the status check so it can be
    /// logged at debug verbosity.
    fn put_json<T: Serialize>(&self, path: &str, payload: &T) -> Result<(), SidecarError> {
        let url = self.pool.select(path)?;
        let body = serde_json::to_vec(payload)?;

        debug!("PUT {url}");
        let response = self.http.put(url).body(body).send()?;
        let status = response.status();
        let text = response.text()?;
        debug!("Catalog response body: {text}");

        if status.is_success() {
            Ok(())
        } else {
            Err(SidecarError::UnexpectedStatus(status.to_string()))
        }
    }
}
