//! Tunnel registry
//!
//! Live HTTP tunnels keyed by their public id (the subdomain label). Each
//! entry carries the yamux session streams are opened on and the policy the
//! proxy enforces per request.

use dashmap::DashMap;
use eosrift_proto::{
    normalize_header_name, parse_basic_auth, parse_cidr_list, parse_method_list, parse_path_list,
    validate_header_value, BasicAuthSpec, HttpTunnelRequest, ProtoError,
};
use eosrift_transport::MuxSession;
use ipnetwork::IpNetwork;
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;

/// Public tunnel ids are short lowercase base32 labels.
const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz234567";
const ID_LEN: usize = 8;
const ID_ALLOC_ATTEMPTS: usize = 10;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("empty tunnel id")]
    EmptyId,

    #[error("tunnel id already exists")]
    IdExists,

    #[error("failed to allocate unique id")]
    AllocationFailed,
}

/// Per-tunnel request policy, validated at registration time.
#[derive(Debug, Default, Clone)]
pub struct TunnelPolicy {
    pub basic_auth: Option<BasicAuthSpec>,
    pub allow_methods: Vec<String>,
    pub allow_paths: Vec<String>,
    pub allow_path_prefixes: Vec<String>,
    pub allow_cidrs: Vec<IpNetwork>,
    pub deny_cidrs: Vec<IpNetwork>,
    pub request_header_add: Vec<(String, String)>,
    pub request_header_remove: Vec<String>,
    pub response_header_add: Vec<(String, String)>,
    pub response_header_remove: Vec<String>,
}

impl TunnelPolicy {
    /// Validate the policy fields of a tunnel request. Everything here is
    /// attacker-controlled; errors carry the offending field name and are
    /// sent back verbatim on the control stream.
    pub fn from_request(request: &HttpTunnelRequest) -> Result<Self, ProtoError> {
        let mut policy = TunnelPolicy {
            basic_auth: parse_basic_auth(&request.basic_auth)?,
            allow_methods: parse_method_list("allow_method", &request.allow_method)?,
            allow_paths: parse_path_list("allow_path", &request.allow_path)?,
            allow_path_prefixes: parse_path_list("allow_path_prefix", &request.allow_path_prefix)?,
            allow_cidrs: parse_cidr_list("allow_cidr", &request.allow_cidr)?,
            deny_cidrs: parse_cidr_list("deny_cidr", &request.deny_cidr)?,
            ..Default::default()
        };

        for kv in &request.request_header_add {
            let name = normalize_header_name("request_header_add", &kv.name)?;
            let value = validate_header_value("request_header_add", &name, &kv.value)?;
            policy.request_header_add.push((name, value));
        }
        for name in &request.request_header_remove {
            policy
                .request_header_remove
                .push(normalize_header_name("request_header_remove", name)?);
        }
        for kv in &request.response_header_add {
            let name = normalize_header_name("response_header_add", &kv.name)?;
            let value = validate_header_value("response_header_add", &name, &kv.value)?;
            policy.response_header_add.push((name, value));
        }
        for name in &request.response_header_remove {
            policy
                .response_header_remove
                .push(normalize_header_name("response_header_remove", name)?);
        }

        Ok(policy)
    }
}

/// A registered HTTP tunnel.
#[derive(Clone)]
pub struct HttpTunnelEntry {
    pub session: Arc<MuxSession>,
    pub policy: Arc<TunnelPolicy>,
}

/// Registry of live HTTP tunnels.
#[derive(Default)]
pub struct TunnelRegistry {
    http_tunnels: DashMap<String, HttpTunnelEntry>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_http_tunnel(
        &self,
        id: &str,
        entry: HttpTunnelEntry,
    ) -> Result<(), RegistryError> {
        let id = normalize_id(id);
        if id.is_empty() {
            return Err(RegistryError::EmptyId);
        }

        // Entry API keeps check-and-insert atomic.
        match self.http_tunnels.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RegistryError::IdExists),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    pub fn get_http_tunnel(&self, id: &str) -> Option<HttpTunnelEntry> {
        let id = normalize_id(id);
        if id.is_empty() {
            return None;
        }
        self.http_tunnels.get(&id).map(|entry| entry.clone())
    }

    pub fn unregister_http_tunnel(&self, id: &str) {
        let id = normalize_id(id);
        if id.is_empty() {
            return;
        }
        self.http_tunnels.remove(&id);
    }

    pub fn active_http_tunnels(&self) -> usize {
        self.http_tunnels.len()
    }

    /// Draw a random unused id.
    pub fn allocate_id(&self) -> Result<String, RegistryError> {
        let mut rng = rand::thread_rng();

        for _ in 0..ID_ALLOC_ATTEMPTS {
            let id: String = (0..ID_LEN)
                .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
                .collect();

            if !self.http_tunnels.contains_key(&id) {
                return Ok(id);
            }
        }

        Err(RegistryError::AllocationFailed)
    }
}

fn normalize_id(id: &str) -> String {
    id.trim().to_ascii_lowercase()
}
