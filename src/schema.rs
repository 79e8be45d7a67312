//! Schema table builder: turns a [`SchemaDocument`] into the lookup tables used at runtime.
//!
//! - [`DecoderTable`]: PDID → [`PackageLayout`] for the field decoder.
//! - [`EndpointTable`]: MDID → destination endpoint for egress, with a default fallback.
//! - Role subscriptions: role name → MDIDs, resolved to multicast groups for ingest.
//!
//! All validation happens here, once; the tables are immutable afterwards.

use crate::ast::{RepeatDecl, SchemaDocument};
use crate::decode::{DecoderTable, FieldSpec, PackageLayout, Repetition, DEFAULT_TIME_INCREMENT, MAX_FIELD_WIDTH};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::Path;

/// Destination used for message types the schema does not list.
pub const DEFAULT_ENDPOINT: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(239, 88, 88, 88), DEFAULT_TDM_PORT);
pub const DEFAULT_TDM_PORT: u16 = 50003;

/// Where one message type is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointBinding {
    pub message_type_id: u32,
    pub name: String,
    pub destination: SocketAddrV4,
}

/// MDID → endpoint, with a fallback for unlisted message types.
#[derive(Debug, Clone)]
pub struct EndpointTable {
    bindings: HashMap<u32, EndpointBinding>,
    default: SocketAddrV4,
}

impl Default for EndpointTable {
    fn default() -> Self {
        EndpointTable::new(DEFAULT_ENDPOINT)
    }
}

impl EndpointTable {
    pub fn new(default: SocketAddrV4) -> Self {
        EndpointTable {
            bindings: HashMap::new(),
            default,
        }
    }

    pub fn insert(&mut self, binding: EndpointBinding) -> Option<EndpointBinding> {
        self.bindings.insert(binding.message_type_id, binding)
    }

    pub fn get(&self, message_type_id: u32) -> Option<&EndpointBinding> {
        self.bindings.get(&message_type_id)
    }

    /// Destination for `message_type_id`, or the default endpoint when unlisted.
    pub fn resolve(&self, message_type_id: u32) -> SocketAddrV4 {
        self.bindings
            .get(&message_type_id)
            .map(|b| b.destination)
            .unwrap_or(self.default)
    }

    pub fn default_endpoint(&self) -> SocketAddrV4 {
        self.default
    }

    pub fn set_default_endpoint(&mut self, default: SocketAddrV4) {
        self.default = default;
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// All runtime tables derived from one schema.
#[derive(Debug, Clone, Default)]
pub struct SchemaTables {
    pub decoders: DecoderTable,
    pub endpoints: EndpointTable,
    roles: HashMap<String, Vec<u32>>,
}

impl SchemaTables {
    /// Parse and build from a schema file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let doc = crate::parser::parse_file(path)?;
        let tables = Self::build(&doc)?;
        tracing::info!(
            schema = %path.display(),
            packages = tables.decoders.len(),
            messages = tables.endpoints.len(),
            roles = tables.roles.len(),
            "schema loaded"
        );
        Ok(tables)
    }

    /// Validate `doc` and build the lookup tables.
    pub fn build(doc: &SchemaDocument) -> Result<Self, ConfigError> {
        let default_increment = match doc.defaults.time_increment {
            Some(v) => check_increment("defaults", v)?,
            None => DEFAULT_TIME_INCREMENT,
        };

        let mut decoders = DecoderTable::new();
        let mut package_names = HashSet::new();
        for p in &doc.packages {
            if !package_names.insert(p.name.as_str()) {
                return Err(ConfigError::Duplicate {
                    kind: "package",
                    name: p.name.clone(),
                });
            }
            let time_increment = match p.time_increment {
                Some(v) => check_increment(&p.name, v)?,
                None => default_increment,
            };
            let mut fields = Vec::with_capacity(p.fields.len());
            for (index, f) in p.fields.iter().enumerate() {
                if f.width_bits == 0 || f.width_bits > MAX_FIELD_WIDTH {
                    return Err(ConfigError::InvalidWidth {
                        package: p.name.clone(),
                        index,
                        width: f.width_bits,
                    });
                }
                let repetition = match f.repeat {
                    RepeatDecl::Count(0) => {
                        return Err(ConfigError::ZeroRepetition {
                            package: p.name.clone(),
                            index,
                        })
                    }
                    RepeatDecl::Count(n) => Repetition::Fixed(n),
                    RepeatDecl::Unbounded if index + 1 != p.fields.len() => {
                        return Err(ConfigError::UnboundedNotLast {
                            package: p.name.clone(),
                            index,
                        })
                    }
                    RepeatDecl::Unbounded => Repetition::Unbounded,
                };
                fields.push(FieldSpec {
                    width_bits: f.width_bits,
                    measurement_name: f.measurement.clone(),
                    repetition,
                });
            }
            let layout = PackageLayout {
                package_type_id: p.package_type_id,
                name: p.name.clone(),
                fields,
                time_increment,
            };
            if let Some(prev) = decoders.insert(layout) {
                return Err(ConfigError::DuplicateId {
                    kind: "package",
                    id: p.package_type_id,
                    name: prev.name,
                });
            }
        }

        let mut endpoints = EndpointTable::new(doc.defaults.destination.unwrap_or(DEFAULT_ENDPOINT));
        let mut message_ids: HashMap<&str, u32> = HashMap::new();
        for m in &doc.messages {
            if message_ids.insert(m.name.as_str(), m.message_type_id).is_some() {
                return Err(ConfigError::Duplicate {
                    kind: "message",
                    name: m.name.clone(),
                });
            }
            for pkg in &m.packages {
                if !package_names.contains(pkg.as_str()) {
                    return Err(ConfigError::UnknownPackage {
                        message: m.name.clone(),
                        package: pkg.clone(),
                    });
                }
            }
            let destination = m
                .destination
                .ok_or_else(|| ConfigError::MissingDestination(m.name.clone()))?;
            let binding = EndpointBinding {
                message_type_id: m.message_type_id,
                name: m.name.clone(),
                destination,
            };
            if let Some(prev) = endpoints.insert(binding) {
                return Err(ConfigError::DuplicateId {
                    kind: "message",
                    id: m.message_type_id,
                    name: prev.name,
                });
            }
        }

        let mut roles = HashMap::new();
        for r in &doc.roles {
            let mut ids = Vec::with_capacity(r.subscriptions.len());
            for sub in &r.subscriptions {
                let id = message_ids.get(sub.as_str()).ok_or_else(|| ConfigError::UnknownMessage {
                    role: r.name.clone(),
                    message: sub.clone(),
                })?;
                if !ids.contains(id) {
                    ids.push(*id);
                }
            }
            if roles.insert(r.name.clone(), ids).is_some() {
                return Err(ConfigError::Duplicate {
                    kind: "role",
                    name: r.name.clone(),
                });
            }
        }

        Ok(SchemaTables {
            decoders,
            endpoints,
            roles,
        })
    }

    /// MDIDs a role subscribes to, in declaration order.
    pub fn subscriptions(&self, role: &str) -> Result<&[u32], ConfigError> {
        self.roles
            .get(role)
            .map(Vec::as_slice)
            .ok_or_else(|| ConfigError::UnknownRole(role.to_string()))
    }

    /// Distinct multicast groups to join for a role. Non-multicast destinations are skipped.
    pub fn subscription_groups(&self, role: &str) -> Result<Vec<Ipv4Addr>, ConfigError> {
        let mut groups = Vec::new();
        for &mdid in self.subscriptions(role)? {
            let addr = *self.endpoints.resolve(mdid).ip();
            if !addr.is_multicast() {
                tracing::warn!(role, mdid = format_args!("0x{:08x}", mdid), %addr, "subscribed destination is not multicast; not joining");
                continue;
            }
            if !groups.contains(&addr) {
                groups.push(addr);
            }
        }
        Ok(groups)
    }
}

fn check_increment(scope: &str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidIncrement {
            scope: scope.to_string(),
            value,
        })
    }
}
