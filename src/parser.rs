//! Parse schema table source into a [`SchemaDocument`] using PEST.
//!
//! ```text
//! defaults {
//!   destination: 239.88.88.88:50003;
//!   time_increment: 0.000125;
//! }
//!
//! message EngineStatus 0x00000010 {
//!   destination: 239.88.1.16:50003;
//!   packages: EngineTemps;
//! }
//!
//! package EngineTemps 0x00000101 {
//!   time_increment: 0.001;
//!   field 16 -> EGT;
//!   field 4;                  // spare bits
//!   field 12 [3] -> Vibration;
//!   field 16 [*] -> "Fuel Flow";
//! }
//!
//! role GroundStation {
//!   subscribe: EngineStatus;
//! }
//! ```

use crate::ast::*;
use crate::error::ConfigError;
use pest::Parser;
use pest_derive::Parser as PestParser;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::Path;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct SchemaParser;

type Pair<'i> = pest::iterators::Pair<'i, Rule>;

/// Parse schema source into a document.
pub fn parse(source: &str) -> Result<SchemaDocument, ConfigError> {
    let pairs = SchemaParser::parse(Rule::schema, source)
        .map_err(|e| ConfigError::Parse(format!("{}", e)))?;
    let pair = pairs
        .into_iter()
        .next()
        .ok_or_else(|| ConfigError::Parse("empty parse".to_string()))?;
    build_schema(pair).map_err(ConfigError::Parse)
}

/// Read and parse a schema file.
pub fn parse_file(path: &Path) -> Result<SchemaDocument, ConfigError> {
    let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&src)
}

fn build_schema(pair: Pair) -> Result<SchemaDocument, String> {
    let mut doc = SchemaDocument::default();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::defaults_section => build_defaults(inner, &mut doc.defaults)?,
            Rule::message_section => doc.messages.push(build_message(inner)?),
            Rule::package_section => doc.packages.push(build_package(inner)?),
            Rule::role_section => doc.roles.push(build_role(inner)?),
            _ => {}
        }
    }
    Ok(doc)
}

fn build_defaults(pair: Pair, defaults: &mut DefaultsSection) -> Result<(), String> {
    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::destination_item => defaults.destination = Some(build_destination(item)?),
            Rule::increment_item => defaults.time_increment = Some(build_increment(item)?),
            _ => {}
        }
    }
    Ok(())
}

fn build_message(pair: Pair) -> Result<MessageDefinition, String> {
    let mut it = pair.into_inner();
    let name = it.next().ok_or("message: name")?.as_str().to_string();
    let id_pair = it.next().ok_or("message: id")?;
    let message_type_id = parse_id(id_pair.as_str()).map_err(|e| format!("message {}: {}", name, e))?;
    let mut destination = None;
    let mut packages = Vec::new();
    for item in it {
        match item.as_rule() {
            Rule::destination_item => {
                destination = Some(build_destination(item).map_err(|e| format!("message {}: {}", name, e))?)
            }
            Rule::packages_item => {
                if let Some(list) = item.into_inner().next() {
                    packages.extend(ident_list(list));
                }
            }
            _ => {}
        }
    }
    Ok(MessageDefinition {
        name,
        message_type_id,
        destination,
        packages,
    })
}

fn build_package(pair: Pair) -> Result<PackageDefinition, String> {
    let mut it = pair.into_inner();
    let name = it.next().ok_or("package: name")?.as_str().to_string();
    let id_pair = it.next().ok_or("package: id")?;
    let package_type_id = parse_id(id_pair.as_str()).map_err(|e| format!("package {}: {}", name, e))?;
    let mut time_increment = None;
    let mut fields = Vec::new();
    for item in it {
        match item.as_rule() {
            Rule::increment_item => time_increment = Some(build_increment(item)?),
            Rule::field_decl => fields.push(build_field(item).map_err(|e| format!("package {}: {}", name, e))?),
            _ => {}
        }
    }
    Ok(PackageDefinition {
        name,
        package_type_id,
        time_increment,
        fields,
    })
}

fn build_field(pair: Pair) -> Result<FieldDeclaration, String> {
    let mut width_bits = None;
    let mut repeat = RepeatDecl::Count(1);
    let mut measurement = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::width => {
                width_bits = Some(
                    inner
                        .as_str()
                        .parse::<u32>()
                        .map_err(|e| format!("field width {}: {}", inner.as_str(), e))?,
                )
            }
            Rule::repeat => {
                let r = inner.into_inner().next().ok_or("field repeat: value")?;
                repeat = match r.as_rule() {
                    Rule::unbounded => RepeatDecl::Unbounded,
                    _ => RepeatDecl::Count(
                        r.as_str()
                            .parse::<u32>()
                            .map_err(|e| format!("field repeat {}: {}", r.as_str(), e))?,
                    ),
                };
            }
            Rule::binding => {
                let m = inner.into_inner().next().ok_or("field binding: measurement")?;
                measurement = Some(measurement_name(m)?);
            }
            _ => {}
        }
    }
    Ok(FieldDeclaration {
        width_bits: width_bits.ok_or("field: width")?,
        repeat,
        measurement,
    })
}

fn measurement_name(pair: Pair) -> Result<String, String> {
    let inner = pair.into_inner().next().ok_or("measurement: name")?;
    match inner.as_rule() {
        Rule::string => Ok(inner
            .into_inner()
            .next()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default()),
        _ => Ok(inner.as_str().to_string()),
    }
}

fn build_role(pair: Pair) -> Result<RoleDefinition, String> {
    let mut it = pair.into_inner();
    let name = it.next().ok_or("role: name")?.as_str().to_string();
    let mut subscriptions = Vec::new();
    for item in it {
        if item.as_rule() == Rule::subscribe_item {
            if let Some(list) = item.into_inner().next() {
                subscriptions.extend(ident_list(list));
            }
        }
    }
    Ok(RoleDefinition { name, subscriptions })
}

fn build_destination(pair: Pair) -> Result<SocketAddrV4, String> {
    let endpoint = pair.into_inner().next().ok_or("destination: endpoint")?;
    let mut it = endpoint.into_inner();
    let ip_str = it.next().ok_or("destination: address")?.as_str();
    let port_str = it.next().ok_or("destination: port")?.as_str();
    let ip: Ipv4Addr = ip_str
        .parse()
        .map_err(|e| format!("destination address {}: {}", ip_str, e))?;
    let port: u16 = port_str
        .parse()
        .map_err(|e| format!("destination port {}: {}", port_str, e))?;
    Ok(SocketAddrV4::new(ip, port))
}

fn build_increment(pair: Pair) -> Result<f64, String> {
    let v = pair.into_inner().next().ok_or("time_increment: value")?;
    v.as_str()
        .parse::<f64>()
        .map_err(|e| format!("time_increment {}: {}", v.as_str(), e))
}

fn ident_list(pair: Pair) -> Vec<String> {
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::ident)
        .map(|p| p.as_str().to_string())
        .collect()
}

fn parse_id(s: &str) -> Result<u32, String> {
    let parsed = match s.get(..2) {
        Some("0x") | Some("0X") => u32::from_str_radix(&s[2..], 16),
        _ => s.parse::<u32>(),
    };
    parsed.map_err(|e| format!("id {}: {}", s, e))
}
