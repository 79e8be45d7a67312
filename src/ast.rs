//! Parsed schema document: the message, package and role declarations before table building.
//!
//! Any schema front end (the bundled table language, or an external MDL export) produces a
//! [`SchemaDocument`]; [`crate::schema::SchemaTables::build`] turns it into lookup tables.

use std::net::SocketAddrV4;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDocument {
    pub defaults: DefaultsSection,
    pub messages: Vec<MessageDefinition>,
    pub packages: Vec<PackageDefinition>,
    pub roles: Vec<RoleDefinition>,
}

/// Document-wide fallbacks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefaultsSection {
    pub destination: Option<SocketAddrV4>,
    pub time_increment: Option<f64>,
}

/// A message type (MDID) and where it is sent.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDefinition {
    pub name: String,
    pub message_type_id: u32,
    pub destination: Option<SocketAddrV4>,
    /// Names of the package definitions this message carries.
    pub packages: Vec<String>,
}

/// A package type (PDID) and its data structure.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageDefinition {
    pub name: String,
    pub package_type_id: u32,
    pub time_increment: Option<f64>,
    pub fields: Vec<FieldDeclaration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDeclaration {
    pub width_bits: u32,
    pub repeat: RepeatDecl,
    pub measurement: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatDecl {
    Count(u32),
    Unbounded,
}

/// A role and the message types it subscribes to.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleDefinition {
    pub name: String,
    pub subscriptions: Vec<String>,
}

impl SchemaDocument {
    pub fn message(&self, name: &str) -> Option<&MessageDefinition> {
        self.messages.iter().find(|m| m.name == name)
    }

    pub fn package(&self, name: &str) -> Option<&PackageDefinition> {
        self.packages.iter().find(|p| p.name == name)
    }

    pub fn role(&self, name: &str) -> Option<&RoleDefinition> {
        self.roles.iter().find(|r| r.name == name)
    }
}
