//! Schema table language: syntax (parse success/failure) and semantics (table building).

use tmnshark::ast::RepeatDecl;
use tmnshark::decode::DEFAULT_TIME_INCREMENT;
use tmnshark::{parse, ConfigError, FieldSpec, Repetition, SchemaTables};

const FLIGHT: &str = r#"
// ground test article
defaults {
  destination: 239.88.88.88:50003;
  time_increment: 0.000125;
}

message EngineStatus 0x00000010 {
  destination: 239.88.1.16:50003;
  packages: EngineTemps, Vibration;
}

message Nav 0x00000020 {
  destination: 239.88.1.32:50003;
  packages: Vibration;
}

message Local 0x30 {
  destination: 10.0.0.5:50003;
}

package EngineTemps 0x00000101 {
  field 16 -> EGT;
  field 4;                /* spare */
  field 12 [3] -> Oil;
}

package Vibration 0x00000102 {
  time_increment: 0.001;
  field 16 [*] -> "Vib X";
}

role GroundStation {
  subscribe: EngineStatus, Nav;
}

role Recorder {
  subscribe: Nav, Local, Nav;
}
"#;

// ==================== Syntax ====================

#[test]
fn parse_empty_schema() {
    let doc = parse("").expect("empty schema parses");
    assert!(doc.messages.is_empty());
    assert!(doc.packages.is_empty());
    assert!(doc.roles.is_empty());
}

#[test]
fn parse_full_schema() {
    let doc = parse(FLIGHT).expect("parse");
    assert_eq!(doc.messages.len(), 3);
    assert_eq!(doc.packages.len(), 2);
    assert_eq!(doc.roles.len(), 2);
    assert_eq!(doc.defaults.time_increment, Some(0.000125));

    let m = doc.message("EngineStatus").expect("message");
    assert_eq!(m.message_type_id, 0x10);
    assert_eq!(m.packages, vec!["EngineTemps", "Vibration"]);

    let p = doc.package("EngineTemps").expect("package");
    assert_eq!(p.fields.len(), 3);
    assert_eq!(p.fields[1].measurement, None);
    assert_eq!(p.fields[2].repeat, RepeatDecl::Count(3));

    let v = doc.package("Vibration").unwrap();
    assert_eq!(v.time_increment, Some(0.001));
    assert_eq!(v.fields[0].repeat, RepeatDecl::Unbounded);
    assert_eq!(v.fields[0].measurement.as_deref(), Some("Vib X"));
}

#[test]
fn parse_decimal_ids() {
    let doc = parse("package P 257 { field 8 -> a; }").unwrap();
    assert_eq!(doc.packages[0].package_type_id, 257);
}

#[test]
fn parse_rejects_missing_semicolon() {
    assert!(matches!(parse("package P 1 { field 8 -> a }"), Err(ConfigError::Parse(_))));
}

#[test]
fn parse_rejects_unknown_section() {
    assert!(matches!(parse("struct S { }"), Err(ConfigError::Parse(_))));
}

#[test]
fn parse_rejects_bad_address() {
    assert!(matches!(
        parse("message M 1 { destination: 239.300.1.1:50003; }"),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn parse_rejects_id_overflow() {
    assert!(matches!(parse("message M 0x100000000 { }"), Err(ConfigError::Parse(_))));
}

// ==================== Semantics ====================

#[test]
fn build_decoder_table() {
    let t = SchemaTables::build(&parse(FLIGHT).unwrap()).expect("build");
    assert_eq!(t.decoders.len(), 2);
    let temps = t.decoders.get(0x101).unwrap();
    assert_eq!(
        temps.fields,
        vec![
            FieldSpec::bound(16, "EGT"),
            FieldSpec::padding(4),
            FieldSpec::new(12, Some("Oil"), Repetition::Fixed(3)),
        ]
    );
    assert_eq!(temps.fixed_bits(), 16 + 4 + 36);
    assert_eq!(temps.time_increment, DEFAULT_TIME_INCREMENT);
    assert_eq!(t.decoders.get(0x102).unwrap().time_increment, 0.001);
}

#[test]
fn build_endpoint_table() {
    let t = SchemaTables::build(&parse(FLIGHT).unwrap()).unwrap();
    assert_eq!(t.endpoints.len(), 3);
    assert_eq!(t.endpoints.get(0x20).unwrap().name, "Nav");
    assert_eq!(t.endpoints.resolve(0x20), "239.88.1.32:50003".parse().unwrap());
    assert_eq!(t.endpoints.resolve(0x99), "239.88.88.88:50003".parse().unwrap());
}

#[test]
fn role_subscriptions_and_groups() {
    let t = SchemaTables::build(&parse(FLIGHT).unwrap()).unwrap();
    assert_eq!(t.subscriptions("GroundStation").unwrap(), &[0x10, 0x20]);
    assert_eq!(t.subscriptions("Recorder").unwrap(), &[0x20, 0x30]);
    let groups = t.subscription_groups("Recorder").unwrap();
    // unicast destination of Local is not joined
    assert_eq!(groups, vec!["239.88.1.32".parse::<std::net::Ipv4Addr>().unwrap()]);
}

#[test]
fn duplicate_package_name() {
    let doc = parse("package P 1 { field 8; } package P 2 { field 8; }").unwrap();
    assert!(matches!(
        SchemaTables::build(&doc),
        Err(ConfigError::Duplicate { kind: "package", .. })
    ));
}

#[test]
fn duplicate_package_id() {
    let doc = parse("package A 1 { field 8; } package B 1 { field 8; }").unwrap();
    assert!(matches!(
        SchemaTables::build(&doc),
        Err(ConfigError::DuplicateId { kind: "package", id: 1, .. })
    ));
}

#[test]
fn message_references_unknown_package() {
    let doc = parse("message M 1 { destination: 239.1.1.1:1; packages: Nope; }").unwrap();
    assert!(matches!(SchemaTables::build(&doc), Err(ConfigError::UnknownPackage { .. })));
}

#[test]
fn role_references_unknown_message() {
    let doc = parse("role R { subscribe: Ghost; }").unwrap();
    assert!(matches!(SchemaTables::build(&doc), Err(ConfigError::UnknownMessage { .. })));
}

#[test]
fn invalid_field_widths() {
    for src in ["package P 1 { field 0; }", "package P 1 { field 65; }"] {
        let doc = parse(src).unwrap();
        assert!(matches!(SchemaTables::build(&doc), Err(ConfigError::InvalidWidth { .. })), "{}", src);
    }
}

#[test]
fn zero_repetition() {
    let doc = parse("package P 1 { field 8 [0] -> a; }").unwrap();
    assert!(matches!(SchemaTables::build(&doc), Err(ConfigError::ZeroRepetition { .. })));
}

#[test]
fn unbounded_must_be_last() {
    let doc = parse("package P 1 { field 8 [*] -> a; field 8 -> b; }").unwrap();
    assert!(matches!(
        SchemaTables::build(&doc),
        Err(ConfigError::UnboundedNotLast { index: 0, .. })
    ));
}

#[test]
fn load_reports_missing_file() {
    let r = SchemaTables::load(std::path::Path::new("/nonexistent/schema.tdl"));
    assert!(matches!(r, Err(ConfigError::Read { .. })));
}

#[test]
fn load_from_file() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut f, FLIGHT.as_bytes()).unwrap();
    let t = SchemaTables::load(f.path()).unwrap();
    assert_eq!(t.decoders.len(), 2);
}
