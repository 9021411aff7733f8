//! Tests for the admin command parser

use cinder_routing::{Command, DestSpec, MatcherSpec, RouteKind};

use crate::parse::parse_command;

#[test]
fn parses_add_black() {
    assert_eq!(
        parse_command("addBlack noise.").unwrap(),
        Command::AddBlack {
            prefix: "noise.".into()
        }
    );
}

#[test]
fn parses_add_route_with_matchers_and_options() {
    let cmd = parse_command(
        "addRoute sendAllMatch core prefix=foo. sub=cpu regex=.*load$ \
         10.0.0.1:2003 spool=true pickle=false 10.0.0.2:2003 pickle=true",
    )
    .unwrap();

    assert_eq!(
        cmd,
        Command::AddRoute {
            kind: Some(RouteKind::SendAll),
            key: "core".into(),
            matcher: MatcherSpec {
                prefix: Some("foo.".into()),
                substring: Some("cpu".into()),
                regex: Some(".*load$".into()),
            },
            dests: vec![
                DestSpec {
                    addr: "10.0.0.1:2003".into(),
                    instance: None,
                    spool: Some(true),
                    pickle: Some(false),
                },
                DestSpec {
                    addr: "10.0.0.2:2003".into(),
                    instance: None,
                    spool: None,
                    pickle: Some(true),
                },
            ],
        }
    );
}

#[test]
fn parses_send_first_match() {
    let cmd = parse_command("addRoute sendFirstMatch failover 10.0.0.1:2003 10.0.0.2:2003")
        .unwrap();
    match cmd {
        Command::AddRoute { kind, dests, .. } => {
            assert_eq!(kind, Some(RouteKind::SendFirst));
            assert_eq!(dests.len(), 2);
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn parses_add_dest() {
    let cmd = parse_command("addDest core 10.0.0.3:2003 spool=true").unwrap();
    assert_eq!(
        cmd,
        Command::AddDest {
            key: "core".into(),
            dest: DestSpec {
                addr: "10.0.0.3:2003".into(),
                instance: None,
                spool: Some(true),
                pickle: None,
            },
        }
    );
}

#[test]
fn parses_mod_dest() {
    let cmd = parse_command("modDest core 1 addr=10.0.0.9:2003 pickle=true").unwrap();
    match cmd {
        Command::ModDest { key, index, opts } => {
            assert_eq!(key, "core");
            assert_eq!(index, 1);
            assert_eq!(opts.addr.as_deref(), Some("10.0.0.9:2003"));
            assert_eq!(opts.pickle, Some(true));
            assert_eq!(opts.spool, None);
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn parses_mod_route_and_del_route() {
    assert_eq!(
        parse_command("modRoute core prefix=new.").unwrap(),
        Command::ModRoute {
            key: "core".into(),
            matcher: MatcherSpec {
                prefix: Some("new.".into()),
                ..Default::default()
            },
        }
    );
    assert_eq!(
        parse_command("delRoute core").unwrap(),
        Command::DelRoute { key: "core".into() }
    );
}

#[test]
fn rejects_malformed_commands() {
    for bad in [
        "",
        "frobnicate x",
        "addBlack",
        "addRoute sendAllMatch",
        "addRoute roundRobin key 10.0.0.1:2003",
        "addRoute sendAllMatch key",
        "addRoute sendAllMatch key spool=true",
        "addDest core",
        "addDest core a:1 b:2",
        "modDest core x addr=y",
        "modDest core 0 spool=maybe",
        "modRoute core",
        "delRoute",
        "delRoute core extra",
        "addRoute sendAllMatch key 10.0.0.1:2003 color=red",
    ] {
        assert!(parse_command(bad).is_err(), "expected error for '{bad}'");
    }
}
