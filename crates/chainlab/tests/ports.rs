use std::collections::BTreeSet;
use std::net::TcpListener;

use chainlab::ports::{allocate, PortRange};
use chainlab::SetupError;

#[test]
fn allocates_within_range_and_outside_exclude() {
    let range = PortRange::new(19000, 19020).unwrap();
    let exclude: BTreeSet<u16> = [19000, 19001, 19002].into_iter().collect();

    let port = allocate(range, &exclude).unwrap();
    assert!((19000..=19020).contains(&port));
    assert!(!exclude.contains(&port));

    // the probe was released, so the port is still bindable
    let _listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
}

#[test]
fn allocation_is_deterministic_lowest_first() {
    let range = PortRange::new(19100, 19110).unwrap();
    let exclude = BTreeSet::new();
    let first = allocate(range, &exclude).unwrap();
    let second = allocate(range, &exclude).unwrap();
    // nothing claimed between the calls, so the same candidate wins twice
    assert_eq!(first, second);
}

#[test]
fn bound_ports_are_skipped() {
    let range = PortRange::new(19200, 19210).unwrap();
    let exclude = BTreeSet::new();

    let first = allocate(range, &exclude).unwrap();
    let _holder = TcpListener::bind(("127.0.0.1", first)).unwrap();

    let second = allocate(range, &exclude).unwrap();
    assert_ne!(first, second);
}

#[test]
fn exhausted_range_reports_no_port_available() {
    let range = PortRange::new(19300, 19304).unwrap();
    let exclude: BTreeSet<u16> = (19300..=19304).collect();

    let err = allocate(range, &exclude).unwrap_err();
    assert!(matches!(err, SetupError::NoPortAvailable { lo: 19300, hi: 19304 }));
}
