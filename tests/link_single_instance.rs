// One test in its own binary: the one-link rule is process wide.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use meshcord::bridge::CrossThreadRelay;
use meshcord::meshtastic::{DeviceAddress, LinkError, LinkOptions, RadioLinkHandle};

fn options() -> LinkOptions {
    LinkOptions {
        connect_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

#[test]
fn only_one_device_link_per_process() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let address = DeviceAddress::parse(&format!("127.0.0.1:{}", port), 115200).unwrap();

    let (relay, _events) = CrossThreadRelay::new();
    let first = RadioLinkHandle::connect(&address, options(), Arc::new(relay.clone())).unwrap();
    let _device = listener.accept().unwrap();

    let second = RadioLinkHandle::connect(&address, options(), Arc::new(relay.clone()));
    assert!(matches!(second, Err(LinkError::AlreadyOpen)));

    // Clones share the one link; dropping the last handle frees the slot.
    let clone = first.clone();
    drop(first);
    assert!(matches!(
        RadioLinkHandle::connect(&address, options(), Arc::new(relay.clone())),
        Err(LinkError::AlreadyOpen)
    ));
    drop(clone);

    let reopened = RadioLinkHandle::connect(&address, options(), Arc::new(relay.clone()));
    assert!(reopened.is_ok());
    drop(reopened);

    // A failed open does not hold the slot either.
    drop(listener);
    let closed = RadioLinkHandle::connect(&address, options(), Arc::new(relay.clone()));
    assert!(matches!(closed, Err(LinkError::Unavailable { .. })));
    let retry = RadioLinkHandle::connect(&address, options(), Arc::new(relay));
    assert!(matches!(retry, Err(LinkError::Unavailable { .. })));
}
