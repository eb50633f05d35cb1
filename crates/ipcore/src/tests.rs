use alloc::vec::Vec;

use crate::repr::{Ipv4Flags, Ipv4Protocols};
use crate::{
    AutoConfig, Config, EngineTx, Error, EthernetAddress, InstanceConfig, InstanceId, InterfaceId, Ipv4Address,
    Ipv4Header, Ipv4Packet, LinkFlags, RxFrame, Service, TxData, TxOverride,
};

pub(crate) mod mock {
    use alloc::boxed::Box;
    use alloc::collections::BTreeMap;
    use alloc::rc::Rc;
    use alloc::vec::Vec;
    use core::cell::RefCell;

    use crate::dev::{FrameId, Media, Resolver, TxFrame};
    use crate::iface::{InterfaceId, Link};
    use crate::repr::{EthernetAddress, Ipv4Address};
    use crate::{Error, Result};

    pub const LOCAL_MAC: EthernetAddress = EthernetAddress([2, 0, 0, 0, 0, 1]);
    pub const PEER_MAC: EthernetAddress = EthernetAddress([2, 0, 0, 0, 0, 2]);
    pub const GATEWAY_MAC: EthernetAddress = EthernetAddress([2, 0, 0, 0, 0, 0xfe]);

    pub struct Sent {
        pub id: FrameId,
        pub dst: EthernetAddress,
        pub src: EthernetAddress,
        pub ethertype: u16,
        pub data: Vec<u8>,
    }

    // everything the engine asked of the media and resolver
    #[derive(Default)]
    pub struct Wire {
        pub mtu: usize,
        pub sent: Vec<Sent>,
        pub receives: Vec<FrameId>,
        pub cancelled: Vec<FrameId>,
        pub multicast: Vec<(EthernetAddress, bool)>,
        // resolver cache
        pub arp: BTreeMap<Ipv4Address, EthernetAddress>,
        pub requests: Vec<Ipv4Address>,
        pub arp_cancels: Vec<Ipv4Address>,
        pub refuse_transmit: bool,
    }

    pub type Shared = Rc<RefCell<Wire>>;

    struct MockMedia {
        wire: Shared,
        mac: EthernetAddress,
    }

    impl Media for MockMedia {
        fn mtu(&self) -> usize {
            self.wire.borrow().mtu
        }

        fn mac(&self) -> EthernetAddress {
            self.mac
        }

        fn transmit(&mut self, id: FrameId, frame: &TxFrame) -> Result<()> {
            let mut wire = self.wire.borrow_mut();
            if wire.refuse_transmit {
                return Err(Error::Device);
            }
            wire.sent.push(Sent {
                id,
                dst: frame.dst,
                src: frame.src,
                ethertype: frame.ethertype,
                data: frame.to_vec(),
            });
            Ok(())
        }

        fn receive(&mut self, id: FrameId) -> Result<()> {
            self.wire.borrow_mut().receives.push(id);
            Ok(())
        }

        fn cancel(&mut self, id: FrameId) {
            self.wire.borrow_mut().cancelled.push(id);
        }

        fn set_multicast(&mut self, mac: EthernetAddress, join: bool) -> Result<()> {
            self.wire.borrow_mut().multicast.push((mac, join));
            Ok(())
        }
    }

    struct MockResolver(Shared);

    impl Resolver for MockResolver {
        fn lookup(&mut self, _iface: InterfaceId, target: Ipv4Address) -> Option<EthernetAddress> {
            self.0.borrow().arp.get(&target).copied()
        }

        fn request(
            &mut self,
            _iface: InterfaceId,
            _station: Ipv4Address,
            target: Ipv4Address,
        ) -> Result<Option<EthernetAddress>> {
            self.0.borrow_mut().requests.push(target);
            Ok(None)
        }

        fn cancel(&mut self, _iface: InterfaceId, target: Ipv4Address) {
            self.0.borrow_mut().arp_cancels.push(target);
        }
    }

    pub fn devices(mtu: usize, mac: EthernetAddress) -> (Box<dyn Media>, Box<dyn Resolver>, Shared) {
        let wire = Rc::new(RefCell::new(Wire {
            mtu,
            ..Wire::default()
        }));
        let media = MockMedia {
            wire: wire.clone(),
            mac,
        };
        (Box::new(media), Box::new(MockResolver(wire.clone())), wire)
    }

    pub fn link(mtu: usize) -> (Link, Shared) {
        let (media, resolver, wire) = devices(mtu, LOCAL_MAC);
        (Link::new(media, resolver), wire)
    }
}

const LOCAL: Ipv4Address = Ipv4Address::new(192, 168, 1, 10);
const PEER: Ipv4Address = Ipv4Address::new(192, 168, 1, 20);
const GATEWAY: Ipv4Address = Ipv4Address::new(192, 168, 1, 1);
const MASK: Ipv4Address = Ipv4Address::new(255, 255, 255, 0);

fn service(mtu: usize, mac: EthernetAddress, station: Ipv4Address) -> (Service, mock::Shared) {
    let (media, resolver, wire) = mock::devices(mtu, mac);
    let mut service = Service::new(media, resolver, Config::default());
    service.start().unwrap();
    service
        .apply_config(AutoConfig {
            station,
            mask: MASK,
            gateway: GATEWAY,
            dns: vec![Ipv4Address::new(192, 168, 1, 53)],
        })
        .unwrap();
    (service, wire)
}

fn local() -> (Service, mock::Shared) {
    service(1500, mock::LOCAL_MAC, LOCAL)
}

fn udp() -> InstanceConfig {
    InstanceConfig {
        default_protocol: Ipv4Protocols::UDP,
        ..InstanceConfig::default()
    }
}

fn instance(service: &mut Service, config: InstanceConfig) -> InstanceId {
    let id = service.create_instance();
    service.configure_instance(id, Some(config)).unwrap();
    id
}

fn to(dst: Ipv4Address, payload: &[u8]) -> TxData {
    TxData {
        dst,
        payload: payload.to_vec(),
        ..TxData::default()
    }
}

fn datagram(src: Ipv4Address, dst: Ipv4Address, payload: &[u8]) -> Vec<u8> {
    let mut header = Ipv4Header::new(src, dst, Ipv4Protocols::UDP);
    header.total_len = (20 + payload.len()) as u16;
    let mut bytes = header.to_bytes(&[]);
    bytes.extend_from_slice(payload);
    bytes
}

// hands a frame to the receive the service has outstanding
fn deliver(service: &mut Service, wire: &mock::Shared, data: Vec<u8>) {
    let id = *wire.borrow().receives.last().unwrap();
    service.frame_received(id, Ok(RxFrame {
        data,
        flags: LinkFlags::empty(),
    }));
}

fn ack_all(service: &mut Service, wire: &mock::Shared) {
    let ids: Vec<_> = wire.borrow().sent.iter().map(|f| f.id).collect();
    for id in ids {
        service.frame_sent(id, Ok(()));
    }
}

#[test]
fn start_twice() {
    let (mut service, wire) = local();
    assert_eq!(service.start(), Err(Error::AlreadyStarted));
    assert_eq!(wire.borrow().receives.len(), 1);
    assert_eq!(service.dns_servers(), &[Ipv4Address::new(192, 168, 1, 53)]);
}

#[test]
fn direct_and_gateway_routes() {
    let (mut service, wire) = local();
    wire.borrow_mut().arp.insert(PEER, mock::PEER_MAC);
    let inst = instance(&mut service, udp());

    assert_eq!(
        service.default_routes(),
        vec![
            (Ipv4Address::new(192, 168, 1, 0), MASK, Ipv4Address::UNSPECIFIED),
            (Ipv4Address::UNSPECIFIED, Ipv4Address::UNSPECIFIED, GATEWAY),
        ]
    );

    let token = service.transmit(inst, to(PEER, b"hello")).unwrap();
    assert_eq!(wire.borrow().sent[0].dst, mock::PEER_MAC);
    assert_eq!(wire.borrow().sent[0].src, mock::LOCAL_MAC);
    assert_eq!(wire.borrow().sent[0].ethertype, 0x0800);
    assert!(!token.is_done());
    ack_all(&mut service, &wire);
    assert_eq!(token.try_take(), Some(Ok(())));

    let remote = Ipv4Address::new(8, 8, 8, 8);
    let token = service.transmit(inst, to(remote, b"far away")).unwrap();
    assert_eq!(wire.borrow().requests, vec![GATEWAY]);
    assert_eq!(wire.borrow().sent.len(), 1);

    service.arp_resolved(InterfaceId(0), GATEWAY, Ok(mock::GATEWAY_MAC));
    let wire = wire.borrow();
    let sent = &wire.sent[1];
    assert_eq!(sent.dst, mock::GATEWAY_MAC);
    let packet = Ipv4Packet::new_checked(&sent.data[..]).unwrap();
    assert_eq!(packet.dst_addr(), remote);
    assert_eq!(packet.src_addr(), LOCAL);
    assert_eq!(packet.payload(), b"far away");
    assert!(!token.is_done());
}

#[test]
fn fragments_reassemble_at_peer() {
    let (mut sender, sender_wire) = local();
    sender_wire.borrow_mut().arp.insert(PEER, mock::PEER_MAC);
    let tx = instance(&mut sender, udp());

    let (mut peer, peer_wire) = service(1500, mock::PEER_MAC, PEER);
    let rx = instance(&mut peer, udp());
    let received = peer.receive(rx).unwrap();

    let data: Vec<u8> = (0..3000).map(|i| (i % 251) as u8).collect();
    let sent = sender.transmit(tx, to(PEER, &data)).unwrap();

    let frames: Vec<Vec<u8>> = sender_wire.borrow().sent.iter().map(|f| f.data.clone()).collect();
    assert_eq!(frames.len(), 3);
    assert_eq!(frames.iter().map(Vec::len).collect::<Vec<_>>(), vec![60, 1500, 1500]);

    for (i, frame) in frames.into_iter().enumerate() {
        assert!(!received.is_done());
        deliver(&mut peer, &peer_wire, frame);
        if i == 0 {
            assert_eq!(peer.pending_fragments(), 1);
        }
    }

    let rx_data = received.try_take().unwrap().unwrap();
    assert_eq!(rx_data.payload, data);
    assert_eq!(rx_data.header.src_addr, LOCAL);
    assert_eq!(peer.pending_fragments(), 0);
    // every frame reposted the receive
    assert_eq!(peer_wire.borrow().receives.len(), 4);

    assert!(!sent.is_done());
    ack_all(&mut sender, &sender_wire);
    assert_eq!(sent.try_take(), Some(Ok(())));
}

#[test]
fn resolution_queue_is_fifo() {
    let (mut service, wire) = local();
    let inst = instance(&mut service, udp());
    let target = Ipv4Address::new(192, 168, 1, 30);

    let first = service.transmit(inst, to(target, &[1])).unwrap();
    let second = service.transmit(inst, to(target, &[2])).unwrap();
    assert_eq!(wire.borrow().requests, vec![target]);

    service.arp_resolved(InterfaceId(0), target, Err(Error::Timeout));
    assert_eq!(first.try_take(), Some(Err(Error::NoMapping)));
    assert_eq!(second.try_take(), Some(Err(Error::NoMapping)));

    let _first = service.transmit(inst, to(target, &[3])).unwrap();
    let _second = service.transmit(inst, to(target, &[4])).unwrap();
    service.arp_resolved(InterfaceId(0), target, Ok(mock::PEER_MAC));

    let payloads: Vec<u8> = wire.borrow().sent.iter().map(|f| f.data[20]).collect();
    assert_eq!(payloads, vec![3, 4]);
}

#[test]
fn host_mask_retries_through_gateway() {
    let (media, resolver, wire) = mock::devices(1500, mock::LOCAL_MAC);
    let mut service = Service::new(media, resolver, Config::default());
    service.start().unwrap();
    let station = Ipv4Address::new(10, 0, 0, 5);
    let gateway = Ipv4Address::new(10, 0, 0, 1);
    service
        .apply_config(AutoConfig {
            station,
            mask: Ipv4Address::BROADCAST,
            gateway,
            dns: Vec::new(),
        })
        .unwrap();

    let dst = Ipv4Address::new(10, 0, 0, 9);
    let token = service
        .send(EngineTx::new(Ipv4Address::UNSPECIFIED, dst, Ipv4Protocols::ICMP, vec![0; 8]))
        .unwrap();
    assert_eq!(wire.borrow().requests, vec![dst]);

    service.arp_resolved(InterfaceId(0), dst, Err(Error::Timeout));
    assert_eq!(wire.borrow().requests, vec![dst, gateway]);
    assert!(!token.is_done());

    service.arp_resolved(InterfaceId(0), gateway, Ok(mock::GATEWAY_MAC));
    let wire = wire.borrow();
    let sent = &wire.sent[0];
    assert_eq!(sent.dst, mock::GATEWAY_MAC);
    let packet = Ipv4Packet::new_checked(&sent.data[..]).unwrap();
    assert_eq!(packet.src_addr(), station);
    assert_eq!(packet.dst_addr(), dst);
    assert_eq!(packet.ttl(), 64);
}

#[test]
fn destroy_aborts_outstanding_tokens() {
    let (mut service, wire) = local();
    let inst = instance(&mut service, udp());
    let target = Ipv4Address::new(192, 168, 1, 30);

    let sent = service.transmit(inst, to(target, &[1])).unwrap();
    let received = service.receive(inst).unwrap();
    service.destroy_instance(inst).unwrap();

    assert_eq!(sent.try_take(), Some(Err(Error::Aborted)));
    assert_eq!(received.try_take(), Some(Err(Error::Aborted)));
    assert_eq!(wire.borrow().arp_cancels, vec![target]);
    assert!(service.default_interface().map_or(false, |i| i.is_idle()));
    assert_eq!(service.destroy_instance(inst), Err(Error::NotFound));
}

#[test]
fn transmit_times_out() {
    let (mut service, _wire) = local();
    let inst = instance(&mut service, InstanceConfig {
        transmit_timeout: 2,
        ..udp()
    });

    let token = service.transmit(inst, to(Ipv4Address::new(192, 168, 1, 30), &[1])).unwrap();
    service.tick();
    assert!(!token.is_done());
    service.tick();
    assert_eq!(token.try_take(), Some(Err(Error::Timeout)));
}

#[test]
fn cancel_one_receive() {
    let (mut service, _wire) = local();
    let inst = instance(&mut service, udp());

    let first = service.receive(inst).unwrap();
    let second = service.receive(inst).unwrap();
    service.cancel(inst, Some(first.id())).unwrap();
    assert_eq!(first.try_take(), Some(Err(Error::Aborted)));
    assert!(!second.is_done());
    assert_eq!(service.cancel(inst, Some(first.id())), Err(Error::NotFound));

    service.cancel(inst, None).unwrap();
    assert_eq!(second.try_take(), Some(Err(Error::Aborted)));
}

#[test]
fn queued_datagram_completes_later_receive() {
    let (mut service, wire) = local();
    let inst = instance(&mut service, InstanceConfig {
        receive_timeout: 3,
        ..udp()
    });

    deliver(&mut service, &wire, datagram(PEER, LOCAL, b"early"));
    let token = service.receive(inst).unwrap();
    assert_eq!(token.try_take().unwrap().unwrap().payload, b"early".to_vec());

    // nobody receives this one before it expires
    deliver(&mut service, &wire, datagram(PEER, LOCAL, b"late"));
    for _ in 0..3 {
        service.tick();
    }
    let token = service.receive(inst).unwrap();
    assert!(!token.is_done());
}

#[test]
fn aborted_receive_is_not_reposted() {
    let (mut service, wire) = local();
    let id = *wire.borrow().receives.last().unwrap();
    service.frame_received(id, Err(Error::Device));
    assert_eq!(wire.borrow().receives.len(), 2);

    let id = *wire.borrow().receives.last().unwrap();
    service.frame_received(id, Err(Error::Aborted));
    assert_eq!(wire.borrow().receives.len(), 2);

    // stale completion
    service.frame_received(id, Ok(RxFrame::default()));
    assert_eq!(wire.borrow().receives.len(), 2);
}

#[test]
fn foreign_and_corrupt_datagrams_are_dropped() {
    let (mut service, wire) = local();
    let inst = instance(&mut service, udp());
    let token = service.receive(inst).unwrap();

    deliver(&mut service, &wire, datagram(PEER, Ipv4Address::new(192, 168, 1, 99), b"not mine"));
    let mut corrupt = datagram(PEER, LOCAL, b"bad");
    corrupt[10] ^= 0x55;
    deliver(&mut service, &wire, corrupt);
    assert!(!token.is_done());

    let mut padded = datagram(PEER, LOCAL, b"ok");
    padded.extend_from_slice(&[0; 26]);
    deliver(&mut service, &wire, padded);
    assert_eq!(token.try_take().unwrap().unwrap().payload, b"ok".to_vec());
}

#[test]
fn multicast_membership_is_counted() {
    let (mut service, wire) = local();
    let a = instance(&mut service, udp());
    let b = instance(&mut service, udp());
    let group = Ipv4Address::new(224, 0, 0, 9);
    let mac = EthernetAddress([0x01, 0x00, 0x5e, 0, 0, 9]);

    assert_eq!(service.join_group(a, Some(PEER)), Err(Error::InvalidParameter));
    assert_eq!(service.join_group(a, None), Err(Error::InvalidParameter));
    service.join_group(a, Some(group)).unwrap();
    service.join_group(b, Some(group)).unwrap();
    assert_eq!(service.join_group(b, Some(group)), Err(Error::AlreadyStarted));
    assert_eq!(wire.borrow().multicast, vec![(mac, true)]);

    let rx_a = service.receive(a).unwrap();
    let rx_b = service.receive(b).unwrap();
    service.leave_group(b, Some(group)).unwrap();
    assert_eq!(service.leave_group(b, Some(group)), Err(Error::NotFound));
    assert_eq!(wire.borrow().multicast, vec![(mac, true)]);

    deliver(&mut service, &wire, datagram(PEER, group, b"group"));
    assert_eq!(rx_a.try_take().unwrap().unwrap().payload, b"group".to_vec());
    assert!(!rx_b.is_done());

    service.leave_group(a, None).unwrap();
    assert_eq!(wire.borrow().multicast, vec![(mac, true), (mac, false)]);
}

#[test]
fn broadcast_needs_opt_in() {
    let (mut service, wire) = local();
    let plain = instance(&mut service, udp());
    let bcast = instance(&mut service, InstanceConfig {
        accept_broadcast: true,
        ..udp()
    });
    let rx_plain = service.receive(plain).unwrap();
    let rx_bcast = service.receive(bcast).unwrap();

    deliver(&mut service, &wire, datagram(PEER, Ipv4Address::new(192, 168, 1, 255), b"all"));
    assert!(!rx_plain.is_done());
    assert_eq!(rx_bcast.try_take().unwrap().unwrap().payload, b"all".to_vec());
}

#[test]
fn overrides_and_raw_sends() {
    let (mut service, wire) = local();
    wire.borrow_mut().arp.insert(PEER, mock::PEER_MAC);
    let inst = instance(&mut service, udp());

    let data = TxData {
        overrides: Some(TxOverride {
            protocol: Some(Ipv4Protocols::TCP),
            ttl: Some(7),
            tos: Some(0x10),
            do_not_fragment: Some(true),
            ..TxOverride::default()
        }),
        ..to(PEER, &[0; 4])
    };
    service.transmit(inst, data).unwrap();

    let bad_gateway = TxData {
        overrides: Some(TxOverride {
            gateway: Some(Ipv4Address::new(10, 9, 9, 9)),
            ..TxOverride::default()
        }),
        ..to(PEER, &[0; 4])
    };
    assert_eq!(service.transmit(inst, bad_gateway).err(), Some(Error::InvalidParameter));
    assert_eq!(service.transmit(inst, to(PEER, &[0; 1600 - 20])).err(), None);

    let raw = instance(&mut service, InstanceConfig {
        raw_data: true,
        ..udp()
    });
    let mut header = Ipv4Header::new(Ipv4Address::UNSPECIFIED, PEER, Ipv4Protocols::UDP);
    header.total_len = 24;
    header.flags = Ipv4Flags::empty();
    let mut bytes = header.to_bytes(&[]);
    bytes.extend_from_slice(&[9; 4]);
    service.transmit(raw, to(Ipv4Address::UNSPECIFIED, &bytes)).unwrap();
    assert_eq!(service.transmit(raw, to(PEER, &vec![0x45; 1600])).err(), Some(Error::InvalidParameter));

    let sent = wire.borrow();
    let first = Ipv4Packet::new_checked(&sent.sent[0].data[..]).unwrap();
    assert_eq!(first.protocol(), Ipv4Protocols::TCP);
    assert_eq!(first.ttl(), 7);
    assert_eq!(first.tos(), 0x10);
    assert!(first.dont_frag());

    let last = Ipv4Packet::new_checked(&sent.sent.last().unwrap().data[..]).unwrap();
    assert_eq!(last.src_addr(), LOCAL);
    assert_eq!(last.payload(), &[9; 4]);
    assert!(last.verify_checksum());
}

#[test]
fn instance_addressing_and_mode_data() {
    let (mut service, _wire) = local();
    let inst = service.create_instance();
    assert_eq!(service.transmit(inst, to(PEER, &[1])).err(), Some(Error::NotStarted));
    assert_eq!(service.mode_data(inst).unwrap().config, None);

    let station = Ipv4Address::new(10, 1, 0, 5);
    let mask = Ipv4Address::new(255, 255, 0, 0);
    let config = InstanceConfig {
        use_default_address: false,
        station_address: station,
        subnet_mask: mask,
        ..udp()
    };
    service.configure_instance(inst, Some(config.clone())).unwrap();
    assert_eq!(service.interfaces().len(), 2);

    let mode = service.mode_data(inst).unwrap();
    assert!(mode.configured);
    assert_eq!(mode.station_address, station);
    assert_eq!(mode.subnet_mask, mask);
    assert_eq!(mode.max_packet_size, 1480);
    assert_eq!(mode.routes[0], (Ipv4Address::new(10, 1, 0, 0), mask, Ipv4Address::UNSPECIFIED));
    assert_eq!(mode.routes.len(), 3);

    // filters change in place, the address binding does not
    let looser = InstanceConfig {
        accept_any_protocol: true,
        ..config.clone()
    };
    service.configure_instance(inst, Some(looser)).unwrap();
    let moved = InstanceConfig {
        station_address: Ipv4Address::new(10, 1, 0, 6),
        ..config.clone()
    };
    assert_eq!(service.configure_instance(inst, Some(moved.clone())), Err(Error::AlreadyStarted));

    service.configure_instance(inst, None).unwrap();
    assert_eq!(service.interfaces().len(), 1);
    service.configure_instance(inst, Some(moved)).unwrap();
    assert_eq!(service.mode_data(inst).unwrap().station_address, Ipv4Address::new(10, 1, 0, 6));

    let bad = InstanceConfig {
        subnet_mask: Ipv4Address::new(255, 0, 255, 0),
        ..config
    };
    let other = service.create_instance();
    assert_eq!(service.configure_instance(other, Some(bad)), Err(Error::InvalidParameter));
}

#[test]
fn instances_share_an_interface() {
    let (mut service, _wire) = local();
    let config = InstanceConfig {
        use_default_address: false,
        station_address: Ipv4Address::new(10, 1, 0, 5),
        subnet_mask: Ipv4Address::new(255, 255, 0, 0),
        ..udp()
    };
    let a = instance(&mut service, config.clone());
    let b = instance(&mut service, config);
    assert_eq!(service.interfaces().len(), 2);

    service.destroy_instance(a).unwrap();
    assert_eq!(service.interfaces().len(), 2);
    service.destroy_instance(b).unwrap();
    assert_eq!(service.interfaces().len(), 1);
}

#[test]
fn instance_routes() {
    let (mut service, wire) = local();
    let inst = instance(&mut service, udp());
    let net = Ipv4Address::new(172, 16, 0, 0);
    let mask = Ipv4Address::new(255, 255, 0, 0);
    let router = Ipv4Address::new(192, 168, 1, 2);

    assert_eq!(
        service.add_route(inst, net, mask, Ipv4Address::new(10, 0, 0, 1)),
        Err(Error::InvalidParameter)
    );
    service.add_route(inst, net, mask, router).unwrap();
    assert_eq!(service.add_route(inst, net, mask, router), Err(Error::DuplicateRoute));

    service.transmit(inst, to(Ipv4Address::new(172, 16, 3, 4), &[1])).unwrap();
    assert_eq!(wire.borrow().requests, vec![router]);

    service.delete_route(inst, net, mask, router).unwrap();
    assert_eq!(service.delete_route(inst, net, mask, router), Err(Error::NotFound));
    service.transmit(inst, to(Ipv4Address::new(172, 16, 3, 4), &[1])).unwrap();
    assert_eq!(wire.borrow().requests, vec![router, GATEWAY]);
}

#[test]
fn reconfigure_drops_address_and_queue() {
    let (mut service, _wire) = local();
    let inst = instance(&mut service, udp());
    let pending = service.transmit(inst, to(Ipv4Address::new(192, 168, 1, 30), &[1])).unwrap();

    service.reconfigure();
    assert_eq!(pending.try_take(), Some(Err(Error::Aborted)));
    assert_eq!(service.transmit(inst, to(PEER, &[1])).err(), Some(Error::NoMapping));
    assert!(service.default_routes().is_empty());
    assert!(service.dns_servers().is_empty());
}

#[test]
fn media_refusal_fails_the_send() {
    let (mut service, wire) = local();
    wire.borrow_mut().arp.insert(PEER, mock::PEER_MAC);
    wire.borrow_mut().refuse_transmit = true;
    let inst = instance(&mut service, udp());
    assert_eq!(service.transmit(inst, to(PEER, &[1])).err(), Some(Error::Device));
}

#[test]
fn shutdown_aborts_in_flight_frames() {
    let (mut service, wire) = local();
    wire.borrow_mut().arp.insert(PEER, mock::PEER_MAC);
    let inst = instance(&mut service, udp());
    let token = service.transmit(inst, to(PEER, &[1])).unwrap();

    service.shutdown();
    assert_eq!(token.try_take(), Some(Err(Error::Aborted)));
    let frame = wire.borrow().sent[0].id;
    let receive = wire.borrow().receives[0];
    assert!(wire.borrow().cancelled.contains(&frame));
    assert!(wire.borrow().cancelled.contains(&receive));
    assert!(!service.is_started());
    assert!(service.default_interface().map_or(false, |i| !i.configured));

    // late acknowledgement finds nothing
    ack_all(&mut service, &wire);
    assert_eq!(service.send(EngineTx::new(LOCAL, PEER, 17, vec![1])).err(), Some(Error::NoMapping));
}
