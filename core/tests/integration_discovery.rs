//! Route discovery end to end over the in-memory medium.
//!
//! Run with: cargo test --test integration_discovery

mod common;

use aodv_mesh_core::{Notification, ProtocolConfig, BROADCAST_ADDRESS, MAX_USER_DATA_SIZE};
use common::{quiet_config, rreps_from, rreqs_from, settle, Mesh};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_discovery_between_neighbors() {
    let mut mesh = Mesh::chain(&[1, 2], quiet_config());

    mesh.node(1).send_data(7, 2, b"hello".to_vec());

    mesh.expect(1, Notification::SendSucceeded { packet_id: 7 }).await;
    mesh.expect(
        2,
        Notification::DataReceived {
            sender: 1,
            payload: b"hello".to_vec(),
        },
    )
    .await;

    let rreqs = rreqs_from(&mesh.network, 1);
    assert_eq!(rreqs.len(), 1, "exactly one RREQ for one discovery");
    assert_eq!(rreqs[0].destination_address, 2);
    assert_eq!(rreqs[0].destination_sequence_number, 0);
    assert_eq!(rreqs[0].broadcast_id, 0);
    assert_eq!(rreqs[0].hop_count, 0);

    let rreps = rreps_from(&mesh.network, 2);
    assert_eq!(rreps.len(), 1);
    let (to, rrep) = &rreps[0];
    assert_eq!(*to, 1);
    assert_eq!(rrep.source_address, 1);
    assert_eq!(rrep.destination_address, 2);
    assert_eq!(rrep.destination_sequence_number, mesh.node(2).current_sequence_number());

    println!("✓ Neighbors discover each other on demand");
    mesh.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_multi_hop_discovery_and_relay() {
    let mut mesh = Mesh::chain(&[1, 2, 3], quiet_config());

    mesh.node(1).send_data(1, 3, b"over two hops".to_vec());

    mesh.expect(1, Notification::SendSucceeded { packet_id: 1 }).await;
    mesh.expect(
        3,
        Notification::DataReceived {
            sender: 1,
            payload: b"over two hops".to_vec(),
        },
    )
    .await;

    let route = mesh
        .node(1)
        .forward_routes()
        .into_iter()
        .find(|r| r.destination == 3)
        .expect("route to 3");
    assert_eq!(route.next_hop, 2);
    assert_eq!(route.hop_count, 2);
    assert!(route.valid);

    let relayed = rreqs_from(&mesh.network, 2);
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0].hop_count, 1);

    let relay_routes = mesh.node(2).forward_routes();
    let towards_3 = relay_routes.iter().find(|r| r.destination == 3).unwrap();
    assert_eq!(towards_3.precursors, vec![1]);

    println!("✓ Intermediate node relays discovery and data");
    mesh.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_packets_wait_for_one_discovery() {
    let mut mesh = Mesh::chain(&[1, 2, 3], quiet_config());

    for packet_id in 10..13 {
        mesh.node(1).send_data(packet_id, 3, vec![b'a'; 8]);
    }

    for packet_id in 10..13 {
        mesh.expect(1, Notification::SendSucceeded { packet_id }).await;
    }
    assert_eq!(rreqs_from(&mesh.network, 1).len(), 1);
    assert_eq!(mesh.node(1).queue_depths().application, 0);
    mesh.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_data_reaches_neighbors_only() {
    let mut mesh = Mesh::chain(&[1, 2, 3], quiet_config());

    mesh.node(2).send_data(5, BROADCAST_ADDRESS, b"all".to_vec());

    mesh.expect(2, Notification::SendSucceeded { packet_id: 5 }).await;
    mesh.expect(
        1,
        Notification::DataReceived {
            sender: 2,
            payload: b"all".to_vec(),
        },
    )
    .await;
    mesh.expect(
        3,
        Notification::DataReceived {
            sender: 2,
            payload: b"all".to_vec(),
        },
    )
    .await;
    assert!(rreqs_from(&mesh.network, 2).is_empty());
    mesh.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_invalid_sends_are_reported() {
    let mut mesh = Mesh::chain(&[1, 2], quiet_config());

    mesh.node(1).send_data(1, 1, b"self".to_vec());
    mesh.node(1).send_data(2, 300, b"nowhere".to_vec());
    mesh.node(1).send_data(3, 2, vec![0; MAX_USER_DATA_SIZE + 1]);

    mesh.expect(1, Notification::InvalidDestination { packet_id: 1 }).await;
    mesh.expect(1, Notification::InvalidDestination { packet_id: 2 }).await;
    mesh.expect(1, Notification::PayloadTooLarge { packet_id: 3 }).await;
    assert!(rreqs_from(&mesh.network, 1).is_empty());
    mesh.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_discovery_gives_up_after_retries() {
    let config = ProtocolConfig {
        path_discovery_time_ms: 1_000,
        ..quiet_config()
    };
    let mut mesh = Mesh::start(&[1], config);

    mesh.node(1).send_data(5, 9, b"lost".to_vec());
    mesh.expect(1, Notification::RouteEstablishmentFailed { destination: 9 })
        .await;

    let rreqs = rreqs_from(&mesh.network, 1);
    let ids: Vec<u32> = rreqs.iter().map(|r| r.broadcast_id).collect();
    assert_eq!(ids, vec![0, 1]);
    assert!(rreqs.iter().all(|r| r.destination_address == 9));

    // No second failure, no stuck queue.
    tokio::time::sleep(Duration::from_secs(10)).await;
    let late = mesh.drain(1);
    assert!(
        !late
            .iter()
            .any(|n| matches!(n, Notification::RouteEstablishmentFailed { .. })),
        "failure reported twice: {:?}",
        late
    );
    assert!(mesh.node(1).route_requests().is_empty());
    assert_eq!(mesh.node(1).queue_depths().application, 0);

    mesh.node(1).send_data(6, 8, b"next".to_vec());
    settle().await;
    assert_eq!(rreqs_from(&mesh.network, 1).last().unwrap().destination_address, 8);

    println!("✓ Discovery fails once after the last retry");
    mesh.stop().await;
}
