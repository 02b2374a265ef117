//! Branches served over real sockets on ephemeral ports.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use ledger_sim::runtime::{aggregate, drive_customers, TcpCluster};
use ledger_sim::server::BranchServer;
use ledger_sim::transport::tcp::frame_codec;
use ledger_sim::transport::{AddressBook, PeerTransport, Reply, TcpTransport};
use ledger_sim::{Branch, CustomerDriver, CustomerRequest, Delivery, Envelope, Interface, Outcome, ReplicationConfig, Roster, ScheduledRequest};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

const ROSTER: &str = r#"[
    {"type": "branch", "id": 1, "balance": 100},
    {"type": "branch", "id": 2, "balance": 100},
    {"type": "branch", "id": 3, "balance": 100},
    {"type": "customer", "id": 1, "customer-requests": [
        {"customer_request_id": 1, "interface": "deposit", "amount": 60},
        {"customer_request_id": 2, "interface": "query"}
    ]},
    {"type": "customer", "id": 2, "customer-requests": [
        {"customer_request_id": 3, "interface": "withdraw", "amount": 20}
    ]},
    {"type": "customer", "id": 3, "customer-requests": [
        {"customer_request_id": 4, "interface": "withdraw", "amount": 500}
    ]}
]"#;

#[tokio::test]
async fn test_cluster_run_converges() {
    let roster = Roster::from_json(ROSTER).unwrap();
    let cluster = TcpCluster::boot(&roster, &ReplicationConfig::ephemeral()).await.unwrap();
    assert_eq!(cluster.book().len(), 3);

    let runs = drive_customers(&roster, cluster.transport()).await.unwrap();
    let balances = cluster.balances();
    cluster.shutdown().await.unwrap();

    assert!(balances.values().all(|b| *b == 140), "{:?}", balances);

    let outcomes: Vec<(u64, Outcome)> = runs
        .iter()
        .flat_map(|run| run.receipts.iter())
        .map(|r| (r.customer_request_id, r.result))
        .collect();
    assert!(outcomes.contains(&(1, Outcome::Success)));
    assert!(outcomes.contains(&(3, Outcome::Success)));
    assert!(outcomes.contains(&(4, Outcome::Rejected)));

    let report = aggregate(&runs);
    // Deposit and withdraw: 1 send + 1 receive + 2 * (sent + peer receive)
    assert_eq!(report.trace_of(1).count(), 6);
    assert_eq!(report.trace_of(3).count(), 6);
    // Query and rejected withdraw never leave their branch
    assert_eq!(report.trace_of(2).count(), 2);
    assert_eq!(report.trace_of(4).count(), 2);
}

#[tokio::test]
async fn test_server_rejects_garbage_and_keeps_serving() {
    let roster = Roster::from_json(
        r#"[{"type": "branch", "id": 1, "balance": 5}]"#,
    )
    .unwrap();
    let cluster = TcpCluster::boot(&roster, &ReplicationConfig::ephemeral()).await.unwrap();
    let addr = cluster.book().get(1).unwrap();

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, frame_codec(1024 * 1024));
    framed.send(Bytes::from_static(b"{not json")).await.unwrap();
    let frame = framed.next().await.unwrap().unwrap();
    assert!(matches!(Reply::deserialize(&frame).unwrap(), Reply::Rejected { .. }));

    // Same connection still answers well-formed calls
    let request = CustomerRequest::new(1, Interface::Query, 0).stamped(1);
    let payload = serde_json::to_vec(&Envelope::from_customer(1, request)).unwrap();
    framed.send(Bytes::from(payload)).await.unwrap();
    let frame = framed.next().await.unwrap().unwrap();
    let delivery = Reply::deserialize(&frame).unwrap().into_result(1).unwrap();
    assert_eq!(delivery.receipts[0].balance, Some(5));

    // And through the regular client
    let delivery = cluster
        .transport()
        .deliver(1, Envelope::from_customer(1, request))
        .await
        .unwrap();
    assert_eq!(delivery.events[0].logical_clock, 3);

    cluster.shutdown().await.unwrap();
}

/// A peer that acknowledges every propagation after `delay`.
async fn slow_peer(delay: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut framed = Framed::new(stream, frame_codec(1024 * 1024));
                while let Some(Ok(_frame)) = framed.next().await {
                    tokio::time::sleep(delay).await;
                    let reply = Reply::Delivered {
                        delivery: Delivery::default(),
                    };
                    if framed.send(Bytes::from(reply.serialize().unwrap())).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    addr
}

#[tokio::test]
async fn test_customer_waits_out_slow_fan_out() {
    // Each propagation fits its own timeout, the whole fan-out does not
    let config = ReplicationConfig {
        rpc_timeout: Duration::from_millis(300),
        ..ReplicationConfig::ephemeral()
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut book = AddressBook::new();
    book.insert(1, listener.local_addr().unwrap());
    book.insert(2, slow_peer(Duration::from_millis(200)).await);
    book.insert(3, slow_peer(Duration::from_millis(200)).await);
    let transport = TcpTransport::new(book, &config);

    let branch = Arc::new(Branch::new(1, 100, &[1, 2, 3], transport.clone()));
    let shutdown = CancellationToken::new();
    tokio::spawn(BranchServer::new(branch.clone(), listener, &config).serve(shutdown.clone()));

    let request = CustomerRequest::new(1, Interface::Deposit, 10).stamped(1);
    let delivery = transport
        .deliver(1, Envelope::from_customer(1, request))
        .await
        .unwrap();

    // The customer saw the same outcome the origin committed
    assert_eq!(delivery.receipts[0].result, Outcome::Success);
    assert_eq!(branch.balance(), 110);
    assert!(delivery.events.iter().all(|e| !e.comment.contains("(failed:")));

    shutdown.cancel();
}

#[tokio::test]
async fn test_queued_customer_times_out_while_origin_commits() {
    let config = ReplicationConfig {
        rpc_timeout: Duration::from_millis(300),
        ..ReplicationConfig::ephemeral()
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut book = AddressBook::new();
    book.insert(1, listener.local_addr().unwrap());
    book.insert(2, slow_peer(Duration::from_millis(100)).await);
    book.insert(3, slow_peer(Duration::from_millis(100)).await);
    let transport = TcpTransport::new(book, &config);

    let branch = Arc::new(Branch::new(1, 100, &[1, 2, 3], transport.clone()));
    let shutdown = CancellationToken::new();
    tokio::spawn(BranchServer::new(branch.clone(), listener, &config).serve(shutdown.clone()));

    // Six fan-outs of 200ms serialised at one origin cannot all fit the
    // 900ms customer budget
    let mut drivers = tokio::task::JoinSet::new();
    for customer in 1..=6u32 {
        let requests = vec![ScheduledRequest {
            request: CustomerRequest::new(u64::from(customer), Interface::Deposit, 10),
            branch: 1,
        }];
        drivers.spawn(CustomerDriver::new(customer, requests, transport.clone()).run());
    }
    let mut runs = Vec::new();
    while let Some(run) = drivers.join_next().await {
        runs.push(run.unwrap());
    }

    let failed: Vec<_> = runs
        .iter()
        .filter(|run| run.outcomes().any(|o| o == Outcome::Failed))
        .collect();
    assert!(!failed.is_empty());
    for run in &failed {
        assert!(
            run.events[0].comment.contains("(failed: call to branch 1 timed out after 900ms)"),
            "{}",
            run.events[0].comment
        );
    }

    // The origin still commits what the timed-out customers sent
    for _ in 0..50 {
        if branch.balance() == 160 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(branch.balance(), 160);

    shutdown.cancel();
}
