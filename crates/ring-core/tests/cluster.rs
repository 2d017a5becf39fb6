//! Cluster scenarios on the in-memory network, driven by tokio's paused clock.

use ring_core::{
    ClusterEvent, InMemoryStore, LossControl, LossyTransport, MemoryFileNetwork,
    MemoryFileTransport, MemoryNetwork, MemoryTransport, Node, NodeConfig, Subscription,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

type ClusterNode = Node<LossyTransport<MemoryTransport>, MemoryFileTransport, Arc<InMemoryStore>>;

struct Cluster {
    net: MemoryNetwork,
    files: MemoryFileNetwork,
    nodes: Vec<Arc<ClusterNode>>,
    stores: Vec<Arc<InMemoryStore>>,
    losses: Vec<LossControl>,
    tasks: Vec<JoinHandle<()>>,
}

impl Cluster {
    /// Start every node; the first host is the Gateway. Everyone else joins.
    async fn start(hosts: &[&str]) -> Self {
        let net = MemoryNetwork::new();
        let files = MemoryFileNetwork::new();
        let config = NodeConfig::with_gateway(hosts[0]);

        let mut cluster = Cluster {
            net: net.clone(),
            files: files.clone(),
            nodes: Vec::new(),
            stores: Vec::new(),
            losses: Vec::new(),
            tasks: Vec::new(),
        };

        for host in hosts {
            let (transport, inbox) = net.attach(*host);
            let loss = LossControl::new(0);
            let store = Arc::new(InMemoryStore::new());
            let node = Arc::new(Node::new(
                *host,
                config.clone(),
                LossyTransport::new(transport, loss.clone()),
                files.attach(*host, Arc::clone(&store)),
                Arc::clone(&store),
            ));

            cluster.tasks.push(tokio::spawn(Arc::clone(&node).serve(inbox)));
            cluster.tasks.extend(node.spawn_background());
            cluster.nodes.push(node);
            cluster.stores.push(store);
            cluster.losses.push(loss);
        }

        for node in &cluster.nodes[1..] {
            node.join().await.unwrap();
            settle().await;
        }
        cluster
    }

    fn node(&self, host: &str) -> &Arc<ClusterNode> {
        self.nodes
            .iter()
            .find(|n| n.host() == host)
            .unwrap()
    }

    fn store(&self, host: &str) -> &Arc<InMemoryStore> {
        let ix = self.nodes.iter().position(|n| n.host() == host).unwrap();
        &self.stores[ix]
    }

    fn ring_of(&self, host: &str) -> Vec<String> {
        self.node(host)
            .ring_members()
            .into_iter()
            .map(|m| m.host)
            .collect()
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Let queued packets drain.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Count failure declarations about `target` made by `node`.
fn count_declarations(node: &ClusterNode, target: Option<&str>) -> (Arc<AtomicUsize>, Subscription) {
    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = Arc::clone(&count);
    let target = target.map(str::to_string);
    let sub = node.events().subscribe(move |event| {
        if let ClusterEvent::FailureDeclared { host } = event {
            if target.as_deref().is_none_or(|t| t == host) {
                count_clone.fetch_add(1, Ordering::Relaxed);
            }
        }
    });
    (count, sub)
}

// ==================== Membership ====================

#[tokio::test(start_paused = true)]
async fn test_ring_converges_after_joins() {
    let hosts = ["g", "a", "b", "c", "d"];
    let cluster = Cluster::start(&hosts).await;

    for host in hosts {
        assert_eq!(cluster.ring_of(host), hosts, "ring at {}", host);
    }

    // Healthy heartbeats keep everyone in the ring
    tokio::time::sleep(Duration::from_secs(10)).await;
    for host in hosts {
        assert_eq!(cluster.ring_of(host).len(), 5);
    }
}

#[tokio::test(start_paused = true)]
async fn test_isolated_node_declared_failed_once_per_node() {
    let hosts = ["g", "a", "b", "c", "d"];
    let cluster = Cluster::start(&hosts).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let counters: Vec<_> = hosts[..4]
        .iter()
        .map(|h| count_declarations(cluster.node(h), Some("d")))
        .collect();

    cluster.net.isolate("d");
    tokio::time::sleep(Duration::from_secs(10)).await;

    let mut total = 0;
    for (host, (count, _sub)) in hosts[..4].iter().zip(&counters) {
        let declared = count.load(Ordering::Relaxed);
        assert!(declared <= 1, "{} declared d failed {} times", host, declared);
        total += declared;
        assert_eq!(cluster.ring_of(host), vec!["g", "a", "b", "c"]);
    }
    assert!(total >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_leave_removes_member_everywhere() {
    let hosts = ["g", "a", "b", "c", "d"];
    let cluster = Cluster::start(&hosts).await;

    cluster.node("c").leave().await;
    settle().await;

    for host in ["g", "a", "b", "d"] {
        assert_eq!(cluster.ring_of(host), vec!["g", "a", "b", "d"]);
    }
    assert!(!cluster.node("c").is_joined());
}

#[tokio::test(start_paused = true)]
async fn test_total_loss_shrinks_rings_one_at_a_time() {
    let hosts = ["g", "a", "b", "c", "d"];
    let cluster = Cluster::start(&hosts).await;

    let counters: Vec<_> = cluster
        .nodes
        .iter()
        .map(|n| count_declarations(n, None))
        .collect();
    for loss in &cluster.losses {
        loss.set(100);
    }

    tokio::time::sleep(Duration::from_secs(30)).await;

    // Each node keeps declaring until probing stops below four members
    for (node, (count, _sub)) in cluster.nodes.iter().zip(&counters) {
        assert_eq!(node.ring_members().len(), 3, "ring at {}", node.host());
        assert_eq!(count.load(Ordering::Relaxed), 2, "declarations at {}", node.host());
    }
}

// ==================== Files ====================

#[tokio::test(start_paused = true)]
async fn test_add_file_places_on_owner_and_successors() {
    let cluster = Cluster::start(&["g", "a", "b", "c", "d"]).await;
    cluster.store("a").stage("/home/a/report.txt", b"report");

    cluster
        .node("a")
        .add_file("/home/a/report.txt", "report.txt")
        .await
        .unwrap();
    settle().await;

    for node in &cluster.nodes {
        assert_eq!(node.locate("report.txt").unwrap(), vec!["a", "b", "c"]);
    }
    for host in ["a", "b", "c"] {
        assert_eq!(cluster.store(host).read("report.txt").unwrap(), b"report");
        assert_eq!(cluster.node(host).local_files(), vec!["report.txt"]);
    }
    assert!(cluster.store("d").read("report.txt").is_none());
    assert!(cluster.store("g").read("report.txt").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failed_replica_is_replaced() {
    let cluster = Cluster::start(&["g", "a", "b", "c", "d"]).await;
    cluster.store("a").stage("/f", b"data");
    cluster.node("a").add_file("/f", "f").await.unwrap();
    settle().await;

    cluster.net.isolate("b");
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(cluster.node("g").locate("f").unwrap(), vec!["a", "c", "d"]);
    assert_eq!(cluster.node("d").locate("f").unwrap(), vec!["a", "c", "d"]);
    assert_eq!(cluster.store("d").read("f").unwrap(), b"data");
    assert_eq!(cluster.node("d").local_files(), vec!["f"]);

    let copies = cluster.files.copies();
    assert!(
        copies
            .iter()
            .any(|c| c.file == "f" && c.from == "a" && c.to == "d"),
        "copies: {:?}",
        copies
    );
}

#[tokio::test(start_paused = true)]
async fn test_delete_removes_every_replica() {
    let cluster = Cluster::start(&["g", "a", "b", "c", "d"]).await;
    cluster.store("b").stage("/f", b"bye");
    cluster.node("b").add_file("/f", "f").await.unwrap();
    settle().await;

    cluster.node("d").delete_file("f").await.unwrap();
    settle().await;

    for (node, store) in cluster.nodes.iter().zip(&cluster.stores) {
        assert!(node.list_catalog().is_empty(), "catalog at {}", node.host());
        assert!(node.local_files().is_empty());
        assert!(store.read("f").is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn test_joiner_receives_catalog() {
    let cluster = Cluster::start(&["g", "a", "b", "c"]).await;
    cluster.store("a").stage("/f", b"x");
    cluster.node("a").add_file("/f", "f").await.unwrap();
    settle().await;

    let (transport, inbox) = cluster.net.attach("late");
    let store = Arc::new(InMemoryStore::new());
    let late = Arc::new(Node::new(
        "late",
        NodeConfig::with_gateway("g"),
        LossyTransport::new(transport, LossControl::new(0)),
        cluster.files.attach("late", Arc::clone(&store)),
        store,
    ));
    let serve = tokio::spawn(Arc::clone(&late).serve(inbox));

    late.join().await.unwrap();
    settle().await;

    assert_eq!(late.ring_members().len(), 5);
    assert_eq!(late.list_catalog(), vec!["f"]);
    serve.abort();
}
