use std::sync::Arc;
use shared::types::{GuestDescriptor, GuestKind, GuestSummary};
use crate::registry::ServerConnection;

/// Walk every reachable server and return a descriptor for each guest found.
///
/// Servers are walked concurrently. Within a server, nodes and guest kinds
/// are walked one at a time so a single node never sees more than one
/// listing in flight. A failing node is logged and skipped.
pub async fn discover_all(connections: &[Arc<ServerConnection>]) -> Vec<GuestDescriptor> {
    let per_server = futures::future::join_all(
        connections.iter().map(|connection| discover_server(connection)),
    )
    .await;

    per_server.into_iter().flatten().collect()
}

async fn discover_server(connection: &ServerConnection) -> Vec<GuestDescriptor> {
    let server = &connection.server.name;
    let nodes = connection.nodes();
    if nodes.is_empty() {
        tracing::warn!("No nodes found for server {}, skipping", server);
        return Vec::new();
    }

    tracing::info!("Processing server {} with {} nodes", server, nodes.len());

    let mut found = Vec::new();
    for node in &nodes {
        tracing::info!("Discovering guests on node {} (server: {})", node.node, server);
        match discover_node(connection, &node.node).await {
            Ok(guests) => found.extend(guests),
            Err(e) => {
                tracing::error!("Error processing node {} on server {}: {}", node.node, server, e);
            }
        }
    }
    found
}

async fn discover_node(
    connection: &ServerConnection,
    node: &str,
) -> Result<Vec<GuestDescriptor>, crate::pve::ApiError> {
    let mut found = Vec::new();

    for kind in GuestKind::ALL {
        let guests = connection.api.list_guests(node, kind).await?;
        tracing::info!("Found {} {} guests on node {}", guests.len(), kind, node);

        for guest in guests {
            if let Some(descriptor) = describe(connection, node, kind, &guest).await {
                found.push(descriptor);
            }
        }
    }

    Ok(found)
}

/// Listings don't reliably carry the display name, so ask the guest itself.
async fn describe(
    connection: &ServerConnection,
    node: &str,
    kind: GuestKind,
    guest: &GuestSummary,
) -> Option<GuestDescriptor> {
    let status = match connection.api.guest_status(node, kind, guest.vmid).await {
        Ok(status) => status,
        Err(e) => {
            tracing::error!(
                "Failed to read status of {} {} on node {} (server: {}): {}",
                kind,
                guest.vmid,
                node,
                connection.server.name,
                e
            );
            return None;
        }
    };

    let name = status
        .name
        .or_else(|| guest.name.clone())
        .unwrap_or_else(|| format!("{}-{}", kind, guest.vmid));

    Some(GuestDescriptor {
        vmid: guest.vmid,
        name,
        node: node.to_string(),
        server: connection.server.name.clone(),
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pve::fake::{FakeConnector, FakePve};
    use crate::registry::ServerRegistry;

    const TWO_SERVERS: &str = r#"
        [[servers]]
        name = "a"
        host = "a"
        password = "pw"

        [[servers]]
        name = "b"
        host = "b"
        password = "pw"
    "#;

    async fn registry(a: Arc<FakePve>, b: Arc<FakePve>) -> ServerRegistry {
        let config = Config::parse(TWO_SERVERS).unwrap();
        let connector = FakeConnector::default().with("a", a).with("b", b);
        let registry = ServerRegistry::connect(&config.servers, &connector);
        registry.refresh_all().await;
        registry
    }

    #[tokio::test]
    async fn test_discovers_both_kinds_in_order() {
        let a = FakePve::new();
        a.add_node("pve1");
        a.add_guest("pve1", GuestKind::Lxc, 200, "dns", "running");
        a.add_guest("pve1", GuestKind::Qemu, 100, "web1", "stopped");
        let b = FakePve::new();

        let registry = registry(a.clone(), b).await;
        let guests = discover_all(registry.connections()).await;

        assert_eq!(guests.len(), 2);
        assert_eq!(guests[0].vmid, 100);
        assert_eq!(guests[0].kind, GuestKind::Qemu);
        assert_eq!(guests[0].name, "web1");
        assert_eq!(guests[0].server, "a");
        assert_eq!(guests[1].vmid, 200);
        assert_eq!(guests[1].kind, GuestKind::Lxc);

        let calls = a.calls();
        let qemu = calls.iter().position(|c| c == "list_guests:pve1:qemu").unwrap();
        let lxc = calls.iter().position(|c| c == "list_guests:pve1:lxc").unwrap();
        assert!(qemu < lxc, "VMs are listed before containers");
    }

    #[tokio::test]
    async fn test_failing_node_and_server_are_skipped() {
        let a = FakePve::new();
        a.add_node("down");
        a.add_node("up");
        a.add_guest("down", GuestKind::Qemu, 100, "lost", "running");
        a.add_guest("up", GuestKind::Qemu, 101, "kept", "running");
        a.fail_node("down");

        let b = FakePve::new();
        b.fail_nodes(true);

        let registry = registry(a, b.clone()).await;
        let guests = discover_all(registry.connections()).await;

        assert_eq!(guests.len(), 1);
        assert_eq!(guests[0].name, "kept");
        assert_eq!(b.count("list_guests"), 0);
    }

    #[tokio::test]
    async fn test_guest_with_failing_status_is_skipped() {
        let a = FakePve::new();
        a.add_node("pve1");
        a.add_guest("pve1", GuestKind::Qemu, 100, "web1", "running");
        a.add_guest("pve1", GuestKind::Qemu, 101, "web2", "running");
        a.fail_status(100, true);

        let registry = registry(a, FakePve::new()).await;
        let guests = discover_all(registry.connections()).await;

        assert_eq!(guests.len(), 1);
        assert_eq!(guests[0].vmid, 101);
    }
}
