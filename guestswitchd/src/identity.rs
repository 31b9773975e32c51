use std::fmt;
use chrono::Utc;
use sha2::{Digest, Sha256};
use shared::types::{AccessoryContext, AccessoryRecord, AccessoryType, GuestDescriptor};

/// Stable accessory identity token, formatted like a UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccessoryId(String);

impl AccessoryId {
    /// Deterministically derive a token from an arbitrary seed.
    pub fn generate(seed: &str) -> Self {
        let digest = Sha256::digest(seed.as_bytes());
        let hex = hex::encode(&digest[..16]);
        Self(format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for AccessoryId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for AccessoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a discovered guest. The seed is a JSON array so that no
/// two distinct (server, vmid, name) triples share one, whatever characters
/// the names contain.
pub fn resolve(guest: &GuestDescriptor) -> AccessoryId {
    let seed = serde_json::json!([guest.server, guest.vmid, guest.name]).to_string();
    AccessoryId::generate(&seed)
}

/// Outcome of matching a discovered guest against known accessories
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    /// Reuse the stored record verbatim
    Restore(AccessoryRecord),
    /// Never seen before; the host must register this new record
    Create(AccessoryRecord),
}

pub fn reconcile(
    id: &AccessoryId,
    guest: &GuestDescriptor,
    cached: &[AccessoryRecord],
    default_type: AccessoryType,
) -> Registration {
    if let Some(existing) = cached.iter().find(|r| r.id == id.as_str()) {
        return Registration::Restore(existing.clone());
    }

    Registration::Create(AccessoryRecord {
        id: id.to_string(),
        display_name: guest.name.clone(),
        context: AccessoryContext::from_descriptor(guest, default_type),
        registered_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::GuestKind;

    fn guest(server: &str, vmid: u32, name: &str) -> GuestDescriptor {
        GuestDescriptor {
            vmid,
            name: name.to_string(),
            node: "pve1".to_string(),
            server: server.to_string(),
            kind: GuestKind::Qemu,
        }
    }

    #[test]
    fn test_identity_deterministic() {
        let a = resolve(&guest("home", 100, "web1"));
        let b = resolve(&guest("home", 100, "web1"));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 36);
        assert_eq!(a.as_str().matches('-').count(), 4);
    }

    #[test]
    fn test_identity_changes_with_each_field() {
        let base = resolve(&guest("home", 100, "web1"));
        assert_ne!(base, resolve(&guest("lab", 100, "web1")));
        assert_ne!(base, resolve(&guest("home", 101, "web1")));
        assert_ne!(base, resolve(&guest("home", 100, "web2")));
    }

    #[test]
    fn test_identity_ignores_node_and_kind() {
        let mut moved = guest("home", 100, "web1");
        moved.node = "pve2".to_string();
        moved.kind = GuestKind::Lxc;
        assert_eq!(resolve(&guest("home", 100, "web1")), resolve(&moved));
    }

    #[test]
    fn test_identity_has_no_separator_collisions() {
        assert_ne!(
            resolve(&guest("x-1", 2, "n")),
            resolve(&guest("x", 1, "2-n"))
        );
    }

    #[test]
    fn test_reconcile_restores_verbatim() {
        let discovered = guest("home", 100, "web1");
        let id = resolve(&discovered);

        let first = match reconcile(&id, &discovered, &[], AccessoryType::Outlet) {
            Registration::Create(record) => record,
            other => panic!("expected create, got {:?}", other),
        };
        assert_eq!(first.id, id.as_str());
        assert_eq!(first.context.accessory_type, AccessoryType::Outlet);

        // A later default change must not touch the stored presentation type
        match reconcile(&id, &discovered, &[first.clone()], AccessoryType::Fan) {
            Registration::Restore(record) => assert_eq!(record, first),
            other => panic!("expected restore, got {:?}", other),
        }
    }
}
