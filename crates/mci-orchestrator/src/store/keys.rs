//! Key layout of the record store
//!
//! ```text
//! /ns/{ns}
//! /ns/{ns}/mci/{mci}
//! /ns/{ns}/mci/{mci}/vm/{vm}
//! /ns/{ns}/resources/sshKey/{key}
//! /ns/{ns}/resources/vNet/{vnet}/bastion
//! ```

pub fn namespace(ns: &str) -> String {
    format!("/ns/{}", ns)
}

/// Prefix of every record owned by a namespace
pub fn namespace_children(ns: &str) -> String {
    format!("/ns/{}/", ns)
}

pub fn namespaces() -> &'static str {
    "/ns/"
}

pub fn mci(ns: &str, mci: &str) -> String {
    format!("/ns/{}/mci/{}", ns, mci)
}

pub fn mcis(ns: &str) -> String {
    format!("/ns/{}/mci/", ns)
}

pub fn vm(ns: &str, mci: &str, vm: &str) -> String {
    format!("/ns/{}/mci/{}/vm/{}", ns, mci, vm)
}

pub fn vms(ns: &str, mci: &str) -> String {
    format!("/ns/{}/mci/{}/vm/", ns, mci)
}

pub fn ssh_key(ns: &str, key: &str) -> String {
    format!("/ns/{}/resources/sshKey/{}", ns, key)
}

pub fn ssh_keys(ns: &str) -> String {
    format!("/ns/{}/resources/sshKey/", ns)
}

pub fn vnet_bastion(ns: &str, vnet: &str) -> String {
    format!("/ns/{}/resources/vNet/{}/bastion", ns, vnet)
}

pub fn vnets(ns: &str) -> String {
    format!("/ns/{}/resources/vNet/", ns)
}

/// Whether `key` is a direct child of `prefix` (prefix ends with `/`)
pub fn is_direct_child(prefix: &str, key: &str) -> bool {
    key.strip_prefix(prefix)
        .map(|rest| !rest.is_empty() && !rest.contains('/'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_children() {
        let prefix = mcis("ns01");
        assert!(is_direct_child(&prefix, &mci("ns01", "mci01")));
        assert!(!is_direct_child(&prefix, &vm("ns01", "mci01", "g1-1")));
        assert!(!is_direct_child(&prefix, "/ns/ns01/mci/"));
        assert!(!is_direct_child(&prefix, &mci("ns011", "mci01")));
    }

    #[test]
    fn test_namespace_prefix_does_not_leak() {
        assert!(is_direct_child(namespaces(), &namespace("ns01")));
        assert!(!is_direct_child(namespaces(), &mci("ns01", "mci01")));
        assert!(!mci("ns011", "x").starts_with(&namespace_children("ns01")));
    }
}
