//! Hostmap
//!
//! Node-name table for rank placement queries. Controlled by
//! `ADLB_HOSTMAP_MODE` (`ENABLED`, `LEADERS`, `DISABLED`) and the
//! blunt-instrument `ADLB_DISABLE_HOSTMAP`. In LEADERS mode only the
//! first rank on each node is reported, which is what per-node daemon
//! launchers want.

use std::collections::BTreeMap;

use adlb_core::env::{env_get_bool, env_get_opt};
use adlb_core::rank::Layout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostmapMode {
    Enabled,
    Leaders,
    Disabled,
}

impl HostmapMode {
    /// Resolve from the environment. `ADLB_DISABLE_HOSTMAP` wins.
    pub fn from_env() -> HostmapMode {
        if env_get_bool("ADLB_DISABLE_HOSTMAP", false) {
            return HostmapMode::Disabled;
        }
        match env_get_opt::<String>("ADLB_HOSTMAP_MODE")
            .unwrap_or_default()
            .to_uppercase()
            .as_str()
        {
            "DISABLED" => HostmapMode::Disabled,
            "LEADERS" => HostmapMode::Leaders,
            _ => HostmapMode::Enabled,
        }
    }
}

/// Hostname -> ranks living there.
#[derive(Debug, Clone)]
pub struct Hostmap {
    map: BTreeMap<String, Vec<i32>>,
}

impl Hostmap {
    /// Build for an in-process cluster: every rank lives on this host.
    /// Returns `None` when disabled.
    pub fn build(layout: &Layout) -> Option<Hostmap> {
        let mode = HostmapMode::from_env();
        if mode == HostmapMode::Disabled {
            return None;
        }
        let host = local_hostname();
        let ranks: Vec<i32> = match mode {
            HostmapMode::Leaders => (0..layout.ranks()).take(1).collect(),
            _ => (0..layout.ranks()).collect(),
        };
        let mut map = BTreeMap::new();
        map.insert(host, ranks);
        Some(Hostmap { map })
    }

    pub fn ranks_on(&self, host: &str) -> &[i32] {
        self.map.get(host).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    /// First rank on the given rank's host.
    pub fn leader_of(&self, rank: i32) -> Option<i32> {
        self.map
            .values()
            .find(|ranks| ranks.contains(&rank))
            .and_then(|ranks| ranks.first().copied())
    }
}

#[cfg(unix)]
fn local_hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(not(unix))]
fn local_hostname() -> String {
    "localhost".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_enabled() {
        std::env::remove_var("ADLB_DISABLE_HOSTMAP");
        std::env::remove_var("ADLB_HOSTMAP_MODE");
        let layout = Layout::new(4, 1);
        let hm = Hostmap::build(&layout).unwrap();
        let host: Vec<&str> = hm.hosts().collect();
        assert_eq!(host.len(), 1);
        assert_eq!(hm.ranks_on(host[0]), &[0, 1, 2, 3]);
        assert_eq!(hm.leader_of(2), Some(0));
    }

    #[test]
    fn test_disable_env() {
        std::env::set_var("ADLB_DISABLE_HOSTMAP", "1");
        assert_eq!(HostmapMode::from_env(), HostmapMode::Disabled);
        std::env::remove_var("ADLB_DISABLE_HOSTMAP");
    }
}
