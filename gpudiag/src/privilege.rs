//! Root privilege check

use nix::unistd::{geteuid, Uid};

/// Kernel logs, fabric manager state and other users' processes are only
/// fully visible to root
pub fn is_root() -> bool {
    requires_banner(geteuid()).is_none()
}

/// Banner printed when running without root
fn requires_banner(euid: Uid) -> Option<String> {
    if euid.is_root() {
        return None;
    }
    Some(format!(
        "==================================================\n \
         ERROR: gpudiag must be run as root (effective uid {}).\n \
         Kernel logs, fabric manager state and the process\n \
         table are only fully visible to root.\n \
         Re-run with: sudo gpudiag\n\
         ==================================================",
        euid
    ))
}

/// Print the privilege banner to stderr
pub fn print_banner() {
    if let Some(banner) = requires_banner(geteuid()) {
        eprintln!("{}", banner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_needs_no_banner() {
        assert!(requires_banner(Uid::from_raw(0)).is_none());
    }

    #[test]
    fn test_unprivileged_banner() {
        let banner = requires_banner(Uid::from_raw(1000)).unwrap();
        assert!(banner.contains("must be run as root"));
        assert!(banner.contains("effective uid 1000"));
    }

    #[test]
    fn test_is_root_matches_effective_uid() {
        assert_eq!(is_root(), geteuid().is_root());
    }
}
