use sha2::{Digest, Sha256, Sha512};
use std::str::FromStr;

/// Hex characters kept from the digest of an over-long name.
const DIGEST_CHARS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestKind {
    Sha256,
    Sha512,
}

impl FromStr for DigestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" => Ok(DigestKind::Sha256),
            "sha512" => Ok(DigestKind::Sha512),
            other => Err(format!("Unsupported POSIX digest: {}", other)),
        }
    }
}

/// Maps logins and project aliases onto host account, group and directory
/// names. The mapping is a pure function of its configuration so the same
/// database always yields the same host layout.
#[derive(Debug, Clone)]
pub struct PosixNaming {
    pub name_limit: usize,
    pub digest: DigestKind,
    pub home_base: String,
    pub project_base: String,
}

impl PosixNaming {
    fn hashed(&self, name: &str) -> String {
        let digest = match self.digest {
            DigestKind::Sha256 => hex::encode(Sha256::digest(name.as_bytes())),
            DigestKind::Sha512 => hex::encode(Sha512::digest(name.as_bytes())),
        };
        digest[..DIGEST_CHARS.min(self.name_limit).max(1)].to_string()
    }

    fn host_name(&self, name: &str) -> String {
        if name.len() <= self.name_limit {
            name.to_string()
        } else {
            self.hashed(name)
        }
    }

    /// Account name of a user; also the name of the user's primary group.
    pub fn account_name(&self, login: &str) -> String {
        self.host_name(login)
    }

    pub fn home_dir(&self, account: &str) -> String {
        join(&self.home_base, account)
    }

    pub fn project_group(&self, alias: &str) -> String {
        self.host_name(alias)
    }

    pub fn project_dir(&self, group: &str) -> String {
        join(&self.project_base, group)
    }
}

fn join(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naming(digest: DigestKind) -> PosixNaming {
        PosixNaming {
            name_limit: 32,
            digest,
            home_base: "/home/".to_string(),
            project_base: "/srv/projects".to_string(),
        }
    }

    #[test]
    fn test_short_names_are_kept() {
        let naming = naming(DigestKind::Sha256);
        assert_eq!(naming.account_name("alice"), "alice");
        assert_eq!(naming.home_dir("alice"), "/home/alice");
        assert_eq!(naming.project_dir("prj"), "/srv/projects/prj");
    }

    #[test]
    fn test_long_names_are_digested() {
        let naming = naming(DigestKind::Sha256);
        let login = "a".repeat(40);
        let name = naming.account_name(&login);

        assert_eq!(name.len(), 32);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(name, naming.account_name(&login));
        assert_eq!(name, hex::encode(Sha256::digest(login.as_bytes()))[..32]);
    }

    #[test]
    fn test_digest_is_configurable() {
        let login = "b".repeat(33);
        assert_ne!(
            naming(DigestKind::Sha256).account_name(&login),
            naming(DigestKind::Sha512).account_name(&login)
        );
    }

    #[test]
    fn test_boundary_length() {
        let naming = naming(DigestKind::Sha256);
        let exactly = "c".repeat(32);
        assert_eq!(naming.project_group(&exactly), exactly);
    }

    #[test]
    fn test_parse_digest() {
        assert_eq!("SHA512".parse::<DigestKind>().unwrap(), DigestKind::Sha512);
        assert!("md5".parse::<DigestKind>().is_err());
    }
}
