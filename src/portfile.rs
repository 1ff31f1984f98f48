//! Port descriptor written by the daemon on start.
//!
//! The file holds `<port>:<secret>` where the secret is a hexadecimal 64-bit
//! value the client must echo back in its handshake.
use std::{fs, io, path::PathBuf, str::FromStr};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortInfoError {
    #[error("failed to read port file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("malformed port descriptor '{0}'")]
    Malformed(String),
    #[error("invalid port '{0}'")]
    Port(String),
    #[error("invalid secret: {0}")]
    Secret(#[from] std::num::ParseIntError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortInfo {
    pub port: u16,
    pub secret: u64,
}

impl FromStr for PortInfo {
    type Err = PortInfoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (port, secret) = trimmed
            .split_once(':')
            .ok_or_else(|| PortInfoError::Malformed(trimmed.to_string()))?;

        let port = port
            .trim()
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| PortInfoError::Port(port.to_string()))?;

        let secret = secret.trim();
        let secret = secret
            .strip_prefix("0x")
            .or_else(|| secret.strip_prefix("0X"))
            .unwrap_or(secret);
        let secret = u64::from_str_radix(secret, 16)?;

        Ok(Self { port, secret })
    }
}

/// Where the client learns the daemon's port and secret.
pub trait PortInfoSource: Send + Sync {
    fn port_info(&self) -> Result<PortInfo, PortInfoError>;
}

impl PortInfoSource for PortInfo {
    fn port_info(&self) -> Result<PortInfo, PortInfoError> {
        Ok(*self)
    }
}

/// Descriptor file, re-read on every connection attempt since the daemon
/// rewrites it when it restarts.
#[derive(Debug, Clone)]
pub struct PortFile(pub PathBuf);

impl PortInfoSource for PortFile {
    fn port_info(&self) -> Result<PortInfo, PortInfoError> {
        let contents = fs::read_to_string(&self.0).map_err(|source| PortInfoError::Read {
            path: self.0.clone(),
            source,
        })?;
        contents.parse()
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;

    use tempdir::TempDir;

    use super::*;

    #[test]
    fn parse_descriptor() {
        let info: PortInfo = "49152:fedcba9876543210\n".parse().unwrap();
        assert_eq!(info.port, 49152);
        assert_eq!(info.secret, 0xfedc_ba98_7654_3210);

        let info: PortInfo = " 1234:0x1F ".parse().unwrap();
        assert_eq!((info.port, info.secret), (1234, 31));
    }

    #[test]
    fn reject_bad_descriptors() {
        assert!(matches!("12345".parse::<PortInfo>(), Err(PortInfoError::Malformed(_))));
        assert!(matches!("0:ab".parse::<PortInfo>(), Err(PortInfoError::Port(_))));
        assert!(matches!("70000:ab".parse::<PortInfo>(), Err(PortInfoError::Port(_))));
        assert!(matches!("80:xyz".parse::<PortInfo>(), Err(PortInfoError::Secret(_))));
        assert!(matches!(
            "80:1ffffffffffffffff".parse::<PortInfo>(),
            Err(PortInfoError::Secret(_))
        ));
    }

    #[test]
    fn port_file_is_reread() {
        let dir = TempDir::new("portfile").unwrap();
        let path = dir.path().join("port.txt");
        let source = PortFile(path.clone());

        assert!(matches!(source.port_info(), Err(PortInfoError::Read { .. })));

        File::create(&path).unwrap().write_all(b"5000:a").unwrap();
        assert_eq!(source.port_info().unwrap(), PortInfo { port: 5000, secret: 10 });

        File::create(&path).unwrap().write_all(b"5001:b").unwrap();
        assert_eq!(source.port_info().unwrap().port, 5001);
    }
}
