//! Thin wrapper over `gwcli`, one invocation per operation.

use std::sync::Arc;

use igw_core::CommandRunner;
use tracing::info;

use crate::error::Result;

/// IQN used when no target name is given.
pub const DEFAULT_TARGET: &str = "iqn.2003-01.com.ubuntu.iscsi-gw:iscsi-igw";

const GWCLI: &str = "gwcli";

/// Issues gateway configuration commands.
pub struct GatewayClient {
    runner: Arc<dyn CommandRunner>,
}

impl GatewayClient {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// # Errors
    ///
    /// Returns error if `gwcli` fails.
    pub fn create_target(&self, iqn: &str) -> Result<()> {
        self.gwcli("/iscsi-targets/", &["create", iqn])
    }

    /// # Errors
    ///
    /// Returns error if `gwcli` fails.
    pub fn add_gateway(&self, iqn: &str, fqdn: &str, ip: &str) -> Result<()> {
        self.gwcli(
            &format!("/iscsi-targets/{iqn}/gateways/"),
            &["create", fqdn, ip],
        )
    }

    /// # Errors
    ///
    /// Returns error if `gwcli` fails.
    pub fn create_disk(&self, pool: &str, image: &str, size: &str) -> Result<()> {
        self.gwcli(
            "/disks",
            &[
                "create",
                &format!("pool={pool}"),
                &format!("image={image}"),
                &format!("size={size}"),
            ],
        )
    }

    /// # Errors
    ///
    /// Returns error if `gwcli` fails.
    pub fn add_client(&self, iqn: &str, initiator: &str) -> Result<()> {
        self.gwcli(&format!("/iscsi-targets/{iqn}/hosts/"), &["create", initiator])
    }

    /// # Errors
    ///
    /// Returns error if `gwcli` fails.
    pub fn set_client_auth(&self, iqn: &str, initiator: &str, user: &str, password: &str) -> Result<()> {
        self.gwcli(
            &format!("/iscsi-targets/{iqn}/hosts/{initiator}"),
            &[
                "auth",
                &format!("username={user}"),
                &format!("password={password}"),
            ],
        )
    }

    /// # Errors
    ///
    /// Returns error if `gwcli` fails.
    pub fn add_disk_to_client(&self, iqn: &str, initiator: &str, pool: &str, image: &str) -> Result<()> {
        self.gwcli(
            &format!("/iscsi-targets/{iqn}/hosts/{initiator}"),
            &["disk", "add", &format!("{pool}/{image}")],
        )
    }

    fn gwcli(&self, path: &str, arguments: &[&str]) -> Result<()> {
        info!(path, command = arguments.first().copied().unwrap_or_default(), "gwcli");
        let argv: Vec<String> = std::iter::once(path)
            .chain(arguments.iter().copied())
            .map(ToString::to_string)
            .collect();
        self.runner.run(GWCLI, &argv)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use igw_core::RecordingRunner;

    use super::*;

    #[test]
    fn test_command_lines() {
        let runner = Arc::new(RecordingRunner::new());
        let gw = GatewayClient::new(runner.clone());
        let iqn = DEFAULT_TARGET;

        gw.create_target(iqn).unwrap();
        gw.add_gateway(iqn, "gw0.example", "10.0.0.1").unwrap();
        gw.create_disk("iscsi", "disk1", "1G").unwrap();
        gw.add_client(iqn, "iqn.1994-05.com.redhat:client").unwrap();
        gw.set_client_auth(iqn, "iqn.1994-05.com.redhat:client", "admin", "pw")
            .unwrap();
        gw.add_disk_to_client(iqn, "iqn.1994-05.com.redhat:client", "iscsi", "disk1")
            .unwrap();

        assert_eq!(
            runner.command_lines(),
            vec![
                format!("gwcli /iscsi-targets/ create {iqn}"),
                format!("gwcli /iscsi-targets/{iqn}/gateways/ create gw0.example 10.0.0.1"),
                "gwcli /disks create pool=iscsi image=disk1 size=1G".to_string(),
                format!("gwcli /iscsi-targets/{iqn}/hosts/ create iqn.1994-05.com.redhat:client"),
                format!(
                    "gwcli /iscsi-targets/{iqn}/hosts/iqn.1994-05.com.redhat:client auth username=admin password=pw"
                ),
                format!(
                    "gwcli /iscsi-targets/{iqn}/hosts/iqn.1994-05.com.redhat:client disk add iscsi/disk1"
                ),
            ]
        );
    }
}
