//! Package and service management through the command runner.

use std::sync::Arc;

use igw_core::{CommandRunner, ResultExt};
use igw_core::runner::args;
use tracing::{info, warn};

use crate::error::Result;
use crate::render::{RestartMap, RestartProcedure};

/// Drives `apt-get` and `systemctl`.
pub struct ServiceManager {
    runner: Arc<dyn CommandRunner>,
}

impl ServiceManager {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Refresh package lists, then install `packages` non-interactively.
    ///
    /// # Errors
    ///
    /// Returns error if either `apt-get` call fails.
    pub fn install_packages(&self, packages: &[&str]) -> Result<()> {
        info!(packages = %packages.join(" "), "Installing packages");
        self.runner.run("apt-get", &args(&["update"]))?;

        let mut install = args(&[
            "--assume-yes",
            "--option=Dpkg::Options::=--force-confold",
            "install",
        ]);
        install.extend(packages.iter().map(ToString::to_string));
        self.runner.run("apt-get", &install)?;
        Ok(())
    }

    /// Restart `service` using `procedure`.
    ///
    /// # Errors
    ///
    /// Returns error if any `systemctl` call fails.
    pub fn restart(&self, service: &str, procedure: RestartProcedure) -> Result<()> {
        info!(service, ?procedure, "Restarting service");
        if procedure == RestartProcedure::ReloadThenRestart {
            self.systemctl(&["daemon-reload"])?;
        }
        self.systemctl(&["restart", service])
    }

    /// Restart every service in `services` once, in iteration order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing restart.
    pub fn restart_all<'a, I>(&self, services: I, map: &RestartMap) -> Result<()>
    where
        I: IntoIterator<Item = &'a String>,
    {
        services
            .into_iter()
            .try_for_each(|service| self.restart(service, map.procedure(service)))
    }

    /// Stop and disable each service.
    ///
    /// # Errors
    ///
    /// Stops at the first failing `systemctl` call.
    pub fn pause(&self, services: &[String]) -> Result<()> {
        services.iter().try_for_each(|service| {
            self.systemctl(&["stop", service])?;
            self.systemctl(&["disable", service])
        })
    }

    /// Enable and start each service.
    ///
    /// # Errors
    ///
    /// Stops at the first failing `systemctl` call.
    pub fn resume(&self, services: &[String]) -> Result<()> {
        services.iter().try_for_each(|service| {
            self.systemctl(&["enable", service])?;
            self.systemctl(&["start", service])
        })
    }

    fn systemctl(&self, arguments: &[&str]) -> Result<()> {
        self.runner
            .run("systemctl", &args(arguments))
            .inspect_error(|e| warn!(args = %arguments.join(" "), error = %e, "systemctl failed"))?;
        Ok(())
    }
}
