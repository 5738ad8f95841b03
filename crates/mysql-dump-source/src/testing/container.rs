//! Docker container management for MySQL testing

use anyhow::{Context, Result};
use mysql_async::prelude::*;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::connector::ConnectionOptions;

const ROOT_PASSWORD: &str = "testpass";

/// A throwaway MySQL server with binary logging enabled.
pub struct MySQLContainer {
    pub container_name: String,
    pub host_port: u16,
    pub image_name: String,
}

impl MySQLContainer {
    pub fn new(container_name: &str, host_port: u16) -> Self {
        Self {
            container_name: container_name.to_string(),
            host_port,
            image_name: "mysql:8.0".to_string(),
        }
    }

    /// Options for connecting to the container as root.
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            host: "127.0.0.1".to_string(),
            port: self.host_port,
            user: "root".to_string(),
            password: Some(ROOT_PASSWORD.to_string()),
            socket: None,
        }
    }

    pub fn start(&self) -> Result<()> {
        info!("Starting MySQL container: {}", self.container_name);

        // Remove leftovers from an earlier run
        let _ = Command::new("docker")
            .args(["rm", "-f", &self.container_name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        let output = Command::new("docker")
            .args([
                "run",
                "--name",
                &self.container_name,
                "-e",
                &format!("MYSQL_ROOT_PASSWORD={ROOT_PASSWORD}"),
                "-p",
                &format!("{}:3306", self.host_port),
                "-d",
                &self.image_name,
                "--log-bin=mysql-bin",
                "--server-id=1",
            ])
            .output()
            .context("Failed to start Docker container")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to start container: {stderr}");
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("Started container: {}", container_id);
        Ok(())
    }

    pub async fn wait_until_ready(&self, timeout_secs: u64) -> Result<()> {
        info!("Waiting for MySQL to be ready...");

        let start = Instant::now();
        let timeout = Duration::from_secs(timeout_secs);

        while start.elapsed() < timeout {
            match self.execute(&["SELECT 1"]).await {
                Ok(()) => {
                    info!("MySQL is ready!");
                    return Ok(());
                }
                Err(e) => {
                    debug!("Connection attempt failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(1000)).await;
                }
            }
        }

        anyhow::bail!("MySQL did not become ready within {timeout_secs} seconds")
    }

    /// Run setup statements on a fresh connection.
    pub async fn execute(&self, statements: &[&str]) -> Result<()> {
        let mut conn = mysql_async::Conn::new(self.connection_options().to_opts())
            .await
            .context("Failed to connect")?;
        for sql in statements {
            conn.query_drop(*sql)
                .await
                .with_context(|| format!("Failed to execute: {sql}"))?;
        }
        conn.disconnect().await.context("Failed to disconnect")?;
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        info!("Stopping container: {}", self.container_name);

        let output = Command::new("docker")
            .args(["rm", "-f", &self.container_name])
            .output()
            .context("Failed to remove container")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("Failed to remove container (may not exist): {}", stderr);
        }
        Ok(())
    }
}

impl Drop for MySQLContainer {
    fn drop(&mut self) {
        // Best effort cleanup
        let _ = self.stop();
    }
}
