use std::{collections::BTreeMap, net::SocketAddr, process::Stdio, time::Duration};

use stagehand_core::{AggregateError, Master, TaskError, config::Config};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, Command},
};
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    client::RemotePlugin,
    error::RpcError,
    handshake::{COOKIE_KEY, COOKIE_VALUE, Handshake},
};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const KILL_GRACE: Duration = Duration::from_secs(3);

/// A plugin subprocess spawned through `sh -c`.
pub struct PluginProcess {
    name: String,
    child: Child,
    addr: SocketAddr,
}

impl PluginProcess {
    /// Spawn `command` and wait for its handshake line.
    #[instrument(level = "debug", skip(command))]
    pub async fn spawn(name: &str, command: &str) -> Result<Self, RpcError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .env(COOKIE_KEY, COOKIE_VALUE)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RpcError::Handshake("plugin stdout is not captured".into()))?;
        let mut lines = BufReader::new(stdout).lines();

        let line = match tokio::time::timeout(HANDSHAKE_TIMEOUT, lines.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                return Err(RpcError::Handshake(format!("plugin {name} exited before handshake")));
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                let _ = kill_graceful(&mut child).await;
                return Err(RpcError::Handshake(format!(
                    "plugin {name} did not complete the handshake in {HANDSHAKE_TIMEOUT:?}"
                )));
            }
        };
        let handshake = Handshake::parse(&line)?;

        // Anything printed after the handshake is drained so the plugin never blocks on stdout.
        let drain_name = name.to_string();
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                trace!(plugin = %drain_name, %line, "plugin stdout");
            }
        });

        debug!(addr = %handshake.addr, pid = ?child.id(), "plugin process ready");
        Ok(Self {
            name: name.to_string(),
            child,
            addr: handshake.addr,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> Result<(), RpcError> {
        debug!(plugin = %self.name, "stopping plugin process");
        kill_graceful(&mut self.child).await
    }
}

/// SIGTERM, then SIGKILL if the child is still alive after a grace period.
async fn kill_graceful(child: &mut Child) -> Result<(), RpcError> {
    #[cfg(unix)]
    {
        if let Some(id) = child.id() {
            // SAFETY: `id` is the pid of a child we spawned and have not reaped yet.
            unsafe {
                libc::kill(id as libc::pid_t, libc::SIGTERM);
            }
            if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
                return Ok(());
            }
        }
    }
    child.kill().await?;
    Ok(())
}

/// Every plugin taking part in one run.
///
/// Built once per run and shut down explicitly, which kills every spawned process.
#[derive(Default)]
pub struct PluginRegistry {
    processes: Vec<PluginProcess>,
    plugins: BTreeMap<String, RemotePlugin>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a plugin process and connect to it.
    pub async fn launch(&mut self, name: &str, command: &str) -> Result<RemotePlugin, RpcError> {
        let process = PluginProcess::spawn(name, command).await?;
        let endpoint = Handshake::new(process.addr()).endpoint();
        self.processes.push(process);

        let plugin = RemotePlugin::connect(name, endpoint).await?;
        info!(plugin = %name, "plugin launched");
        self.plugins.insert(name.to_string(), plugin.clone());
        Ok(plugin)
    }

    /// Launch every plugin listed in `config`.
    pub async fn launch_all(&mut self, config: &Config) -> Result<(), RpcError> {
        for p in &config.plugins {
            self.launch(&p.name, &p.command).await?;
        }
        Ok(())
    }

    /// Connect to an already running plugin, e.g. one started under a debugger.
    pub async fn attach(&mut self, name: &str, addr: SocketAddr) -> Result<RemotePlugin, RpcError> {
        let plugin = RemotePlugin::connect(name, Handshake::new(addr).endpoint()).await?;
        info!(plugin = %name, %addr, "attached to plugin");
        self.plugins.insert(name.to_string(), plugin.clone());
        Ok(plugin)
    }

    pub fn plugins(&self) -> impl Iterator<Item = &RemotePlugin> {
        self.plugins.values()
    }

    /// A master aggregating every connected plugin.
    pub fn master(&self) -> Master {
        let mut master = Master::new();
        for (name, plugin) in &self.plugins {
            master.register(name.clone(), std::sync::Arc::new(plugin.clone()));
        }
        master
    }

    /// Stop every spawned process, attempting all of them.
    pub async fn shutdown(self) -> Result<(), TaskError> {
        let mut errors = AggregateError::new();
        for process in self.processes {
            let name = process.name().to_string();
            if let Err(e) = process.shutdown().await {
                warn!(plugin = %name, error = %e, "failed to stop plugin");
                errors.push(TaskError::from(e).for_member(&name));
            }
        }
        errors.into_result()
    }
}
