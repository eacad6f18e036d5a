//! Builds the child process invocation for a metrics exporter.
use std::{
    env,
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::Command,
};

use tracing::{debug, warn};

use crate::error::SidecarError;

/// Well-known exporter binaries and the ports they listen on by default.
const DEFAULT_PORTS: &[(&str, u16)] = &[
    ("haproxy_exporter", 9101),
    ("kafka_exporter", 9308),
    ("mongodb_exporter", 9216),
    ("mysqld_exporter", 9104),
    ("node_exporter", 9100),
    ("php-fpm_exporter", 9253),
    ("postgres_exporter", 9187),
    ("rabbitmq_exporter", 9419),
    ("redis_exporter", 9121),
];

/// Looks up the default listening port for a well-known exporter binary.
pub fn default_port(binary: &str) -> Option<u16> {
    DEFAULT_PORTS
        .iter()
        .find(|(name, _)| *name == binary)
        .map(|(_, port)| *port)
}

/// Description of the exporter to launch, before path and port resolution.
pub struct ExporterCommand {
    path: PathBuf,
    port: u16,
    args: Vec<String>,
    env: Vec<String>,
}

impl ExporterCommand {
    /// Creates a builder for the given binary.
    ///
    /// Each entry of `args` may carry several whitespace-separated flags;
    /// they are split apart here and empty fragments dropped.
    pub fn new(path: impl Into<PathBuf>, port: u16, args: &[String], env: &[String]) -> Self {
        let flags = args
            .iter()
            .flat_map(|arg| arg.split_whitespace())
            .map(|flag| flag.to_string())
            .collect();

        Self {
            path: path.into(),
            port,
            args: flags,
            env: env.to_vec(),
        }
    }

    /// Resolves the binary and assembles the ready-to-spawn [`Command`].
    ///
    /// Returns the command together with the resolved listening port (0 when
    /// the exporter is unknown and no port override was given). The child is
    /// placed in its own process group so terminal-generated signals reach
    /// only the supervisor, which relays them deliberately.
    pub fn build(mut self) -> Result<(Command, u16), SidecarError> {
        let path = resolve_binary(&self.path)?;
        let binary = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        if self.port == 0 {
            self.port = default_port(&binary).unwrap_or(0);
        }

        let mut command = Command::new(&path);
        command.args(&self.args);

        for pair in &self.env {
            match pair.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    command.env(key, value);
                }
                _ => warn!("Ignoring malformed environment entry '{pair}'"),
            }
        }

        // rabbitmq_exporter is configured through its environment; everything
        // else understands the standard listen-address flag.
        if binary == "rabbitmq_exporter" {
            command.env("PUBLISH_PORT", format!(":{}", self.port));
        } else {
            command.arg(format!("--web.listen-address=:{}", self.port));
        }

        unsafe {
            command.pre_exec(|| {
                if libc::setpgid(0, 0) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        debug!("Exporter command resolved to {path:?} on port {}", self.port);
        Ok((command, self.port))
    }
}

/// Resolves the exporter binary the same way a shell would.
///
/// Absolute and directory-qualified paths must exist as given; bare names
/// are searched on `PATH`.
fn resolve_binary(path: &Path) -> Result<PathBuf, SidecarError> {
    let not_found = || SidecarError::ExporterNotFound(path.display().to_string());

    if path.is_absolute() || path.components().count() > 1 {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(not_found())
        };
    }

    let search = env::var_os("PATH").unwrap_or_default();
    env::split_paths(&search)
        .map(|dir| dir.join(path))
        .find(|candidate| candidate.is_file())
        .ok_or_else(not_found)
}
