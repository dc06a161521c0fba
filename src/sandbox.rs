//! Container sandboxing for untrusted stdio ETP servers.
//!
//! Grounded on two things from the pack: `mcp::transport::StdioTransport`'s
//! `tokio::process::Command` construction (the shape this module wraps
//! rather than replaces), and `stencila-stencila`'s
//! `codec_utils::container::is_in_container` for how the corpus probes
//! container tooling from Rust — this module runs the analogous probe
//! against the *host's* container runtime (`docker`/`podman` on PATH)
//! rather than detecting whether the current process itself is
//! containerized.

use std::process::Stdio;
use tokio::process::Command;

/// Resource/privilege policy applied to a sandboxed server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxPolicy {
    pub network_enabled: bool,
    pub memory_limit_mb: u32,
    pub cpu_limit_percent: u32,
    pub pid_limit: u32,
}

/// Default policy for `user_added` servers: no network,
/// all capabilities dropped, read-only rootfs, tight resource caps.
pub const DEFAULT_POLICY: SandboxPolicy =
    SandboxPolicy { network_enabled: false, memory_limit_mb: 512, cpu_limit_percent: 50, pid_limit: 50 };

/// Policy for `verified`/`builtin` servers that legitimately need
/// outbound network access (e.g. a web-search ETP server).
pub const VERIFIED_POLICY: SandboxPolicy =
    SandboxPolicy { network_enabled: true, memory_limit_mb: 512, cpu_limit_percent: 50, pid_limit: 50 };

/// Which container runtime is available on the host, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Runtime {
    Docker,
    Podman,
}

impl Runtime {
    fn binary(self) -> &'static str {
        match self {
            Runtime::Docker => "docker",
            Runtime::Podman => "podman",
        }
    }
}

fn detect_runtime() -> Option<Runtime> {
    for candidate in [Runtime::Docker, Runtime::Podman] {
        if which(candidate.binary()) {
            return Some(candidate);
        }
    }
    None
}

fn which(binary: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join(binary).is_file())
        })
        .unwrap_or(false)
}

/// Builds the `tokio::process::Command` that launches `command args` for
/// a `user_added`/untrusted server, wrapped in a container runtime when
/// one is available on the host. `image` is the container image the
/// command runs inside — required by [`crate::types::ExternalServerConfig::validate`]
/// whenever sandboxing is requested, so it is never optional here.
///
/// Falls back to a bare, unsandboxed launch with a `tracing::warn!` when
/// no container runtime is found — the server still runs,
/// but the caller should surface that degradation to the user.
pub fn sandboxed_command(image: &str, command: &str, args: &[String], policy: SandboxPolicy) -> Command {
    match detect_runtime() {
        Some(runtime) => container_command(runtime, image, command, args, policy),
        None => {
            tracing::warn!(
                command,
                "no container runtime (docker/podman) found on PATH; launching ETP server \
                 unsandboxed — resource and network isolation will not apply"
            );
            let mut cmd = Command::new(command);
            cmd.args(args);
            cmd
        }
    }
}

fn container_command(runtime: Runtime, image: &str, command: &str, args: &[String], policy: SandboxPolicy) -> Command {
    let mut cmd = Command::new(runtime.binary());
    cmd.arg("run")
        .arg("--rm")
        .arg("-i")
        .arg("--cap-drop").arg("ALL")
        .arg("--security-opt").arg("no-new-privileges")
        .arg("--read-only")
        .arg("--tmpfs").arg("/tmp")
        .arg("--memory").arg(format!("{}m", policy.memory_limit_mb))
        .arg("--cpus").arg(format!("{:.2}", policy.cpu_limit_percent as f64 / 100.0))
        .arg("--pids-limit").arg(policy.pid_limit.to_string());

    if !policy.network_enabled {
        cmd.arg("--network").arg("none");
    }

    // IMAGE must precede the in-container command: `docker run [OPTIONS]
    // IMAGE [COMMAND...]`. Without it the server's own binary would be
    // misread as the image reference.
    cmd.arg(image).arg(command).args(args);
    cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::inherit());
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_has_no_network() {
        assert!(!DEFAULT_POLICY.network_enabled);
        assert!(VERIFIED_POLICY.network_enabled);
    }

    #[test]
    fn which_finds_a_binary_known_to_exist_on_test_hosts() {
        // `sh` is present on every Linux/macOS CI runner this crate
        // targets; this just exercises the PATH-scan logic itself.
        assert!(which("sh") || which("cmd.exe"));
    }

    #[test]
    fn container_command_places_image_before_the_in_container_command() {
        let cmd = container_command(Runtime::Docker, "node:20-alpine", "npx", &["-y".to_string(), "server".to_string()], DEFAULT_POLICY);
        let args: Vec<String> = cmd.as_std().get_args().map(|a| a.to_string_lossy().to_string()).collect();
        let image_pos = args.iter().position(|a| a == "node:20-alpine").expect("image arg present");
        let command_pos = args.iter().position(|a| a == "npx").expect("command arg present");
        assert!(image_pos < command_pos, "image must precede the in-container command: {args:?}");
    }
}
