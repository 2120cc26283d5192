//! Device transport: pull the running configuration off a device.

use std::io::Read;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::models::{device_type, Device};

/// Connection details for one device
#[derive(Debug, Clone)]
pub struct DeviceTarget {
    pub hostname: String,
    pub address: String,
    pub username: String,
    pub password: String,
    pub device_type: String,
}

impl From<&Device> for DeviceTarget {
    fn from(device: &Device) -> Self {
        Self {
            hostname: device.hostname.clone(),
            address: device.address.clone(),
            username: device.username.clone(),
            password: device.password.clone(),
            device_type: device.device_type.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("connection to {host} failed: {reason}")]
    Connect { host: String, reason: String },
    #[error("authentication to {host} failed")]
    Auth { host: String },
    #[error("command on {host} failed: {reason}")]
    Command { host: String, reason: String },
    #[error("fetch from {host} timed out after {secs}s")]
    Timeout { host: String, secs: u64 },
    #[error("no fetch command for device type {0:?}")]
    UnsupportedCommand(String),
}

/// Returns the raw configuration text of a device
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, target: &DeviceTarget) -> Result<String, TransportError>;
}

/// CLI command that prints the running configuration for a vendor tag
pub fn fetch_command(vendor_tag: &str) -> Option<&'static str> {
    match vendor_tag {
        device_type::HP_COMWARE => Some("display current-configuration"),
        device_type::HILLSTONE => Some("show configuration"),
        device_type::F5 | device_type::F5_BIGIP => Some("tmsh -q list ltm"),
        device_type::CISCO_IOS => Some("show running-config"),
        _ => None,
    }
}

/// Keyboard-interactive prompt handler that always responds with the password
struct PasswordPrompt {
    password: String,
}

impl ssh2::KeyboardInteractivePrompt for PasswordPrompt {
    fn prompt<'a>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt<'a>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.password.clone()).collect()
    }
}

fn resolve(address: &str, port: u16) -> Result<SocketAddr, String> {
    (address, port)
        .to_socket_addrs()
        .map_err(|e| format!("cannot resolve {}: {}", address, e))?
        .next()
        .ok_or_else(|| format!("no address for {}", address))
}

/// Create an SSH session and authenticate with password + keyboard-interactive.
/// Blocking, so call from a spawn_blocking context.
fn ssh_connect(target: &DeviceTarget, timeout: Duration) -> Result<ssh2::Session, TransportError> {
    let connect_err = |reason: String| TransportError::Connect {
        host: target.hostname.clone(),
        reason,
    };

    let addr = resolve(&target.address, 22).map_err(connect_err)?;
    let tcp = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|e| connect_err(format!("TCP connection failed: {}", e)))?;
    tcp.set_read_timeout(Some(timeout)).ok();
    tcp.set_write_timeout(Some(timeout)).ok();

    let mut session =
        ssh2::Session::new().map_err(|e| connect_err(format!("Failed to create SSH session: {}", e)))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
    session
        .handshake()
        .map_err(|e| connect_err(format!("SSH handshake failed: {}", e)))?;

    match session.userauth_password(&target.username, &target.password) {
        Ok(_) if session.authenticated() => return Ok(session),
        _ => {}
    }

    // Comware and StoneOS often only offer keyboard-interactive
    let mut prompter = PasswordPrompt {
        password: target.password.clone(),
    };
    let _ = session.userauth_keyboard_interactive(&target.username, &mut prompter);

    if session.authenticated() {
        Ok(session)
    } else {
        Err(TransportError::Auth {
            host: target.hostname.clone(),
        })
    }
}

/// Milliseconds left before `deadline`, for `Session::set_timeout`.
/// None once the deadline has passed.
fn remaining_ms(deadline: Instant, now: Instant) -> Option<u32> {
    let left = deadline.checked_duration_since(now)?.as_millis();
    if left == 0 {
        return None;
    }
    Some(left.min(u32::MAX as u128) as u32)
}

/// Connect and run a single command, returning its output. Every blocking
/// call is bounded by what is left of `limit`, so the thread ends close to
/// the deadline even when the caller has stopped waiting.
/// Blocking, so call from a spawn_blocking context.
fn ssh_run_command(
    target: &DeviceTarget,
    command: &str,
    connect_timeout: Duration,
    limit: Duration,
) -> Result<String, TransportError> {
    let deadline = Instant::now() + limit;
    let timed_out = || TransportError::Timeout {
        host: target.hostname.clone(),
        secs: limit.as_secs(),
    };

    let session = ssh_connect(target, connect_timeout.min(limit))?;
    let command_err = |reason: String| TransportError::Command {
        host: target.hostname.clone(),
        reason,
    };

    session.set_timeout(remaining_ms(deadline, Instant::now()).ok_or_else(timed_out)?);
    let mut channel = session
        .channel_session()
        .map_err(|e| command_err(format!("Failed to open channel: {}", e)))?;
    channel
        .exec(command)
        .map_err(|e| command_err(format!("Failed to execute command: {}", e)))?;

    let mut output = Vec::new();
    let mut buf = [0u8; 16 * 1024];
    loop {
        let Some(ms) = remaining_ms(deadline, Instant::now()) else {
            return Err(timed_out());
        };
        session.set_timeout(ms);
        match channel.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => output.extend_from_slice(&buf[..n]),
            Err(_) if Instant::now() >= deadline => return Err(timed_out()),
            Err(e) => return Err(command_err(format!("Failed to read output: {}", e))),
        }
    }
    channel
        .wait_close()
        .map_err(|e| command_err(format!("Failed to close channel: {}", e)))?;

    Ok(String::from_utf8_lossy(&output).into_owned())
}

/// ssh2-backed transport. The session runs on the blocking pool and gives
/// up once `fetch_timeout` has elapsed.
#[derive(Debug, Clone)]
pub struct SshTransport {
    connect_timeout: Duration,
    fetch_timeout: Duration,
}

impl SshTransport {
    pub fn new(connect_timeout: Duration, fetch_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            fetch_timeout,
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn fetch(&self, target: &DeviceTarget) -> Result<String, TransportError> {
        let command = fetch_command(&target.device_type)
            .ok_or_else(|| TransportError::UnsupportedCommand(target.device_type.clone()))?;

        tracing::info!(
            "Fetching config from {} ({}) as {}",
            target.hostname,
            target.address,
            target.username
        );

        let owned = target.clone();
        let (connect_timeout, fetch_timeout) = (self.connect_timeout, self.fetch_timeout);
        tokio::task::spawn_blocking(move || ssh_run_command(&owned, command, connect_timeout, fetch_timeout))
            .await
            .map_err(|e| TransportError::Command {
                host: target.hostname.clone(),
                reason: format!("Task join error: {}", e),
            })?
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory transport answering from a per-hostname script
    #[derive(Default)]
    pub struct ScriptedTransport {
        responses: Mutex<HashMap<String, Result<String, TransportError>>>,
        delay: Option<Duration>,
        calls: Mutex<Vec<String>>,
        panics: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub fn respond(&self, hostname: &str, text: &str) {
            self.responses
                .lock()
                .unwrap()
                .insert(hostname.to_string(), Ok(text.to_string()));
        }

        pub fn fail(&self, hostname: &str, err: TransportError) {
            self.responses.lock().unwrap().insert(hostname.to_string(), Err(err));
        }

        pub fn panic_for(&self, hostname: &str) {
            self.panics.lock().unwrap().push(hostname.to_string());
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn fetch(&self, target: &DeviceTarget) -> Result<String, TransportError> {
            self.calls.lock().unwrap().push(target.hostname.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.panics.lock().unwrap().contains(&target.hostname) {
                panic!("scripted panic for {}", target.hostname);
            }
            self.responses
                .lock()
                .unwrap()
                .get(&target.hostname)
                .cloned()
                .unwrap_or_else(|| {
                    Err(TransportError::Connect {
                        host: target.hostname.clone(),
                        reason: "no scripted response".to_string(),
                    })
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(device_type: &str) -> DeviceTarget {
        DeviceTarget {
            hostname: "lab-sw".to_string(),
            address: "127.0.0.1".to_string(),
            username: "admin".to_string(),
            password: "secret".to_string(),
            device_type: device_type.to_string(),
        }
    }

    #[test]
    fn test_fetch_command_per_vendor() {
        assert_eq!(fetch_command("hp_comware"), Some("display current-configuration"));
        assert_eq!(fetch_command("hillstone_stoneos"), Some("show configuration"));
        assert_eq!(fetch_command("f5"), Some("tmsh -q list ltm"));
        assert_eq!(fetch_command("f5_bigip"), Some("tmsh -q list ltm"));
        assert_eq!(fetch_command("cisco_ios"), Some("show running-config"));
        assert_eq!(fetch_command("juniper"), None);
    }

    #[tokio::test]
    async fn test_unknown_vendor_fails_before_connecting() {
        let transport = SshTransport::new(Duration::from_secs(1), Duration::from_secs(1));
        let err = tokio_test::assert_err!(transport.fetch(&target("juniper")).await);
        assert_eq!(err, TransportError::UnsupportedCommand("juniper".to_string()));
    }

    #[test]
    fn test_remaining_ms_stops_at_deadline() {
        let now = Instant::now();
        assert_eq!(remaining_ms(now + Duration::from_millis(1500), now), Some(1500));
        assert_eq!(remaining_ms(now, now), None);
        assert_eq!(remaining_ms(now, now + Duration::from_secs(1)), None);
    }

    #[tokio::test]
    async fn test_unreachable_host_gives_up_within_fetch_timeout() {
        let transport = SshTransport::new(Duration::from_secs(30), Duration::from_millis(300));
        let mut unroutable = target("hp_comware");
        // TEST-NET-1, never answers
        unroutable.address = "192.0.2.1".to_string();

        let started = Instant::now();
        let err = tokio_test::assert_err!(transport.fetch(&unroutable).await);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(err, TransportError::Connect { .. } | TransportError::Timeout { .. }));
    }

    #[test]
    fn test_resolve_accepts_ipv4_and_ipv6() {
        assert_eq!(resolve("192.0.2.1", 22).expect("v4").port(), 22);
        assert!(resolve("2001:db8::1", 22).expect("v6").is_ipv6());
    }

    #[tokio::test]
    async fn test_scripted_transport() {
        let transport = testing::ScriptedTransport::new();
        transport.respond("lab-sw", "sysname lab-sw");
        assert_eq!(
            transport.fetch(&target("hp_comware")).await.as_deref(),
            Ok("sysname lab-sw")
        );
        assert_eq!(transport.calls(), vec!["lab-sw"]);
    }
}
