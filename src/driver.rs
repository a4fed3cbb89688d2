//! Protocol driver abstraction and the SSH realization.
//!
//! The pool manager never speaks a wire protocol itself. It hands connect
//! parameters and a credential to a [`Driver`], gets back a boxed
//! [`DriverSession`], and from then on only needs three things from it:
//! a cheap connectivity flag, a liveness probe, and command execution.
//!
//! [`SshDriver`] is the shipped realization: an interactive PTY + shell
//! channel over `async-ssh2-tokio`/`russh`, with a background I/O task
//! bridging the channel to mpsc queues and prompt-based readiness
//! detection. It performs no device state-machine handling.

use std::borrow::Cow;
use std::time::Duration;

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::{Config, ServerCheckMethod};
use async_trait::async_trait;
use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{cipher, compression, kex, mac, ChannelMsg, Preferred};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::store::Credential;

/// Default port for the shipped SSH driver.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Trailing shell prompt of a network device CLI (`>`, `#`, `%`, `$`, `]`).
static PROMPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[>#%\$\]]\s*$").expect("prompt regex"));

/// Driver-level failure taxonomy.
///
/// The session factory consults [`DriverError::is_transient`] to decide
/// whether an attempt may be retried.
#[derive(Error, Debug)]
pub enum DriverError {
    /// A connect phase did not complete in time. Transient.
    #[error("connect timed out: {0}")]
    Timeout(String),

    /// The remote endpoint refused the transport connection. Transient.
    #[error("connection refused: {0}")]
    Refused(String),

    /// The remote endpoint rejected the credential. Terminal.
    #[error("authentication rejected for {0}")]
    AuthenticationFailed(String),

    /// The transport failed or closed underneath the session.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The remote side violated the expected shell interaction.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl DriverError {
    /// True for failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::Timeout(_) | DriverError::Refused(_))
    }
}

/// Where to connect. Hosts may carry an explicit port (`10.0.0.1:2222`,
/// `[fe80::1]:22`); otherwise [`DEFAULT_SSH_PORT`] applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
}

impl ConnectParams {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Splits an optional `:port` suffix off a host string.
    pub fn parse(host: &str) -> Self {
        if let Some(rest) = host.strip_prefix('[') {
            if let Some((addr, suffix)) = rest.split_once(']') {
                let port = suffix
                    .strip_prefix(':')
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(DEFAULT_SSH_PORT);
                return Self::new(addr, port);
            }
        }
        match host.rsplit_once(':') {
            Some((addr, port)) if !addr.contains(':') => match port.parse() {
                Ok(port) => Self::new(addr, port),
                Err(_) => Self::new(host, DEFAULT_SSH_PORT),
            },
            _ => Self::new(host, DEFAULT_SSH_PORT),
        }
    }
}

/// Produces live sessions from connect parameters and a credential.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Establishes one authenticated interactive session.
    ///
    /// `timeout` is the budget for this single attempt; implementations
    /// should bound their handshake phases with it. The factory applies
    /// the same bound around the whole call regardless.
    async fn connect(
        &self,
        params: &ConnectParams,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<Box<dyn DriverSession>, DriverError>;
}

/// One live interactive session produced by a [`Driver`].
#[async_trait]
pub trait DriverSession: Send {
    /// Cheap, non-blocking connectivity flag. Used on release.
    fn is_connected(&self) -> bool;

    /// Benign no-op exchange verifying the remote shell still answers.
    ///
    /// Callers bound this with a timeout; implementations may block on
    /// the remote side indefinitely.
    async fn probe(&mut self) -> Result<(), DriverError>;

    /// Runs one command and returns its output with the echoed command
    /// and trailing prompt stripped.
    async fn execute(&mut self, command: &str, timeout: Duration) -> Result<String, DriverError>;

    /// Attempts a graceful teardown. Infallible; errors are swallowed
    /// since the transport is dropped afterwards either way.
    async fn close(&mut self);
}

// SSH algorithm tables, one per profile. Network gear frequently runs old
// firmware, so the legacy profile extends the secure one with SHA-1 kex,
// CBC ciphers, and RSA/DSA host keys.

const SECURE_KEX: &[kex::Name] = &[
    kex::CURVE25519,
    kex::ECDH_SHA2_NISTP256,
    kex::DH_G14_SHA256,
];

const LEGACY_KEX: &[kex::Name] = &[
    kex::CURVE25519,
    kex::ECDH_SHA2_NISTP256,
    kex::DH_G14_SHA256,
    kex::DH_GEX_SHA256,
    kex::DH_GEX_SHA1,
    kex::DH_G14_SHA1,
    kex::DH_G1_SHA1,
];

const SECURE_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_128_CTR,
];

const LEGACY_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_128_CTR,
    cipher::AES_256_CBC,
    cipher::AES_128_CBC,
];

const SECURE_MACS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
];

const LEGACY_MACS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
    mac::HMAC_SHA1,
];

const SECURE_KEYS: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
];

const LEGACY_KEYS: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa { hash: None },
    Algorithm::Dsa,
];

const COMPRESSION: &[compression::Name] = &[compression::NONE, compression::ZLIB];

/// SSH algorithm policy for the shipped driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SecurityProfile {
    /// Strict modern algorithms (default).
    Secure,
    /// Maximum compatibility with legacy devices.
    LegacyCompatible,
}

impl SecurityProfile {
    fn preferred(&self) -> Preferred {
        match self {
            SecurityProfile::Secure => Preferred {
                kex: Cow::Borrowed(SECURE_KEX),
                key: Cow::Borrowed(SECURE_KEYS),
                cipher: Cow::Borrowed(SECURE_CIPHERS),
                mac: Cow::Borrowed(SECURE_MACS),
                compression: Cow::Borrowed(COMPRESSION),
            },
            SecurityProfile::LegacyCompatible => Preferred {
                kex: Cow::Borrowed(LEGACY_KEX),
                key: Cow::Borrowed(LEGACY_KEYS),
                cipher: Cow::Borrowed(LEGACY_CIPHERS),
                mac: Cow::Borrowed(LEGACY_MACS),
                compression: Cow::Borrowed(COMPRESSION),
            },
        }
    }
}

/// Connection options for [`SshDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    pub security: SecurityProfile,
    /// Server host key verification method.
    pub server_check: ServerCheckMethod,
    /// Transport-level inactivity bound passed to the SSH client.
    pub inactivity_timeout: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            security: SecurityProfile::Secure,
            server_check: ServerCheckMethod::DefaultKnownHostsFile,
            inactivity_timeout: Duration::from_secs(60),
        }
    }
}

impl SshOptions {
    /// Legacy profile with host key checking disabled, for lab gear.
    pub fn legacy_compatible() -> Self {
        Self {
            security: SecurityProfile::LegacyCompatible,
            server_check: ServerCheckMethod::NoCheck,
            ..Self::default()
        }
    }
}

/// SSH [`Driver`] for interactive network device shells.
#[derive(Debug, Clone, Default)]
pub struct SshDriver {
    options: SshOptions,
}

impl SshDriver {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Driver for SshDriver {
    async fn connect(
        &self,
        params: &ConnectParams,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<Box<dyn DriverSession>, DriverError> {
        let session = SshSession::open(params, credential, &self.options, timeout).await?;
        Ok(Box::new(session))
    }
}

/// async-ssh2-tokio does not expose a stable error taxonomy; classify
/// from the rendered message.
fn classify_client_error(err: async_ssh2_tokio::Error, host: &str) -> DriverError {
    let message = err.to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains("password") || lower.contains("auth") {
        DriverError::AuthenticationFailed(host.to_string())
    } else if lower.contains("refused") {
        DriverError::Refused(message)
    } else if lower.contains("timed out") || lower.contains("timeout") {
        DriverError::Timeout(message)
    } else {
        DriverError::Transport(message)
    }
}

struct SshSession {
    client: Client,
    device_addr: String,
    to_shell: Sender<String>,
    from_shell: Receiver<String>,
}

impl SshSession {
    async fn open(
        params: &ConnectParams,
        credential: &Credential,
        options: &SshOptions,
        timeout: Duration,
    ) -> Result<Self, DriverError> {
        let device_addr = format!("{}@{}:{}", credential.username, params.host, params.port);

        let config = Config {
            preferred: options.security.preferred(),
            inactivity_timeout: Some(options.inactivity_timeout),
            ..Default::default()
        };

        let connect = Client::connect_with_config(
            (params.host.clone(), params.port),
            &credential.username,
            AuthMethod::with_password(&credential.secret),
            options.server_check.clone(),
            config,
        );
        let client = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| DriverError::Timeout(format!("connect to {device_addr}")))?
            .map_err(|err| classify_client_error(err, &params.host))?;
        debug!("{} TCP connection successful", device_addr);

        let mut channel = client
            .get_channel()
            .await
            .map_err(|err| classify_client_error(err, &params.host))?;
        channel
            .request_pty(false, "xterm", 800, 600, 0, 0, &[])
            .await
            .map_err(|err| DriverError::Transport(err.to_string()))?;
        channel
            .request_shell(false)
            .await
            .map_err(|err| DriverError::Transport(err.to_string()))?;
        debug!("{} Shell request successful", device_addr);

        let (to_shell, mut from_caller) = mpsc::channel::<String>(256);
        let (to_caller, from_shell) = mpsc::channel::<String>(256);

        let io_task_device_addr = device_addr.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(data) = from_caller.recv() => {
                        if let Err(e) = channel.data(data.as_bytes()).await {
                            debug!("{} Failed to send data to shell: {:?}", io_task_device_addr, e);
                            break;
                        }
                    },
                    Some(msg) = channel.wait() => {
                        match msg {
                            ChannelMsg::Data { ref data } => {
                                if let Ok(s) = std::str::from_utf8(data)
                                    && to_caller.send(s.to_string()).await.is_err() {
                                        debug!("{} Shell output receiver dropped. Closing task.", io_task_device_addr);
                                        break;
                                    }
                            }
                            ChannelMsg::ExitStatus { exit_status } => {
                                debug!("{} Shell exited with status code: {}", io_task_device_addr, exit_status);
                                let _ = channel.eof().await;
                                break;
                            }
                            ChannelMsg::Eof => {
                                debug!("{} Shell sent EOF.", io_task_device_addr);
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
            debug!("{} SSH I/O task ended.", io_task_device_addr);
        });

        let mut session = Self {
            client,
            device_addr,
            to_shell,
            from_shell,
        };

        // Let the login banner settle into a prompt before handing the
        // session out.
        let addr = session.device_addr.clone();
        tokio::time::timeout(timeout, session.read_until_prompt(&mut String::new()))
            .await
            .map_err(|_| DriverError::Timeout(format!("waiting for prompt on {addr}")))??;

        Ok(session)
    }

    /// Accumulates shell output into `collected` until the remaining
    /// partial line looks like a prompt. Unbounded; callers apply the
    /// timeout.
    async fn read_until_prompt(&mut self, collected: &mut String) -> Result<(), DriverError> {
        loop {
            match self.from_shell.recv().await {
                Some(data) => {
                    trace!("{} recv {:?}", self.device_addr, data);
                    collected.push_str(&data);
                    let tail = collected.rsplit('\n').next().unwrap_or("");
                    if !tail.is_empty() && PROMPT_RE.is_match(tail) {
                        return Ok(());
                    }
                }
                None => {
                    return Err(DriverError::Transport(format!(
                        "shell channel closed for {}",
                        self.device_addr
                    )));
                }
            }
        }
    }

    fn drain_residual(&mut self) {
        while self.from_shell.try_recv().is_ok() {}
    }
}

/// Strips the echoed command line and the trailing prompt line.
fn clean_output(raw: &str, command: &str) -> String {
    let mut lines: Vec<&str> = raw.lines().collect();
    if lines
        .last()
        .map(|last| PROMPT_RE.is_match(last))
        .unwrap_or(false)
    {
        lines.pop();
    }
    if lines.first().map(|first| first.trim() == command.trim()).unwrap_or(false) {
        lines.remove(0);
    }
    lines.join("\n")
}

#[async_trait]
impl DriverSession for SshSession {
    fn is_connected(&self) -> bool {
        !self.client.is_closed()
    }

    async fn probe(&mut self) -> Result<(), DriverError> {
        if !self.is_connected() {
            return Err(DriverError::Transport(format!(
                "connection closed: {}",
                self.device_addr
            )));
        }
        self.drain_residual();
        self.to_shell
            .send("\n".to_string())
            .await
            .map_err(|_| DriverError::Transport("shell writer closed".to_string()))?;
        self.read_until_prompt(&mut String::new()).await
    }

    async fn execute(&mut self, command: &str, timeout: Duration) -> Result<String, DriverError> {
        self.drain_residual();
        self.to_shell
            .send(format!("{command}\n"))
            .await
            .map_err(|_| DriverError::Transport("shell writer closed".to_string()))?;

        let addr = self.device_addr.clone();
        let mut collected = String::new();
        tokio::time::timeout(timeout, self.read_until_prompt(&mut collected))
            .await
            .map_err(|_| DriverError::Timeout(format!("'{command}' on {addr}")))??;

        Ok(clean_output(&collected, command))
    }

    async fn close(&mut self) {
        debug!("{} closing SSH session", self.device_addr);

        // 1. Stop receiving new data.
        self.from_shell.close();

        // 2. Try a graceful exit if the transport is still up.
        if self.is_connected() {
            if let Err(e) = self.to_shell.send("exit\n".to_string()).await {
                debug!("{} Failed to send exit command: {:?}", self.device_addr, e);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        // 3. The underlying client closes on drop.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_host_uses_default_port() {
        assert_eq!(
            ConnectParams::parse("10.0.0.1"),
            ConnectParams::new("10.0.0.1", DEFAULT_SSH_PORT)
        );
    }

    #[test]
    fn parse_host_with_port() {
        assert_eq!(
            ConnectParams::parse("edge-1.example:2222"),
            ConnectParams::new("edge-1.example", 2222)
        );
    }

    #[test]
    fn parse_bracketed_ipv6() {
        assert_eq!(
            ConnectParams::parse("[fe80::1]:830"),
            ConnectParams::new("fe80::1", 830)
        );
        assert_eq!(
            ConnectParams::parse("fe80::1"),
            ConnectParams::new("fe80::1", DEFAULT_SSH_PORT)
        );
    }

    #[test]
    fn transient_errors_are_retryable_only() {
        assert!(DriverError::Timeout("t".to_string()).is_transient());
        assert!(DriverError::Refused("r".to_string()).is_transient());
        assert!(!DriverError::AuthenticationFailed("a".to_string()).is_transient());
        assert!(!DriverError::Transport("x".to_string()).is_transient());
        assert!(!DriverError::Protocol("p".to_string()).is_transient());
    }

    #[test]
    fn prompt_regex_matches_device_prompts() {
        for prompt in ["router#", "switch> ", "fw-01] ", "box$ ", "sys% "] {
            assert!(PROMPT_RE.is_match(prompt), "{prompt:?} should match");
        }
        assert!(!PROMPT_RE.is_match("interface GigabitEthernet0/1"));
    }

    #[test]
    fn clean_output_strips_echo_and_prompt() {
        let raw = "show version\nIOS 15.2\nUptime 4 weeks\nrouter#";
        assert_eq!(clean_output(raw, "show version"), "IOS 15.2\nUptime 4 weeks");
    }

    #[test]
    fn legacy_profile_extends_secure_algorithms() {
        let secure = SecurityProfile::Secure.preferred();
        let legacy = SecurityProfile::LegacyCompatible.preferred();

        assert!(secure.kex.iter().all(|alg| *alg != kex::DH_G1_SHA1));
        assert!(legacy.kex.contains(&kex::DH_G1_SHA1));
        assert!(legacy.cipher.contains(&cipher::AES_128_CBC));
        assert!(secure.mac.iter().all(|alg| *alg != mac::HMAC_SHA1));
    }
}
