//! Utils for e2e tests. See `/tests` for the scenarios.
//!
//! The harness runs the engine simulator in-process, spawns the service and
//! quorum client binaries as child processes, and tears everything down on
//! drop.

pub mod engine_sim;

use std::fs;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

use engine_sim::EngineSim;
use tempdir::TempDir;

/// Local host IP address.
pub const LOCAL_HOST: &str = "127.0.0.1";

const SERVICE_BIN: &str = "../target/debug/sms_service";
const QUORUM_BIN: &str = "../target/debug/sms_quorum";

/// Absolute path to a workspace binary; children run with their own working
/// directory, so the relative path must be resolved up front.
fn bin_path(relative: &str) -> PathBuf {
    std::fs::canonicalize(relative)
        .unwrap_or_else(|_| panic!("{relative} not found; is the binary built?"))
}

/// How long to wait for the service listener to come up; bounded by the
/// service-side PGP keypair generation at first boot.
const PORT_WAIT: Duration = Duration::from_secs(120);

/// Kills a child process on drop.
#[derive(Debug)]
pub struct ChildWrapper(std::process::Child);

impl From<std::process::Child> for ChildWrapper {
    fn from(child: std::process::Child) -> Self {
        Self(child)
    }
}

impl Drop for ChildWrapper {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

/// Find a free localhost port.
pub fn find_free_port() -> u16 {
    TcpListener::bind((LOCAL_HOST, 0))
        .expect("bind to an ephemeral port")
        .local_addr()
        .expect("read local addr")
        .port()
}

/// Block until something is listening on `port`.
pub fn wait_until_port_is_bound(port: u16) {
    let deadline = Instant::now() + PORT_WAIT;
    while Instant::now() < deadline {
        if TcpStream::connect((LOCAL_HOST, port)).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    panic!("port {port} was never bound; is the binary built?");
}

/// The running stack: engine simulator plus one SMS service process.
pub struct Stack {
    /// Engine simulator handle.
    pub sim: EngineSim,
    /// Engine address the service is pointed at.
    pub engine_addr: SocketAddr,
    /// Service base URL, e.g. `http://127.0.0.1:4242`.
    pub base_url: String,
    /// Service working directory (holds `auth/` and the config file).
    pub service_dir: PathBuf,
    service: Option<ChildWrapper>,
    tmp: TempDir,
}

impl Stack {
    /// Spawn the simulator and the service, waiting until the service
    /// listener is bound.
    pub async fn bring_up() -> Self {
        let tmp = TempDir::new("sms-e2e").expect("create scratch dir");

        let sim = EngineSim::new();
        let engine_addr = sim.spawn().await;

        let service_dir = tmp.path().join("service");
        fs::create_dir_all(&service_dir).expect("create service dir");

        let mut stack = Self {
            sim,
            engine_addr,
            base_url: String::new(),
            service_dir,
            service: None,
            tmp,
        };
        stack.start_service();
        stack
    }

    /// Start (or restart) the service on a fresh port.
    pub fn start_service(&mut self) {
        // Fresh port on every start: lingering TIME_WAIT sockets from a
        // killed instance would block an immediate rebind.
        let port = find_free_port();
        self.base_url = format!("http://{LOCAL_HOST}:{port}");

        let config_path = self.service_dir.join("smsconfig.json");
        fs::write(
            &config_path,
            format!(
                r#"{{
                    "cafile": "",
                    "servercert": "",
                    "serverkey": "",
                    "password": "",
                    "smsdbaddress": "http://{}",
                    "vaulttoken": "",
                    "disable_tls": true,
                    "smsdburlenv": ""
                }}"#,
                self.engine_addr
            ),
        )
        .expect("write service config");

        let child = Command::new(bin_path(SERVICE_BIN))
            .current_dir(&self.service_dir)
            .args(["--config", "smsconfig.json"])
            .args(["--listen", &format!("{LOCAL_HOST}:{port}")])
            .args(["--auth-dir", "auth"])
            .spawn()
            .expect("spawn sms_service");
        self.service = Some(child.into());

        wait_until_port_is_bound(port);
    }

    /// Kill the service process, leaving its state directory intact.
    pub fn stop_service(&mut self) {
        self.service = None;
    }

    /// Spawn a quorum client named `pod`, polling every second. State lives
    /// under its own directory so restarts with the same name keep identity.
    pub fn spawn_client(&self, pod: &str) -> ChildWrapper {
        let client_dir = self.client_dir(pod);
        fs::create_dir_all(&client_dir).expect("create client dir");

        fs::write(
            client_dir.join("config.json"),
            format!(
                r#"{{
                    "url": "{}",
                    "cafile": "",
                    "clientcert": "",
                    "clientkey": "",
                    "timeout": "1s",
                    "disable_tls": true
                }}"#,
                self.base_url
            ),
        )
        .expect("write quorum config");

        Command::new(bin_path(QUORUM_BIN))
            .current_dir(&client_dir)
            .args(["--config", "config.json"])
            .args(["--auth-dir", "auth"])
            .args(["--pod-name", pod])
            .spawn()
            .expect("spawn sms_quorum")
            .into()
    }

    /// Working directory of the client named `pod`.
    pub fn client_dir(&self, pod: &str) -> PathBuf {
        self.tmp.path().join(format!("client-{pod}"))
    }

    /// Path of the client's persisted shard file.
    pub fn client_shard_path(&self, pod: &str) -> PathBuf {
        self.client_dir(pod).join("auth").join(pod).join("shard")
    }

    /// Poll the service until it reports unsealed.
    pub async fn wait_for_unsealed(&self, timeout: Duration) {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Ok(resp) = client
                .get(format!("{}/v1/sms/quorum/status", self.base_url))
                .send()
                .await
            {
                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    if body["sealstatus"] == serde_json::Value::Bool(false) {
                        return;
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        panic!("service never reported unsealed");
    }
}
