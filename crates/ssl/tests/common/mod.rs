//! Shared fixtures: a scripted ACME client and a temp-dir backed service

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use parking_lot::Mutex;
use rcgen::{CertificateParams, DnType, KeyPair};
use tempfile::TempDir;

use hop_common::DnsProviderId;
use hop_config::DataLayout;
use hop_ssl::{
    domain_token, AcmeClientRunner, AcmeError, CertificateIssuer, CertificateService, ClientOutput,
    JsonStore, ProviderKind,
};

pub const EMAIL: &str = "ops@example.com";
pub const TEST_ISSUER: &str = "Hop Test CA";

/// What the scripted client does for one run
#[derive(Debug, Clone)]
pub enum Response {
    /// Write PEM material valid for `days` for the primary domain and exit 0
    Deposit { days: i64 },
    /// Exit with the given code and output, touching nothing
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
}

impl Response {
    pub fn fail(stderr: &str) -> Self {
        Response::Exit {
            code: 1,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    pub fn succeed_silently() -> Self {
        Response::Exit {
            code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn no_renewal(domain: &str) -> Self {
        Response::Exit {
            code: 0,
            stdout: String::new(),
            stderr: format!(
                "[{domain}] The certificate expires in 80 days, the number of days defined \
                 to perform the renewal is 30: no renewal."
            ),
        }
    }
}

/// One recorded invocation
#[derive(Debug, Clone)]
pub struct Call {
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub entered: Instant,
    pub exited: Instant,
}

impl Call {
    pub fn joined(&self) -> String {
        self.args.join(" ")
    }

    pub fn has_arg_pair(&self, flag: &str, value: &str) -> bool {
        self.args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }
}

/// Test double for the external ACME client
pub struct ScriptedClient {
    responses: Mutex<VecDeque<Response>>,
    default: Response,
    calls: Mutex<Vec<Call>>,
    delay: Duration,
    installed: bool,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            default: Response::Deposit { days: 90 },
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            installed: true,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_default(mut self, response: Response) -> Self {
        self.default = response;
        self
    }

    pub fn not_installed(mut self) -> Self {
        self.installed = false;
        self
    }

    /// Queue a response for the next run
    pub fn push(&self, response: Response) {
        self.responses.lock().push_back(response);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn last_call(&self) -> Call {
        self.calls().pop().expect("client was never invoked")
    }
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

#[async_trait]
impl AcmeClientRunner for ScriptedClient {
    async fn run(
        &self,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<ClientOutput, AcmeError> {
        let entered = Instant::now();

        if args.first().map(String::as_str) == Some("--version") {
            return Ok(ClientOutput {
                status: Some(0),
                stdout: "\nlego version 4.17.4 linux/amd64\n".to_string(),
                stderr: String::new(),
            });
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let response = self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());

        let output = match response {
            Response::Deposit { days } => {
                let work_dir = PathBuf::from(arg_value(args, "--path").expect("--path"));
                let primary = arg_value(args, "--domains").expect("--domains");
                let domains: Vec<String> = args
                    .windows(2)
                    .filter(|w| w[0] == "--domains")
                    .map(|w| w[1].clone())
                    .collect();
                deposit(&work_dir, primary, &domains, days);
                ClientOutput {
                    status: Some(0),
                    stdout: format!("[{primary}] Server responded with a certificate."),
                    stderr: String::new(),
                }
            }
            Response::Exit {
                code,
                stdout,
                stderr,
            } => ClientOutput {
                status: Some(code),
                stdout,
                stderr,
            },
        };

        self.calls.lock().push(Call {
            args: args.to_vec(),
            env: env.clone(),
            entered,
            exited: Instant::now(),
        });

        Ok(output)
    }

    fn name(&self) -> &str {
        "scripted-lego"
    }

    fn is_installed(&self) -> bool {
        self.installed
    }
}

/// Self-signed PEM certificate and key valid from yesterday for `days`
pub fn certificate_pem(domains: &[String], days: i64) -> (String, String) {
    let mut params = CertificateParams::new(domains.to_vec()).expect("certificate params");
    let not_before = Utc::now() - chrono::Duration::days(1);
    let not_after = Utc::now() + chrono::Duration::days(days);
    params.not_before =
        rcgen::date_time_ymd(not_before.year(), not_before.month() as u8, not_before.day() as u8);
    params.not_after =
        rcgen::date_time_ymd(not_after.year(), not_after.month() as u8, not_after.day() as u8);
    params.distinguished_name.push(DnType::CommonName, TEST_ISSUER);

    let key = KeyPair::generate().expect("key pair");
    let cert = params.self_signed(&key).expect("self-signed certificate");
    (cert.pem(), key.serialize_pem())
}

/// Write the four client artifacts for `primary` under `<work_dir>/certificates`
pub fn deposit(work_dir: &Path, primary: &str, domains: &[String], days: i64) {
    let dir = work_dir.join("certificates");
    fs::create_dir_all(&dir).expect("certificates dir");

    let token = domain_token(primary);
    let (cert, key) = certificate_pem(domains, days);
    fs::write(dir.join(format!("{token}.crt")), &cert).expect("write crt");
    fs::write(dir.join(format!("{token}.key")), key).expect("write key");
    fs::write(dir.join(format!("{token}.json")), "{}").expect("write json");
    fs::write(dir.join(format!("{token}.issuer.crt")), cert).expect("write issuer");
}

/// Service wired to a scripted client and a JSON store in a temp dir
pub struct Harness {
    pub temp_dir: TempDir,
    pub layout: DataLayout,
    pub store: Arc<JsonStore>,
    pub client: Arc<ScriptedClient>,
    pub issuer: Arc<CertificateIssuer>,
    pub service: CertificateService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_client(ScriptedClient::new())
    }

    pub fn with_client(client: ScriptedClient) -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let layout = DataLayout::new(temp_dir.path().join("data"));
        let store = Arc::new(JsonStore::open(&layout.store_file).expect("store"));
        let client = Arc::new(client);
        let issuer = Arc::new(CertificateIssuer::new(
            store.clone(),
            client.clone(),
            layout.clone(),
        ));
        let service = CertificateService::new(issuer.clone());

        Self {
            temp_dir,
            layout,
            store,
            client,
            issuer,
            service,
        }
    }

    /// Cloudflare provider configured with only an API token
    pub fn cloudflare_provider(&self) -> DnsProviderId {
        self.service
            .create_dns_provider("cloudflare", ProviderKind::Cloudflare, r#"{"apiToken": "cf-token"}"#)
            .expect("create provider")
            .id
    }

    pub fn token_path(&self, file: &str) -> PathBuf {
        self.layout.ssl_dir.join(file)
    }
}

pub fn domains(list: &[&str]) -> Vec<String> {
    list.iter().map(|d| d.to_string()).collect()
}
