//! iRODS user entries and the `irods-user` Ansible task.
//!
//! The task reads its arguments from the JSON file Ansible passes to binary
//! modules, brings a set of users to the requested state through one
//! directory session, and prints the JSON result Ansible expects. Creation and
//! removal are idempotent: only users not already in the desired state are
//! touched, and every touched user is re-checked afterwards.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::IrodsHttpConfig;
use crate::error::OpsError;
use crate::http::{build_client, classify_send_error, read_success_body};
use crate::invocation::Invocation;
use crate::runner::{Connector, ExitStatus, Operation, ResourceHandle, Streams, run_scoped};

/// User type given to created entries.
pub const RODS_USER: &str = "rodsuser";

const CHECK_MODE_KEY: &str = "_ansible_check_mode";
const ANSIBLE_INTERNAL_PREFIX: &str = "_ansible_";

/// Entry operations against the iRODS user catalog.
#[async_trait]
pub trait DirectorySession: ResourceHandle {
    async fn entry_exists(&mut self, name: &str) -> crate::Result<bool>;

    async fn create_entry(&mut self, name: &str, kind: &str) -> crate::Result<()>;

    async fn remove_entry(&mut self, name: &str) -> crate::Result<()>;
}

/// Who to log in as, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrodsLogin {
    pub host: String,
    pub port: u16,
    pub zone: String,
    pub user: String,
    pub password: String,
}

impl From<&UserTaskArgs> for IrodsLogin {
    fn from(args: &UserTaskArgs) -> Self {
        Self {
            host: args.host.clone(),
            port: args.port,
            zone: args.zone.clone(),
            user: args.admin_user.clone(),
            password: args.admin_password.clone(),
        }
    }
}

/// Authenticates against the iRODS HTTP API.
pub struct IrodsHttpConnector {
    base_url: String,
    zone: String,
    user: String,
    password: String,
    timeout: Duration,
}

impl IrodsHttpConnector {
    pub fn new(login: &IrodsLogin, config: &IrodsHttpConfig) -> Self {
        let scheme = if config.tls { "https" } else { "http" };
        let port = config.port.unwrap_or(login.port);
        Self {
            base_url: format!("{}://{}:{}{}", scheme, login.host, port, config.base_path),
            zone: login.zone.clone(),
            user: login.user.clone(),
            password: login.password.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

pub struct IrodsHttpSession {
    client: Client,
    base_url: String,
    zone: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct IrodsStatus {
    status_code: i64,
    #[serde(default)]
    status_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IrodsReply {
    irods_response: IrodsStatus,
    #[serde(default)]
    pub(crate) exists: bool,
    #[serde(default)]
    pub(crate) stdout: String,
    #[serde(default)]
    pub(crate) stderr: String,
}

#[async_trait]
impl Connector for IrodsHttpConnector {
    type Handle = IrodsHttpSession;

    fn target(&self) -> String {
        self.base_url.clone()
    }

    async fn acquire(&self) -> crate::Result<IrodsHttpSession> {
        let client = build_client(&self.base_url, self.timeout)?;
        let response = client
            .post(format!("{}/authenticate", self.base_url))
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(|e| classify_send_error(&self.base_url, e))?;
        let token = read_success_body(response)
            .await
            .map_err(|e| OpsError::Connection(self.target(), format!("authentication failed: {}", e)))?;
        Ok(IrodsHttpSession {
            client,
            base_url: self.base_url.clone(),
            zone: self.zone.clone(),
            token: token.trim().to_string(),
        })
    }
}

#[async_trait]
impl ResourceHandle for IrodsHttpSession {
    async fn release(self) {
        tracing::debug!(api = %self.base_url, "irods session closed");
    }
}

impl IrodsHttpSession {
    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn reply(&self, request: reqwest::RequestBuilder) -> crate::Result<IrodsReply> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| classify_send_error(&self.base_url, e))?;
        let body = read_success_body(response).await?;
        let reply: IrodsReply = serde_json::from_str(&body)
            .map_err(|e| OpsError::Operation(format!("unexpected reply '{}': {}", body, e)))?;
        if reply.irods_response.status_code != 0 {
            return Err(OpsError::Operation(format!(
                "iRODS error {}: {}",
                reply.irods_response.status_code,
                reply.irods_response.status_message.as_deref().unwrap_or("no message")
            )));
        }
        Ok(reply)
    }

    /// POST a form to `path` under the API base.
    pub(crate) async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> crate::Result<IrodsReply> {
        self.reply(self.client.post(self.endpoint(path)).form(form)).await
    }
}

#[async_trait]
impl DirectorySession for IrodsHttpSession {
    async fn entry_exists(&mut self, name: &str) -> crate::Result<bool> {
        let query = [("op", "stat"), ("name", name), ("zone", self.zone.as_str())];
        let reply = self
            .reply(self.client.get(self.endpoint("/users-groups")).query(&query))
            .await?;
        Ok(reply.exists)
    }

    async fn create_entry(&mut self, name: &str, kind: &str) -> crate::Result<()> {
        let form = [
            ("op", "create_user"),
            ("name", name),
            ("zone", self.zone.as_str()),
            ("user-type", kind),
        ];
        self.post_form("/users-groups", &form).await?;
        Ok(())
    }

    async fn remove_entry(&mut self, name: &str) -> crate::Result<()> {
        let form = [("op", "remove_user"), ("name", name), ("zone", self.zone.as_str())];
        self.post_form("/users-groups", &form).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserState {
    Present,
    Absent,
}

/// Module arguments. Unknown and missing fields are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserTaskArgs {
    pub users: Vec<String>,
    pub state: UserState,
    pub host: String,
    pub port: u16,
    pub admin_user: String,
    pub admin_password: String,
    pub zone: String,
    #[serde(skip)]
    pub check_mode: bool,
}

impl UserTaskArgs {
    /// Parse an Ansible args file. `_ansible_*` keys are consumed here; only
    /// check mode is kept.
    pub fn from_json(text: &str) -> crate::Result<Self> {
        let invalid = |e: &dyn std::fmt::Display| OpsError::InvalidArgument("args".to_string(), e.to_string());
        let mut fields: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(text).map_err(|e| invalid(&e))?;
        let check_mode = fields
            .get(CHECK_MODE_KEY)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        fields.retain(|key, _| !key.starts_with(ANSIBLE_INTERNAL_PREFIX));

        let mut args: UserTaskArgs =
            serde_json::from_value(serde_json::Value::Object(fields)).map_err(|e| invalid(&e))?;
        args.check_mode = check_mode;
        Ok(args)
    }
}

/// The JSON document printed for Ansible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    pub changed: bool,
    pub message: String,
    /// Users verified to have changed state.
    pub users: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl TaskResult {
    fn record(&mut self, user: &str) {
        self.users.push(user.to_string());
        self.changed = true;
    }

    fn fail(&mut self, msg: impl Into<String>) {
        self.failed = true;
        self.msg = Some(msg.into());
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        let mut result = TaskResult::default();
        result.fail(msg);
        result
    }
}

async fn exists<S: DirectorySession>(session: &mut S, user: &str) -> crate::Result<bool> {
    session
        .entry_exists(user)
        .await
        .map_err(|e| OpsError::Operation(format!("Unable to query irods user {}\n{}", user, e)))
}

/// Users in `wanted` whose existence differs from `desired`.
async fn not_yet<'a, S: DirectorySession>(
    session: &mut S,
    wanted: &BTreeSet<&'a str>,
    desired: bool,
) -> crate::Result<Vec<&'a str>> {
    let mut pending = Vec::new();
    for &user in wanted {
        if exists(session, user).await? != desired {
            pending.push(user);
        }
    }
    Ok(pending)
}

fn combine(mut failures: Vec<String>, unverified: Option<OpsError>) -> crate::Result<()> {
    match (failures.is_empty(), unverified) {
        (true, None) => Ok(()),
        (true, Some(err)) => Err(err),
        (false, unverified) => {
            failures.extend(unverified.map(|e| e.to_string()));
            Err(OpsError::Operation(failures.join("\n")))
        }
    }
}

/// Create every user in `users` that does not exist yet.
pub async fn ensure_present<S: DirectorySession>(
    session: &mut S,
    users: &[String],
    report: &mut TaskResult,
) -> crate::Result<()> {
    let wanted: BTreeSet<&str> = users.iter().map(String::as_str).collect();
    let targets = not_yet(session, &wanted, true).await?;

    let mut failures = Vec::new();
    let mut attempted = Vec::new();
    for user in targets {
        match session.create_entry(user, RODS_USER).await {
            Ok(()) => attempted.push(user),
            Err(e) => failures.push(format!("Unable to create user {}\n{}", user, e)),
        }
    }

    let mut vanished = Vec::new();
    for user in attempted {
        if exists(session, user).await? {
            report.record(user);
        } else {
            vanished.push(user.to_string());
        }
    }

    let unverified = (!vanished.is_empty()).then(|| OpsError::Unverified {
        action: "users disappear after creation".to_string(),
        entries: vanished,
    });
    combine(failures, unverified)
}

/// Remove every user in `users` that still exists.
pub async fn ensure_absent<S: DirectorySession>(
    session: &mut S,
    users: &[String],
    report: &mut TaskResult,
) -> crate::Result<()> {
    let wanted: BTreeSet<&str> = users.iter().map(String::as_str).collect();
    let targets = not_yet(session, &wanted, false).await?;

    let mut failures = Vec::new();
    let mut attempted = Vec::new();
    for user in targets {
        match session.remove_entry(user).await {
            Ok(()) => attempted.push(user),
            Err(e) => failures.push(format!("Unable to remove user {}\n{}", user, e)),
        }
    }

    let mut leftover = Vec::new();
    for user in attempted {
        if exists(session, user).await? {
            leftover.push(user.to_string());
        } else {
            report.record(user);
        }
    }

    let unverified = (!leftover.is_empty()).then(|| OpsError::Unverified {
        action: "users still exist after removal".to_string(),
        entries: leftover,
    });
    combine(failures, unverified)
}

/// Bring `users` to `state` through one session.
pub struct UserTask {
    pub users: Vec<String>,
    pub state: UserState,
}

#[async_trait]
impl<S: DirectorySession> Operation<S> for UserTask {
    type Output = TaskResult;

    async fn perform(&self, session: &mut S) -> crate::Result<TaskResult> {
        let mut report = TaskResult::default();
        let outcome = match self.state {
            UserState::Present => ensure_present(session, &self.users, &mut report).await,
            UserState::Absent => ensure_absent(session, &self.users, &mut report).await,
        };
        if let Err(e) = outcome {
            tracing::warn!(kind = %e.kind(), error = %e, "user task failed");
            report.fail(e.to_string());
        }
        Ok(report)
    }
}

/// Print `result` as the module output; failed results exit 1.
pub fn emit(result: &TaskResult, streams: &mut Streams<'_>) -> ExitStatus {
    let written = match serde_json::to_string(result) {
        Ok(json) => streams.payload(&json).map_err(|e| e.to_string()),
        Err(e) => Err(format!("cannot encode task result: {}", e)),
    };
    if let Err(e) = written {
        tracing::warn!(error = %e, "task result not written");
        streams.diagnostic(&e);
        return ExitStatus::FAILURE;
    }
    if result.failed {
        ExitStatus::FAILURE
    } else {
        ExitStatus::SUCCESS
    }
}

/// Run the task from the args file contents with an injectable connector.
pub async fn user_task<C, M>(args_json: &str, streams: &mut Streams<'_>, make_connector: M) -> ExitStatus
where
    C: Connector,
    C::Handle: DirectorySession,
    M: FnOnce(&UserTaskArgs) -> C,
{
    let args = match UserTaskArgs::from_json(args_json) {
        Ok(args) => args,
        Err(e) => return emit(&TaskResult::failure(e.to_string()), streams),
    };

    if args.check_mode {
        tracing::info!(users = ?args.users, state = ?args.state, "check mode, nothing changed");
        return emit(&TaskResult::default(), streams);
    }
    if args.users.is_empty() {
        let result = TaskResult {
            message: "no user are specified".to_string(),
            ..TaskResult::default()
        };
        return emit(&result, streams);
    }

    let connector = make_connector(&args);
    let task = UserTask {
        users: args.users.clone(),
        state: args.state,
    };
    let result = match run_scoped(&connector, &task).await {
        Ok(result) => result,
        Err(e) => TaskResult::failure(format!("{} [{}]", e, e.kind())),
    };
    emit(&result, streams)
}

/// `irods-user ARGS_FILE` against the iRODS HTTP API.
pub async fn run_irods_user(
    invocation: &Invocation,
    config: &IrodsHttpConfig,
    streams: &mut Streams<'_>,
) -> ExitStatus {
    if let Err(e) = invocation.require("usage: irods-user ARGS_FILE", &["ARGS_FILE"]) {
        return emit(&TaskResult::failure(e.to_string()), streams);
    }
    let path = invocation.get(0).unwrap_or_default();
    let args_json = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) => {
            let err = OpsError::Io(path.to_string(), e.to_string());
            return emit(&TaskResult::failure(err.to_string()), streams);
        }
    };
    user_task(&args_json, streams, |args| {
        IrodsHttpConnector::new(&IrodsLogin::from(args), config)
    })
    .await
}
