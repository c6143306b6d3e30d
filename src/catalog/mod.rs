//! BisQue catalog operations on iRODS paths.
//!
//! `bisque-ops` maps one command (`ls`, `ln`, `cp`, `mv`, `rm`) onto one HTTP
//! request against the BisQue blob and import services. `insert2bisque` is
//! the older positional entry point that registers a single object through
//! `/import/insert`.

pub mod xml;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};

use crate::config::BisqueConfig;
use crate::error::OpsError;
use crate::http::{build_client, classify_send_error, read_success_body};
use crate::invocation::Invocation;
use crate::runner::{
    Connector, ExitContract, ExitStatus, Operation, ResourceHandle, Streams, ToolSpec,
    run_single_shot,
};

const IRODS_SCHEME: &str = "irods://";

/// Builds an authenticated HTTP session for one BisQue host.
pub struct BisqueConnector {
    host: String,
    user: String,
    password: String,
    timeout: Duration,
}

impl BisqueConnector {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            host: host.into().trim_end_matches('/').to_string(),
            user: user.into(),
            password: password.into(),
            timeout,
        }
    }
}

/// An HTTP client bound to one host and one set of credentials.
pub struct BisqueSession {
    client: Client,
    host: String,
    user: String,
    password: String,
}

#[async_trait]
impl Connector for BisqueConnector {
    type Handle = BisqueSession;

    fn target(&self) -> String {
        self.host.clone()
    }

    async fn acquire(&self) -> crate::Result<BisqueSession> {
        Ok(BisqueSession {
            client: build_client(&self.host, self.timeout)?,
            host: self.host.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
        })
    }
}

#[async_trait]
impl ResourceHandle for BisqueSession {
    async fn release(self) {
        tracing::debug!(host = %self.host, "bisque session closed");
    }
}

type Query = Vec<(&'static str, String)>;

impl BisqueSession {
    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.host, endpoint)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> crate::Result<String> {
        let response = request
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(|e| classify_send_error(&self.host, e))?;
        read_success_body(response).await
    }

    pub async fn get(&self, endpoint: &str, query: &Query) -> crate::Result<String> {
        tracing::info!(endpoint, ?query, "GET");
        let request = self
            .client
            .get(self.url(endpoint))
            .query(query)
            .header(CONTENT_TYPE, "application/xml");
        self.send(request).await
    }

    pub async fn post_xml(&self, endpoint: &str, query: &Query, body: String) -> crate::Result<String> {
        tracing::info!(endpoint, ?query, %body, "POST");
        let request = self
            .client
            .post(self.url(endpoint))
            .query(query)
            .header(CONTENT_TYPE, "application/xml")
            .body(body);
        self.send(request).await
    }

    pub async fn post_multipart(&self, endpoint: &str, query: &Query, form: Form) -> crate::Result<String> {
        tracing::info!(endpoint, ?query, "POST multipart");
        let request = self.client.post(self.url(endpoint)).query(query).multipart(form);
        self.send(request).await
    }
}

/// Commands accepted by `bisque-ops`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogCommand {
    List,
    Link,
    Copy,
    Move,
    Remove,
}

impl FromStr for CatalogCommand {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ls" => Ok(CatalogCommand::List),
            "ln" => Ok(CatalogCommand::Link),
            "cp" => Ok(CatalogCommand::Copy),
            "mv" => Ok(CatalogCommand::Move),
            "rm" => Ok(CatalogCommand::Remove),
            other => Err(OpsError::InvalidArgument(
                "COMMAND".to_string(),
                format!("command {} must be one of 'ln', 'ls', 'cp', 'mv', 'rm'", other),
            )),
        }
    }
}

impl fmt::Display for CatalogCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CatalogCommand::List => "ls",
            CatalogCommand::Link => "ln",
            CatalogCommand::Copy => "cp",
            CatalogCommand::Move => "mv",
            CatalogCommand::Remove => "rm",
        };
        f.write_str(name)
    }
}

/// Flag values for `bisque-ops`; unset options fall back to `[bisque]` config.
#[derive(Debug, Clone, Default)]
pub struct CatalogArgs {
    pub command: String,
    pub paths: Vec<String>,
    pub alias: Option<String>,
    pub host: Option<String>,
    /// `USER:PASSWORD`
    pub credentials: Option<String>,
    pub tag_file: Option<PathBuf>,
    pub compatible: bool,
    pub permission: String,
}

/// One fully resolved catalog request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRequest {
    pub command: CatalogCommand,
    pub sources: Vec<String>,
    pub destination: Option<String>,
    pub alias: Option<String>,
    pub permission: String,
    /// Contents of the tag document whose root children annotate the resource.
    pub tags: Option<String>,
    pub compatible: bool,
}

fn with_irods_host(irods_host: &str, path: String) -> String {
    if path.starts_with(IRODS_SCHEME) {
        path
    } else {
        format!("{}{}", irods_host, path)
    }
}

impl CatalogRequest {
    /// With more than one path the last is the destination.
    pub fn new(command: CatalogCommand, mut paths: Vec<String>) -> crate::Result<Self> {
        if paths.is_empty() {
            return Err(OpsError::InvalidArgument(
                "PATH".to_string(),
                "at least one path is required".to_string(),
            ));
        }
        let destination = if paths.len() > 1 { paths.pop() } else { None };
        if command == CatalogCommand::Move && destination.is_none() {
            return Err(OpsError::InvalidArgument(
                "PATH".to_string(),
                "mv requires a source and a destination".to_string(),
            ));
        }
        Ok(Self {
            command,
            sources: paths,
            destination,
            alias: None,
            permission: "private".to_string(),
            tags: None,
            compatible: false,
        })
    }

    /// Compatible mode: prefix bare paths with the iRODS host URL.
    pub fn prefix_irods_host(&mut self, irods_host: &str) {
        self.sources = std::mem::take(&mut self.sources)
            .into_iter()
            .map(|p| with_irods_host(irods_host, p))
            .collect();
        self.destination = self.destination.take().map(|p| with_irods_host(irods_host, p));
    }

    fn query(&self) -> Query {
        let mut query = Query::new();
        match self.command {
            CatalogCommand::List => query.push(("path", self.sources[0].clone())),
            CatalogCommand::Move => {
                query.push(("path", self.sources[0].clone()));
                query.push(("destination", self.destination.clone().unwrap_or_default()));
            }
            CatalogCommand::Remove => {
                query.extend(self.sources.iter().map(|p| ("path", p.clone())));
            }
            CatalogCommand::Link | CatalogCommand::Copy => {}
        }
        if let Some(alias) = &self.alias {
            query.push(("user", alias.clone()));
        }
        query
    }

    fn resource_xml(&self) -> crate::Result<String> {
        xml::resource_document(&self.sources[0], &self.permission, self.tags.as_deref())
    }
}

#[async_trait]
impl Operation<BisqueSession> for CatalogRequest {
    type Output = String;

    async fn perform(&self, session: &mut BisqueSession) -> crate::Result<String> {
        let query = self.query();
        match self.command {
            CatalogCommand::List => {
                let body = session.get("/blob_service/paths/list", &query).await?;
                if !self.compatible {
                    return Ok(body);
                }
                let uniqs: Vec<String> = xml::children(&body)?
                    .iter()
                    .map(|child| child.attr("resource_uniq").unwrap_or_default().to_string())
                    .collect();
                Ok(uniqs.join("\n"))
            }
            CatalogCommand::Link => {
                let body = session
                    .post_xml("/blob_service/paths/insert", &query, self.resource_xml()?)
                    .await?;
                if !self.compatible {
                    return Ok(body);
                }
                let resource = xml::root(&body)?;
                Ok(format!(
                    "{} {}",
                    resource.attr("resource_uniq").unwrap_or_default(),
                    resource.attr("uri").unwrap_or_default()
                ))
            }
            CatalogCommand::Copy => {
                let local = Path::new(&self.sources[0]);
                let bytes = tokio::fs::read(local)
                    .await
                    .map_err(|e| OpsError::Io(local.display().to_string(), e.to_string()))?;
                let file_name = local
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let resource = Part::text(self.resource_xml()?)
                    .mime_str("text/xml")
                    .map_err(|e| OpsError::Unexpected(e.to_string()))?;
                let form = Form::new()
                    .part("file", Part::bytes(bytes).file_name(file_name))
                    .part("file_resource", resource);
                session
                    .post_multipart("/import_service/transfer", &query, form)
                    .await
            }
            CatalogCommand::Move => session.get("/blob_service/paths/move", &query).await,
            CatalogCommand::Remove => session.get("/blob_service/paths/remove", &query).await,
        }
    }
}

fn describe_catalog_failure(_: &Invocation, err: &OpsError) -> String {
    format!("ERROR: {}", err)
}

pub const BISQUE_OPS: ToolSpec = ToolSpec {
    name: "bisque-ops",
    usage: "usage: bisque-ops [OPTIONS] COMMAND PATH...",
    fields: &["COMMAND", "PATH"],
    contract: ExitContract::Propagate,
    describe_failure: describe_catalog_failure,
};

fn split_credentials(credentials: &str) -> crate::Result<(&str, &str)> {
    credentials.split_once(':').ok_or_else(|| {
        OpsError::InvalidArgument(
            "credentials".to_string(),
            "expected USER:PASSWORD".to_string(),
        )
    })
}

fn read_tag_file(path: &Path) -> crate::Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| OpsError::InvalidArgument("tag_file".to_string(), format!("{}: {}", path.display(), e)))
}

/// `bisque-ops` against the host named by `args` or `[bisque]`.
pub async fn bisque_ops(
    args: &CatalogArgs,
    config: &BisqueConfig,
    streams: &mut Streams<'_>,
) -> ExitStatus {
    let invocation = Invocation::new(std::iter::once(args.command.clone()).chain(args.paths.iter().cloned()));
    run_single_shot(&BISQUE_OPS, &invocation, streams, |_| {
        let command: CatalogCommand = args.command.parse()?;
        let mut request = CatalogRequest::new(command, args.paths.clone())?;
        request.alias = args.alias.clone();
        request.permission = args.permission.clone();
        request.compatible = args.compatible;
        if let Some(path) = &args.tag_file {
            request.tags = Some(read_tag_file(path)?);
        }
        if args.compatible {
            request.prefix_irods_host(&config.irods_host);
        }

        let default_credentials = format!("{}:{}", config.admin_user, config.admin_pass);
        let (user, password) = split_credentials(args.credentials.as_deref().unwrap_or(&default_credentials))?;
        let host = args.host.as_deref().unwrap_or(&config.host);
        tracing::debug!(%command, host, ?request, "catalog request prepared");

        let connector = BisqueConnector::new(host, user, password, Duration::from_secs(config.timeout_secs));
        Ok((connector, request))
    })
    .await
}

/// Register one iRODS object through the legacy `/import/insert` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyInsert {
    pub url: String,
    pub user: String,
    pub permission: String,
}

fn unknown_response(body: &str) -> OpsError {
    OpsError::Operation(format!("Unknown response from Bisque: {}", body.trim()))
}

/// Interpret an `/import/insert` reply as `resource_uniq uri`.
pub fn parse_insert_response(body: &str) -> crate::Result<String> {
    let find = |name: &str| xml::find_first(body, name).map_err(|_| unknown_response(body));
    if let Some(image) = find("image")? {
        return match (image.attr("resource_uniq"), image.attr("uri")) {
            (Some(uniq), Some(uri)) if !uniq.is_empty() && !uri.is_empty() => {
                Ok(format!("{} {}", uniq, uri))
            }
            _ => Err(unknown_response(body)),
        };
    }
    match find("tag")? {
        Some(tag) if tag.attr("name") == Some("error") => match tag.attr("value") {
            Some(message) if !message.is_empty() => Err(OpsError::Operation(message.to_string())),
            _ => Err(unknown_response(body)),
        },
        _ => Err(unknown_response(body)),
    }
}

#[async_trait]
impl Operation<BisqueSession> for LegacyInsert {
    type Output = String;

    async fn perform(&self, session: &mut BisqueSession) -> crate::Result<String> {
        let query: Query = vec![
            ("url", self.url.clone()),
            ("user", self.user.clone()),
            ("permission", self.permission.clone()),
        ];
        let body = session.get("/import/insert", &query).await?;
        tracing::info!(url = %self.url, response = %body, "insert");
        parse_insert_response(&body)
    }
}

fn describe_insert_failure(_: &Invocation, err: &OpsError) -> String {
    err.to_string()
}

pub const INSERT2BISQUE: ToolSpec = ToolSpec {
    name: "insert2bisque",
    usage: "usage: insert2bisque bisque_host bisque_password irods_host irods_path irods_user \
            permission log_file",
    fields: &[
        "BISQUE_HOST",
        "BISQUE_PASSWORD",
        "IRODS_HOST",
        "IRODS_PATH",
        "IRODS_USER",
        "PERMISSION",
        "LOG_FILE",
    ],
    contract: ExitContract::Propagate,
    describe_failure: describe_insert_failure,
};

/// Position of the log file argument of `insert2bisque`.
pub const INSERT2BISQUE_LOG_FILE_ARG: usize = 6;

/// `insert2bisque` authenticating as `admin`.
pub async fn insert2bisque(
    invocation: &Invocation,
    config: &BisqueConfig,
    streams: &mut Streams<'_>,
) -> ExitStatus {
    run_single_shot(&INSERT2BISQUE, invocation, streams, |inv| {
        let arg = |i: usize| inv.get(i).unwrap_or_default();
        let connector = BisqueConnector::new(
            arg(0),
            "admin",
            arg(1),
            Duration::from_secs(config.timeout_secs),
        );
        let op = LegacyInsert {
            url: format!("{}{}", arg(2), arg(3)),
            user: arg(4).to_string(),
            permission: arg(5).to_string(),
        };
        Ok((connector, op))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::extract::Query as QueryParams;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use tempfile::TempDir;

    #[derive(Debug, Clone, Default)]
    struct Seen {
        path: String,
        query: Vec<(String, String)>,
        auth: String,
        content_type: String,
        body: String,
    }

    type Log = Arc<Mutex<Vec<Seen>>>;

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn header(headers: &HeaderMap, name: &str) -> String {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    /// Every route records the request and answers with `reply`.
    fn recording_app(log: &Log, status: StatusCode, reply: &'static str) -> Router {
        let handler = move |path: &'static str| {
            let log = log.clone();
            move |QueryParams(query): QueryParams<Vec<(String, String)>>,
                  headers: HeaderMap,
                  body: String| async move {
                log.lock().unwrap().push(Seen {
                    path: path.to_string(),
                    query,
                    auth: header(&headers, "authorization"),
                    content_type: header(&headers, "content-type"),
                    body,
                });
                (status, reply)
            }
        };
        Router::new()
            .route("/blob_service/paths/list", get(handler("list")))
            .route("/blob_service/paths/move", get(handler("move")))
            .route("/blob_service/paths/remove", get(handler("remove")))
            .route("/blob_service/paths/insert", post(handler("insert")))
            .route("/import_service/transfer", post(handler("transfer")))
            .route("/import/insert", get(handler("import")))
    }

    fn config() -> BisqueConfig {
        BisqueConfig {
            admin_user: "admin".to_string(),
            admin_pass: "secret".to_string(),
            irods_host: "irods://data.example.org".to_string(),
            timeout_secs: 5,
            ..BisqueConfig::default()
        }
    }

    fn args(host: &str, command: &str, paths: &[&str]) -> CatalogArgs {
        CatalogArgs {
            command: command.to_string(),
            paths: paths.iter().map(|p| p.to_string()).collect(),
            host: Some(host.to_string()),
            permission: "private".to_string(),
            ..CatalogArgs::default()
        }
    }

    async fn run(args: &CatalogArgs, config: &BisqueConfig) -> (ExitStatus, String, String) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let status = {
            let mut streams = Streams::new(&mut out, &mut err);
            bisque_ops(args, config, &mut streams).await
        };
        (
            status,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!("ln".parse::<CatalogCommand>().unwrap(), CatalogCommand::Link);
        let err = "cat".parse::<CatalogCommand>().unwrap_err();
        assert!(err.to_string().contains("must be one of"));
    }

    #[test]
    fn test_last_path_is_destination() {
        let request = CatalogRequest::new(
            CatalogCommand::Move,
            vec!["/a".to_string(), "/b".to_string(), "/c".to_string()],
        )
        .unwrap();
        assert_eq!(request.sources, ["/a", "/b"]);
        assert_eq!(request.destination.as_deref(), Some("/c"));
        assert!(CatalogRequest::new(CatalogCommand::Move, vec!["/a".to_string()]).is_err());
    }

    #[test]
    fn test_compatible_prefix_skips_irods_urls() {
        let mut request = CatalogRequest::new(
            CatalogCommand::Move,
            vec!["/zone/a".to_string(), "irods://other/zone/b".to_string()],
        )
        .unwrap();
        request.prefix_irods_host("irods://data.example.org");
        assert_eq!(request.sources, ["irods://data.example.org/zone/a"]);
        assert_eq!(request.destination.as_deref(), Some("irods://other/zone/b"));
    }

    #[test]
    fn test_insert_response_shapes() {
        let ok = r#"<response><image resource_uniq="00-abc" uri="http://b/data_service/00-abc"/></response>"#;
        assert_eq!(
            parse_insert_response(ok).unwrap(),
            "00-abc http://b/data_service/00-abc"
        );

        let error = r#"<response><tag name="error" value="permission denied"/></response>"#;
        assert_eq!(
            parse_insert_response(error).unwrap_err().to_string(),
            "permission denied"
        );

        for unknown in [
            r#"<response><tag name="note" value="x"/></response>"#,
            r#"<response><image uri="http://b/x"/></response>"#,
            "<response/>",
            "gateway timeout",
        ] {
            let err = parse_insert_response(unknown).unwrap_err();
            assert!(
                err.to_string().starts_with("Unknown response from Bisque"),
                "{unknown} -> {err}"
            );
        }
    }

    #[tokio::test]
    async fn test_ls_compatible_prints_resource_uniqs() {
        let log = Log::default();
        let host = spawn(recording_app(
            &log,
            StatusCode::OK,
            r#"<dir><image resource_uniq="00-a"/><image resource_uniq="00-b"/></dir>"#,
        ))
        .await;
        let mut ls = args(&host, "ls", &["/iplant/home/alice"]);
        ls.compatible = true;
        ls.alias = Some("alice".to_string());

        let (status, out, err) = run(&ls, &config()).await;
        assert_eq!(status, ExitStatus::SUCCESS, "stderr: {err}");
        assert_eq!(out, "00-a\n00-b\n");

        let seen = log.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].path, "list");
        assert_eq!(
            seen[0].query,
            pairs(&[
                ("path", "irods://data.example.org/iplant/home/alice"),
                ("user", "alice")
            ])
        );
        assert_eq!(seen[0].auth, "Basic YWRtaW46c2VjcmV0");
    }

    #[tokio::test]
    async fn test_ln_posts_resource_with_tags() {
        let dir = TempDir::new().unwrap();
        let tag_file = dir.path().join("tags.xml");
        std::fs::write(&tag_file, r#"<resource><tag name="project" value="p1"/></resource>"#)
            .unwrap();

        let log = Log::default();
        let host = spawn(recording_app(
            &log,
            StatusCode::OK,
            r#"<image resource_uniq="00-new" uri="http://b/data_service/00-new"/>"#,
        ))
        .await;
        let mut ln = args(&host, "ln", &["irods://data.example.org/zone/x.tif"]);
        ln.compatible = true;
        ln.permission = "published".to_string();
        ln.tag_file = Some(tag_file);

        let (status, out, err) = run(&ln, &config()).await;
        assert_eq!(status, ExitStatus::SUCCESS, "stderr: {err}");
        assert_eq!(out, "00-new http://b/data_service/00-new\n");

        let seen = log.lock().unwrap();
        assert_eq!(seen[0].path, "insert");
        assert_eq!(seen[0].content_type, "application/xml");
        assert_eq!(
            seen[0].body,
            "<resource value=\"irods://data.example.org/zone/x.tif\" permission=\"published\">\
             <tag name=\"project\" value=\"p1\"/></resource>"
        );
    }

    #[tokio::test]
    async fn test_cp_uploads_file_and_resource_part() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("cells.tif");
        std::fs::write(&local, b"TIFFDATA").unwrap();

        let log = Log::default();
        let host = spawn(recording_app(&log, StatusCode::OK, "<resource/>")).await;
        let cp = args(&host, "cp", &[local.to_str().unwrap()]);

        let (status, out, err) = run(&cp, &config()).await;
        assert_eq!(status, ExitStatus::SUCCESS, "stderr: {err}");
        assert_eq!(out, "<resource/>\n");

        let seen = log.lock().unwrap();
        assert_eq!(seen[0].path, "transfer");
        assert!(seen[0].content_type.starts_with("multipart/form-data"));
        assert!(seen[0].body.contains("filename=\"cells.tif\""));
        assert!(seen[0].body.contains("TIFFDATA"));
        assert!(seen[0].body.contains("name=\"file_resource\""));
        assert!(seen[0].body.contains("permission=\"private\""));
    }

    #[tokio::test]
    async fn test_mv_and_rm_queries() {
        let log = Log::default();
        let host = spawn(recording_app(&log, StatusCode::OK, "<ok/>")).await;

        let (status, _, _) = run(&args(&host, "mv", &["/z/a", "/z/b"]), &config()).await;
        assert_eq!(status, ExitStatus::SUCCESS);
        let (status, _, _) = run(&args(&host, "rm", &["/z/b"]), &config()).await;
        assert_eq!(status, ExitStatus::SUCCESS);

        let seen = log.lock().unwrap();
        assert_eq!(seen[0].path, "move");
        assert_eq!(seen[0].query, pairs(&[("path", "/z/a"), ("destination", "/z/b")]));
        assert_eq!(seen[1].path, "remove");
        assert_eq!(seen[1].query, pairs(&[("path", "/z/b")]));
    }

    #[tokio::test]
    async fn test_non_2xx_is_failure_with_body() {
        let log = Log::default();
        let host = spawn(recording_app(&log, StatusCode::FORBIDDEN, "not yours")).await;
        let (status, out, err) = run(&args(&host, "rm", &["/z/b"]), &config()).await;
        assert_eq!(status, ExitStatus::FAILURE);
        assert!(out.is_empty());
        assert!(err.starts_with("ERROR: HTTP 403"), "stderr: {err}");
        assert!(err.contains("not yours"), "stderr: {err}");
    }

    #[tokio::test]
    async fn test_explicit_credentials_override_config() {
        let log = Log::default();
        let host = spawn(recording_app(&log, StatusCode::OK, "<ok/>")).await;
        let mut rm = args(&host, "rm", &["/z/b"]);
        rm.credentials = Some("rods:rodspass".to_string());
        let (status, _, _) = run(&rm, &config()).await;
        assert_eq!(status, ExitStatus::SUCCESS);
        assert_eq!(log.lock().unwrap()[0].auth, "Basic cm9kczpyb2RzcGFzcw==");
    }

    #[tokio::test]
    async fn test_bad_command_never_connects() {
        let log = Log::default();
        let host = spawn(recording_app(&log, StatusCode::OK, "<ok/>")).await;
        let (status, _, err) = run(&args(&host, "cat", &["/z/b"]), &config()).await;
        assert_eq!(status, ExitStatus::FAILURE);
        assert!(err.contains("must be one of"), "stderr: {err}");
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_connection_failure() {
        let (status, _, err) = run(&args("http://127.0.0.1:1", "ls", &["/z"]), &config()).await;
        assert_eq!(status, ExitStatus::FAILURE);
        assert!(err.contains("connection to http://127.0.0.1:1 failed"), "stderr: {err}");
    }

    #[tokio::test]
    async fn test_insert2bisque_prints_uniq_and_uri() {
        let log = Log::default();
        let host = spawn(recording_app(
            &log,
            StatusCode::OK,
            r#"<response><image resource_uniq="00-i" uri="http://b/data_service/00-i"/></response>"#,
        ))
        .await;
        let invocation = Invocation::new([
            host.as_str(),
            "secret",
            "irods://data.example.org",
            "/zone/home/alice/x.tif",
            "alice",
            "published",
            "/tmp/insert.log",
        ]);
        let mut out = Vec::new();
        let mut err = Vec::new();
        let status = {
            let mut streams = Streams::new(&mut out, &mut err);
            insert2bisque(&invocation, &config(), &mut streams).await
        };
        assert_eq!(status, ExitStatus::SUCCESS);
        assert_eq!(String::from_utf8(out).unwrap(), "00-i http://b/data_service/00-i\n");

        let seen = log.lock().unwrap();
        assert_eq!(seen[0].path, "import");
        assert_eq!(
            seen[0].query,
            pairs(&[
                ("url", "irods://data.example.org/zone/home/alice/x.tif"),
                ("user", "alice"),
                ("permission", "published"),
            ])
        );
        assert_eq!(seen[0].auth, "Basic YWRtaW46c2VjcmV0");
    }

    #[tokio::test]
    async fn test_insert2bisque_error_tag_fails() {
        let log = Log::default();
        let host = spawn(recording_app(
            &log,
            StatusCode::OK,
            r#"<response><tag name="error" value="no such user"/></response>"#,
        ))
        .await;
        let invocation = Invocation::new([
            host.as_str(),
            "secret",
            "irods://h",
            "/p",
            "bob",
            "private",
            "/tmp/insert.log",
        ]);
        let mut out = Vec::new();
        let mut err = Vec::new();
        let status = {
            let mut streams = Streams::new(&mut out, &mut err);
            insert2bisque(&invocation, &config(), &mut streams).await
        };
        assert_eq!(status, ExitStatus::FAILURE);
        assert_eq!(String::from_utf8(err).unwrap(), "no such user\n");
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_insert2bisque_missing_args() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let status = {
            let mut streams = Streams::new(&mut out, &mut err);
            insert2bisque(&Invocation::new(["http://b"]), &config(), &mut streams).await
        };
        assert_eq!(status, ExitStatus::FAILURE);
        let err = String::from_utf8(err).unwrap();
        assert!(err.starts_with("usage: insert2bisque"), "stderr: {err}");
        assert!(err.contains("LOG_FILE"));
    }
}
