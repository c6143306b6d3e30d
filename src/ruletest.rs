//! Helpers for testing iRODS rule logic against a live server.
//!
//! Values passed into rules are typed (`IrodsVal`) so they render as the rule
//! language expects. Every executed test case gets its own session, acquired
//! before the case runs and released after it, through the same scoped runner
//! the tools use. Cases registered as pending are reported but never run.

use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::config::IrodsHttpConfig;
use crate::directory::{IrodsHttpConnector, IrodsHttpSession, IrodsLogin};
use crate::error::OpsError;
use crate::runner::{Connector, Operation, ResourceHandle, run_scoped};

/// Rule engine instance that runs native iRODS rule language.
pub const RULE_LANGUAGE_INSTANCE: &str = "irods_rule_engine_plugin-irods_rule_language-instance";

/// Rule-language types a test value can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrodsType {
    Boolean,
    None,
    Path,
    String,
    StringList,
}

/// A value rendered as an iRODS rule literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrodsVal {
    kind: IrodsType,
    literal: Option<String>,
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value)
}

impl IrodsVal {
    pub fn boolean(value: bool) -> Self {
        Self {
            kind: IrodsType::Boolean,
            literal: Some(value.to_string()),
        }
    }

    pub fn none() -> Self {
        Self {
            kind: IrodsType::None,
            literal: None,
        }
    }

    pub fn path(path: &str) -> Self {
        Self {
            kind: IrodsType::Path,
            literal: Some(path.to_string()),
        }
    }

    pub fn string(value: &str) -> Self {
        Self {
            kind: IrodsType::String,
            literal: Some(quote(value)),
        }
    }

    pub fn string_list<S: AsRef<str>>(values: &[S]) -> Self {
        let items: Vec<String> = values.iter().map(|v| quote(v.as_ref())).collect();
        Self {
            kind: IrodsType::StringList,
            literal: Some(format!("list({})", items.join(","))),
        }
    }

    /// Interpret text a rule wrote to stdout as a value of `kind`.
    /// List output is expected as comma-separated items.
    pub fn from_output(kind: IrodsType, output: &str) -> Self {
        match kind {
            IrodsType::Boolean => Self {
                kind,
                literal: Some(output.to_lowercase()),
            },
            IrodsType::None => Self::none(),
            IrodsType::Path => Self::path(output),
            IrodsType::String => Self::string(output),
            IrodsType::StringList if output.is_empty() => Self::string_list::<&str>(&[]),
            IrodsType::StringList => Self::string_list(&output.split(',').collect::<Vec<_>>()),
        }
    }

    pub fn kind(&self) -> IrodsType {
        self.kind
    }

    pub fn literal(&self) -> Option<&str> {
        self.literal.as_deref()
    }

    /// The same path both as a path and as a string literal.
    pub fn prep_path(path: &str) -> (Self, Self) {
        (Self::path(path), Self::string(path))
    }
}

impl fmt::Display for IrodsVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.literal.as_deref().unwrap_or(""))
    }
}

/// `name(arg, arg, ...)`
pub fn rule_call(name: &str, args: &[IrodsVal]) -> String {
    let rendered: Vec<String> = args.iter().map(ToString::to_string).collect();
    format!("{}({})", name, rendered.join(", "))
}

/// Output captured from one rule execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A session able to execute rule text.
#[async_trait]
pub trait RuleSession: ResourceHandle {
    async fn exec_rule(&mut self, rule_text: &str) -> crate::Result<RuleOutput>;
}

#[async_trait]
impl RuleSession for IrodsHttpSession {
    async fn exec_rule(&mut self, rule_text: &str) -> crate::Result<RuleOutput> {
        let form = [
            ("op", "execute"),
            ("rule-text", rule_text),
            ("rep-instance", RULE_LANGUAGE_INSTANCE),
        ];
        let reply = self.post_form("/rules", &form).await?;
        Ok(RuleOutput {
            stdout: reply.stdout,
            stderr: reply.stderr,
        })
    }
}

/// Call rule function `name` with `args` and check its printed result.
pub async fn fn_test<S: RuleSession>(
    session: &mut S,
    name: &str,
    args: &[IrodsVal],
    expected: &IrodsVal,
) -> crate::Result<()> {
    let rule = format!("writeLine('stdout', {})", rule_call(name, args));
    let output = session.exec_rule(&rule).await?;
    let stderr = output.stderr.trim_end_matches('\0');
    if !stderr.is_empty() {
        return Err(OpsError::Operation(stderr.to_string()));
    }
    let stdout = output.stdout.trim_end_matches('\0').trim_end_matches('\n');
    let actual = if stdout.is_empty() && expected.kind() == IrodsType::None {
        IrodsVal::none()
    } else {
        IrodsVal::from_output(expected.kind(), stdout)
    };
    if &actual != expected {
        return Err(OpsError::Operation(format!(
            "{}: expected {}, got {}",
            rule_call(name, args),
            expected,
            actual
        )));
    }
    Ok(())
}

/// Login for rule tests, from `IRODS_HOST`, `IRODS_PORT`, `IRODS_ZONE_NAME`,
/// `IRODS_USER_NAME` and `IRODS_PASSWORD`.
pub fn login_from_env() -> crate::Result<IrodsLogin> {
    let var = |name: &str| {
        std::env::var(name).map_err(|_| {
            OpsError::InvalidConfig(name.to_string(), "environment variable not set".to_string())
        })
    };
    let port = var("IRODS_PORT")?;
    Ok(IrodsLogin {
        host: var("IRODS_HOST")?,
        port: port.parse().map_err(|_| {
            OpsError::InvalidConfig("IRODS_PORT".to_string(), format!("not a port: {}", port))
        })?,
        zone: var("IRODS_ZONE_NAME")?,
        user: var("IRODS_USER_NAME")?,
        password: var("IRODS_PASSWORD")?,
    })
}

/// Connector for rule tests against the server named in the environment.
pub fn connector_from_env(config: &IrodsHttpConfig) -> crate::Result<IrodsHttpConnector> {
    Ok(IrodsHttpConnector::new(&login_from_env()?, config))
}

/// Body of one test case, run against that case's own session.
pub type CaseBody<H> = Box<dyn for<'a> Fn(&'a mut H) -> BoxFuture<'a, crate::Result<()>> + Send + Sync>;

struct TestCase<H> {
    name: String,
    pending: bool,
    body: CaseBody<H>,
}

#[async_trait]
impl<H: Send> Operation<H> for TestCase<H> {
    type Output = ();

    async fn perform(&self, session: &mut H) -> crate::Result<()> {
        (self.body)(session).await
    }
}

/// Outcome of a suite run, by case name.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SuiteReport {
    pub passed: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub ignored: Vec<String>,
}

impl SuiteReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Named rule test cases sharing one kind of session.
pub struct TestSuite<H> {
    cases: Vec<TestCase<H>>,
}

impl<H: ResourceHandle> Default for TestSuite<H> {
    fn default() -> Self {
        Self { cases: Vec::new() }
    }
}

impl<H: ResourceHandle> TestSuite<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a case that runs.
    pub fn case<F>(&mut self, name: &str, body: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut H) -> BoxFuture<'a, crate::Result<()>> + Send + Sync + 'static,
    {
        self.register(name, false, Box::new(body))
    }

    /// Register a case that is reported as ignored and never run.
    pub fn pending<F>(&mut self, name: &str, body: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut H) -> BoxFuture<'a, crate::Result<()>> + Send + Sync + 'static,
    {
        self.register(name, true, Box::new(body))
    }

    fn register(&mut self, name: &str, pending: bool, body: CaseBody<H>) -> &mut Self {
        self.cases.push(TestCase {
            name: name.to_string(),
            pending,
            body,
        });
        self
    }

    /// Run every non-pending case in registration order.
    pub async fn run<C>(&self, connector: &C) -> SuiteReport
    where
        C: Connector<Handle = H>,
    {
        let mut report = SuiteReport::default();
        for case in &self.cases {
            if case.pending {
                tracing::info!(case = %case.name, "ignored (pending)");
                report.ignored.push(case.name.clone());
                continue;
            }
            match run_scoped(connector, case).await {
                Ok(()) => report.passed.push(case.name.clone()),
                Err(e) => {
                    tracing::warn!(case = %case.name, kind = %e.kind(), error = %e, "case failed");
                    report.failed.push((case.name.clone(), e.to_string()));
                }
            }
        }
        report
    }
}
