//! irods-ops: single-shot operational tools for an iRODS installation.
//!
//! Each tool validates its arguments, acquires one external resource (an AMQP
//! channel, an SMTP session, a BisQue or iRODS HTTP session, a local file),
//! performs one operation through it and releases it. The binaries live in the
//! `irods-ops-cli` crate; everything they do is here.

pub mod broker;
pub mod catalog;
pub mod config;
pub mod directory;
pub mod error;
pub mod http;
pub mod invocation;
pub mod mail;
pub mod ruletest;
pub mod runner;
pub mod telemetry;
pub mod upgrade;
pub mod uuidgen;

pub use catalog::{CatalogArgs, CatalogCommand};
pub use config::{
    AmqpConfig, BisqueConfig, IrodsHttpConfig, MailConfig, OpsConfig, parse_env_ref,
    resolve_env_ref,
};
pub use error::{ErrorKind, OpsError, Result};
pub use invocation::Invocation;
pub use ruletest::{IrodsType, IrodsVal, SuiteReport, TestSuite};
pub use runner::{
    Connector, ExitContract, ExitStatus, Operation, ResourceHandle, Streams, ToolSpec, run_scoped,
    run_single_shot,
};
pub use upgrade::UpgradePaths;
