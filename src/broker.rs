//! AMQP topic publishing from within rule execution.
//!
//! Two tools share the publish operation:
//! - `amqptopicsend EXCHANGE ROUTING_KEY BODY` publishes to a caller-named
//!   exchange using the broker URI from `IRODS_AMQP_URI`. It always exits 0
//!   because `msiExecCmd` cannot tolerate a non-zero exit; failures are only
//!   visible on stderr.
//! - `amqptopicsend-irods EPHEMERAL ROUTING_KEY BODY` declares the configured
//!   topic exchange (durable unless EPHEMERAL is `true`) before publishing, and
//!   propagates failure through the exit status.

use std::time::Duration;

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};

use crate::config::{AMQP_URI_ENV, AmqpConfig};
use crate::error::OpsError;
use crate::invocation::{Invocation, parse_flag};
use crate::runner::{
    Connector, ExitContract, ExitStatus, Operation, ResourceHandle, Streams, ToolSpec,
    run_single_shot,
};

/// AMQP delivery mode for messages that survive a broker restart.
const PERSISTENT: u8 = 2;

/// Reply code sent when closing channels and connections normally.
const REPLY_SUCCESS: u16 = 200;

/// Channel operations the publish tools need from a broker.
#[async_trait]
pub trait BrokerChannel: ResourceHandle {
    /// Declare a topic exchange; ephemeral exchanges are non-durable and auto-deleted.
    async fn declare_topic_exchange(&mut self, exchange: &str, ephemeral: bool)
    -> crate::Result<()>;

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        durable: bool,
    ) -> crate::Result<()>;
}

/// Hide credentials embedded in a broker URI. Only the authority is searched
/// for `@`, so a vhost or query containing one is left alone.
pub fn redact_uri(uri: &str) -> String {
    let Some(scheme_end) = uri.find("://") else {
        return uri.to_string();
    };
    let authority_start = scheme_end + 3;
    let authority_end = uri[authority_start..]
        .find(['/', '?', '#'])
        .map_or(uri.len(), |i| authority_start + i);
    match uri[authority_start..authority_end].rfind('@') {
        Some(at) => format!(
            "{}***@{}",
            &uri[..authority_start],
            &uri[authority_start + at + 1..]
        ),
        None => uri.to_string(),
    }
}

/// Opens one lapin connection and one channel on it.
pub struct AmqpConnector {
    uri: String,
    connect_timeout: Duration,
}

impl AmqpConnector {
    pub fn new(uri: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            uri: uri.into(),
            connect_timeout,
        }
    }
}

/// An open broker connection and its single channel.
pub struct AmqpChannel {
    connection: Connection,
    channel: Channel,
    target: String,
}

#[async_trait]
impl Connector for AmqpConnector {
    type Handle = AmqpChannel;

    fn target(&self) -> String {
        redact_uri(&self.uri)
    }

    async fn acquire(&self) -> crate::Result<AmqpChannel> {
        let target = self.target();
        let connect = Connection::connect(&self.uri, ConnectionProperties::default());
        let connection = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| OpsError::ConnectTimeout(target.clone(), self.connect_timeout.as_secs()))?
            .map_err(|e| OpsError::Connection(target.clone(), e.to_string()))?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close(REPLY_SUCCESS, "OK").await;
                return Err(OpsError::Connection(
                    target,
                    format!("channel open failed: {}", e),
                ));
            }
        };

        Ok(AmqpChannel {
            connection,
            channel,
            target,
        })
    }
}

#[async_trait]
impl ResourceHandle for AmqpChannel {
    async fn release(self) {
        if let Err(e) = self.channel.close(REPLY_SUCCESS, "OK").await {
            tracing::debug!(broker = %self.target, error = %e, "channel close failed");
        }
        if let Err(e) = self.connection.close(REPLY_SUCCESS, "OK").await {
            tracing::warn!(broker = %self.target, error = %e, "connection close failed");
        }
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_topic_exchange(
        &mut self,
        exchange: &str,
        ephemeral: bool,
    ) -> crate::Result<()> {
        let options = ExchangeDeclareOptions {
            durable: !ephemeral,
            auto_delete: ephemeral,
            ..Default::default()
        };
        self.channel
            .exchange_declare(exchange, ExchangeKind::Topic, options, FieldTable::default())
            .await
            .map_err(|e| {
                OpsError::Operation(format!("declaring exchange '{}' failed: {}", exchange, e))
            })
    }

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        durable: bool,
    ) -> crate::Result<()> {
        let mut properties = BasicProperties::default();
        if durable {
            properties = properties.with_delivery_mode(PERSISTENT);
        }
        let to_operation_error = |e: lapin::Error| {
            OpsError::Operation(format!("publish to '{}' failed: {}", exchange, e))
        };
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
            .map_err(to_operation_error)?
            .await
            .map_err(to_operation_error)?;
        tracing::debug!(exchange, routing_key, bytes = body.len(), "message published");
        Ok(())
    }
}

/// Publish one message, optionally declaring the topic exchange first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: String,
    /// `Some(ephemeral)` declares the exchange before publishing.
    pub declare: Option<bool>,
}

#[async_trait]
impl<H: BrokerChannel> Operation<H> for PublishMessage {
    type Output = String;

    async fn perform(&self, channel: &mut H) -> crate::Result<String> {
        if let Some(ephemeral) = self.declare {
            channel
                .declare_topic_exchange(&self.exchange, ephemeral)
                .await?;
        }
        channel
            .publish(&self.exchange, &self.routing_key, self.body.as_bytes(), true)
            .await?;
        Ok(String::new())
    }
}

fn describe_topic_send_failure(_: &Invocation, err: &OpsError) -> String {
    format!("Failed to publish message: {}", err)
}

fn describe_irods_send_failure(_: &Invocation, err: &OpsError) -> String {
    format!("ERROR: {}", err)
}

pub const TOPIC_SEND: ToolSpec = ToolSpec {
    name: "amqptopicsend",
    usage: "The exchange, routing key, and message body are required as the first three \
            parameters, respectively",
    fields: &["EXCHANGE", "ROUTING_KEY", "BODY"],
    contract: ExitContract::AlwaysSucceed,
    describe_failure: describe_topic_send_failure,
};

pub const IRODS_TOPIC_SEND: ToolSpec = ToolSpec {
    name: "amqptopicsend-irods",
    usage: "usage: amqptopicsend-irods EPHEMERAL ROUTING_KEY BODY",
    fields: &["EPHEMERAL", "ROUTING_KEY", "BODY"],
    contract: ExitContract::Propagate,
    describe_failure: describe_irods_send_failure,
};

fn broker_uri(config: &AmqpConfig) -> crate::Result<&str> {
    config.uri.as_deref().filter(|uri| !uri.is_empty()).ok_or_else(|| {
        OpsError::InvalidConfig(
            "amqp".to_string(),
            format!("{} is not set and no [amqp] uri is configured", AMQP_URI_ENV),
        )
    })
}

/// `amqptopicsend` with an injectable connector factory.
pub async fn topic_send<C, M>(
    invocation: &Invocation,
    config: &AmqpConfig,
    streams: &mut Streams<'_>,
    make_connector: M,
) -> ExitStatus
where
    C: Connector,
    C::Handle: BrokerChannel,
    M: FnOnce(&str, Duration) -> C,
{
    run_single_shot(&TOPIC_SEND, invocation, streams, |inv| {
        let uri = broker_uri(config)?;
        let op = PublishMessage {
            exchange: inv.get(0).unwrap_or_default().to_string(),
            routing_key: inv.get(1).unwrap_or_default().to_string(),
            body: inv.get(2).unwrap_or_default().to_string(),
            declare: None,
        };
        let connector = make_connector(uri, Duration::from_secs(config.connect_timeout_secs));
        Ok((connector, op))
    })
    .await
}

/// `amqptopicsend-irods` with an injectable connector factory.
pub async fn irods_topic_send<C, M>(
    invocation: &Invocation,
    config: &AmqpConfig,
    streams: &mut Streams<'_>,
    make_connector: M,
) -> ExitStatus
where
    C: Connector,
    C::Handle: BrokerChannel,
    M: FnOnce(&str, Duration) -> C,
{
    run_single_shot(&IRODS_TOPIC_SEND, invocation, streams, |inv| {
        let ephemeral = parse_flag("EPHEMERAL", inv.get(0).unwrap_or_default())?;
        let uri = broker_uri(config)?;
        let op = PublishMessage {
            exchange: config.exchange.clone(),
            routing_key: inv.get(1).unwrap_or_default().to_string(),
            body: inv.get(2).unwrap_or_default().to_string(),
            declare: Some(ephemeral),
        };
        let connector = make_connector(uri, Duration::from_secs(config.connect_timeout_secs));
        Ok((connector, op))
    })
    .await
}

/// `amqptopicsend` against a real broker.
pub async fn run_topic_send(
    invocation: &Invocation,
    config: &AmqpConfig,
    streams: &mut Streams<'_>,
) -> ExitStatus {
    topic_send(invocation, config, streams, |uri: &str, timeout| {
        AmqpConnector::new(uri, timeout)
    })
    .await
}

/// `amqptopicsend-irods` against a real broker.
pub async fn run_irods_topic_send(
    invocation: &Invocation,
    config: &AmqpConfig,
    streams: &mut Streams<'_>,
) -> ExitStatus {
    irods_topic_send(invocation, config, streams, |uri: &str, timeout| {
        AmqpConnector::new(uri, timeout)
    })
    .await
}
