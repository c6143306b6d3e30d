//! `send-mail FROM TO SUBJECT BODY`: submit one plain-text message to the
//! local SMTP relay.

use std::time::Duration;

use async_trait::async_trait;
use lettre::Message;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::client::AsyncSmtpConnection;
use lettre::transport::smtp::extension::ClientId;

use crate::config::MailConfig;
use crate::error::OpsError;
use crate::invocation::Invocation;
use crate::runner::{
    Connector, ExitContract, ExitStatus, Operation, ResourceHandle, Streams, ToolSpec,
    run_single_shot,
};

/// A message ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: Mailbox,
    pub to: Mailbox,
    pub subject: String,
    pub body: String,
}

/// A session able to submit messages to a relay.
#[async_trait]
pub trait MailSession: ResourceHandle {
    async fn submit(&mut self, envelope: &Envelope) -> crate::Result<()>;
}

/// Connects to the SMTP relay configured in `[mail]`.
pub struct SmtpConnector {
    host: String,
    port: u16,
    timeout: Duration,
}

impl SmtpConnector {
    pub fn new(config: &MailConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// An open SMTP connection, greeted with EHLO.
pub struct SmtpSession {
    connection: AsyncSmtpConnection,
    target: String,
}

#[async_trait]
impl Connector for SmtpConnector {
    type Handle = SmtpSession;

    fn target(&self) -> String {
        format!("smtp://{}:{}", self.host, self.port)
    }

    async fn acquire(&self) -> crate::Result<SmtpSession> {
        // Plain SMTP to a local relay, no STARTTLS.
        let connection = AsyncSmtpConnection::connect_tokio1(
            (self.host.as_str(), self.port),
            Some(self.timeout),
            &ClientId::default(),
            None,
            None,
        )
        .await
        .map_err(|e| OpsError::Connection(self.target(), e.to_string()))?;
        tracing::debug!(relay = %self.target(), "smtp connection open");
        Ok(SmtpSession {
            connection,
            target: self.target(),
        })
    }
}

#[async_trait]
impl ResourceHandle for SmtpSession {
    async fn release(mut self) {
        if let Err(e) = self.connection.quit().await {
            tracing::debug!(relay = %self.target, error = %e, "smtp quit failed");
            self.connection.abort().await;
        }
    }
}

fn classify_smtp_error(target: &str, err: lettre::transport::smtp::Error) -> OpsError {
    if err.is_transient() || err.is_permanent() {
        OpsError::Operation(format!("relay rejected message: {}", err))
    } else {
        OpsError::Connection(target.to_string(), err.to_string())
    }
}

#[async_trait]
impl MailSession for SmtpSession {
    async fn submit(&mut self, envelope: &Envelope) -> crate::Result<()> {
        let message = Message::builder()
            .from(envelope.from.clone())
            .to(envelope.to.clone())
            .subject(envelope.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(envelope.body.clone())
            .map_err(|e| OpsError::Operation(format!("cannot build message: {}", e)))?;
        self.connection
            .send(message.envelope(), &message.formatted())
            .await
            .map_err(|e| classify_smtp_error(&self.target, e))?;
        tracing::info!(relay = %self.target, to = %envelope.to, "message submitted");
        Ok(())
    }
}

/// Submit exactly one message.
pub struct SendMail(pub Envelope);

#[async_trait]
impl<H: MailSession> Operation<H> for SendMail {
    type Output = String;

    async fn perform(&self, session: &mut H) -> crate::Result<String> {
        session.submit(&self.0).await?;
        Ok(String::new())
    }
}

fn describe_send_failure(invocation: &Invocation, err: &OpsError) -> String {
    format!(
        "Failed to send the following message to {}: {} ({})",
        invocation.get(1).unwrap_or_default(),
        invocation.get(3).unwrap_or_default(),
        err
    )
}

pub const SEND_MAIL: ToolSpec = ToolSpec {
    name: "send-mail",
    usage: "The email source address, destination address, subject, and message body are \
            required as the first four parameters, respectively",
    fields: &["FROM", "TO", "SUBJECT", "BODY"],
    contract: ExitContract::Propagate,
    describe_failure: describe_send_failure,
};

fn parse_mailbox(field: &str, value: &str) -> crate::Result<Mailbox> {
    value
        .parse::<Mailbox>()
        .map_err(|e| OpsError::InvalidArgument(field.to_string(), format!("{}: {}", value, e)))
}

/// `send-mail` with an injectable connector.
pub async fn send_mail<C>(
    invocation: &Invocation,
    streams: &mut Streams<'_>,
    connector: C,
) -> ExitStatus
where
    C: Connector,
    C::Handle: MailSession,
{
    run_single_shot(&SEND_MAIL, invocation, streams, |inv| {
        let envelope = Envelope {
            from: parse_mailbox("FROM", inv.get(0).unwrap_or_default())?,
            to: parse_mailbox("TO", inv.get(1).unwrap_or_default())?,
            subject: inv.get(2).unwrap_or_default().to_string(),
            body: inv.get(3).unwrap_or_default().to_string(),
        };
        Ok((connector, SendMail(envelope)))
    })
    .await
}

/// `send-mail` against the configured relay.
pub async fn run_send_mail(
    invocation: &Invocation,
    config: &MailConfig,
    streams: &mut Streams<'_>,
) -> ExitStatus {
    send_mail(invocation, streams, SmtpConnector::new(config)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[derive(Clone, Default)]
    struct Outbox {
        sessions: Arc<Mutex<usize>>,
        released: Arc<Mutex<usize>>,
        sent: Arc<Mutex<Vec<Envelope>>>,
    }

    struct FakeRelay(Outbox);
    struct FakeSession(Outbox);

    #[async_trait]
    impl Connector for FakeRelay {
        type Handle = FakeSession;

        fn target(&self) -> String {
            "smtp://fake:25".to_string()
        }

        async fn acquire(&self) -> crate::Result<FakeSession> {
            *self.0.sessions.lock().unwrap() += 1;
            Ok(FakeSession(self.0.clone()))
        }
    }

    #[async_trait]
    impl ResourceHandle for FakeSession {
        async fn release(self) {
            *self.0.released.lock().unwrap() += 1;
        }
    }

    #[async_trait]
    impl MailSession for FakeSession {
        async fn submit(&mut self, envelope: &Envelope) -> crate::Result<()> {
            self.0.sent.lock().unwrap().push(envelope.clone());
            Ok(())
        }
    }

    async fn run_with<C>(args: &[&str], connector: C) -> (ExitStatus, String, String)
    where
        C: Connector,
        C::Handle: MailSession,
    {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let status = {
            let mut streams = Streams::new(&mut out, &mut err);
            send_mail(&Invocation::new(args.iter().copied()), &mut streams, connector).await
        };
        (
            status,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_one_session_one_message() {
        let outbox = Outbox::default();
        let (status, out, err) = run_with(
            &["a@x.com", "b@y.com", "Hi", "Body text"],
            FakeRelay(outbox.clone()),
        )
        .await;
        assert_eq!(status, ExitStatus::SUCCESS, "stderr: {err}");
        assert!(out.is_empty());
        assert_eq!(*outbox.sessions.lock().unwrap(), 1);
        assert_eq!(*outbox.released.lock().unwrap(), 1);
        let sent = outbox.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from.email.to_string(), "a@x.com");
        assert_eq!(sent[0].to.email.to_string(), "b@y.com");
        assert_eq!(sent[0].subject, "Hi");
        assert_eq!(sent[0].body, "Body text");
    }

    #[tokio::test]
    async fn test_missing_args_never_connects() {
        let outbox = Outbox::default();
        let (status, _, err) = run_with(&["a@x.com"], FakeRelay(outbox.clone())).await;
        assert_eq!(status, ExitStatus::FAILURE);
        assert!(err.contains("destination address"), "stderr: {err}");
        assert_eq!(*outbox.sessions.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_address_is_argument_error() {
        let outbox = Outbox::default();
        let (status, _, err) =
            run_with(&["a@x.com", "not an address", "Hi", "Body"], FakeRelay(outbox.clone()))
                .await;
        assert_eq!(status, ExitStatus::FAILURE);
        assert!(err.starts_with("invalid value for 'TO'"), "stderr: {err}");
        assert_eq!(*outbox.sessions.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_refused_relay_reports_recipient_and_body() {
        let config = MailConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            timeout_secs: 5,
        };
        let mut out = Vec::new();
        let mut err = Vec::new();
        let status = {
            let mut streams = Streams::new(&mut out, &mut err);
            run_send_mail(
                &Invocation::new(["a@x.com", "b@y.com", "Hi", "Body text"]),
                &config,
                &mut streams,
            )
            .await
        };
        let err = String::from_utf8(err).unwrap();
        assert_eq!(status, ExitStatus::FAILURE);
        assert!(
            err.starts_with("Failed to send the following message to b@y.com: Body text ("),
            "stderr: {err}"
        );
    }

    #[tokio::test]
    async fn test_acquire_opens_the_connection() {
        let connector = SmtpConnector::new(&MailConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            timeout_secs: 5,
        });
        let err = connector.acquire().await.err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Connection, "{err}");
        assert!(err.to_string().contains("smtp://127.0.0.1:1"), "{err}");
    }

    /// What the relay saw: command verbs in order and the DATA section.
    struct Transcript {
        verbs: Vec<String>,
        data: String,
    }

    /// Minimal SMTP responder: accepts one session and records it.
    async fn serve_one_message(listener: TcpListener) -> Transcript {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        write.write_all(b"220 relay.test ESMTP\r\n").await.unwrap();
        let mut verbs = Vec::new();
        let mut data = String::new();
        let mut in_data = false;
        while let Ok(Some(line)) = lines.next_line().await {
            if in_data {
                if line == "." {
                    in_data = false;
                    write.write_all(b"250 2.0.0 queued\r\n").await.unwrap();
                } else {
                    data.push_str(&line);
                    data.push('\n');
                }
                continue;
            }
            let verb = line.split_whitespace().next().unwrap_or("").to_ascii_uppercase();
            verbs.push(verb.clone());
            match verb.as_str() {
                "EHLO" | "HELO" => write.write_all(b"250 relay.test\r\n").await.unwrap(),
                "DATA" => {
                    in_data = true;
                    write.write_all(b"354 go ahead\r\n").await.unwrap();
                }
                "QUIT" => {
                    let _ = write.write_all(b"221 bye\r\n").await;
                    break;
                }
                _ => write.write_all(b"250 ok\r\n").await.unwrap(),
            }
        }
        Transcript { verbs, data }
    }

    #[tokio::test]
    async fn test_message_reaches_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(serve_one_message(listener));

        let config = MailConfig {
            host: "127.0.0.1".to_string(),
            port,
            timeout_secs: 5,
        };
        let mut out = Vec::new();
        let mut err = Vec::new();
        let status = {
            let mut streams = Streams::new(&mut out, &mut err);
            run_send_mail(
                &Invocation::new(["a@x.com", "b@y.com", "Hi", "Body text"]),
                &config,
                &mut streams,
            )
            .await
        };
        assert_eq!(
            status,
            ExitStatus::SUCCESS,
            "stderr: {}",
            String::from_utf8_lossy(&err)
        );

        let Transcript { verbs, data } = server.await.unwrap();
        assert_eq!(verbs.first().map(String::as_str), Some("EHLO"));
        assert_eq!(verbs.last().map(String::as_str), Some("QUIT"));
        assert!(data.contains("From: a@x.com"), "data: {data}");
        assert!(data.contains("To: b@y.com"), "data: {data}");
        assert!(data.contains("Subject: Hi"), "data: {data}");
        assert!(data.contains("Body text"), "data: {data}");
    }
}
