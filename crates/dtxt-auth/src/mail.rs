//! Outgoing mail for share verification

use async_trait::async_trait;
use dtxt_core::{DtxtError, DtxtResult, SmtpSettings};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

pub const VERIFICATION_SUBJECT: &str = "DailyTxT share verification code";
pub const TEST_SUBJECT: &str = "DailyTxT SMTP test email";
pub const TEST_BODY: &str = "This is a test email from DailyTxT share verification settings.";

pub fn verification_body(code: &str, ttl_minutes: i64) -> String {
    format!("Your verification code is: {code}\r\n\r\nThis code expires in {ttl_minutes} minutes.")
}

/// Sends one plain-text message with the given connection settings.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        settings: &SmtpSettings,
        to: &str,
        subject: &str,
        body: &str,
    ) -> DtxtResult<()>;
}

/// lettre-backed mailer. A transport is built per message since the
/// settings can differ per user.
#[derive(Debug, Default, Clone, Copy)]
pub struct SmtpMailer;

fn smtp_err(context: &str) -> impl Fn(lettre::transport::smtp::Error) -> DtxtError + '_ {
    move |e| DtxtError::Smtp(format!("{context}: {e}"))
}

/// Port 465 is implicit TLS; any other port upgrades with STARTTLS when the
/// server offers it.
pub fn build_transport(settings: &SmtpSettings) -> DtxtResult<AsyncSmtpTransport<Tokio1Executor>> {
    if !settings.is_configured() {
        return Err(DtxtError::VerificationNotConfigured);
    }
    let host = settings.host.trim();
    let tls = TlsParameters::new(host.to_string()).map_err(smtp_err("TLS parameters"))?;

    let mut builder = if settings.port == 465 {
        AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(smtp_err("SMTP relay"))?
            .port(settings.port)
            .tls(Tls::Wrapper(tls))
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(settings.port)
            .tls(Tls::Opportunistic(tls))
    };

    if !settings.username.is_empty() {
        builder = builder.credentials(Credentials::new(
            settings.username.clone(),
            settings.password.clone(),
        ));
    }
    Ok(builder.build())
}

pub fn build_message(from: &str, to: &str, subject: &str, body: &str) -> DtxtResult<Message> {
    let from: Mailbox = from
        .parse()
        .map_err(|e| DtxtError::Smtp(format!("invalid from address: {e}")))?;
    let to: Mailbox = to.parse().map_err(|_| DtxtError::InvalidEmail)?;
    Message::builder()
        .from(from)
        .to(to)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| DtxtError::Smtp(format!("failed to build email: {e}")))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(
        &self,
        settings: &SmtpSettings,
        to: &str,
        subject: &str,
        body: &str,
    ) -> DtxtResult<()> {
        let transport = build_transport(settings)?;
        let message = build_message(&settings.from, to, subject, body)?;
        transport
            .send(message)
            .await
            .map_err(smtp_err("send failed"))?;
        tracing::info!(host = %settings.host, port = settings.port, "mail sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(port: u16) -> SmtpSettings {
        SmtpSettings {
            host: "localhost".into(),
            port,
            from: "journal@example.org".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_verification_body() {
        assert_eq!(
            verification_body("012345", 10),
            "Your verification code is: 012345\r\n\r\nThis code expires in 10 minutes."
        );
    }

    #[test]
    fn test_transport_requires_configuration() {
        assert!(matches!(
            build_transport(&SmtpSettings::default()),
            Err(DtxtError::VerificationNotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_transport_builds_for_both_tls_modes() {
        assert!(build_transport(&settings(465)).is_ok());
        assert!(build_transport(&settings(587)).is_ok());

        let mut with_auth = settings(587);
        with_auth.username = "mailer".into();
        with_auth.password = "pw".into();
        assert!(build_transport(&with_auth).is_ok());
    }

    #[test]
    fn test_build_message() {
        assert!(build_message("journal@example.org", "bob@example.org", "s", "b").is_ok());
        assert!(matches!(
            build_message("journal@example.org", "not an address", "s", "b"),
            Err(DtxtError::InvalidEmail)
        ));
    }
}
