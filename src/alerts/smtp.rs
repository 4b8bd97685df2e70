//! Minimal SMTP submission client (plain TCP, optional AUTH LOGIN)

use std::time::Duration;

use base64::Engine;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::notifier::NotifierError;

/// Message envelope and content
#[derive(Debug, Clone)]
pub struct Mail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// SMTP server settings
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

pub async fn send_mail(settings: &SmtpSettings, mail: &Mail) -> Result<(), NotifierError> {
    tokio::time::timeout(settings.timeout, submit(settings, mail))
        .await
        .map_err(|_| NotifierError::Email("SMTP session timed out".to_string()))?
}

async fn submit(settings: &SmtpSettings, mail: &Mail) -> Result<(), NotifierError> {
    let stream = TcpStream::connect((settings.host.as_str(), settings.port))
        .await
        .map_err(|e| {
            NotifierError::Email(format!(
                "cannot connect to {}:{}: {}",
                settings.host, settings.port, e
            ))
        })?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    expect_reply(&mut reader, &[220]).await?;

    command(&mut writer, "EHLO driftwatch").await?;
    if expect_reply(&mut reader, &[250]).await.is_err() {
        command(&mut writer, "HELO driftwatch").await?;
        expect_reply(&mut reader, &[250]).await?;
    }

    if let (Some(user), Some(password)) = (&settings.username, &settings.password) {
        let engine = base64::engine::general_purpose::STANDARD;
        command(&mut writer, "AUTH LOGIN").await?;
        expect_reply(&mut reader, &[334]).await?;
        command(&mut writer, &engine.encode(user)).await?;
        expect_reply(&mut reader, &[334]).await?;
        command(&mut writer, &engine.encode(password)).await?;
        expect_reply(&mut reader, &[235]).await?;
    }

    command(&mut writer, &format!("MAIL FROM:<{}>", single_line(&mail.from))).await?;
    expect_reply(&mut reader, &[250]).await?;
    for recipient in &mail.to {
        command(&mut writer, &format!("RCPT TO:<{}>", single_line(recipient))).await?;
        // 251: user not local, will forward
        expect_reply(&mut reader, &[250, 251]).await?;
    }

    command(&mut writer, "DATA").await?;
    expect_reply(&mut reader, &[354]).await?;
    writer
        .write_all(format_message(mail).as_bytes())
        .await
        .map_err(io_error)?;
    expect_reply(&mut reader, &[250]).await?;

    command(&mut writer, "QUIT").await?;
    // Some servers close without answering QUIT
    let _ = expect_reply(&mut reader, &[221]).await;
    Ok(())
}

/// Headers, dot-stuffed body and terminating `.` line
fn format_message(mail: &Mail) -> String {
    let mut message = format!(
        "From: {}\r\nTo: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n",
        single_line(&mail.from),
        single_line(&mail.to.join(", ")),
        single_line(&mail.subject)
    );
    for line in mail.body.lines() {
        if line.starts_with('.') {
            message.push('.');
        }
        message.push_str(line);
        message.push_str("\r\n");
    }
    message.push_str(".\r\n");
    message
}

/// Header and envelope values must stay on one line
fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

async fn command<W>(writer: &mut W, line: &str) -> Result<(), NotifierError>
where
    W: AsyncWriteExt + Unpin,
{
    writer
        .write_all(format!("{}\r\n", line).as_bytes())
        .await
        .map_err(io_error)
}

/// Read a (possibly multi-line) reply and check its code
async fn expect_reply<R>(reader: &mut R, accepted: &[u16]) -> Result<(), NotifierError>
where
    R: AsyncBufReadExt + Unpin,
{
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.map_err(io_error)?;
        if n == 0 {
            return Err(NotifierError::Email("SMTP server closed the connection".to_string()));
        }
        let code: u16 = line
            .get(..3)
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| NotifierError::Email(format!("malformed SMTP reply: {}", line.trim())))?;

        // "250-..." continues, "250 ..." ends the reply
        if line.as_bytes().get(3) == Some(&b'-') {
            continue;
        }
        if !accepted.contains(&code) {
            return Err(NotifierError::Email(format!(
                "expected {:?} but server replied: {}",
                accepted,
                line.trim()
            )));
        }
        return Ok(());
    }
}

fn io_error(e: std::io::Error) -> NotifierError {
    NotifierError::Email(format!("SMTP I/O error: {}", e))
}
