//! 日志邮件发送
//!
//! 组装邮件 (主题/正文/CSV附件) 后交给外部传输. SMTP本身不在本库内,
//! 自带的 OutboxTransport 把邮件写成JSON文件, 由外部发信程序投递.

use crate::error::{CounterError, Result};
use crate::event_log::CsvEventLog;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const MAIL_SUBJECT: &str = "People Counter Log Data";
pub const MAIL_BODY: &str = "Please find attached the people counter log data.";

/// 控制面板填写的发信信息 (三项必填)
#[derive(Clone, Debug, Default)]
pub struct MailRequest {
    pub sender: String,
    pub password: String,
    pub recipient: String,
}

impl MailRequest {
    pub fn new(
        sender: impl Into<String>,
        password: impl Into<String>,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            password: password.into(),
            recipient: recipient.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("sender", &self.sender),
            ("password", &self.password),
            ("recipient", &self.recipient),
        ] {
            if value.trim().is_empty() {
                return Err(CounterError::MissingField(name));
            }
        }
        Ok(())
    }
}

/// 待发送邮件
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment_name: String,
    pub attachment_csv: String,
    pub smtp_server: String,
    pub smtp_port: u16,
    /// 只交给传输层, 不写入发件箱文件
    #[serde(skip)]
    pub password: String,
}

impl OutgoingMail {
    /// 校验请求并附上当前日志文件
    pub fn compose(
        request: &MailRequest,
        log: &CsvEventLog,
        attachment_name: &str,
        smtp_server: &str,
        smtp_port: u16,
    ) -> Result<Self> {
        request.validate()?;
        let bytes = fs::read(log.path())?;
        Ok(Self {
            from: request.sender.trim().to_string(),
            to: request.recipient.trim().to_string(),
            subject: MAIL_SUBJECT.to_string(),
            body: MAIL_BODY.to_string(),
            attachment_name: attachment_name.to_string(),
            attachment_csv: String::from_utf8_lossy(&bytes).into_owned(),
            smtp_server: smtp_server.to_string(),
            smtp_port,
            password: request.password.clone(),
        })
    }
}

/// 邮件传输 (SMTP客户端 / 发件箱 / ...)
pub trait MailTransport {
    fn send(&self, mail: &OutgoingMail) -> anyhow::Result<()>;
}

/// 写入发件箱目录的传输
#[derive(Clone, Debug)]
pub struct OutboxTransport {
    dir: PathBuf,
}

impl OutboxTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl MailTransport for OutboxTransport {
    fn send(&self, mail: &OutgoingMail) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let name = format!("mail-{}.json", Local::now().format("%Y%m%d-%H%M%S%.6f"));
        let path = self.dir.join(name);
        fs::write(&path, serde_json::to_string_pretty(mail)?)?;
        log::info!("📧 邮件已写入发件箱: {} → {}", mail.to, path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder(RefCell<Vec<OutgoingMail>>);

    impl MailTransport for Recorder {
        fn send(&self, mail: &OutgoingMail) -> anyhow::Result<()> {
            self.0.borrow_mut().push(mail.clone());
            Ok(())
        }
    }

    fn log_with_header(dir: &Path) -> CsvEventLog {
        let log = CsvEventLog::new(dir.join("log.csv"));
        log.ensure_header().unwrap();
        log
    }

    #[test]
    fn test_all_fields_required() {
        let err = MailRequest::new("a@x.com", " ", "b@x.com").validate().unwrap_err();
        assert!(matches!(err, CounterError::MissingField("password")));
        assert!(MailRequest::new("", "pw", "b@x.com").validate().is_err());
        assert!(MailRequest::new("a@x.com", "pw", "b@x.com").validate().is_ok());
    }

    #[test]
    fn test_compose_attaches_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_with_header(dir.path());
        let request = MailRequest::new("a@x.com", "pw", "b@x.com");
        let mail = OutgoingMail::compose(&request, &log, "people_counter_log.csv", "smtp.gmail.com", 587)
            .unwrap();
        assert_eq!(mail.subject, MAIL_SUBJECT);
        assert_eq!(mail.body, MAIL_BODY);
        assert_eq!(mail.attachment_csv, "ID,Event,Timestamp,Duration\r\n");

        let recorder = Recorder::default();
        recorder.send(&mail).unwrap();
        assert_eq!(recorder.0.borrow()[0].to, "b@x.com");
    }

    #[test]
    fn test_outbox_omits_password() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_with_header(dir.path());
        let request = MailRequest::new("a@x.com", "secret", "b@x.com");
        let mail = OutgoingMail::compose(&request, &log, "people_counter_log.csv", "smtp.gmail.com", 587)
            .unwrap();
        let outbox = OutboxTransport::new(dir.path().join("outbox"));
        outbox.send(&mail).unwrap();

        let files: Vec<_> = fs::read_dir(outbox.dir()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let text = fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
        assert!(!text.contains("secret"));
        let parsed: OutgoingMail = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.smtp_port, 587);
        assert!(parsed.password.is_empty());
    }
}
