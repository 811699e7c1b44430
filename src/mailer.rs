//! OTP delivery over an HTTP mail API, with a demo fallback that logs the
//! code when no endpoint is configured.

use serde::Serialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("mail provider returned {status}: {message}")]
    Provider { status: u16, message: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OtpMailBody<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: String,
}

pub struct Mailer {
    http: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
    from: String,
}

impl Mailer {
    pub fn new(endpoint: Option<String>, api_key: Option<String>, from: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            api_key,
            from,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Sends the passcode mail. Without a configured endpoint the code is
    /// logged instead and the call reports success (demo mode).
    pub async fn send_otp(
        &self,
        to: &str,
        code: &str,
        user_name: Option<&str>,
    ) -> Result<(), MailError> {
        let Some(endpoint) = self.endpoint.as_deref() else {
            info!(to, code, "mail endpoint not configured, passcode logged only");
            return Ok(());
        };

        let body = OtpMailBody {
            from: &self.from,
            to,
            subject: "Your CloudSync verification code",
            html: render_otp_html(code, user_name),
        };
        let mut request = self.http.post(endpoint).json(&body);
        if let Some(key) = self.api_key.as_deref() {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "mail delivery failed".to_string());
            return Err(MailError::Provider { status, message });
        }
        info!(to, "otp mail sent");
        Ok(())
    }
}

fn render_otp_html(code: &str, user_name: Option<&str>) -> String {
    let greeting = match user_name {
        Some(name) => format!("Hello {name}, here is your verification code."),
        None => "Here is your verification code.".to_string(),
    };
    format!(
        "<div style=\"font-family:sans-serif;max-width:480px;margin:auto\">\
         <h2>CloudSync</h2>\
         <p>{greeting}</p>\
         <p style=\"font-size:32px;font-weight:bold;letter-spacing:8px\">{code}</p>\
         <p>The code expires in 5 minutes. If you did not request it, you can \
         ignore this mail.</p>\
         </div>"
    )
}
