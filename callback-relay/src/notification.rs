use crate::submission::Submission;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tinytemplate::{error::Error, format, TinyTemplate};

const NOTIFICATION_TEMPLATE_NAME: &str = "callback-notification";
const NOTIFICATION_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/callback-notification.html"
));

pub const NOT_PROVIDED: &str = "Not provided";
pub const UNKNOWN_SOURCE: &str = "Unknown Page";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// A rendered email ready to hand to a [`crate::dispatcher::Dispatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub html_body: String,
}

#[derive(Serialize)]
struct Context<'a> {
    name: &'a str,
    organization: &'a str,
    contact_no: &'a str,
    email: &'a str,
    message: &'a str,
    source: &'a str,
    received_at: String,
}

/// Renders the notification for a validated submission. All submitted values are
/// HTML-escaped in the body; the subject is a plain text header.
pub fn render_notification(submission: &Submission, received_at: DateTime<Utc>) -> Notification {
    let source = submission.source.unwrap_or(UNKNOWN_SOURCE);
    let context = Context {
        name: submission.name,
        organization: submission.organization,
        contact_no: submission.contact_no,
        email: submission.email.unwrap_or(NOT_PROVIDED),
        message: submission.message.unwrap_or(NOT_PROVIDED),
        source,
        received_at: received_at.format(TIMESTAMP_FORMAT).to_string(),
    };

    let mut tt = TinyTemplate::new();
    tt.add_formatter("render_paragraphs", render_paragraphs);
    tt.add_template(NOTIFICATION_TEMPLATE_NAME, NOTIFICATION_TEMPLATE)
        .expect("embedded notification template parses");
    let html_body = tt
        .render(NOTIFICATION_TEMPLATE_NAME, &context)
        .expect("notification context matches the embedded template");

    Notification {
        subject: format!("Callback Request ({source}) — {}", submission.name),
        html_body,
    }
}

/// Blank lines separate paragraphs; single line breaks inside one become `<br>`.
fn render_paragraphs(value: &Value, output: &mut String) -> Result<(), Error> {
    let mut escaped = String::new();
    format(value, &mut escaped)?;
    let text = escaped.replace("\r\n", "\n");
    let paragraphs = text
        .split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty());
    for paragraph in paragraphs {
        output.push_str("<p>");
        output.push_str(&paragraph.lines().collect::<Vec<_>>().join("<br>"));
        output.push_str("</p>");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{render_notification, Notification};
    use crate::submission::Submission;
    use chrono::{TimeZone, Utc};
    use googletest::prelude::*;

    const MALICIOUS_CONTENT: &str = "<script>alert(1)</script>";

    fn arbitrary_submission() -> Submission<'static> {
        Submission {
            name: "Ann",
            organization: "Acme",
            contact_no: "123-456-7890",
            email: Some("ann@example.com"),
            message: Some("Please call back"),
            source: Some("Pricing"),
        }
    }

    fn render(submission: &Submission) -> Notification {
        render_notification(
            submission,
            Utc.with_ymd_and_hms(2024, 3, 1, 14, 5, 9).unwrap(),
        )
    }

    #[test]
    fn escapes_script_in_name() -> Result<()> {
        let submission = Submission {
            name: MALICIOUS_CONTENT,
            ..arbitrary_submission()
        };

        let notification = render(&submission);

        verify_that!(
            notification.html_body,
            all!(
                not(contains_substring("<script>")),
                contains_substring("&lt;script&gt;alert(1)&lt;/script&gt;")
            )
        )
    }

    #[test]
    fn escapes_every_user_field() -> Result<()> {
        let submission = Submission {
            name: MALICIOUS_CONTENT,
            organization: MALICIOUS_CONTENT,
            contact_no: "123-456-7890",
            email: Some(MALICIOUS_CONTENT),
            message: Some(MALICIOUS_CONTENT),
            source: Some(MALICIOUS_CONTENT),
        };

        let notification = render(&submission);

        verify_that!(notification.html_body, not(contains_substring("<script")))
    }

    #[test]
    fn escapes_ampersands_and_quotes() -> Result<()> {
        let submission = Submission {
            organization: r#"Smith & "Sons" 'Ltd'"#,
            ..arbitrary_submission()
        };

        let notification = render(&submission);

        verify_that!(
            notification.html_body,
            contains_substring("Smith &amp; &quot;Sons&quot; &#39;Ltd&#39;")
        )
    }

    #[test]
    fn renders_placeholders_for_missing_optional_fields() -> Result<()> {
        let submission = Submission {
            email: None,
            message: None,
            source: None,
            ..arbitrary_submission()
        };

        let notification = render(&submission);

        verify_that!(
            notification.html_body,
            all!(
                contains_substring("<td>Not provided</td>"),
                contains_substring("<p>Not provided</p>"),
                contains_substring("<strong>Source:</strong> Unknown Page"),
                not(contains_substring("undefined")),
                not(contains_substring("<td></td>"))
            )
        )
    }

    #[test]
    fn renders_subject_with_source_and_name() -> Result<()> {
        let notification = render(&arbitrary_submission());

        verify_that!(
            notification.subject,
            eq("Callback Request (Pricing) — Ann")
        )
    }

    #[test]
    fn renders_unknown_page_in_subject_when_source_missing() -> Result<()> {
        let submission = Submission {
            source: None,
            ..arbitrary_submission()
        };

        let notification = render(&submission);

        verify_that!(
            notification.subject,
            eq("Callback Request (Unknown Page) — Ann")
        )
    }

    #[test]
    fn renders_all_fields_in_table() -> Result<()> {
        let notification = render(&arbitrary_submission());

        verify_that!(
            notification.html_body,
            all!(
                contains_substring("<td>Ann</td>"),
                contains_substring("<td>Acme</td>"),
                contains_substring("<td>123-456-7890</td>"),
                contains_substring("<td>ann@example.com</td>"),
                contains_substring("<p>Please call back</p>"),
                contains_substring("New Callback Request (Pricing)")
            )
        )
    }

    #[test]
    fn renders_receipt_timestamp() -> Result<()> {
        let notification = render(&arbitrary_submission());

        verify_that!(
            notification.html_body,
            contains_substring("Received at 2024-03-01 14:05:09 UTC")
        )
    }

    #[test]
    fn renders_paragraphs_in_message() -> Result<()> {
        let submission = Submission {
            message: Some("A paragraph\n\nAnother paragraph"),
            ..arbitrary_submission()
        };

        let notification = render(&submission);

        verify_that!(
            notification.html_body,
            contains_substring("<p>A paragraph</p><p>Another paragraph</p>")
        )
    }

    #[test]
    fn keeps_line_breaks_within_paragraph() -> Result<()> {
        let submission = Submission {
            message: Some("Call after 5pm\r\nAsk for Ann\r\n\r\n\r\nThanks"),
            ..arbitrary_submission()
        };

        let notification = render(&submission);

        verify_that!(
            notification.html_body,
            contains_substring("<p>Call after 5pm<br>Ask for Ann</p><p>Thanks</p>")
        )
    }
}
