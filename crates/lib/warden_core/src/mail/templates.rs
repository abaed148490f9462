//! Transactional mail bodies.

use super::OutgoingMail;
use crate::models::User;

/// Link for confirming an email address.
pub fn verification_link(base_url: &str, token: &str) -> String {
    format!("{}/verify-email?token={token}", base_url.trim_end_matches('/'))
}

/// Link for choosing a new password.
pub fn reset_link(base_url: &str, token: &str) -> String {
    format!("{}/reset-password?token={token}", base_url.trim_end_matches('/'))
}

pub fn verification_email(user: &User, base_url: &str, token: &str) -> OutgoingMail {
    let link = verification_link(base_url, token);
    OutgoingMail {
        to_address: user.email.clone(),
        to_name: user.display_name(),
        subject: "Verify your email address".into(),
        html_body: format!(
            "<p>Hi {name},</p>\
             <p>Please confirm your email address by following the link below. \
             It expires in 24 hours.</p>\
             <p><a href=\"{link}\">Verify email</a></p>",
            name = html_escape(&user.first_name),
        ),
    }
}

pub fn password_reset_email(user: &User, base_url: &str, token: &str) -> OutgoingMail {
    let link = reset_link(base_url, token);
    OutgoingMail {
        to_address: user.email.clone(),
        to_name: user.display_name(),
        subject: "Reset your password".into(),
        html_body: format!(
            "<p>Hi {name},</p>\
             <p>We received a request to reset your password. The link below \
             expires in 1 hour. If you did not ask for this, ignore this email.</p>\
             <p><a href=\"{link}\">Reset password</a></p>",
            name = html_escape(&user.first_name),
        ),
    }
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::mail::extract_token;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            first_name: "<Ada>".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            is_email_verified: false,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn verification_email_links_token() {
        let mail = verification_email(&user(), "http://app.test/", "deadbeef");
        assert_eq!(mail.to_address, "ada@example.com");
        assert!(mail.html_body.contains("http://app.test/verify-email?token=deadbeef"));
        assert!(mail.html_body.contains("&lt;Ada&gt;"));
        assert_eq!(extract_token(&mail.html_body).as_deref(), Some("deadbeef"));
    }

    #[test]
    fn reset_email_links_token() {
        let mail = password_reset_email(&user(), "http://app.test", "cafe");
        assert!(mail.html_body.contains("http://app.test/reset-password?token=cafe"));
        assert_eq!(mail.subject, "Reset your password");
    }
}
