use time::OffsetDateTime;

use portwarden_core::store::PendingApproval;

use crate::format_duration;

/// One line per suspension, oldest first, with how long it has waited.
pub fn pending_lines(pending: &[PendingApproval], now: OffsetDateTime) -> Vec<String> {
    pending
        .iter()
        .map(|approval| {
            let age = format_duration(now - approval.created_at);
            let expiry = match approval.expires_at {
                Some(_) if approval.is_expired(now) => " [expired]".to_string(),
                Some(expires_at) => format!(" [expires in {}]", format_duration(expires_at - now)),
                None => String::new(),
            };
            format!("{} ({age} ago){expiry}: {}", approval.id, approval.hint())
        })
        .collect()
}
