use anyhow::Result;

use crate::models::User;

/// Delivery of account messages. Tokens handed here are the only copy of
/// the raw secret; only their hash is stored.
pub trait AccountNotifier: Send + Sync + 'static {
    fn password_reset(&self, user: &User, token: &str) -> Result<()>;

    fn account_approved(&self, user: &User) -> Result<()>;
}

/// Used when no mail transport is configured: records that a message would
/// have gone out, never the token itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl AccountNotifier for LogNotifier {
    fn password_reset(&self, user: &User, _token: &str) -> Result<()> {
        tracing::warn!(
            user_id = %user.id,
            "no mail transport configured, password reset link not delivered"
        );
        Ok(())
    }

    fn account_approved(&self, user: &User) -> Result<()> {
        tracing::info!(user_id = %user.id, "account approved, no mail transport configured");
        Ok(())
    }
}
