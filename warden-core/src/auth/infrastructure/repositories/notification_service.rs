use anyhow::Result;
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::auth::domain::repositories::{
    NotificationPayload, NotificationPurpose, NotificationService,
};

/// Notification sink that only logs that a delivery would have happened.
/// The code itself is never written out.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingNotificationService;

#[async_trait]
impl NotificationService for LoggingNotificationService {
    async fn send(
        &self,
        subject_id: Uuid,
        purpose: NotificationPurpose,
        payload: NotificationPayload,
    ) -> Result<()> {
        match (purpose, payload) {
            (
                NotificationPurpose::OneTimeCode(otp_purpose),
                NotificationPayload::OneTimeCode { expires_at, .. },
            ) => {
                info!(
                    %subject_id,
                    purpose = %otp_purpose,
                    %expires_at,
                    "one-time code ready for delivery"
                );
            }
            (_, NotificationPayload::LoginAlert { family_id, occurred_at }) => {
                info!(
                    %subject_id,
                    %family_id,
                    %occurred_at,
                    "new sign-in alert ready for delivery"
                );
            }
            (purpose, _) => {
                anyhow::bail!("payload does not match purpose {purpose:?}");
            }
        }
        Ok(())
    }
}
