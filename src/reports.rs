//! User reports and account moderation.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::policy::{Action, Actor, Resource, authorize};
use crate::store::{ReportResolution, ResolvedReport, Store};
use crate::types::{AccountStatus, ModerationAction, NewReport, Page, Profile, Report, ReportStatus};

const MAX_REASON_LEN: usize = 200;
const MAX_DESCRIPTION_LEN: usize = 2000;

#[derive(Debug, Clone, Deserialize)]
pub struct ReportRequest {
    pub reported_user_id: Uuid,
    #[serde(default)]
    pub message_id: Option<Uuid>,
    pub reason: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Files a report against another user.
pub async fn file_report(
    store: &dyn Store,
    actor: &Actor,
    req: ReportRequest,
) -> Result<Report, ServiceError> {
    authorize(actor, Action::Report, Resource::None).into_result()?;

    let reason = req.reason.trim();
    if reason.is_empty() {
        return Err(ServiceError::MissingField("reason"));
    }
    if reason.chars().count() > MAX_REASON_LEN {
        return Err(ServiceError::Validation(format!(
            "reason is limited to {MAX_REASON_LEN} characters"
        )));
    }
    let description = req
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());
    if description
        .as_ref()
        .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN)
    {
        return Err(ServiceError::Validation(format!(
            "description is limited to {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    if req.reported_user_id == actor.user_id {
        return Err(ServiceError::Validation("cannot report yourself".into()));
    }
    if store.get_profile(req.reported_user_id).await?.is_none() {
        return Err(ServiceError::NotFound("profile"));
    }
    if let Some(message_id) = req.message_id {
        let message = store
            .get_message(message_id)
            .await?
            .ok_or(ServiceError::NotFound("message"))?;
        if message.sender_id != req.reported_user_id {
            return Err(ServiceError::Validation(
                "reported message was not sent by the reported user".into(),
            ));
        }
    }

    let report = store
        .create_report(NewReport {
            reporter_id: actor.user_id,
            reported_user_id: req.reported_user_id,
            message_id: req.message_id,
            reason: reason.to_string(),
            description,
        })
        .await?;
    info!(report_id = %report.id, reporter = %actor.user_id, "report filed");
    Ok(report)
}

pub async fn list_reports(
    store: &dyn Store,
    actor: &Actor,
    status: Option<ReportStatus>,
    page: Page,
) -> Result<(Vec<Report>, u64), ServiceError> {
    authorize(actor, Action::Moderate, Resource::None).into_result()?;
    store.list_reports(status, page.normalized()).await
}

/// Expiry stamped for an action taken at `now`.
pub fn status_expiry(
    status: AccountStatus,
    now: DateTime<Utc>,
    temporary_ban: Duration,
) -> Option<DateTime<Utc>> {
    (status == AccountStatus::TemporaryBan).then(|| now + temporary_ban)
}

/// Resolves a pending report, applying the chosen action to the reported account.
pub async fn process_action(
    store: &dyn Store,
    actor: &Actor,
    report_id: Uuid,
    action: ModerationAction,
    temporary_ban: Duration,
) -> Result<ResolvedReport, ServiceError> {
    authorize(actor, Action::Moderate, Resource::None).into_result()?;

    let now = Utc::now();
    let status_expires_at = action
        .account_status()
        .and_then(|status| status_expiry(status, now, temporary_ban));
    let resolved = store
        .resolve_report(ReportResolution {
            report_id,
            action,
            resolved_by: actor.user_id,
            resolved_at: now,
            status_expires_at,
        })
        .await?;

    info!(
        %report_id,
        admin = %actor.user_id,
        %action,
        reported_user = %resolved.report.reported_user_id,
        "report actioned"
    );
    Ok(resolved)
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusChange {
    pub status: AccountStatus,
    /// Overrides the default temporary ban length.
    #[serde(default)]
    pub hours: Option<i64>,
}

/// Sets an account's standing directly; `good` reinstates it.
pub async fn set_account_status(
    store: &dyn Store,
    actor: &Actor,
    user_id: Uuid,
    change: StatusChange,
    temporary_ban: Duration,
) -> Result<Profile, ServiceError> {
    authorize(actor, Action::Moderate, Resource::None).into_result()?;
    if change.hours.is_some_and(|h| h < 1) {
        return Err(ServiceError::Validation("ban length must be at least one hour".into()));
    }

    let length = change.hours.map_or(temporary_ban, Duration::hours);
    let expires_at = status_expiry(change.status, Utc::now(), length);
    let profile = store
        .set_account_status(user_id, change.status, expires_at)
        .await?;
    info!(%user_id, admin = %actor.user_id, status = %change.status, "account status set");
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_temporary_bans_expire() {
        let now = Utc::now();
        let ban = Duration::hours(72);
        assert_eq!(
            status_expiry(AccountStatus::TemporaryBan, now, ban),
            Some(now + ban)
        );
        assert_eq!(status_expiry(AccountStatus::Warning, now, ban), None);
        assert_eq!(status_expiry(AccountStatus::Banned, now, ban), None);
    }
}
