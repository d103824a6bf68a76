//! Append-only audit trail

use crate::{Store, StoreResult};
use chrono::Utc;
use smsgate_core::models::{AuditEvent, NewAuditEvent};
use sqlx::types::Json;

impl Store {
    /// Append one audit event. Durable once this returns; callers on the
    /// request path log-and-continue on failure rather than blocking the
    /// data plane.
    pub async fn append_audit(&self, event: NewAuditEvent) -> StoreResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO audit_events
                (event_type, severity, owner_id, client_id, endpoint, status_code, payload, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            RETURNING id
            "#,
        )
        .bind(&event.event_type)
        .bind(event.severity)
        .bind(&event.owner_id)
        .bind(&event.client_id)
        .bind(&event.endpoint)
        .bind(event.status_code)
        .bind(Json(&event.payload))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Latest audit events, newest first.
    pub async fn recent_audit(&self, limit: i64) -> StoreResult<Vec<AuditEvent>> {
        let events = sqlx::query_as::<_, AuditEvent>(
            "SELECT * FROM audit_events ORDER BY created_at DESC, id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}
