//! PostgreSQL storage for the identity core.
//!
//! Uses sqlx runtime queries; the schema lives in `migrations/`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use super::audit::AuditSink;
use super::error::StoreError;
use super::store::{CommitOutcome, IdentityStore};
use crate::models::{
    AuditEvent, EmailAddress, Member, MemberState, PasskeyCredential, RecordOrigin,
    RejectionReason, Role, RoleSet, Session, StepResult, VerificationRecord, VerificationStatus,
};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

const MEMBER_SELECT: &str = r#"
    SELECT m.member_id, m.email, m.member_state_code, m.created_utc, m.updated_utc, m.deactivated_utc,
           COALESCE(array_agg(r.role_code) FILTER (WHERE r.role_code IS NOT NULL), '{}') AS role_codes
    FROM members m
    LEFT JOIN member_roles r ON r.member_id = m.member_id
"#;

const RECORD_SELECT: &str = r#"
    SELECT record_id, member_id, target_role_code, status_code, origin_code, bypass, input,
           rejection_code, created_utc, updated_utc, finalized_utc
    FROM verification_records
"#;

#[derive(FromRow)]
struct MemberRow {
    member_id: Uuid,
    email: String,
    member_state_code: String,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
    deactivated_utc: Option<DateTime<Utc>>,
    role_codes: Vec<String>,
}

impl TryFrom<MemberRow> for Member {
    type Error = StoreError;

    fn try_from(row: MemberRow) -> Result<Self, Self::Error> {
        let email = EmailAddress::parse(&row.email)
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("member {}: {}", row.member_id, e)))?;
        Ok(Member {
            member_id: row.member_id,
            email,
            roles: RoleSet::parse_legacy(&row.role_codes.join(",")),
            state: MemberState::parse(&row.member_state_code),
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
            deactivated_utc: row.deactivated_utc,
        })
    }
}

#[derive(FromRow)]
struct CredentialRow {
    credential_id: String,
    member_id: Uuid,
    public_key: String,
    sign_counter: i64,
    created_utc: DateTime<Utc>,
    last_used_utc: Option<DateTime<Utc>>,
}

impl TryFrom<CredentialRow> for PasskeyCredential {
    type Error = StoreError;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        let sign_counter = u32::try_from(row.sign_counter).map_err(|_| {
            StoreError::Backend(anyhow::anyhow!(
                "credential {} has out-of-range counter {}",
                row.credential_id,
                row.sign_counter
            ))
        })?;
        Ok(PasskeyCredential {
            credential_id: row.credential_id,
            member_id: row.member_id,
            public_key: row.public_key,
            sign_counter,
            created_utc: row.created_utc,
            last_used_utc: row.last_used_utc,
        })
    }
}

#[derive(FromRow)]
struct RecordRow {
    record_id: Uuid,
    member_id: Uuid,
    target_role_code: String,
    status_code: String,
    origin_code: String,
    bypass: bool,
    input: serde_json::Value,
    rejection_code: Option<String>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
    finalized_utc: Option<DateTime<Utc>>,
}

#[derive(FromRow)]
struct StepRow {
    step_name: String,
    verified: bool,
    evidence: serde_json::Value,
    issues: Json<Vec<String>>,
    recorded_utc: DateTime<Utc>,
}

impl RecordRow {
    fn into_record(self, steps: Vec<StepRow>) -> Result<VerificationRecord, StoreError> {
        let corrupt = |field: &str, value: &str| {
            StoreError::Backend(anyhow::anyhow!(
                "verification record {} has invalid {}: {}",
                self.record_id,
                field,
                value
            ))
        };
        let target_role: Role = self
            .target_role_code
            .parse()
            .map_err(|_| corrupt("target role", &self.target_role_code))?;
        let status = VerificationStatus::parse(&self.status_code)
            .ok_or_else(|| corrupt("status", &self.status_code))?;
        let origin = RecordOrigin::parse(&self.origin_code)
            .ok_or_else(|| corrupt("origin", &self.origin_code))?;
        let rejection_reason = match self.rejection_code.as_deref() {
            Some(code) => Some(RejectionReason::parse(code).ok_or_else(|| corrupt("rejection", code))?),
            None => None,
        };

        Ok(VerificationRecord {
            record_id: self.record_id,
            member_id: self.member_id,
            target_role,
            status,
            origin,
            bypass: self.bypass,
            input: self.input,
            steps: steps
                .into_iter()
                .map(|s| StepResult {
                    step: s.step_name,
                    verified: s.verified,
                    evidence: s.evidence,
                    issues: s.issues.0,
                    recorded_utc: s.recorded_utc,
                })
                .collect(),
            rejection_reason,
            created_utc: self.created_utc,
            updated_utc: self.updated_utc,
            finalized_utc: self.finalized_utc,
        })
    }
}

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_steps(&self, record_id: Uuid) -> Result<Vec<StepRow>, StoreError> {
        Ok(sqlx::query_as::<_, StepRow>(
            r#"
            SELECT step_name, verified, evidence, issues, recorded_utc
            FROM verification_steps
            WHERE record_id = $1
            ORDER BY step_seq
            "#,
        )
        .bind(record_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn hydrate(&self, row: RecordRow) -> Result<VerificationRecord, StoreError> {
        let steps = self.load_steps(row.record_id).await?;
        row.into_record(steps)
    }
}

#[async_trait]
impl IdentityStore for Database {
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                StoreError::from(e)
            })?;
        Ok(())
    }

    // ==================== Member Operations ====================

    async fn insert_member(&self, member: &Member) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO members (member_id, email, member_state_code, created_utc, updated_utc, deactivated_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(member.member_id)
        .bind(member.email.as_str())
        .bind(member.state.as_str())
        .bind(member.created_utc)
        .bind(member.updated_utc)
        .bind(member.deactivated_utc)
        .execute(&mut *tx)
        .await?;

        for role in member.roles.iter() {
            sqlx::query(
                "INSERT INTO member_roles (member_id, role_code, granted_utc) VALUES ($1, $2, $3)",
            )
            .bind(member.member_id)
            .bind(role.as_str())
            .bind(member.created_utc)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_member_by_id(&self, member_id: Uuid) -> Result<Option<Member>, StoreError> {
        let query = format!("{} WHERE m.member_id = $1 GROUP BY m.member_id", MEMBER_SELECT);
        sqlx::query_as::<_, MemberRow>(&query)
            .bind(member_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Member::try_from)
            .transpose()
    }

    async fn find_member_by_email(
        &self,
        email: &EmailAddress,
    ) -> Result<Option<Member>, StoreError> {
        let query = format!(
            "{} WHERE LOWER(m.email) = LOWER($1) GROUP BY m.member_id",
            MEMBER_SELECT
        );
        sqlx::query_as::<_, MemberRow>(&query)
            .bind(email.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(Member::try_from)
            .transpose()
    }

    async fn deactivate_member(
        &self,
        member_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE members
            SET member_state_code = 'deactivated', deactivated_utc = $2, updated_utc = $2
            WHERE member_id = $1 AND member_state_code = 'active'
            "#,
        )
        .bind(member_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 && self.find_member_by_id(member_id).await?.is_none() {
            return Err(StoreError::NotFound("member".to_string()));
        }
        Ok(result.rows_affected() == 1)
    }

    async fn remove_member_role(&self, member_id: Uuid, role: Role) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(Uuid,)> =
            sqlx::query_as("SELECT member_id FROM members WHERE member_id = $1 FOR UPDATE")
                .bind(member_id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Err(StoreError::NotFound("member".to_string()));
        }

        let removed = sqlx::query("DELETE FROM member_roles WHERE member_id = $1 AND role_code = $2")
            .bind(member_id)
            .bind(role.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected()
            == 1;

        let (remaining,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM member_roles WHERE member_id = $1")
                .bind(member_id)
                .fetch_one(&mut *tx)
                .await?;
        if remaining == 0 {
            sqlx::query(
                "INSERT INTO member_roles (member_id, role_code, granted_utc) VALUES ($1, $2, now())",
            )
            .bind(member_id)
            .bind(Role::Unverified.as_str())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE members SET updated_utc = now() WHERE member_id = $1")
            .bind(member_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(removed)
    }

    // ==================== Session Operations ====================

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, member_id, token_hash_text, created_utc, expiry_utc, revoked_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(session.session_id)
        .bind(session.member_id)
        .bind(&session.token_hash_text)
        .bind(session.created_utc)
        .bind(session.expiry_utc)
        .bind(session.revoked_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_session_by_hash(&self, token_hash: &str) -> Result<Option<Session>, StoreError> {
        Ok(
            sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE token_hash_text = $1")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn revoke_session(
        &self,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked_utc = $2 WHERE session_id = $1 AND revoked_utc IS NULL",
        )
        .bind(session_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_member_sessions(
        &self,
        member_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked_utc = $2 WHERE member_id = $1 AND revoked_utc IS NULL",
        )
        .bind(member_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ==================== Credential Operations ====================

    async fn insert_credential(&self, credential: &PasskeyCredential) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO passkey_credentials (credential_id, member_id, public_key, sign_counter, created_utc, last_used_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&credential.credential_id)
        .bind(credential.member_id)
        .bind(&credential.public_key)
        .bind(i64::from(credential.sign_counter))
        .bind(credential.created_utc)
        .bind(credential.last_used_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_credential(
        &self,
        credential_id: &str,
    ) -> Result<Option<PasskeyCredential>, StoreError> {
        sqlx::query_as::<_, CredentialRow>(
            "SELECT * FROM passkey_credentials WHERE credential_id = $1",
        )
        .bind(credential_id)
        .fetch_optional(&self.pool)
        .await?
        .map(PasskeyCredential::try_from)
        .transpose()
    }

    async fn list_credentials(&self, member_id: Uuid) -> Result<Vec<PasskeyCredential>, StoreError> {
        sqlx::query_as::<_, CredentialRow>(
            "SELECT * FROM passkey_credentials WHERE member_id = $1 ORDER BY created_utc",
        )
        .bind(member_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(PasskeyCredential::try_from)
        .collect()
    }

    async fn advance_sign_counter(
        &self,
        credential_id: &str,
        new_counter: u32,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE passkey_credentials
            SET sign_counter = $2, last_used_utc = $3
            WHERE credential_id = $1 AND sign_counter < $2
            "#,
        )
        .bind(credential_id)
        .bind(i64::from(new_counter))
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    // ==================== Verification Operations ====================

    async fn insert_verification(&self, record: &VerificationRecord) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO verification_records (record_id, member_id, target_role_code, status_code, origin_code,
                                              bypass, input, rejection_code, created_utc, updated_utc, finalized_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.record_id)
        .bind(record.member_id)
        .bind(record.target_role.as_str())
        .bind(record.status.as_str())
        .bind(record.origin.as_str())
        .bind(record.bypass)
        .bind(&record.input)
        .bind(record.rejection_reason.map(|r| r.as_str()))
        .bind(record.created_utc)
        .bind(record.updated_utc)
        .bind(record.finalized_utc)
        .execute(&mut *tx)
        .await?;

        for step in &record.steps {
            insert_step(&mut tx, record.record_id, step).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_verification(
        &self,
        record_id: Uuid,
    ) -> Result<Option<VerificationRecord>, StoreError> {
        let query = format!("{} WHERE record_id = $1", RECORD_SELECT);
        let row = sqlx::query_as::<_, RecordRow>(&query)
            .bind(record_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_active_verification(
        &self,
        member_id: Uuid,
    ) -> Result<Option<VerificationRecord>, StoreError> {
        let query = format!(
            "{} WHERE member_id = $1 AND status_code IN ('pending', 'in_progress')",
            RECORD_SELECT
        );
        let row = sqlx::query_as::<_, RecordRow>(&query)
            .bind(member_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn list_verifications(
        &self,
        member_id: Uuid,
    ) -> Result<Vec<VerificationRecord>, StoreError> {
        let query = format!(
            "{} WHERE member_id = $1 ORDER BY created_utc DESC",
            RECORD_SELECT
        );
        let rows = sqlx::query_as::<_, RecordRow>(&query)
            .bind(member_id)
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(self.hydrate(row).await?);
        }
        Ok(records)
    }

    async fn mark_in_progress(&self, record_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE verification_records
            SET status_code = 'in_progress', updated_utc = now()
            WHERE record_id = $1 AND status_code = 'pending'
            "#,
        )
        .bind(record_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn append_step(&self, record_id: Uuid, step: &StepResult) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let touched = sqlx::query(
            r#"
            UPDATE verification_records
            SET updated_utc = now()
            WHERE record_id = $1 AND status_code IN ('pending', 'in_progress')
            "#,
        )
        .bind(record_id)
        .execute(&mut *tx)
        .await?;
        if touched.rows_affected() == 0 {
            return Err(StoreError::Conflict("verification record is final".to_string()));
        }

        insert_step(&mut tx, record_id, step).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn reject_verification(
        &self,
        record_id: Uuid,
        reason: RejectionReason,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE verification_records
            SET status_code = 'rejected', rejection_code = $2, updated_utc = now(), finalized_utc = now()
            WHERE record_id = $1 AND status_code IN ('pending', 'in_progress')
            "#,
        )
        .bind(record_id)
        .bind(reason.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn commit_verification(&self, record_id: Uuid) -> Result<CommitOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(Uuid, String, String)> = sqlx::query_as(
            r#"
            SELECT member_id, target_role_code, status_code
            FROM verification_records
            WHERE record_id = $1
            FOR UPDATE
            "#,
        )
        .bind(record_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((member_id, role_code, status_code)) = row else {
            return Err(StoreError::NotFound("verification record".to_string()));
        };
        match VerificationStatus::parse(&status_code) {
            Some(VerificationStatus::Verified) => return Ok(CommitOutcome::AlreadyCommitted),
            Some(VerificationStatus::Rejected) => return Ok(CommitOutcome::Rejected),
            Some(_) => {}
            None => {
                return Err(StoreError::Backend(anyhow::anyhow!(
                    "verification record {} has invalid status {}",
                    record_id,
                    status_code
                )))
            }
        }

        let (total, failed): (i64, i64) = sqlx::query_as(
            r#"
            SELECT count(*), count(*) FILTER (WHERE NOT verified)
            FROM verification_steps
            WHERE record_id = $1
            "#,
        )
        .bind(record_id)
        .fetch_one(&mut *tx)
        .await?;
        if total == 0 || failed > 0 {
            return Ok(CommitOutcome::Unproven);
        }

        // Locks the member row so a concurrent deactivation cannot interleave
        let state: Option<(String,)> = sqlx::query_as(
            "SELECT member_state_code FROM members WHERE member_id = $1 FOR UPDATE",
        )
        .bind(member_id)
        .fetch_optional(&mut *tx)
        .await?;
        match state {
            None => return Err(StoreError::NotFound("member".to_string())),
            Some((code,)) if code != MemberState::Active.as_str() => {
                return Ok(CommitOutcome::MemberInactive)
            }
            Some(_) => {}
        }

        sqlx::query(
            r#"
            UPDATE verification_records
            SET status_code = 'verified', updated_utc = now(), finalized_utc = now()
            WHERE record_id = $1
            "#,
        )
        .bind(record_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO member_roles (member_id, role_code, granted_utc)
            VALUES ($1, $2, now())
            ON CONFLICT (member_id, role_code) DO NOTHING
            "#,
        )
        .bind(member_id)
        .bind(&role_code)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM member_roles WHERE member_id = $1 AND role_code = $2")
            .bind(member_id)
            .bind(Role::Unverified.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE members SET updated_utc = now() WHERE member_id = $1")
            .bind(member_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(CommitOutcome::Committed)
    }
}

async fn insert_step(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    record_id: Uuid,
    step: &StepResult,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO verification_steps (record_id, step_name, verified, evidence, issues, recorded_utc)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(record_id)
    .bind(&step.step)
    .bind(step.verified)
    .bind(&step.evidence)
    .bind(Json(&step.issues))
    .bind(step.recorded_utc)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ==================== Audit Event Operations ====================

#[async_trait]
impl AuditSink for Database {
    async fn append(&self, event: &AuditEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_events (event_id, actor_member_id, actor_label, action_code, success, reason_code, event_data, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.event_id)
        .bind(event.actor_member_id)
        .bind(&event.actor_label)
        .bind(event.action.as_str())
        .bind(event.success)
        .bind(&event.reason)
        .bind(&event.event_data)
        .bind(event.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
