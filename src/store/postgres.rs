use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{ApprovalStore, StoreError, StoreResult, StoreTx};
use crate::models::approval::ApprovalRecord;
use crate::models::audit::AuditLogEntry;
use crate::models::request::{MaintenanceRequest, RequestStage};
use crate::models::workflow::{NewWorkflow, StepTemplate, WorkflowDefinition};

const WORKFLOW_COLUMNS: &str = "id, name, description, category, priority, is_active, archived, \
                                revision, created_at, updated_at";

const STEP_COLUMNS: &str = "workflow_id, revision, step_order, required_role, approver_name, \
                            approver_email, can_reject, timeout_hours, auto_approve_on_timeout";

const APPROVAL_COLUMNS: &str = "id, request_id, workflow_id, workflow_revision, step_order, \
                                approver_email, approver_name, token_hash, token_expires_at, \
                                status, approved_at, rejected_at, rejection_reason, ip_address, \
                                user_agent, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Load the current-revision steps for each definition.
    async fn attach_steps(
        &self,
        mut defs: Vec<WorkflowDefinition>,
    ) -> StoreResult<Vec<WorkflowDefinition>> {
        if defs.is_empty() {
            return Ok(defs);
        }
        let ids: Vec<Uuid> = defs.iter().map(|d| d.id).collect();
        let steps = sqlx::query_as::<_, StepTemplate>(&format!(
            "SELECT {STEP_COLUMNS} FROM approval_steps WHERE workflow_id = ANY($1) \
             ORDER BY workflow_id, revision, step_order"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        for def in defs.iter_mut() {
            def.steps = steps
                .iter()
                .filter(|s| s.workflow_id == def.id && s.revision == def.revision)
                .cloned()
                .collect();
        }
        Ok(defs)
    }

    async fn fetch_workflows(&self, filter: &str) -> StoreResult<Vec<WorkflowDefinition>> {
        let defs = sqlx::query_as::<_, WorkflowDefinition>(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM approval_workflows WHERE {filter} \
             ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        self.attach_steps(defs).await
    }
}

async fn insert_steps(
    tx: &mut Transaction<'static, Postgres>,
    steps: &[StepTemplate],
) -> StoreResult<()> {
    for s in steps {
        sqlx::query(&format!(
            "INSERT INTO approval_steps ({STEP_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(s.workflow_id)
        .bind(s.revision)
        .bind(s.step_order)
        .bind(&s.required_role)
        .bind(&s.approver_name)
        .bind(&s.approver_email)
        .bind(s.can_reject)
        .bind(s.timeout_hours)
        .bind(s.auto_approve_on_timeout)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Map unique-constraint violations to [`StoreError::Conflict`].
fn conflict_or(e: sqlx::Error, what: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StoreError::Conflict(what.to_string());
        }
    }
    StoreError::Database(e)
}

#[async_trait]
impl ApprovalStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn active_workflows(&self) -> StoreResult<Vec<WorkflowDefinition>> {
        self.fetch_workflows("is_active AND NOT archived").await
    }

    async fn list_workflows(&self) -> StoreResult<Vec<WorkflowDefinition>> {
        self.fetch_workflows("NOT archived").await
    }

    async fn get_workflow(&self, id: Uuid) -> StoreResult<Option<WorkflowDefinition>> {
        let def = sqlx::query_as::<_, WorkflowDefinition>(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM approval_workflows WHERE id = $1 AND NOT archived"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match def {
            Some(def) => Ok(self.attach_steps(vec![def]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn create_workflow(&self, wf: &NewWorkflow) -> StoreResult<WorkflowDefinition> {
        let mut tx = self.pool.begin().await?;
        let mut def = sqlx::query_as::<_, WorkflowDefinition>(&format!(
            r#"INSERT INTO approval_workflows (id, name, description, category, priority, is_active)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING {WORKFLOW_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(&wf.name)
        .bind(&wf.description)
        .bind(&wf.category)
        .bind(&wf.priority)
        .bind(wf.is_active)
        .fetch_one(&mut *tx)
        .await?;

        let steps = wf.step_templates(def.id, def.revision);
        insert_steps(&mut tx, &steps).await?;
        tx.commit().await?;

        def.steps = steps;
        Ok(def)
    }

    async fn update_workflow(
        &self,
        id: Uuid,
        wf: &NewWorkflow,
    ) -> StoreResult<Option<WorkflowDefinition>> {
        let mut tx = self.pool.begin().await?;
        let def = sqlx::query_as::<_, WorkflowDefinition>(&format!(
            r#"UPDATE approval_workflows
               SET name = $2, description = $3, category = $4, priority = $5, is_active = $6,
                   revision = revision + 1, updated_at = NOW()
               WHERE id = $1 AND NOT archived
               RETURNING {WORKFLOW_COLUMNS}"#
        ))
        .bind(id)
        .bind(&wf.name)
        .bind(&wf.description)
        .bind(&wf.category)
        .bind(&wf.priority)
        .bind(wf.is_active)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(mut def) = def else {
            return Ok(None);
        };
        let steps = wf.step_templates(def.id, def.revision);
        insert_steps(&mut tx, &steps).await?;
        tx.commit().await?;

        def.steps = steps;
        Ok(Some(def))
    }

    async fn replace_steps(
        &self,
        id: Uuid,
        expected_revision: i32,
        steps: Vec<StepTemplate>,
    ) -> StoreResult<Option<WorkflowDefinition>> {
        let mut tx = self.pool.begin().await?;
        let def = sqlx::query_as::<_, WorkflowDefinition>(&format!(
            r#"UPDATE approval_workflows SET revision = revision + 1, updated_at = NOW()
               WHERE id = $1 AND revision = $2 AND NOT archived
               RETURNING {WORKFLOW_COLUMNS}"#
        ))
        .bind(id)
        .bind(expected_revision)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(mut def) = def else {
            // tell a concurrent edit apart from a missing workflow
            let current = sqlx::query_scalar::<_, i32>(
                "SELECT revision FROM approval_workflows WHERE id = $1 AND NOT archived",
            )
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
            return match current {
                Some(rev) => Err(StoreError::Conflict(format!(
                    "workflow {} is at revision {}, not {}",
                    id, rev, expected_revision
                ))),
                None => Ok(None),
            };
        };
        let steps: Vec<StepTemplate> = steps
            .into_iter()
            .map(|s| StepTemplate {
                workflow_id: id,
                revision: def.revision,
                ..s
            })
            .collect();
        insert_steps(&mut tx, &steps).await?;
        tx.commit().await?;

        def.steps = steps;
        Ok(Some(def))
    }

    async fn archive_workflow(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE approval_workflows SET archived = TRUE, is_active = FALSE, updated_at = NOW() \
             WHERE id = $1 AND NOT archived",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_request(&self, id: Uuid) -> StoreResult<Option<MaintenanceRequest>> {
        let row = sqlx::query_as::<_, MaintenanceRequest>(
            r#"SELECT id, title, description, category, priority, workflow_id, workflow_revision,
                      stage, created_at, updated_at
               FROM maintenance_requests WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_approvals(&self, request_id: Uuid) -> StoreResult<Vec<ApprovalRecord>> {
        let rows = sqlx::query_as::<_, ApprovalRecord>(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM request_approvals WHERE request_id = $1 \
             ORDER BY step_order ASC"
        ))
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_pending_approvals(&self) -> StoreResult<Vec<ApprovalRecord>> {
        let rows = sqlx::query_as::<_, ApprovalRecord>(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM request_approvals WHERE status = 'pending' \
             ORDER BY created_at ASC, step_order ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_audit(&self, request_id: Uuid) -> StoreResult<Vec<AuditLogEntry>> {
        let rows = sqlx::query_as::<_, AuditLogEntry>(
            r#"SELECT id, request_id, approval_id, action, performed_by_email, performed_by_name,
                      previous_status, new_status, notes, ip_address, user_agent, metadata,
                      created_at
               FROM approval_audit_log WHERE request_id = $1
               ORDER BY created_at ASC"#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn insert_request(&mut self, request: &MaintenanceRequest) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO maintenance_requests
                   (id, title, description, category, priority, workflow_id, workflow_revision,
                    stage, status, workflow_stage, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"#,
        )
        .bind(request.id)
        .bind(&request.title)
        .bind(&request.description)
        .bind(&request.category)
        .bind(&request.priority)
        .bind(request.workflow_id)
        .bind(request.workflow_revision)
        .bind(request.stage)
        .bind(request.stage.status_label())
        .bind(request.stage.workflow_stage())
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| conflict_or(e, &format!("request {} was already submitted", request.id)))?;
        Ok(())
    }

    async fn insert_approvals(&mut self, records: &[ApprovalRecord]) -> StoreResult<()> {
        for r in records {
            sqlx::query(&format!(
                "INSERT INTO request_approvals ({APPROVAL_COLUMNS}) VALUES \
                 ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
            ))
            .bind(r.id)
            .bind(r.request_id)
            .bind(r.workflow_id)
            .bind(r.workflow_revision)
            .bind(r.step_order)
            .bind(&r.approver_email)
            .bind(&r.approver_name)
            .bind(&r.token_hash)
            .bind(r.token_expires_at)
            .bind(r.status)
            .bind(r.approved_at)
            .bind(r.rejected_at)
            .bind(&r.rejection_reason)
            .bind(&r.ip_address)
            .bind(&r.user_agent)
            .bind(r.created_at)
            .bind(r.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                conflict_or(
                    e,
                    &format!(
                        "approval for request {} step {} already exists",
                        r.request_id, r.step_order
                    ),
                )
            })?;
        }
        Ok(())
    }

    async fn lock_approval_by_token_hash(
        &mut self,
        token_hash: &str,
    ) -> StoreResult<Option<ApprovalRecord>> {
        let row = sqlx::query_as::<_, ApprovalRecord>(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM request_approvals WHERE token_hash = $1 FOR UPDATE"
        ))
        .bind(token_hash)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn update_pending_approval(&mut self, record: &ApprovalRecord) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"UPDATE request_approvals
               SET status = $2, approved_at = $3, rejected_at = $4, rejection_reason = $5,
                   ip_address = $6, user_agent = $7, updated_at = $8
               WHERE id = $1 AND status = 'pending'"#,
        )
        .bind(record.id)
        .bind(record.status)
        .bind(record.approved_at)
        .bind(record.rejected_at)
        .bind(&record.rejection_reason)
        .bind(&record.ip_address)
        .bind(&record.user_agent)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn lock_request(&mut self, request_id: Uuid) -> StoreResult<()> {
        sqlx::query("SELECT id FROM maintenance_requests WHERE id = $1 FOR UPDATE")
            .bind(request_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn approvals_for_request(
        &mut self,
        request_id: Uuid,
    ) -> StoreResult<Vec<ApprovalRecord>> {
        let rows = sqlx::query_as::<_, ApprovalRecord>(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM request_approvals WHERE request_id = $1"
        ))
        .bind(request_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn workflow_steps(
        &mut self,
        workflow_id: Uuid,
        revision: i32,
    ) -> StoreResult<Vec<StepTemplate>> {
        let rows = sqlx::query_as::<_, StepTemplate>(&format!(
            "SELECT {STEP_COLUMNS} FROM approval_steps WHERE workflow_id = $1 AND revision = $2 \
             ORDER BY step_order ASC"
        ))
        .bind(workflow_id)
        .bind(revision)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn append_audit(&mut self, entry: &AuditLogEntry) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO approval_audit_log (
                   id, request_id, approval_id, action, performed_by_email, performed_by_name,
                   previous_status, new_status, notes, ip_address, user_agent, metadata,
                   created_at
               )
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"#,
        )
        .bind(entry.id)
        .bind(entry.request_id)
        .bind(entry.approval_id)
        .bind(entry.action)
        .bind(&entry.performed_by_email)
        .bind(&entry.performed_by_name)
        .bind(entry.previous_status)
        .bind(entry.new_status)
        .bind(&entry.notes)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn set_request_stage(
        &mut self,
        request_id: Uuid,
        stage: RequestStage,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"UPDATE maintenance_requests
               SET stage = $2, status = $3, workflow_stage = $4, updated_at = NOW()
               WHERE id = $1"#,
        )
        .bind(request_id)
        .bind(stage)
        .bind(stage.status_label())
        .bind(stage.workflow_stage())
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Internal(format!(
                "request {} not found",
                request_id
            )));
        }
        Ok(())
    }

    async fn expire_overdue(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<ApprovalRecord>> {
        let rows = sqlx::query_as::<_, ApprovalRecord>(&format!(
            r#"UPDATE request_approvals SET status = 'expired', updated_at = $1
               WHERE status = 'pending' AND token_expires_at < $1
               RETURNING {APPROVAL_COLUMNS}"#
        ))
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
