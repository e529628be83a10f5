use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::engine::context::EngineContext;
use crate::engine::locks::StudentGuard;
use crate::error::{Processed, ProgressionError, ProgressionResult};
use crate::ledger::{
    last_change, ledger_total, AppendOutcome, AwardReceipt, CourseXp, IdempotencyKey,
    NewTransaction, PointsTransaction, ReplayReport, XpProjection, XpSource,
};

/// XpService — the only writer of the XP ledger
#[derive(Clone)]
pub struct XpService {
    ctx: Arc<EngineContext>,
}

impl XpService {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Append `tx` (guarded by `key` when given) while holding the
    /// student's lock. The amount is scaled by the student's category
    /// multiplier, and an untagged credit counts toward the most recent
    /// active enrollment.
    pub(crate) async fn credit(
        &self,
        guard: &StudentGuard,
        mut tx: NewTransaction,
        key: Option<&IdempotencyKey>,
    ) -> ProgressionResult<Processed<AwardReceipt>> {
        debug_assert_eq!(guard.student_id(), tx.student_id);
        if tx.amount <= 0 {
            return Err(ProgressionError::invalid(format!(
                "XP amount must be positive, got {}",
                tx.amount
            )));
        }

        let student = self.ctx.student(&tx.student_id).await?;
        tx.amount = self
            .ctx
            .config
            .xp_multipliers
            .apply(student.category, tx.source, tx.amount);
        if tx.enrollment_id.is_none() {
            tx.enrollment_id = self.current_enrollment(&tx.student_id).await?;
        }

        let levels = &self.ctx.config.levels;
        let before = self.ctx.store.ledger.projection(&tx.student_id).await?;

        match self.ctx.store.ledger.append(&tx, key).await? {
            AppendOutcome::Appended {
                transaction,
                new_total,
            } => {
                let receipt = AwardReceipt {
                    transaction_id: transaction.id,
                    amount: transaction.amount,
                    new_total,
                    level_before: levels.level(before.total_xp),
                    level_after: levels.level(new_total),
                };
                info!(
                    student = %tx.student_id,
                    amount = tx.amount,
                    source = tx.source.as_str(),
                    total = new_total,
                    tx_id = transaction.id,
                    "XP awarded"
                );
                if receipt.leveled_up() {
                    info!(
                        student = %tx.student_id,
                        from = receipt.level_before,
                        to = receipt.level_after,
                        "Level up"
                    );
                }
                Ok(Processed::Applied(receipt))
            }
            AppendOutcome::Duplicate { existing } => {
                debug!(
                    student = %tx.student_id,
                    key = existing.idempotency_key.as_deref().unwrap_or_default(),
                    "XP award already processed"
                );
                Ok(Processed::already(format!(
                    "already credited by transaction {}",
                    existing.id
                )))
            }
        }
    }

    pub async fn award(
        &self,
        student_id: &str,
        amount: i64,
        source: XpSource,
        reference_type: Option<&str>,
        reference_id: Option<&str>,
        reason: &str,
    ) -> ProgressionResult<AwardReceipt> {
        self.ctx.student(student_id).await?;
        let guard = self.ctx.locks.lock(student_id).await;
        let tx = NewTransaction {
            student_id: student_id.to_string(),
            enrollment_id: None,
            amount,
            source,
            reference_type: reference_type.map(str::to_string),
            reference_id: reference_id.map(str::to_string),
            reason: reason.to_string(),
            created_at: self.ctx.now(),
        };
        match self.credit(&guard, tx, None).await? {
            Processed::Applied(receipt) => Ok(receipt),
            // unkeyed appends never collide
            Processed::AlreadyProcessed { reason } => Err(ProgressionError::invalid(reason)),
        }
    }

    pub async fn award_once(
        &self,
        key: &IdempotencyKey,
        amount: i64,
        reason: &str,
    ) -> ProgressionResult<Processed<AwardReceipt>> {
        self.ctx.student(&key.student_id).await?;
        let guard = self.ctx.locks.lock(&key.student_id).await;
        let tx = keyed_transaction(key, None, amount, reason, self.ctx.now());
        self.credit(&guard, tx, Some(key)).await
    }

    /// Keyed credit for callers that already hold the lock. `enrollment_id`
    /// names the course the XP counts toward when the caller knows it.
    pub(crate) async fn credit_once(
        &self,
        guard: &StudentGuard,
        key: &IdempotencyKey,
        enrollment_id: Option<&str>,
        amount: i64,
        reason: &str,
    ) -> ProgressionResult<Processed<AwardReceipt>> {
        let tx = keyed_transaction(key, enrollment_id, amount, reason, self.ctx.now());
        self.credit(guard, tx, Some(key)).await
    }

    async fn current_enrollment(&self, student_id: &str) -> ProgressionResult<Option<String>> {
        Ok(self
            .ctx
            .store
            .courses
            .enrollments_for_student(student_id)
            .await?
            .into_iter()
            .filter(|e| e.is_active())
            .max_by_key(|e| e.enrolled_at)
            .map(|e| e.id))
    }

    pub async fn grant_bonus(
        &self,
        student_id: &str,
        amount: i64,
        reason: &str,
        granted_by: &str,
    ) -> ProgressionResult<AwardReceipt> {
        let (min, max) = (self.ctx.config.bonus_min_xp, self.ctx.config.bonus_max_xp);
        if amount < min || amount > max {
            return Err(ProgressionError::invalid(format!(
                "bonus must be between {} and {} XP, got {}",
                min, max, amount
            )));
        }
        self.award(
            student_id,
            amount,
            XpSource::Bonus,
            Some("instructor"),
            Some(granted_by),
            &format!("{} (granted by {})", reason, granted_by),
        )
        .await
    }

    pub async fn total_xp(&self, student_id: &str) -> ProgressionResult<i64> {
        self.ctx.student(student_id).await?;
        Ok(self.ctx.store.ledger.projection(student_id).await?.total_xp)
    }

    pub async fn level(&self, student_id: &str) -> ProgressionResult<u32> {
        let total = self.total_xp(student_id).await?;
        Ok(self.ctx.config.levels.level(total))
    }

    /// XP earned inside one enrollment, with its course level.
    pub async fn course_xp(&self, enrollment_id: &str) -> ProgressionResult<CourseXp> {
        let enrollment = self.ctx.enrollment(enrollment_id).await?;
        let entries = self
            .ctx
            .store
            .ledger
            .entries_for_student(&enrollment.student_id)
            .await?;
        Ok(CourseXp::from_entries(
            &enrollment.id,
            &enrollment.course_id,
            &entries,
            &self.ctx.config.levels,
        ))
    }

    pub async fn history(
        &self,
        student_id: &str,
        limit: usize,
        offset: usize,
    ) -> ProgressionResult<Vec<PointsTransaction>> {
        self.ctx.student(student_id).await?;
        Ok(self.ctx.store.ledger.history(student_id, limit, offset).await?)
    }

    /// Recompute the total from the ledger and repair the projection if it
    /// drifted.
    pub async fn replay(&self, student_id: &str) -> ProgressionResult<ReplayReport> {
        self.ctx.student(student_id).await?;
        let _guard = self.ctx.locks.lock(student_id).await;

        let entries = self.ctx.store.ledger.entries_for_student(student_id).await?;
        let ledger_sum = ledger_total(&entries);
        let projection = self.ctx.store.ledger.projection(student_id).await?;

        let repaired = projection.total_xp != ledger_sum;
        if repaired {
            warn!(
                student = %student_id,
                projected = projection.total_xp,
                ledger = ledger_sum,
                "XP projection drifted, repairing"
            );
            self.ctx
                .store
                .ledger
                .set_projection(&XpProjection {
                    student_id: student_id.to_string(),
                    total_xp: ledger_sum,
                    last_changed_at: last_change(&entries),
                })
                .await?;
        }

        Ok(ReplayReport {
            student_id: student_id.to_string(),
            entries: entries.len(),
            ledger_total: ledger_sum,
            projected_total: projection.total_xp,
            repaired,
        })
    }
}

fn keyed_transaction(
    key: &IdempotencyKey,
    enrollment_id: Option<&str>,
    amount: i64,
    reason: &str,
    now: chrono::DateTime<chrono::Utc>,
) -> NewTransaction {
    NewTransaction {
        student_id: key.student_id.clone(),
        enrollment_id: enrollment_id.map(str::to_string),
        amount,
        source: key.source,
        reference_type: Some(key.source.as_str().to_lowercase()),
        reference_id: Some(key.reference.clone()),
        reason: reason.to_string(),
        created_at: now,
    }
}
