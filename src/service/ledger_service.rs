//! Ledger service: orchestrates validation, conflict handling and cascades.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::requests::{CascadeRequest, EditEvent, NewEvent, SubmitOutcome};
use crate::config::LedgerConfig;
use crate::domain::conflict::{EDITED_REASON, REPLACED_REASON};
use crate::domain::impact::analyze;
use crate::domain::validator::{validate, validate_successor};
use crate::domain::{
    AuditId, CascadeWindow, ConflictResolution, DuplicateConflict, EventId, EventType,
    ImpactPolicy, ImpactReport, Kwh, MeterEvent, RecalculationAudit, TriggerType, UserId,
    UserLocks, ValidationResult,
};
use crate::error::LedgerError;
use crate::persistence::{ChangeSet, LedgerStore};

/// Orchestration layer for every ledger operation.
///
/// Owns the [`LedgerStore`] handle and the per-user [`UserLocks`]. Every
/// mutating pipeline follows the same shape: take the user's lock, read the
/// neighbouring events, run the pure domain checks, then write a single
/// [`ChangeSet`]. Reads never take the lock.
#[derive(Debug, Clone)]
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    locks: Arc<UserLocks>,
    undo_window: Duration,
    policy: ImpactPolicy,
}

/// Active events around a date, ignoring an event that is being moved.
#[derive(Debug)]
struct Neighbours {
    prior: Option<MeterEvent>,
    later: Vec<MeterEvent>,
}

/// An event change ready to be committed.
#[derive(Debug)]
struct Draft {
    changes: ChangeSet,
    event: MeterEvent,
    validation: ValidationResult,
}

/// A shift that must be confirmed and committed with its [`Draft`].
#[derive(Debug)]
struct PendingCascade {
    trigger_type: TriggerType,
    report: ImpactReport,
    confirmed: bool,
    idempotency_key: Option<String>,
}

impl LedgerService {
    /// Creates a new `LedgerService`.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, undo_window: Duration, policy: ImpactPolicy) -> Self {
        Self {
            store,
            locks: Arc::new(UserLocks::new()),
            undo_window,
            policy,
        }
    }

    /// Creates a service using the undo window and impact policy of `config`.
    #[must_use]
    pub fn from_config(store: Arc<dyn LedgerStore>, config: &LedgerConfig) -> Self {
        Self::new(store, config.undo_window(), config.impact_policy())
    }

    /// Returns a reference to the inner store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    // -- Chronology ------------------------------------------------------

    /// Latest active event strictly before `date`.
    ///
    /// If the dated lookup fails with a transient error, the most recent
    /// event is returned instead and the fallback is logged.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the fallback lookup fails as well, or
    /// if the dated lookup fails with a non-transient error.
    pub async fn last_event_before(
        &self,
        user_id: UserId,
        date: DateTime<Utc>,
    ) -> Result<Option<MeterEvent>, LedgerError> {
        match self.store.fetch_before(user_id, date).await {
            Ok(event) => Ok(event),
            Err(err) if err.is_transient() => {
                tracing::warn!(
                    %user_id,
                    %date,
                    error = %err,
                    "dated lookup failed, validating against the latest event"
                );
                self.store.latest(user_id).await
            }
            Err(err) => Err(err),
        }
    }

    /// Active events strictly after `date`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the store read fails.
    pub async fn events_after(
        &self,
        user_id: UserId,
        date: DateTime<Utc>,
    ) -> Result<Vec<MeterEvent>, LedgerError> {
        self.store.fetch_after(user_id, date).await
    }

    /// Active event at exactly `date`, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the store read fails.
    pub async fn check_duplicate(
        &self,
        user_id: UserId,
        date: DateTime<Utc>,
    ) -> Result<Option<MeterEvent>, LedgerError> {
        self.store.fetch_at(user_id, date).await
    }

    async fn neighbours(
        &self,
        user_id: UserId,
        date: DateTime<Utc>,
        moved: Option<&MeterEvent>,
    ) -> Result<Neighbours, LedgerError> {
        let prior = match (self.last_event_before(user_id, date).await?, moved) {
            (Some(prior), Some(moved)) if prior.id == moved.id => {
                self.last_event_before(user_id, moved.event_date).await?
            }
            (prior, _) => prior,
        };
        let later = self
            .store
            .fetch_after(user_id, date)
            .await?
            .into_iter()
            .filter(|e| moved.is_none_or(|m| m.id != e.id))
            .collect();
        Ok(Neighbours { prior, later })
    }

    // -- Validation and analysis -----------------------------------------

    /// Validates raw user input for an event at `date` without writing.
    ///
    /// For readings `raw` is the displayed balance; for top-ups it is the
    /// purchased amount.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the neighbouring events cannot be read.
    pub async fn validate_candidate(
        &self,
        user_id: UserId,
        event_type: EventType,
        date: DateTime<Utc>,
        raw: &str,
    ) -> Result<ValidationResult, LedgerError> {
        let amount = match raw.parse::<Kwh>() {
            Ok(amount) => amount,
            Err(e) => {
                return Ok(ValidationResult::InvalidValue {
                    reason: e.to_string(),
                });
            }
        };
        let neighbours = self.neighbours(user_id, date, None).await?;
        Ok(match place(user_id, event_type, date, amount, &neighbours) {
            Ok((_, validation)) | Err(validation) => validation,
        })
    }

    /// Previews adding `offset` to every active event after `backdate`.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the later events cannot be read.
    pub async fn analyze_backdate(
        &self,
        user_id: UserId,
        backdate: DateTime<Utc>,
        offset: Kwh,
    ) -> Result<ImpactReport, LedgerError> {
        self.analyze_window(user_id, CascadeWindow::open(backdate), offset)
            .await
    }

    /// Previews adding `offset` to the events inside `window`, checking the
    /// shifted chain against the first event after it.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the later events cannot be read.
    pub async fn analyze_window(
        &self,
        user_id: UserId,
        window: CascadeWindow,
        offset: Kwh,
    ) -> Result<ImpactReport, LedgerError> {
        let later = self.store.fetch_after(user_id, window.after).await?;
        let (affected, tail) = window.split(later);
        Ok(analyze(&affected, tail.as_ref(), offset, self.policy)?)
    }

    // -- Cascades ----------------------------------------------------------

    /// Shifts the listed events by the requested offset and records an
    /// audit. The caller is expected to have run the analyzer.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidRequest`] if no events are listed or an
    ///   event is listed twice.
    /// - [`LedgerError::InvalidValue`] if a shifted balance would be out of
    ///   range.
    /// - [`LedgerError::DuplicateRequest`] if the idempotency key was
    ///   already used for this user.
    /// - [`LedgerError::TransactionFailure`] if any listed event is not
    ///   active; nothing is written.
    pub async fn apply_cascade(
        &self,
        request: CascadeRequest,
    ) -> Result<RecalculationAudit, LedgerError> {
        let user_id = request.user_id;
        let _guard = self.locks.lock(user_id).await;

        if request.affected_event_ids.is_empty() {
            return Err(LedgerError::InvalidRequest(
                "a cascade needs at least one affected event".to_string(),
            ));
        }
        let mut seen = HashSet::with_capacity(request.affected_event_ids.len());
        if let Some(repeated) = request.affected_event_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(LedgerError::InvalidRequest(format!(
                "event {repeated} is listed more than once"
            )));
        }
        self.ensure_fresh_key(user_id, request.idempotency_key.as_deref())
            .await?;
        for event_id in &request.affected_event_ids {
            if let Some(event) = self.store.get_event(user_id, *event_id).await? {
                event.balance_kwh.try_add(request.offset_kwh)?;
            }
        }

        let audit = RecalculationAudit::new(
            user_id,
            request.triggering_event_id,
            request.trigger_type,
            request.offset_kwh,
            request.affected_event_ids,
            Utc::now(),
            self.undo_window,
        )
        .with_idempotency_key(request.idempotency_key);
        let changes = ChangeSet::new(user_id)
            .shift_balances(audit.affected_event_ids.clone(), audit.offset_kwh)
            .insert_audit(audit.clone());
        self.store.commit(changes).await?;

        tracing::info!(
            %user_id,
            audit_id = %audit.id,
            offset = %audit.offset_kwh,
            affected = audit.affected_event_ids.len(),
            "cascade applied"
        );
        Ok(audit)
    }

    /// Reverses a cascade while its undo window is open.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::AuditNotFound`] if the audit does not exist.
    /// - [`LedgerError::AlreadyUndone`] or [`LedgerError::UndoExpired`]
    ///   if the cascade can no longer be reversed.
    /// - [`LedgerError::UndoConflict`] if an affected event has been
    ///   voided or edited since.
    pub async fn undo_cascade(
        &self,
        user_id: UserId,
        audit_id: AuditId,
    ) -> Result<RecalculationAudit, LedgerError> {
        let _guard = self.locks.lock(user_id).await;

        let mut audit = self.get_audit(user_id, audit_id).await?;
        let now = Utc::now();
        audit.check_undoable(now)?;

        for event_id in &audit.affected_event_ids {
            let event = self
                .store
                .get_event(user_id, *event_id)
                .await?
                .filter(MeterEvent::is_active);
            let Some(event) = event else {
                tracing::warn!(%user_id, %audit_id, %event_id, "undo blocked by a changed event");
                return Err(LedgerError::UndoConflict(*audit_id.as_uuid()));
            };
            event.balance_kwh.try_add(audit.reverse_offset())?;
        }

        let changes = ChangeSet::new(user_id)
            .shift_balances(audit.affected_event_ids.clone(), audit.reverse_offset())
            .mark_audit_undone(audit.id, now);
        self.store.commit(changes).await?;
        audit.undone_at = Some(now);

        tracing::info!(%user_id, %audit_id, offset = %audit.offset_kwh, "cascade undone");
        Ok(audit)
    }

    async fn ensure_fresh_key(&self, user_id: UserId, key: Option<&str>) -> Result<(), LedgerError> {
        let Some(key) = key else {
            return Ok(());
        };
        match self.store.find_audit_by_key(user_id, key).await? {
            Some(existing) => Err(LedgerError::DuplicateRequest {
                audit_id: *existing.id.as_uuid(),
            }),
            None => Ok(()),
        }
    }

    // -- Submission --------------------------------------------------------

    /// Runs the full submission pipeline for a new event.
    ///
    /// Expected outcomes (blocked validation, duplicate date, pending
    /// confirmation) are returned as [`SubmitOutcome`] values.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidRequest`] if the fields do not match the
    ///   event type.
    /// - [`LedgerError::CascadeConflict`] or
    ///   [`LedgerError::CascadeNegative`] if shifting later events would
    ///   break the ledger.
    /// - [`LedgerError::DuplicateRequest`] for a reused idempotency key.
    /// - Store errors; nothing is written in that case.
    pub async fn submit(
        &self,
        user_id: UserId,
        new: NewEvent,
    ) -> Result<SubmitOutcome, LedgerError> {
        let _guard = self.locks.lock(user_id).await;

        let amount = amount_of(new.event_type, new.balance_kwh, new.purchase_kwh)?;
        check_cost(new.token_cost)?;

        if let Some(existing) = self.store.fetch_at(user_id, new.event_date).await? {
            return match new.resolution {
                None => {
                    tracing::info!(%user_id, existing = %existing.id, "duplicate date");
                    Ok(SubmitOutcome::DuplicateDate(DuplicateConflict::new(existing)))
                }
                Some(ConflictResolution::EditExisting) => {
                    self.edit_active(user_id, existing, new.into_edit()).await
                }
                Some(ConflictResolution::Replace) => {
                    self.replace(user_id, existing, new, amount).await
                }
            };
        }

        let neighbours = self.neighbours(user_id, new.event_date, None).await?;
        let (event, validation) =
            match place(user_id, new.event_type, new.event_date, amount, &neighbours) {
                Ok(placed) => placed,
                Err(rejected) => return Ok(SubmitOutcome::Rejected(rejected)),
            };
        let event = event.with_token_cost(new.token_cost).with_notes(new.notes);

        let cascade = if event.is_topup() {
            Some(PendingCascade {
                trigger_type: TriggerType::NewBackdateTopup,
                report: analyze(&neighbours.later, None, amount, self.policy)?,
                confirmed: new.confirm_cascade,
                idempotency_key: new.idempotency_key,
            })
        } else {
            None
        };
        let draft = Draft {
            changes: ChangeSet::new(user_id).insert_event(event.clone()),
            event,
            validation,
        };
        self.finish(draft, cascade).await
    }

    async fn replace(
        &self,
        user_id: UserId,
        existing: MeterEvent,
        new: NewEvent,
        amount: Kwh,
    ) -> Result<SubmitOutcome, LedgerError> {
        let neighbours = self
            .neighbours(user_id, existing.event_date, Some(&existing))
            .await?;
        let (event, validation) =
            match place(user_id, new.event_type, new.event_date, amount, &neighbours) {
                Ok(placed) => placed,
                Err(rejected) => return Ok(SubmitOutcome::Rejected(rejected)),
            };
        let event = event
            .with_token_cost(new.token_cost)
            .with_notes(new.notes)
            .superseding(existing.id);
        let changes = ChangeSet::new(user_id)
            .void_event(existing.id, REPLACED_REASON, Utc::now())
            .insert_event(event.clone())
            .link_superseded(existing.id, event.id);

        tracing::info!(%user_id, replaced = %existing.id, event_id = %event.id, "event replaced");
        self.finish(
            Draft {
                changes,
                event,
                validation,
            },
            None,
        )
        .await
    }

    // -- Edits -------------------------------------------------------------

    /// Edits an event by voiding it and inserting a replacement.
    ///
    /// Reading edits are revalidated against both neighbours. Changing a
    /// top-up's amount shifts every later event by the difference; moving a
    /// top-up shifts the events between its old and new dates.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::EventNotFound`] or [`LedgerError::EventVoided`].
    /// - [`LedgerError::InvalidRequest`] for fields that do not match the
    ///   event type, or a top-up edit changing both date and amount.
    /// - The cascade errors of [`Self::submit`].
    pub async fn edit(
        &self,
        user_id: UserId,
        event_id: EventId,
        edit: EditEvent,
    ) -> Result<SubmitOutcome, LedgerError> {
        let _guard = self.locks.lock(user_id).await;
        let existing = self.require_active(user_id, event_id).await?;
        self.edit_active(user_id, existing, edit).await
    }

    async fn edit_active(
        &self,
        user_id: UserId,
        existing: MeterEvent,
        edit: EditEvent,
    ) -> Result<SubmitOutcome, LedgerError> {
        check_cost(edit.token_cost)?;
        let date = edit.event_date.unwrap_or(existing.event_date);
        if date != existing.event_date
            && let Some(other) = self.store.fetch_at(user_id, date).await?
        {
            return Ok(SubmitOutcome::DuplicateDate(DuplicateConflict::new(other)));
        }

        match existing.event_type {
            EventType::Reading => self.edit_reading(user_id, existing, date, edit).await,
            EventType::Topup => self.edit_topup(user_id, existing, date, edit).await,
        }
    }

    async fn edit_reading(
        &self,
        user_id: UserId,
        existing: MeterEvent,
        date: DateTime<Utc>,
        edit: EditEvent,
    ) -> Result<SubmitOutcome, LedgerError> {
        if edit.purchase_kwh.is_some() {
            return Err(LedgerError::InvalidRequest(
                "a reading takes balance_kwh, not purchase_kwh".to_string(),
            ));
        }
        let amount = edit.balance_kwh.unwrap_or(existing.balance_kwh);
        let neighbours = self.neighbours(user_id, date, Some(&existing)).await?;
        let (event, validation) =
            match place(user_id, EventType::Reading, date, amount, &neighbours) {
                Ok(placed) => placed,
                Err(rejected) => return Ok(SubmitOutcome::Rejected(rejected)),
            };
        self.finish(superseding_draft(&existing, event, validation, &edit), None)
            .await
    }

    async fn edit_topup(
        &self,
        user_id: UserId,
        existing: MeterEvent,
        date: DateTime<Utc>,
        edit: EditEvent,
    ) -> Result<SubmitOutcome, LedgerError> {
        if edit.balance_kwh.is_some() {
            return Err(LedgerError::InvalidRequest(
                "a top-up balance is derived from purchase_kwh".to_string(),
            ));
        }
        let old_purchase = existing.purchase_kwh.ok_or_else(|| {
            LedgerError::Internal(format!("top-up {} has no purchase amount", existing.id))
        })?;
        let purchase = edit.purchase_kwh.unwrap_or(old_purchase);
        if let Some(rejected) = purchase_rejection(purchase) {
            return Ok(SubmitOutcome::Rejected(rejected));
        }

        let moved = date != existing.event_date;
        if moved && purchase != old_purchase {
            return Err(LedgerError::InvalidRequest(
                "change the date and the amount of a top-up in separate edits".to_string(),
            ));
        }
        if moved {
            return self.move_topup(user_id, existing, date, purchase, edit).await;
        }

        let before = existing.balance_before_purchase()?;
        let event = match MeterEvent::topup(user_id, date, before, purchase) {
            Ok(event) => event,
            Err(e) => return Ok(SubmitOutcome::Rejected(e.into())),
        };
        let validation = validate(event.balance_kwh, Some(before), EventType::Topup);
        if validation.is_blocking() {
            return Ok(SubmitOutcome::Rejected(validation));
        }

        let offset = purchase.try_sub(old_purchase)?;
        let cascade = if offset.is_zero() {
            None
        } else {
            let later = self.store.fetch_after(user_id, existing.event_date).await?;
            Some(PendingCascade {
                trigger_type: TriggerType::EditTopup,
                report: analyze(&later, None, offset, self.policy)?,
                confirmed: edit.confirm_cascade,
                idempotency_key: edit.idempotency_key.clone(),
            })
        };
        self.finish(superseding_draft(&existing, event, validation, &edit), cascade)
            .await
    }

    async fn move_topup(
        &self,
        user_id: UserId,
        existing: MeterEvent,
        date: DateTime<Utc>,
        purchase: Kwh,
        edit: EditEvent,
    ) -> Result<SubmitOutcome, LedgerError> {
        let earlier = date < existing.event_date;
        let (window, offset) = if earlier {
            (CascadeWindow::between(date, existing.event_date), purchase)
        } else {
            (CascadeWindow::between(existing.event_date, date), -purchase)
        };
        let window = window.excluding(existing.id);

        let later = self.store.fetch_after(user_id, window.after).await?;
        let (affected, tail) = window.split(later);
        // Moving later, the top-up itself sits between the shifted events
        // and the tail.
        let tail = if earlier { tail } else { None };
        let report = analyze(&affected, tail.as_ref(), offset, self.policy)?;

        let neighbours = self.neighbours(user_id, date, Some(&existing)).await?;
        let prior_balance = match neighbours.prior.as_ref() {
            Some(p) if affected.iter().any(|a| a.id == p.id) => {
                Some(p.balance_kwh.try_add(offset)?)
            }
            Some(p) => Some(p.balance_kwh),
            None => None,
        };
        let event = match MeterEvent::topup(
            user_id,
            date,
            prior_balance.unwrap_or(Kwh::ZERO),
            purchase,
        ) {
            Ok(event) => event,
            Err(e) => return Ok(SubmitOutcome::Rejected(e.into())),
        };
        let validation = validate(event.balance_kwh, prior_balance, EventType::Topup);
        if validation.is_blocking() {
            return Ok(SubmitOutcome::Rejected(validation));
        }

        let cascade = PendingCascade {
            trigger_type: TriggerType::BackdateTopup,
            report,
            confirmed: edit.confirm_cascade,
            idempotency_key: edit.idempotency_key.clone(),
        };
        self.finish(
            superseding_draft(&existing, event, validation, &edit),
            Some(cascade),
        )
        .await
    }

    // -- Commit ------------------------------------------------------------

    async fn finish(
        &self,
        draft: Draft,
        cascade: Option<PendingCascade>,
    ) -> Result<SubmitOutcome, LedgerError> {
        let Draft {
            mut changes,
            event,
            validation,
        } = draft;
        let user_id = changes.user_id;

        let mut audit = None;
        if let Some(pending) = cascade.filter(|c| !c.report.is_empty()) {
            if let Err(err) = pending.report.ensure_unblocked() {
                tracing::info!(%user_id, event_id = %event.id, error = %err, "cascade blocked");
                return Err(err);
            }
            if !pending.confirmed {
                return Ok(SubmitOutcome::NeedsConfirmation(pending.report));
            }
            self.ensure_fresh_key(user_id, pending.idempotency_key.as_deref())
                .await?;
            let record = RecalculationAudit::new(
                user_id,
                event.id,
                pending.trigger_type,
                pending.report.offset_kwh,
                pending.report.affected_ids(),
                Utc::now(),
                self.undo_window,
            )
            .with_idempotency_key(pending.idempotency_key);
            changes = changes
                .shift_balances(record.affected_event_ids.clone(), record.offset_kwh)
                .insert_audit(record.clone());
            audit = Some(record);
        }

        self.store.commit(changes).await?;

        tracing::info!(
            %user_id,
            event_id = %event.id,
            event_type = %event.event_type,
            balance = %event.balance_kwh,
            "event recorded"
        );
        if let Some(record) = &audit {
            tracing::info!(
                %user_id,
                audit_id = %record.id,
                trigger = %record.trigger_type,
                offset = %record.offset_kwh,
                affected = record.affected_event_ids.len(),
                "cascade applied"
            );
        }
        Ok(SubmitOutcome::Recorded {
            event,
            validation,
            audit,
        })
    }

    // -- Void and queries ----------------------------------------------------

    /// Voids an event. Later balances are left untouched.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidRequest`] if `reason` is blank.
    /// - [`LedgerError::EventNotFound`] or [`LedgerError::EventVoided`].
    pub async fn void(
        &self,
        user_id: UserId,
        event_id: EventId,
        reason: &str,
    ) -> Result<MeterEvent, LedgerError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LedgerError::InvalidRequest(
                "a void reason is required".to_string(),
            ));
        }
        let _guard = self.locks.lock(user_id).await;
        let mut event = self.require_active(user_id, event_id).await?;
        let now = Utc::now();
        self.store
            .commit(ChangeSet::new(user_id).void_event(event_id, reason, now))
            .await?;
        event.void(reason, now)?;

        tracing::info!(%user_id, %event_id, reason, "event voided");
        Ok(event)
    }

    /// Most recent active event, which carries the current balance.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the store read fails.
    pub async fn current_balance(&self, user_id: UserId) -> Result<Option<MeterEvent>, LedgerError> {
        self.store.latest(user_id).await
    }

    /// Events of a user ordered by date.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the store read fails.
    pub async fn history(
        &self,
        user_id: UserId,
        include_voided: bool,
    ) -> Result<Vec<MeterEvent>, LedgerError> {
        self.store.list_events(user_id, include_voided).await
    }

    /// Event by id, active or voided.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::EventNotFound`] if the user has no such event.
    pub async fn get_event(
        &self,
        user_id: UserId,
        event_id: EventId,
    ) -> Result<MeterEvent, LedgerError> {
        self.store
            .get_event(user_id, event_id)
            .await?
            .ok_or_else(|| LedgerError::EventNotFound(*event_id.as_uuid()))
    }

    /// Recalculation audits of a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the store read fails.
    pub async fn list_audits(
        &self,
        user_id: UserId,
    ) -> Result<Vec<RecalculationAudit>, LedgerError> {
        self.store.list_audits(user_id).await
    }

    /// Recalculation audit by id.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::AuditNotFound`] if the user has no such audit.
    pub async fn get_audit(
        &self,
        user_id: UserId,
        audit_id: AuditId,
    ) -> Result<RecalculationAudit, LedgerError> {
        self.store
            .get_audit(user_id, audit_id)
            .await?
            .ok_or_else(|| LedgerError::AuditNotFound(*audit_id.as_uuid()))
    }

    async fn require_active(
        &self,
        user_id: UserId,
        event_id: EventId,
    ) -> Result<MeterEvent, LedgerError> {
        let event = self.get_event(user_id, event_id).await?;
        if !event.is_active() {
            return Err(LedgerError::EventVoided(*event_id.as_uuid()));
        }
        Ok(event)
    }
}

/// The amount a submission carries: the balance of a reading or the
/// purchase of a top-up.
fn amount_of(
    event_type: EventType,
    balance: Option<Kwh>,
    purchase: Option<Kwh>,
) -> Result<Kwh, LedgerError> {
    match (event_type, balance, purchase) {
        (EventType::Reading, Some(balance), None) => Ok(balance),
        (EventType::Topup, None, Some(purchase)) => Ok(purchase),
        (EventType::Reading, _, _) => Err(LedgerError::InvalidRequest(
            "a reading takes balance_kwh only".to_string(),
        )),
        (EventType::Topup, _, _) => Err(LedgerError::InvalidRequest(
            "a top-up takes purchase_kwh only".to_string(),
        )),
    }
}

fn check_cost(token_cost: Option<rust_decimal::Decimal>) -> Result<(), LedgerError> {
    match token_cost {
        Some(cost) if cost.is_sign_negative() && !cost.is_zero() => Err(
            LedgerError::InvalidValue(format!("token cost must not be negative: {cost}")),
        ),
        _ => Ok(()),
    }
}

fn purchase_rejection(purchase: Kwh) -> Option<ValidationResult> {
    (purchase <= Kwh::ZERO).then(|| ValidationResult::InvalidValue {
        reason: format!("purchase must be positive: {purchase}"),
    })
}

/// Builds the event to store at `date` and validates it against its
/// neighbours. Returns the blocking result if it may not be stored.
fn place(
    user_id: UserId,
    event_type: EventType,
    date: DateTime<Utc>,
    amount: Kwh,
    neighbours: &Neighbours,
) -> Result<(MeterEvent, ValidationResult), ValidationResult> {
    let prior = neighbours.prior.as_ref().map(|p| p.balance_kwh);
    match event_type {
        EventType::Reading => {
            let validation = validate(amount, prior, EventType::Reading);
            if validation.is_blocking() {
                return Err(validation);
            }
            let successor = validate_successor(amount, neighbours.later.first());
            if successor.is_blocking() {
                return Err(successor);
            }
            Ok((MeterEvent::reading(user_id, date, amount), validation))
        }
        EventType::Topup => {
            if let Some(rejected) = purchase_rejection(amount) {
                return Err(rejected);
            }
            let event = MeterEvent::topup(user_id, date, prior.unwrap_or(Kwh::ZERO), amount)
                .map_err(ValidationResult::from)?;
            let validation = validate(event.balance_kwh, prior, EventType::Topup);
            if validation.is_blocking() {
                return Err(validation);
            }
            Ok((event, validation))
        }
    }
}

fn superseding_draft(
    existing: &MeterEvent,
    event: MeterEvent,
    validation: ValidationResult,
    edit: &EditEvent,
) -> Draft {
    let event = event
        .with_token_cost(edit.token_cost.or(existing.token_cost))
        .with_notes(edit.notes.clone().or_else(|| existing.notes.clone()))
        .superseding(existing.id);
    let changes = ChangeSet::new(event.user_id)
        .void_event(existing.id, EDITED_REASON, Utc::now())
        .insert_event(event.clone())
        .link_superseded(existing.id, event.id);
    Draft {
        changes,
        event,
        validation,
    }
}
