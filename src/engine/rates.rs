use rust_decimal::Decimal;
use tokio::sync::OwnedRwLockWriteGuard;
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError, Entity, FieldError, now_ms};

fn validate_draft(draft: &RuleDraft) -> Result<DateSpan, EngineError> {
    if draft.season_name.len() > MAX_SEASON_NAME_LEN {
        return Err(EngineError::LimitExceeded("season name too long"));
    }
    if draft.price_per_night > Decimal::from(MAX_PRICE) {
        return Err(EngineError::LimitExceeded("price per night too large"));
    }
    let mut errors = Vec::new();
    if draft.end <= draft.start {
        errors.push(FieldError::new("EndDate", "End date must be after start date."));
    }
    if draft.price_per_night <= Decimal::ZERO {
        errors.push(FieldError::new(
            "PricePerNight",
            "Price per night must be greater than 0.",
        ));
    }
    if !errors.is_empty() {
        metrics::counter!(observability::RULE_VALIDATION_FAILURES_TOTAL).increment(1);
        return Err(EngineError::Validation(errors));
    }
    Ok(DateSpan::new(draft.start, draft.end))
}

/// An active rule, other than `exclude`, whose validity overlaps `span` on
/// intersecting day types.
pub(crate) fn find_rule_overlap<'a>(
    rules: &'a [RateRule],
    span: &DateSpan,
    day_type: DayType,
    exclude: Option<Ulid>,
) -> Option<&'a RateRule> {
    rules.iter().find(|r| {
        r.is_active
            && Some(r.id) != exclude
            && r.day_type.intersects(day_type)
            && r.span.overlaps(span)
    })
}

fn check_no_overlap(
    cs: &CategoryState,
    span: &DateSpan,
    day_type: DayType,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_rule_overlap(&cs.rules, span, day_type, exclude) {
        Some(existing) => {
            debug!(category = %cs.id, existing = %existing.id, "rate rule overlap");
            metrics::counter!(observability::RULE_VALIDATION_FAILURES_TOTAL).increment(1);
            Err(EngineError::invalid(
                "DateRange",
                "Price period overlaps with existing active price for this room type.",
            ))
        }
        None => Ok(()),
    }
}

impl Engine {
    pub async fn add_rule(&self, category_id: Ulid, draft: RuleDraft) -> Result<Ulid, EngineError> {
        let span = validate_draft(&draft)?;
        let _gate = self.gate.read().await;
        let mut cs = self.write_category(category_id).await?;
        if cs.rules.len() >= MAX_RULES_PER_CATEGORY {
            return Err(EngineError::LimitExceeded("too many rate rules in category"));
        }
        if draft.is_active {
            check_no_overlap(&cs, &span, draft.day_type, None)?;
        }

        let now = now_ms();
        let rule = RateRule {
            id: Ulid::new(),
            category_id,
            season_name: draft.season_name,
            price_per_night: draft.price_per_night,
            span,
            day_type: draft.day_type,
            is_active: draft.is_active,
            priority: draft.priority,
            created_at: now,
            updated_at: now,
        };
        let id = rule.id;
        self.commit_category(&mut cs, Event::RuleAdded { rule }).await?;
        Ok(id)
    }

    pub async fn edit_rule(&self, rule_id: Ulid, draft: RuleDraft) -> Result<(), EngineError> {
        let span = validate_draft(&draft)?;
        let _gate = self.gate.read().await;
        let mut cs = self.rule_category_write(rule_id).await?;
        if draft.is_active {
            check_no_overlap(&cs, &span, draft.day_type, Some(rule_id))?;
        }
        let Some(current) = cs.rule(rule_id) else {
            return Err(EngineError::NotFound(Entity::RateRule, rule_id));
        };
        let rule = RateRule {
            season_name: draft.season_name,
            price_per_night: draft.price_per_night,
            span,
            day_type: draft.day_type,
            is_active: draft.is_active,
            priority: draft.priority,
            updated_at: now_ms(),
            ..current.clone()
        };
        self.commit_category(&mut cs, Event::RuleUpdated { rule }).await
    }

    /// Flip `is_active` and return the new state. Reactivation is refused
    /// when another active rule now covers the same period.
    pub async fn toggle_rule(&self, rule_id: Ulid) -> Result<bool, EngineError> {
        let _gate = self.gate.read().await;
        let mut cs = self.rule_category_write(rule_id).await?;
        let Some(current) = cs.rule(rule_id).cloned() else {
            return Err(EngineError::NotFound(Entity::RateRule, rule_id));
        };
        let activating = !current.is_active;
        if activating {
            check_no_overlap(&cs, &current.span, current.day_type, Some(rule_id))?;
        }
        let rule = RateRule {
            is_active: activating,
            updated_at: now_ms(),
            ..current
        };
        self.commit_category(&mut cs, Event::RuleUpdated { rule }).await?;
        Ok(activating)
    }

    pub async fn delete_rule(&self, rule_id: Ulid) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let mut cs = self.rule_category_write(rule_id).await?;
        let category_id = cs.id;
        self.commit_category(&mut cs, Event::RuleRemoved { id: rule_id, category_id })
            .await
    }

    async fn rule_category_write(
        &self,
        rule_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<CategoryState>, EngineError> {
        let category_id = self
            .get_category_for_rule(&rule_id)
            .ok_or(EngineError::NotFound(Entity::RateRule, rule_id))?;
        let guard = self.write_category(category_id).await?;
        if guard.rule(rule_id).is_none() {
            return Err(EngineError::NotFound(Entity::RateRule, rule_id));
        }
        Ok(guard)
    }
}
