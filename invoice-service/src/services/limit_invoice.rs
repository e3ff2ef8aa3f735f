//! Credit limits: how much unpaid debt a counterpart may owe a team.

use crate::models::{
    DeterminedLimit, InvoiceLimitConfiguration, LimitInvoiceItem, LimitType, SetLimitInvoice,
    Team, TeamInvoiceStatus, TeamLimitInvoice,
};
use crate::services::cache::Cache;
use crate::services::error::LedgerError;
use crate::services::metrics::LIMIT_CACHE_TOTAL;
use crate::store::LimitStore;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

const CACHE_PREFIX: &str = "invoice_service:limit_invoice";

pub fn limit_invoice_cache_key(team_id: i64, for_team_id: i64) -> String {
    format!("{}-{}-{}", CACHE_PREFIX, team_id, for_team_id)
}

/// Resolve the effective limit for `for_team_id` and decide whether it may
/// take on more debt. A TEAM row for the counterpart beats the DEFAULT row;
/// with neither, the threshold is 0 and nothing is restricted.
pub fn evaluate_limit(
    team_id: i64,
    for_team_id: i64,
    unpaid_amount: Decimal,
    configs: &[InvoiceLimitConfiguration],
) -> TeamLimitInvoice {
    let effective = configs
        .iter()
        .find(|c| c.limit_type == LimitType::Team && c.for_team_id == Some(for_team_id))
        .or_else(|| configs.iter().find(|c| c.limit_type == LimitType::Default));

    let threshold = effective.map(|c| c.threshold).unwrap_or(Decimal::ZERO);

    TeamLimitInvoice {
        team_id,
        for_team_id,
        unpaid_amount,
        threshold,
        limit_type: effective.map(|c| c.limit_type),
        can_create_order: threshold.is_zero() || unpaid_amount < threshold,
    }
}

#[derive(Clone)]
pub struct LimitInvoiceService {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl LimitInvoiceService {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    #[instrument(skip(self, store))]
    pub async fn get_limit_invoice<S: LimitStore>(
        &self,
        store: &mut S,
        team_id: i64,
        for_team_id: i64,
    ) -> Result<TeamLimitInvoice, LedgerError> {
        if team_id == 0 {
            return Err(LedgerError::Validation("team_id is required".to_string()));
        }

        let key = limit_invoice_cache_key(team_id, for_team_id);
        if let Some(cached) = self.cache.get(&key).await? {
            LIMIT_CACHE_TOTAL.with_label_values(&["hit"]).inc();
            debug!(key = %key, "Limit cache hit");
            return Ok(serde_json::from_str(&cached)?);
        }
        LIMIT_CACHE_TOTAL.with_label_values(&["miss"]).inc();

        let unpaid = store.unpaid_amount(for_team_id, team_id).await?;
        let configs = store.applicable_limits(team_id, for_team_id).await?;
        let result = evaluate_limit(team_id, for_team_id, unpaid, &configs);

        self.cache
            .put(&key, &serde_json::to_string(&result)?, self.ttl)
            .await?;

        Ok(result)
    }

    /// Upsert the DEFAULT row (no counterpart) or the TEAM row for the counterpart.
    #[instrument(skip(self, store))]
    pub async fn set_limit_invoice<S: LimitStore>(
        &self,
        store: &mut S,
        payload: &SetLimitInvoice,
    ) -> Result<InvoiceLimitConfiguration, LedgerError> {
        if payload.team_id == 0 {
            return Err(LedgerError::Validation("team_id is required".to_string()));
        }
        if payload.threshold.is_sign_negative() && !payload.threshold.is_zero() {
            return Err(LedgerError::Validation(format!(
                "threshold {} must not be negative",
                payload.threshold
            )));
        }

        let for_team_id = payload.for_team_id.filter(|id| *id != 0);

        if store.get_team(payload.team_id).await?.is_none() {
            return Err(LedgerError::NotFound(format!("team {}", payload.team_id)));
        }
        if let Some(id) = for_team_id {
            if store.get_team(id).await?.is_none() {
                return Err(LedgerError::NotFound(format!("team {}", id)));
            }
        }

        let limit_type = if for_team_id.is_some() {
            LimitType::Team
        } else {
            LimitType::Default
        };

        let mut config = store
            .find_limit(payload.team_id, limit_type, for_team_id)
            .await?
            .unwrap_or(InvoiceLimitConfiguration {
                id: 0,
                team_id: payload.team_id,
                limit_type,
                for_team_id,
                threshold: Decimal::ZERO,
            });
        config.threshold = payload.threshold;

        let saved = store.save_limit(&config).await?;
        info!(
            limit_id = saved.id,
            limit_type = %saved.limit_type,
            threshold = %saved.threshold,
            "Limit invoice saved"
        );

        Ok(saved)
    }

    #[instrument(skip(self, store))]
    pub async fn limit_invoice_delete<S: LimitStore>(
        &self,
        store: &mut S,
        team_id: i64,
        for_team_id: Option<i64>,
    ) -> Result<u64, LedgerError> {
        if team_id == 0 {
            return Err(LedgerError::Validation("team_id is required".to_string()));
        }

        let deleted = store
            .delete_limits(team_id, for_team_id.filter(|id| *id != 0))
            .await?;
        info!(deleted, "Limit invoice deleted");

        Ok(deleted)
    }

    #[instrument(skip(self, store))]
    pub async fn limit_invoice_list<S: LimitStore>(
        &self,
        store: &mut S,
        team_id: i64,
    ) -> Result<Vec<LimitInvoiceItem>, LedgerError> {
        let configs = store.list_limits(team_id).await?;

        let mut ids: Vec<i64> = configs
            .iter()
            .flat_map(|c| std::iter::once(c.team_id).chain(c.for_team_id))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        let teams = team_map(store.teams_by_ids(&ids).await?);

        Ok(configs
            .into_iter()
            .map(|config| LimitInvoiceItem {
                team: teams.get(&config.team_id).cloned(),
                for_team: config.for_team_id.and_then(|id| teams.get(&id).cloned()),
                config,
            })
            .collect())
    }

    /// Limits other teams set on `team_id`, with what `team_id` currently owes each.
    #[instrument(skip(self, store, from_team_ids), fields(count = from_team_ids.len()))]
    pub async fn determined_limit_invoice<S: LimitStore>(
        &self,
        store: &mut S,
        team_id: i64,
        from_team_ids: &[i64],
    ) -> Result<Vec<DeterminedLimit>, LedgerError> {
        if from_team_ids.is_empty() {
            return Ok(Vec::new());
        }

        let configs = store.limits_for_counterpart(team_id, from_team_ids).await?;
        if configs.is_empty() {
            return Ok(Vec::new());
        }

        let creditor_ids: Vec<i64> = configs.iter().map(|c| c.team_id).collect();
        let mut team_ids = creditor_ids.clone();
        team_ids.push(team_id);
        let teams = team_map(store.teams_by_ids(&team_ids).await?);
        let statuses: HashMap<i64, TeamInvoiceStatus> = store
            .team_invoice_status(team_id, &creditor_ids)
            .await?
            .into_iter()
            .map(|s| (s.to_team_id, s))
            .collect();

        Ok(configs
            .into_iter()
            .map(|config| DeterminedLimit {
                team: teams.get(&config.team_id).cloned(),
                for_team: config.for_team_id.and_then(|id| teams.get(&id).cloned()),
                invoice_status: statuses
                    .get(&config.team_id)
                    .cloned()
                    .unwrap_or_else(|| TeamInvoiceStatus::empty(config.team_id)),
                config,
            })
            .collect())
    }
}

fn team_map(teams: Vec<Team>) -> HashMap<i64, Team> {
    teams.into_iter().map(|t| (t.id, t)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(id: i64, limit_type: LimitType, for_team_id: Option<i64>, threshold: i64) -> InvoiceLimitConfiguration {
        InvoiceLimitConfiguration {
            id,
            team_id: 1,
            limit_type,
            for_team_id,
            threshold: Decimal::from(threshold),
        }
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(
            limit_invoice_cache_key(3, 8),
            "invoice_service:limit_invoice-3-8"
        );
    }

    #[test]
    fn test_no_limit_is_unrestricted() {
        let result = evaluate_limit(1, 2, Decimal::from(1_000_000), &[]);
        assert_eq!(result.threshold, Decimal::ZERO);
        assert_eq!(result.limit_type, None);
        assert!(result.can_create_order);
    }

    #[test]
    fn test_team_limit_overrides_default() {
        let configs = vec![
            config(1, LimitType::Default, None, 100),
            config(2, LimitType::Team, Some(2), 500),
        ];
        let result = evaluate_limit(1, 2, Decimal::from(300), &configs);
        assert_eq!(result.limit_type, Some(LimitType::Team));
        assert_eq!(result.threshold, Decimal::from(500));
        assert!(result.can_create_order);

        let other = evaluate_limit(1, 9, Decimal::from(300), &configs);
        assert_eq!(other.limit_type, Some(LimitType::Default));
        assert!(!other.can_create_order);
    }

    #[test]
    fn test_balance_at_threshold_is_blocked() {
        let configs = vec![config(1, LimitType::Default, None, 100)];
        assert!(!evaluate_limit(1, 2, Decimal::from(100), &configs).can_create_order);
        assert!(evaluate_limit(1, 2, Decimal::from(99), &configs).can_create_order);
    }
}
