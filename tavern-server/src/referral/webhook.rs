//! Checkout evaluation for referral rewards

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use super::{ReferralResult, ReferralService};
use crate::db::{
    self,
    referrals::{ReferralReward, UsageOutcome, UsageRecord},
};
use crate::stripe::{
    CheckoutSession, NewCoupon, NewPromotionCode, METADATA_TYPE_REFERRAL,
    METADATA_TYPE_REFERRAL_REWARD,
};

/// What happened to a completed checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutResult {
    /// Already evaluated by an earlier delivery
    AlreadyProcessed,
    /// Total below the minimum qualifying purchase
    BelowMinimum,
    /// No referral promotion code applied
    NoReferralCode,
    /// Evaluated and tracked with this outcome
    Evaluated(UsageOutcome),
}

impl ReferralService {
    /// Full handling of a `checkout.session.completed` delivery
    pub async fn handle_checkout_completed(
        &self,
        session: &CheckoutSession,
        now: DateTime<Utc>,
    ) -> ReferralResult<CheckoutResult> {
        self.record_purchase(session, now).await?;
        self.process_checkout(session, now).await
    }

    /// Bookkeeping every purchase gets, referral or not: the customer link,
    /// the buyer's card fingerprint and redemption of reward codes
    async fn record_purchase(&self, session: &CheckoutSession, now: DateTime<Utc>) -> ReferralResult<()> {
        if let (Some(user_id), Some(customer)) = (&session.client_reference_id, &session.customer) {
            db::users::link_customer(&self.db, user_id, customer, now).await?;
        }

        if let (Some(customer), Some(fingerprint)) = (&session.customer, &session.card_fingerprint) {
            if let Some(buyer) = db::users::find_by_customer(&self.db, customer).await? {
                db::referrals::record_fingerprint(&self.db, &buyer.id, fingerprint, now).await?;
            }
        }

        for promotion_code_id in &session.promotion_codes {
            if db::referrals::mark_reward_redeemed(&self.db, promotion_code_id).await? {
                tracing::info!(
                    checkout = %session.id,
                    promotion_code = %promotion_code_id,
                    "Referral reward redeemed"
                );
            }
        }

        Ok(())
    }

    /// Decide whether a completed checkout earns its referrer a reward.
    ///
    /// A checkout is tracked at most once. Untracked no-ops (below minimum,
    /// no referral code) may be re-evaluated by a later delivery.
    pub async fn process_checkout(
        &self,
        session: &CheckoutSession,
        now: DateTime<Utc>,
    ) -> ReferralResult<CheckoutResult> {
        if db::referrals::is_tracked(&self.db, &session.id).await? {
            tracing::debug!(checkout = %session.id, "Checkout already processed");
            return Ok(CheckoutResult::AlreadyProcessed);
        }

        let amount = session.amount_total.unwrap_or(0);
        if amount < self.config.min_purchase_cents {
            tracing::debug!(
                checkout = %session.id,
                amount,
                minimum = self.config.min_purchase_cents,
                "Checkout below referral minimum"
            );
            return Ok(CheckoutResult::BelowMinimum);
        }

        let Some(promotion_code_id) = self.referral_promotion_code(session).await? else {
            return Ok(CheckoutResult::NoReferralCode);
        };

        let referrer = db::referrals::find_code_by_promotion_code(&self.db, &promotion_code_id)
            .await?
            .map(|code| code.user_id);
        let referred = match &session.customer {
            Some(customer) => db::users::find_by_customer(&self.db, customer)
                .await?
                .map(|user| user.id),
            None => None,
        };

        let outcome = match (&referrer, &referred) {
            (Some(referrer_id), Some(referred_id)) => {
                self.evaluate(session, referrer_id, referred_id, now).await?
            }
            _ => {
                tracing::warn!(
                    checkout = %session.id,
                    promotion_code = %promotion_code_id,
                    referrer_known = referrer.is_some(),
                    referred_known = referred.is_some(),
                    "Could not resolve referral participants"
                );
                UsageOutcome::UnknownUser
            }
        };

        let record = UsageRecord {
            stripe_checkout_session_id: session.id.clone(),
            referrer_user_id: referrer,
            referred_user_id: referred,
            outcome,
            processed_at: now,
        };
        if !db::referrals::track_usage(&self.db, &record).await? {
            tracing::warn!(checkout = %session.id, "Checkout tracked by a concurrent delivery");
        }

        tracing::info!(checkout = %session.id, outcome = %outcome, "Referral checkout evaluated");
        Ok(CheckoutResult::Evaluated(outcome))
    }

    /// First applied promotion code whose metadata marks it as a referral code
    async fn referral_promotion_code(&self, session: &CheckoutSession) -> ReferralResult<Option<String>> {
        for id in &session.promotion_codes {
            let promotion = self.gateway.promotion_code(id).await?;
            if promotion.metadata_type() == Some(METADATA_TYPE_REFERRAL) {
                return Ok(Some(promotion.id));
            }
        }
        Ok(None)
    }

    async fn evaluate(
        &self,
        session: &CheckoutSession,
        referrer_id: &str,
        referred_id: &str,
        now: DateTime<Utc>,
    ) -> ReferralResult<UsageOutcome> {
        if referrer_id == referred_id {
            return Ok(UsageOutcome::SelfReferral);
        }

        match &session.card_fingerprint {
            Some(fingerprint) => {
                if db::referrals::fingerprint_known(&self.db, referrer_id, fingerprint).await? {
                    tracing::warn!(
                        checkout = %session.id,
                        referrer = %referrer_id,
                        "Purchase paid with a card belonging to the referrer"
                    );
                    return Ok(UsageOutcome::CardReuse);
                }
            }
            None => tracing::warn!(
                checkout = %session.id,
                "No card fingerprint on referral checkout; card reuse not checked"
            ),
        }

        let (start, end) = self.current_month(now)?;
        let this_month = db::referrals::count_rewards_between(&self.db, referrer_id, start, end).await?;
        if this_month >= self.config.monthly_cap {
            tracing::info!(
                referrer = %referrer_id,
                this_month,
                cap = self.config.monthly_cap,
                "Referrer reached monthly reward cap"
            );
            return Ok(UsageOutcome::MonthlyCap);
        }

        self.issue_reward(session, referrer_id, referred_id, now).await?;
        Ok(UsageOutcome::RewardIssued)
    }

    async fn issue_reward(
        &self,
        session: &CheckoutSession,
        referrer_id: &str,
        referred_id: &str,
        now: DateTime<Utc>,
    ) -> ReferralResult<()> {
        let metadata = HashMap::from([
            ("type".to_string(), METADATA_TYPE_REFERRAL_REWARD.to_string()),
            ("referrer_user_id".to_string(), referrer_id.to_string()),
            ("checkout_session_id".to_string(), session.id.clone()),
        ]);

        let coupon_id = self
            .gateway
            .create_coupon(&NewCoupon {
                name: "Referral reward".to_string(),
                percent_off: self.config.reward_percent_off,
                metadata: metadata.clone(),
            })
            .await?;

        let referrer_customer = db::users::find_by_id(&self.db, referrer_id)
            .await?
            .and_then(|user| user.stripe_customer_id);
        if referrer_customer.is_none() {
            tracing::warn!(referrer = %referrer_id, "Referrer has no Stripe customer; reward code is unrestricted");
        }

        let promotion = self
            .gateway
            .create_promotion_code(&NewPromotionCode {
                coupon_id: coupon_id.clone(),
                code: None,
                customer: referrer_customer,
                max_redemptions: Some(1),
                metadata,
            })
            .await?;

        let reward = ReferralReward {
            id: Uuid::new_v4().to_string(),
            referrer_user_id: referrer_id.to_string(),
            referred_user_id: referred_id.to_string(),
            stripe_checkout_session_id: session.id.clone(),
            stripe_coupon_id: coupon_id,
            stripe_promotion_code_id: promotion.id,
            promotion_code: promotion.code,
            redeemed: false,
            created_at: now,
        };

        if db::referrals::insert_reward(&self.db, &reward).await? {
            tracing::info!(
                checkout = %session.id,
                referrer = %referrer_id,
                promotion_code = %reward.promotion_code,
                "Referral reward issued"
            );
        } else {
            tracing::warn!(
                checkout = %session.id,
                promotion_code = %reward.stripe_promotion_code_id,
                "Reward already recorded by a concurrent delivery; new promotion code unused"
            );
        }
        Ok(())
    }
}
