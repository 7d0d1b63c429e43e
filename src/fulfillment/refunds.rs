use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::order::{OrderAction, OrderAggregate};
use crate::domain::principal::Principal;
use super::errors::EngineError;
use super::{forbidden, FulfillmentEngine};

// ============================================================================
// Refund Workflow
// ============================================================================
//
// none → pending → processed | rejected
//
// Approval cancels the order in the same commit, so voucher reversal rides
// on the ordinary cancellation effects and happens at most once.
//
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "decision", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundDecision {
    Approve {
        /// Defaults to the order total.
        #[serde(default)]
        amount: Option<Decimal>,
        #[serde(default)]
        note: Option<String>,
    },
    Reject {
        #[serde(default)]
        note: Option<String>,
    },
}

impl FulfillmentEngine {
    pub async fn request_refund(
        &self,
        principal: Principal,
        order_id: Uuid,
        reason: String,
    ) -> Result<OrderAggregate, EngineError> {
        let order = self.load_order(order_id).await?;
        if order.is_deleted {
            return Err(EngineError::not_found("order", order_id));
        }
        if !principal.is_customer(order.customer_id) {
            return Err(forbidden(principal, "request a refund for this order"));
        }

        let order = self
            .run(order_id, principal, OrderAction::RequestRefund { reason }, "request_refund")
            .await?;
        self.metrics.record_refund("requested");
        Ok(order)
    }

    pub async fn process_refund(
        &self,
        principal: Principal,
        order_id: Uuid,
        decision: RefundDecision,
    ) -> Result<OrderAggregate, EngineError> {
        if !principal.is_operator() {
            return Err(forbidden(principal, "review refunds"));
        }

        let (outcome, action) = match decision {
            RefundDecision::Approve { amount, note } => ("processed", OrderAction::ApproveRefund { amount, note }),
            RefundDecision::Reject { note } => ("rejected", OrderAction::RejectRefund { note }),
        };

        let order = self.run(order_id, principal, action, "process_refund").await?;
        self.metrics.record_refund(outcome);

        tracing::info!(
            order_id = %order_id,
            outcome = outcome,
            amount = ?order.refund.amount,
            reviewer = %principal,
            "💸 Refund decided"
        );

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::domain::order::{CancelOrigin, OrderStatus, RefundStatus};
    use crate::domain::subscription::PlanType;
    use crate::fulfillment::testkit::world;
    use crate::fulfillment::ErrorKind;

    #[tokio::test]
    async fn test_approval_cancels_and_returns_voucher_once() {
        let w = world().await;
        let sub = w.subscription(PlanType::LunchAndDinner, 5).await;
        let order = w.engine.place_order(w.customer, w.dinner_request(vec![w.addon], true)).await.unwrap();
        w.engine.transition_status(w.staff, order.id, "accepted", None).await.unwrap();

        w.engine.request_refund(w.customer, order.id, "changed plans".into()).await.unwrap();
        let approved = w
            .engine
            .process_refund(w.admin, order.id, RefundDecision::Approve { amount: None, note: None })
            .await
            .unwrap();

        assert_eq!(approved.status, OrderStatus::Cancelled);
        assert_eq!(approved.closure.as_ref().unwrap().cancel_origin, Some(CancelOrigin::RefundApproval));
        assert_eq!(approved.refund.status, RefundStatus::Processed);
        assert_eq!(approved.refund.amount, Some(Decimal::from(40)));
        assert_eq!(w.used_vouchers(sub.id).await, 0);

        let again = w
            .engine
            .process_refund(w.admin, order.id, RefundDecision::Approve { amount: None, note: None })
            .await
            .unwrap_err();
        assert_eq!(again.kind(), ErrorKind::BadRequest);
        assert_eq!(w.used_vouchers(sub.id).await, 0);
    }

    #[tokio::test]
    async fn test_approval_on_cancelled_order_does_not_reverse_twice() {
        let w = world().await;
        let sub = w.subscription(PlanType::DinnerOnly, 2).await;
        let order = w.engine.place_order(w.customer, w.dinner_request(vec![], true)).await.unwrap();

        w.engine.cancel_order(w.customer, order.id, None).await.unwrap();
        assert_eq!(w.used_vouchers(sub.id).await, 0);

        // Spend the second voucher elsewhere so a double credit would show.
        let mut request = w.dinner_request(vec![], true);
        request.scheduled_date = w.today.succ_opt().unwrap();
        w.engine.place_order(w.customer, request).await.unwrap();
        assert_eq!(w.used_vouchers(sub.id).await, 1);

        w.engine.request_refund(w.customer, order.id, "never arrived".into()).await.unwrap();
        let approved = w
            .engine
            .process_refund(w.staff, order.id, RefundDecision::Approve { amount: Some(Decimal::ZERO), note: None })
            .await
            .unwrap();

        assert_eq!(approved.refund.status, RefundStatus::Processed);
        assert_eq!(w.used_vouchers(sub.id).await, 1);
    }

    #[tokio::test]
    async fn test_rejection_leaves_order_and_vouchers() {
        let w = world().await;
        let sub = w.subscription(PlanType::LunchAndDinner, 3).await;
        let order = w.engine.place_order(w.customer, w.dinner_request(vec![], true)).await.unwrap();

        w.engine.request_refund(w.customer, order.id, "cold food".into()).await.unwrap();
        let rejected = w
            .engine
            .process_refund(w.staff, order.id, RefundDecision::Reject { note: Some("policy".into()) })
            .await
            .unwrap();

        assert_eq!(rejected.status, OrderStatus::Placed);
        assert_eq!(rejected.refund.status, RefundStatus::Rejected);
        assert_eq!(w.used_vouchers(sub.id).await, 1);
    }

    #[tokio::test]
    async fn test_refund_guards() {
        let w = world().await;
        let order = w.engine.place_order(w.customer, w.dinner_request(vec![], false)).await.unwrap();

        let err = w.engine.request_refund(w.customer, order.id, "   ".into()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let err = w
            .engine
            .process_refund(w.staff, order.id, RefundDecision::Reject { note: None })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        w.engine.request_refund(w.customer, order.id, "late".into()).await.unwrap();
        let err = w.engine.request_refund(w.customer, order.id, "again".into()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let err = w
            .engine
            .process_refund(w.staff, order.id, RefundDecision::Approve { amount: Some(Decimal::from(999)), note: None })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let err = w
            .engine
            .process_refund(w.customer, order.id, RefundDecision::Reject { note: None })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn test_delivered_order_not_refundable() {
        let w = world().await;
        let order = w.engine.place_order(w.customer, w.dinner_request(vec![], false)).await.unwrap();
        for target in ["accepted", "preparing", "out_for_delivery", "delivered"] {
            w.engine.transition_status(w.staff, order.id, target, None).await.unwrap();
        }

        let err = w.engine.request_refund(w.customer, order.id, "bad".into()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_decision_payload_shape() {
        let approve: RefundDecision =
            serde_json::from_str(r#"{"decision":"APPROVE","amount":"12.50"}"#).unwrap();
        assert!(matches!(approve, RefundDecision::Approve { amount: Some(a), .. } if a == Decimal::new(1250, 2)));

        let reject: RefundDecision = serde_json::from_str(r#"{"decision":"REJECT"}"#).unwrap();
        assert!(matches!(reject, RefundDecision::Reject { note: None }));
    }
}
