use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::meal::{MealType, PackagingType};
use crate::event_sourcing::core::Aggregate;
use super::commands::{OrderAction, OrderCommand};
use super::errors::OrderError;
use super::events::*;
use super::value_objects::{
    CancelOrigin, Closure, LineItem, Lifecycle, OrderSlot, OrderStatus, RefundRecord, RefundStatus,
};

// ============================================================================
// Order Aggregate - Domain Logic
// ============================================================================
//
// State is an explicit OrderStatus plus the lifecycle timestamps. Both are
// only ever changed by applying events that handle_command admitted, so the
// combination "cancelled and delivered" cannot be reached.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAggregate {
    // Identity
    pub id: Uuid,
    pub version: i64,
    pub customer_id: Uuid,
    pub meal_type: MealType,
    pub scheduled_date: NaiveDate,

    // Line items (snapshotted prices)
    pub packaging: PackagingType,
    pub menu_item: LineItem,
    pub addons: Vec<LineItem>,
    pub notes: Option<String>,

    // Economics
    pub total_amount: Decimal,
    pub subscription_used: Option<Uuid>,
    pub vouchers_consumed: u32,

    // Lifecycle
    pub status: OrderStatus,
    pub lifecycle: Lifecycle,
    pub closure: Option<Closure>,

    // Dispatch
    pub driver_id: Option<Uuid>,
    pub driver_assigned_at: Option<DateTime<Utc>>,

    pub refund: RefundRecord,

    // Soft delete
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,

    pub updated_at: DateTime<Utc>,
}

impl OrderAggregate {
    /// Validate a placement command for a stream that does not exist yet.
    pub fn decide_placement(command: &OrderCommand) -> Result<Vec<OrderEvent>, OrderError> {
        let OrderAction::Place(place) = &command.action else {
            return Err(OrderError::NotInitialized);
        };

        if place.total_amount < Decimal::ZERO {
            return Err(OrderError::NegativeTotal(place.total_amount));
        }

        if place.vouchers_consumed > 0 && place.subscription_used.is_none() {
            return Err(OrderError::VouchersWithoutSubscription);
        }

        Ok(vec![OrderEvent::Placed(OrderPlaced {
            order_id: place.order_id,
            customer_id: place.customer_id,
            meal_type: place.meal_type,
            scheduled_date: place.scheduled_date,
            packaging: place.packaging,
            menu_item: place.menu_item.clone(),
            addons: place.addons.clone(),
            total_amount: place.total_amount.round_dp(2),
            subscription_used: place.subscription_used,
            vouchers_consumed: place.vouchers_consumed,
            notes: place.notes.clone(),
            placed_at: command.issued_at,
        })])
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn slot(&self) -> OrderSlot {
        OrderSlot {
            customer_id: self.customer_id,
            meal_type: self.meal_type,
            scheduled_date: self.scheduled_date,
            menu_item_id: self.menu_item.item_id,
        }
    }

    fn check_advance(&self, target: OrderStatus) -> Result<(), OrderError> {
        match target {
            OrderStatus::Accepted
            | OrderStatus::Preparing
            | OrderStatus::OutForDelivery
            | OrderStatus::Delivered => {}
            other => return Err(OrderError::InvalidTarget(other)),
        }

        if self.lifecycle.timestamp_of(target).is_some() {
            return Err(OrderError::AlreadyInStatus(target));
        }

        if self.status.is_terminal() {
            return Err(OrderError::TerminalState(self.status));
        }

        let required = target.predecessor().ok_or(OrderError::InvalidTarget(target))?;
        if self.status != required {
            return Err(OrderError::MissingPredecessor {
                target,
                required,
                current: self.status,
            });
        }

        Ok(())
    }

    fn check_cancel(&self, origin: CancelOrigin) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Cancelled => Err(OrderError::AlreadyInStatus(OrderStatus::Cancelled)),
            OrderStatus::Delivered | OrderStatus::Failed => Err(OrderError::TerminalState(self.status)),
            OrderStatus::OutForDelivery if origin == CancelOrigin::Customer => {
                Err(OrderError::OutForDelivery)
            }
            _ => Ok(()),
        }
    }

    fn check_failure(&self) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Failed => Err(OrderError::AlreadyInStatus(OrderStatus::Failed)),
            OrderStatus::Delivered | OrderStatus::Cancelled => Err(OrderError::TerminalState(self.status)),
            _ => Ok(()),
        }
    }

    fn check_refund_pending(&self) -> Result<(), OrderError> {
        if self.refund.status != RefundStatus::Pending {
            return Err(OrderError::RefundNotPending(self.refund.status));
        }
        Ok(())
    }
}

// ============================================================================
// Aggregate Trait Implementation
// ============================================================================

impl Aggregate for OrderAggregate {
    type Event = OrderEvent;
    type Command = OrderCommand;
    type Error = OrderError;

    fn apply_first_event(event: &Self::Event) -> Result<Self, Self::Error> {
        match event {
            OrderEvent::Placed(e) => Ok(Self {
                id: e.order_id,
                version: 0,
                customer_id: e.customer_id,
                meal_type: e.meal_type,
                scheduled_date: e.scheduled_date,
                packaging: e.packaging,
                menu_item: e.menu_item.clone(),
                addons: e.addons.clone(),
                notes: e.notes.clone(),
                total_amount: e.total_amount,
                subscription_used: e.subscription_used,
                vouchers_consumed: e.vouchers_consumed,
                status: OrderStatus::Placed,
                lifecycle: Lifecycle::new(e.placed_at),
                closure: None,
                driver_id: None,
                driver_assigned_at: None,
                refund: RefundRecord::default(),
                is_deleted: false,
                deleted_at: None,
                updated_at: e.placed_at,
            }),
            _ => Err(OrderError::NotInitialized),
        }
    }

    fn apply_event(&mut self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            OrderEvent::Placed(_) => return Err(OrderError::AlreadyExists),
            OrderEvent::Accepted(e) => {
                self.status = OrderStatus::Accepted;
                self.lifecycle.stamp(OrderStatus::Accepted, e.accepted_at);
                self.updated_at = e.accepted_at;
            }
            OrderEvent::PreparationStarted(e) => {
                self.status = OrderStatus::Preparing;
                self.lifecycle.stamp(OrderStatus::Preparing, e.preparing_at);
                self.updated_at = e.preparing_at;
            }
            OrderEvent::OutForDelivery(e) => {
                self.status = OrderStatus::OutForDelivery;
                self.lifecycle.stamp(OrderStatus::OutForDelivery, e.out_for_delivery_at);
                self.updated_at = e.out_for_delivery_at;
            }
            OrderEvent::Delivered(e) => {
                self.status = OrderStatus::Delivered;
                self.lifecycle.stamp(OrderStatus::Delivered, e.delivered_at);
                self.updated_at = e.delivered_at;
            }
            OrderEvent::Cancelled(e) => {
                self.status = OrderStatus::Cancelled;
                self.lifecycle.stamp(OrderStatus::Cancelled, e.cancelled_at);
                self.closure = Some(Closure {
                    by: e.cancelled_by,
                    reason: e.reason.clone(),
                    cancel_origin: Some(e.origin),
                    failure_origin: None,
                });
                self.updated_at = e.cancelled_at;
            }
            OrderEvent::Failed(e) => {
                self.status = OrderStatus::Failed;
                self.lifecycle.stamp(OrderStatus::Failed, e.failed_at);
                self.closure = Some(Closure {
                    by: e.failed_by,
                    reason: e.reason.clone(),
                    cancel_origin: None,
                    failure_origin: Some(e.origin),
                });
                self.updated_at = e.failed_at;
            }
            OrderEvent::DriverAssigned(e) => {
                self.driver_id = Some(e.driver_id);
                self.driver_assigned_at = Some(e.assigned_at);
                self.updated_at = e.assigned_at;
            }
            OrderEvent::RefundRequested(e) => {
                self.refund.status = RefundStatus::Pending;
                self.refund.reason = Some(e.reason.clone());
                self.refund.requested_at = Some(e.requested_at);
                self.updated_at = e.requested_at;
            }
            OrderEvent::RefundProcessed(e) => {
                self.refund.status = RefundStatus::Processed;
                self.refund.amount = Some(e.amount);
                self.refund.processed_at = Some(e.processed_at);
                self.refund.processed_by = Some(e.processed_by);
                self.refund.review_note = e.note.clone();
                self.updated_at = e.processed_at;
            }
            OrderEvent::RefundRejected(e) => {
                self.refund.status = RefundStatus::Rejected;
                self.refund.processed_at = Some(e.processed_at);
                self.refund.processed_by = Some(e.processed_by);
                self.refund.review_note = e.note.clone();
                self.updated_at = e.processed_at;
            }
            OrderEvent::SoftDeleted(e) => {
                self.is_deleted = true;
                self.deleted_at = Some(e.deleted_at);
                self.updated_at = e.deleted_at;
            }
        }

        Ok(())
    }

    fn handle_command(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if self.is_deleted {
            return Err(OrderError::Deleted);
        }

        let by = command.issued_by.id;
        // Lifecycle timestamps never run backwards, even if the clock does.
        let at = command.issued_at.max(self.lifecycle.latest());

        match &command.action {
            OrderAction::Place(_) => Err(OrderError::AlreadyExists),

            OrderAction::Advance { target } => {
                self.check_advance(*target)?;

                let event = match target {
                    OrderStatus::Accepted => OrderEvent::Accepted(OrderAccepted {
                        accepted_at: at,
                        accepted_by: by,
                    }),
                    OrderStatus::Preparing => OrderEvent::PreparationStarted(PreparationStarted {
                        preparing_at: at,
                        started_by: by,
                    }),
                    OrderStatus::OutForDelivery => OrderEvent::OutForDelivery(OrderOutForDelivery {
                        out_for_delivery_at: at,
                        dispatched_by: by,
                    }),
                    OrderStatus::Delivered => OrderEvent::Delivered(OrderDelivered {
                        delivered_at: at,
                        confirmed_by: by,
                    }),
                    other => return Err(OrderError::InvalidTarget(*other)),
                };

                Ok(vec![event])
            }

            OrderAction::Fail { origin, reason } => {
                self.check_failure()?;

                Ok(vec![OrderEvent::Failed(OrderFailed {
                    failed_at: at,
                    failed_by: by,
                    origin: *origin,
                    reason: reason.clone(),
                })])
            }

            OrderAction::Cancel { origin, reason } => {
                self.check_cancel(*origin)?;

                Ok(vec![OrderEvent::Cancelled(OrderCancelled {
                    cancelled_at: at,
                    cancelled_by: by,
                    origin: *origin,
                    reason: reason.clone(),
                })])
            }

            OrderAction::AssignDriver { driver_id } => {
                if self.is_terminal() {
                    return Err(OrderError::TerminalState(self.status));
                }
                if let Some(existing) = self.driver_id {
                    return Err(OrderError::DriverAlreadyAssigned(existing));
                }

                Ok(vec![OrderEvent::DriverAssigned(DriverAssigned {
                    driver_id: *driver_id,
                    assigned_at: command.issued_at,
                    assigned_by: by,
                })])
            }

            OrderAction::RequestRefund { reason } => {
                let reason = reason.trim();
                if reason.is_empty() {
                    return Err(OrderError::EmptyRefundReason);
                }
                if self.status == OrderStatus::Delivered {
                    return Err(OrderError::DeliveredNotRefundable);
                }
                if self.refund.status != RefundStatus::None {
                    return Err(OrderError::RefundAlreadyRequested(self.refund.status));
                }

                Ok(vec![OrderEvent::RefundRequested(RefundRequested {
                    reason: reason.to_string(),
                    requested_at: command.issued_at,
                    requested_by: by,
                })])
            }

            OrderAction::ApproveRefund { amount, note } => {
                self.check_refund_pending()?;
                if self.status == OrderStatus::Delivered {
                    return Err(OrderError::DeliveredNotRefundable);
                }

                let amount = amount.unwrap_or(self.total_amount).round_dp(2);
                if amount < Decimal::ZERO || amount > self.total_amount {
                    return Err(OrderError::InvalidRefundAmount {
                        amount,
                        total: self.total_amount,
                    });
                }

                let mut events = Vec::with_capacity(2);
                if !self.is_terminal() {
                    events.push(OrderEvent::Cancelled(OrderCancelled {
                        cancelled_at: at,
                        cancelled_by: by,
                        origin: CancelOrigin::RefundApproval,
                        reason: self.refund.reason.clone(),
                    }));
                }
                events.push(OrderEvent::RefundProcessed(RefundProcessed {
                    amount,
                    processed_at: at,
                    processed_by: by,
                    note: note.clone(),
                }));

                Ok(events)
            }

            OrderAction::RejectRefund { note } => {
                self.check_refund_pending()?;

                Ok(vec![OrderEvent::RefundRejected(RefundRejected {
                    processed_at: command.issued_at,
                    processed_by: by,
                    note: note.clone(),
                })])
            }

            OrderAction::SoftDelete => {
                if !self.is_terminal() {
                    return Err(OrderError::NotTerminal(self.status));
                }

                Ok(vec![OrderEvent::SoftDeleted(OrderSoftDeleted {
                    deleted_at: command.issued_at,
                    deleted_by: by,
                })])
            }
        }
    }

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
