use uuid::Uuid;

use super::model::DeliveryStatus;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeliveryError {
    #[error("Delivery for order {0} not found")]
    NotFound(Uuid),

    #[error("Delivery is already {0:?}")]
    Closed(DeliveryStatus),

    #[error("Delivery is already bound to driver {0}")]
    DriverAlreadyBound(Uuid),
}
