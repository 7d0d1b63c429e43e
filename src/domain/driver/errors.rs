use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DriverError {
    #[error("Driver not found: {0}")]
    NotFound(Uuid),

    #[error("Driver {0} is deactivated")]
    Inactive(Uuid),

    #[error("Driver {0} is offline")]
    Offline(Uuid),

    #[error("Driver {driver_id} is busy with order {order_id}")]
    Busy { driver_id: Uuid, order_id: Uuid },

    #[error("No available driver")]
    NoneAvailable,
}
