pub mod booking_lifecycle;
pub mod dispute_resolution;
pub mod fees;
pub mod notification;
pub mod payment_flow;
