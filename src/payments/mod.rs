pub mod error;
pub mod gateway;
pub mod pesapal;

pub use error::PesapalError;
pub use gateway::{
    GatewayTransactionStatus, OrderRequest, PaymentGateway, RegisteredIpn, SubmittedOrder,
};
pub use pesapal::PesapalClient;
