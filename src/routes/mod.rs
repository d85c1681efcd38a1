pub mod health_check;
pub mod subscriptions;

mod response;

pub use response::ApiResponse;
