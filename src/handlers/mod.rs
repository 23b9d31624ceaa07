pub mod caller;
pub mod health;
pub mod password_reset;

pub use health::health_check;
pub use password_reset::{forgot_password, test_forgot_password};
