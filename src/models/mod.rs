pub mod account;
pub mod caller;
pub mod email_message;
pub mod reset_token;

pub use account::{Account, AccountProfile};
pub use caller::{AccessKeyType, CallerContext};
pub use email_message::EmailMessage;
pub use reset_token::ResetToken;
