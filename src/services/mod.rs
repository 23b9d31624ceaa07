pub mod email;
pub mod password_reset;
pub mod template;
pub mod token;

pub use email::{NotificationDispatcher, SmtpMailer};
pub use password_reset::PasswordResetService;
pub use template::TemplateProvider;
pub use token::ResetTokenIssuer;
