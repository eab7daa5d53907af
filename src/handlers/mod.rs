pub mod admin;
pub mod checkout;
pub mod webhooks;
