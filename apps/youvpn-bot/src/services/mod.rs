pub mod expiry_service;
pub mod notification_service;
pub mod pay_service;
