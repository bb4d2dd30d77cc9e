pub mod health;
pub mod password_reset;
pub mod signup;
pub mod uploads;
