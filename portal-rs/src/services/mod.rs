pub mod busy;
pub mod dashboard;
pub mod password_reset;
pub mod poll;
pub mod signup;
pub mod validation;
