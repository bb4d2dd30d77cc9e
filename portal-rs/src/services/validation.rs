/// Minimum password length accepted when resetting a password.
pub const RESET_MIN_PASSWORD_LEN: usize = 6;

/// Minimum password length accepted when signing up from an invitation.
pub const SIGNUP_MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PasswordError {
    #[error("Password must be at least {0} characters")]
    TooShort(usize),

    #[error("Passwords do not match")]
    Mismatch,
}

/// Local checks run before any remote call is made.
pub fn validate_new_password(
    password: &str,
    confirm: &str,
    min_len: usize,
) -> Result<(), PasswordError> {
    if password.chars().count() < min_len {
        return Err(PasswordError::TooShort(min_len));
    }
    if password != confirm {
        return Err(PasswordError::Mismatch);
    }
    Ok(())
}
