use std::fmt;

use crate::{utils, Secret};

/// Allows you to pass a particular user name and password to the run-time library for the purpose of authentication
///
/// # MSDN
///
/// * [SEC_WINNT_AUTH_IDENTITY_W structure](https://docs.microsoft.com/en-us/windows/win32/api/sspi/ns-sspi-sec_winnt_auth_identity_w)
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct AuthIdentity {
    pub username: String,
    pub password: Secret<String>,
    pub domain: Option<String>,
}

/// The UTF-16LE encoded form of [`AuthIdentity`] that the packages operate on.
#[derive(Clone, Eq, PartialEq, Default)]
pub struct AuthIdentityBuffers {
    pub user: Vec<u8>,
    pub domain: Vec<u8>,
    pub password: Secret<Vec<u8>>,
}

impl AuthIdentityBuffers {
    pub fn new(user: Vec<u8>, domain: Vec<u8>, password: Vec<u8>) -> Self {
        Self {
            user,
            domain,
            password: password.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_empty()
    }
}

impl fmt::Debug for AuthIdentityBuffers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthIdentityBuffers {{ user: 0x")?;
        self.user.iter().try_for_each(|byte| write!(f, "{byte:02X}"))?;
        write!(f, ", domain: 0x")?;
        self.domain.iter().try_for_each(|byte| write!(f, "{byte:02X}"))?;
        write!(f, ", password: {:?} }}", self.password)
    }
}

impl From<AuthIdentity> for AuthIdentityBuffers {
    fn from(credentials: AuthIdentity) -> Self {
        Self::from(&credentials)
    }
}

impl From<&AuthIdentity> for AuthIdentityBuffers {
    fn from(credentials: &AuthIdentity) -> Self {
        Self {
            user: utils::string_to_utf16(&credentials.username),
            domain: credentials
                .domain
                .as_deref()
                .map(utils::string_to_utf16)
                .unwrap_or_default(),
            password: utils::string_to_utf16(credentials.password.as_ref()).into(),
        }
    }
}

impl TryFrom<&AuthIdentityBuffers> for AuthIdentity {
    type Error = crate::Error;

    fn try_from(credentials_buffers: &AuthIdentityBuffers) -> Result<Self, Self::Error> {
        Ok(Self {
            username: utils::bytes_to_utf16_string(&credentials_buffers.user)?,
            password: utils::bytes_to_utf16_string(credentials_buffers.password.as_ref())?.into(),
            domain: if credentials_buffers.domain.is_empty() {
                None
            } else {
                Some(utils::bytes_to_utf16_string(&credentials_buffers.domain)?)
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_utf16_encoded() {
        let identity = AuthIdentity {
            username: String::from("User"),
            password: String::from("Pass").into(),
            domain: Some(String::from("Dom")),
        };

        let buffers = AuthIdentityBuffers::from(&identity);

        assert_eq!(buffers.user, b"U\0s\0e\0r\0");
        assert_eq!(buffers.domain, b"D\0o\0m\0");
        assert_eq!(buffers.password.as_ref(), b"P\0a\0s\0s\0");
        assert_eq!(AuthIdentity::try_from(&buffers).unwrap(), identity);
    }

    #[test]
    fn debug_output_does_not_leak_the_password() {
        let buffers = AuthIdentityBuffers::new(b"u\0".to_vec(), Vec::new(), b"hunter2".to_vec());

        let output = format!("{:?}", buffers);

        assert!(!output.contains("hunter2"));
        assert!(output.contains("0x7500"));
    }
}
