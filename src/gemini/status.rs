//! Response status codes.

use std::fmt;

/// Two-digit status codes sent on the response header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    RedirectTemporary,
    RedirectPermanent,
    TemporaryFailure,
    SlowDown,
    PermanentFailure,
    NotFound,
    ProxyRequestRefused,
    BadRequest,
    CertificateRequired,
    CertificateNotAuthorised,
    CertificateNotValid,
}

impl Status {
    pub fn code(self) -> u8 {
        match self {
            Status::Success => 20,
            Status::RedirectTemporary => 30,
            Status::RedirectPermanent => 31,
            Status::TemporaryFailure => 40,
            Status::SlowDown => 44,
            Status::PermanentFailure => 50,
            Status::NotFound => 51,
            Status::ProxyRequestRefused => 53,
            Status::BadRequest => 59,
            Status::CertificateRequired => 60,
            Status::CertificateNotAuthorised => 61,
            Status::CertificateNotValid => 62,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        assert_eq!(Status::Success.code(), 20);
        assert_eq!(Status::RedirectPermanent.code(), 31);
        assert_eq!(Status::ProxyRequestRefused.code(), 53);
        assert_eq!(Status::CertificateNotValid.code(), 62);
        assert_eq!(Status::SlowDown.to_string(), "44");
    }
}
