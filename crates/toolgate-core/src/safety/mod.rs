//! Secret redaction and URL safety, called before every outbound call and
//! every log/audit write.
//!
//! - [`redact`](self::redact): key-based payload redaction, free-text scrubbing, header masking
//! - [`url`](self::url): `validate_url()` against a `UrlPolicy`

pub mod redact;
pub mod url;

pub use self::redact::{mask_headers, redact, redact_text, redact_with, scrub, Redactor};
pub use self::url::{is_private_ip, validate_url, UrlPolicy, UrlValidationError};
