//! Storage protocol classification.

use std::fmt;

/// Storage protocol a locator is read through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    File,
    S3,
    Http,
    Https,
    /// A reference manifest; the data it points at may use any protocol.
    Reference,
}

impl Protocol {
    /// Classify a locator. Never fails: anything without a known scheme is a local file.
    pub fn classify(locator: &str, reference: bool) -> Self {
        if reference {
            return Protocol::Reference;
        }
        if locator.starts_with("s3://") {
            Protocol::S3
        } else if locator.starts_with("http://") {
            Protocol::Http
        } else if locator.starts_with("https://") {
            Protocol::Https
        } else {
            Protocol::File
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::File => "file",
            Protocol::S3 => "s3",
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Reference => "reference",
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Protocol::S3 | Protocol::Http | Protocol::Https)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
