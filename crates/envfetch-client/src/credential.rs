use secrecy::SecretString;

use crate::error::Error;

/// A parsed ENVKEY credential: `<id>-<passphrase>-<host-suffix?>`.
///
/// The host suffix is everything after the second delimiter, kept
/// verbatim, so it may itself contain dashes.
#[derive(Debug)]
pub struct Credential {
    pub id: String,
    pub(crate) passphrase: SecretString,
    pub host: Option<String>,
}

impl Credential {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let mut pieces = raw.splitn(3, '-');
        let id = pieces.next().unwrap_or_default();
        let Some(passphrase) = pieces.next() else {
            return Err(Error::CredentialMalformed);
        };
        let host = pieces.next().filter(|h| !h.is_empty()).map(str::to_string);

        Ok(Self {
            id: id.to_string(),
            passphrase: SecretString::from(passphrase.to_string()),
            host,
        })
    }
}
