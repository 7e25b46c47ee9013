use crate::error::StorageError;

/// The parts of an Azure Storage connection string this crate uses.
///
/// Accepts the `Key=Value;Key=Value` form issued by the Azure portal, e.g.
/// `DefaultEndpointsProtocol=https;AccountName=acct;AccountKey=...;EndpointSuffix=core.windows.net`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AzureConnectionString {
    pub account: Option<String>,
    pub access_key: Option<String>,
    /// Explicit `BlobEndpoint`, or one derived from protocol + suffix.
    pub blob_endpoint: Option<String>,
    pub use_emulator: bool,
}

impl AzureConnectionString {
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        let mut parsed = Self::default();
        let mut protocol: Option<String> = None;
        let mut suffix: Option<String> = None;

        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            // Account keys are base64 and may themselves contain '='.
            let Some((key, value)) = part.split_once('=') else {
                return Err(StorageError::NotConfigured(format!(
                    "malformed connection string segment '{}'",
                    part.split('=').next().unwrap_or(part)
                )));
            };
            match key.trim() {
                "AccountName" => parsed.account = Some(value.to_string()),
                "AccountKey" => parsed.access_key = Some(value.to_string()),
                "BlobEndpoint" => parsed.blob_endpoint = Some(value.trim_end_matches('/').to_string()),
                "DefaultEndpointsProtocol" => protocol = Some(value.to_string()),
                "EndpointSuffix" => suffix = Some(value.to_string()),
                "UseDevelopmentStorage" => parsed.use_emulator = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        if parsed.use_emulator {
            return Ok(parsed);
        }

        let account = parsed.account.as_deref().ok_or_else(|| {
            StorageError::NotConfigured("connection string has no AccountName".into())
        })?;

        if parsed.blob_endpoint.is_none() {
            if let Some(suffix) = suffix {
                let protocol = protocol.as_deref().unwrap_or("https");
                parsed.blob_endpoint = Some(format!("{}://{}.blob.{}", protocol, account, suffix));
            }
        }

        Ok(parsed)
    }
}
