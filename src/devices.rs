//! Organization devices: the `orgDevices` collection.
//!
//! - [`org_devices_url`] — the first-page URL for a given page size.
//! - [`list_org_devices`] — walks every page with an existing token.
//! - [`fetch_org_devices`] — acquires a token (cache or exchange) and then
//!   walks every page; this is what the CLI runs.
//!
//! Records come back as raw JSON so nothing the server sends is lost.
//! [`OrgDevice`] is the typed view used to display them ([`render_device`]).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::auth::TokenBroker;
use crate::client::{AbmClient, FetchRequest};
use crate::config::{Config, Identity};

/// One device record as returned by the `orgDevices` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgDevice {
    /// Device identifier (the serial number for most hardware).
    #[serde(default)]
    pub id: Option<String>,

    /// Resource type, `"orgDevices"` for this collection.
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,

    /// Device properties.
    #[serde(default)]
    pub attributes: DeviceAttributes,
}

/// Attributes of an organization device.
///
/// Only the commonly used fields are named; everything else is kept in
/// `extra` so a display of the attributes shows the full server record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAttributes {
    /// Hardware serial number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,

    /// Marketing model name, e.g. `"MacBook Pro 14-inch"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,

    /// `Mac`, `iPhone`, `iPad`, `AppleTV`, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_family: Option<String>,

    /// Model identifier, e.g. `"iPad13,18"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_type: Option<String>,

    /// Assignment status, e.g. `"ASSIGNED"` / `"UNASSIGNED"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// ISO 8601 timestamp of when the device joined the organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_to_org_date_time: Option<String>,

    /// Every attribute not named above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OrgDevice {
    /// Decodes a raw record. Missing fields become `None`.
    pub fn from_record(record: &Value) -> crate::error::Result<Self> {
        Ok(serde_json::from_value(record.clone())?)
    }
}

/// Pretty-printed attributes of one record, or the whole record when it has
/// no `attributes` object.
pub fn render_device(record: &Value) -> String {
    let rendered = match OrgDevice::from_record(record) {
        Ok(device) if record.get("attributes").is_some() => {
            serde_json::to_string_pretty(&device.attributes)
        }
        _ => serde_json::to_string_pretty(record),
    };
    rendered.unwrap_or_else(|_| record.to_string())
}

/// First-page URL of the device collection: `{base}/orgDevices?limit={limit}`.
pub fn org_devices_url(base_url: &str, limit: u32) -> String {
    format!("{}/orgDevices?limit={limit}", base_url.trim_end_matches('/'))
}

/// Walks every page of the device collection with `token`.
///
/// # Errors
///
/// Any error from [`AbmClient::fetch_all`].
pub async fn list_org_devices(
    client: &AbmClient,
    token: &str,
    limit: u32,
) -> crate::error::Result<Vec<Value>> {
    let url = org_devices_url(client.base_url(), limit);
    client.fetch_all(&url, token, &FetchRequest::get()).await
}

/// Acquires a token and fetches the complete device collection.
///
/// Configuration is validated before any network activity.
///
/// # Errors
///
/// - `AbmError::Config` — invalid configuration.
/// - Token errors from [`TokenBroker::acquire`].
/// - Fetch errors from [`AbmClient::fetch_all`].
pub async fn fetch_org_devices(
    config: &Config,
    identity: Identity,
) -> crate::error::Result<Vec<Value>> {
    config.validate()?;

    let broker = TokenBroker::new(config, identity)?;
    let client = AbmClient::new(config)?;

    let token = broker.acquire().await?;
    let devices = list_org_devices(&client, &token, config.page_limit).await?;
    tracing::info!(count = devices.len(), mode = %config.mode, "devices fetched");
    Ok(devices)
}
