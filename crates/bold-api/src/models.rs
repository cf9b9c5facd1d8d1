//! Response and record types of the Bold API (camelCase JSON)

use serde::{Deserialize, Serialize};

/// Device kinds reported in `type.id`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Lock,
    Gateway,
}

impl DeviceType {
    pub fn id(self) -> u32 {
        match self {
            DeviceType::Lock => 1,
            DeviceType::Gateway => 2,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(DeviceType::Lock),
            2 => Some(DeviceType::Gateway),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTypeInfo {
    pub id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceModel {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub make: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceGateway {
    #[serde(default)]
    pub gateway_id: Option<u64>,
}

/// One entry of `GET /v1/effective-device-permissions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePermission {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: DeviceTypeInfo,
    #[serde(default)]
    pub model: Option<DeviceModel>,
    #[serde(default)]
    pub permission_remote_activate: bool,
    #[serde(default)]
    pub actual_firmware_version: Option<i64>,
    #[serde(default)]
    pub required_firmware_version: Option<i64>,
    #[serde(default)]
    pub battery_level: Option<u32>,
    #[serde(default)]
    pub battery_last_measurement: Option<String>,
    #[serde(default)]
    pub gateway: Option<DeviceGateway>,
}

impl DevicePermission {
    pub fn kind(&self) -> Option<DeviceType> {
        DeviceType::from_id(self.device_type.id)
    }

    /// Devices of `kind` the account may activate remotely
    pub fn is_remote_controllable(&self, kind: DeviceType) -> bool {
        self.kind() == Some(kind) && self.permission_remote_activate
    }

    pub fn gateway_id(&self) -> Option<u64> {
        self.gateway.as_ref().and_then(|g| g.gateway_id)
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model.as_ref().and_then(|m| m.model.as_deref())
    }

    /// Installed firmware is older than the required version
    pub fn update_available(&self) -> bool {
        match (self.actual_firmware_version, self.required_firmware_version) {
            (Some(actual), Some(required)) => actual < required,
            _ => false,
        }
    }
}

/// `POST /v2/validations`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResponse {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// `POST /v2/authentications` and `PUT /v2/authentications/{token}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResponse {
    pub token: String,
    /// Server expiry, `%Y-%m-%dT%H:%M:%S%.fZ`
    pub expiration_time: String,
}

/// `POST /v1/devices/{id}/remote-activation`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationResponse {
    /// Seconds the device stays unlocked
    pub activation_time: u64,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, found {other}"
        ))),
    }
}
