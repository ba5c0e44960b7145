//! Core types for the block storage service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Unscoped key-value metadata
pub type FreeformTags = BTreeMap<String, String>;

/// Namespaced key-value metadata: namespace -> key -> value
pub type DefinedTags = BTreeMap<String, BTreeMap<String, String>>;

/// Generate a new resource identifier of the given kind
pub fn new_ocid(kind: &str) -> String {
    format!("ocid1.{}.oc1..{}", kind, Uuid::new_v4().simple())
}

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::InvalidConfig(format!(
                        "unknown {} value: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

/// Volume lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeLifecycleState {
    Provisioning,
    Restoring,
    Available,
    Terminating,
    Terminated,
    Faulty,
}

string_enum!(VolumeLifecycleState {
    Provisioning => "PROVISIONING",
    Restoring => "RESTORING",
    Available => "AVAILABLE",
    Terminating => "TERMINATING",
    Terminated => "TERMINATED",
    Faulty => "FAULTY",
});

/// Volume backup lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeBackupLifecycleState {
    Creating,
    Available,
    Terminating,
    Terminated,
    Faulty,
    RequestReceived,
}

string_enum!(VolumeBackupLifecycleState {
    Creating => "CREATING",
    Available => "AVAILABLE",
    Terminating => "TERMINATING",
    Terminated => "TERMINATED",
    Faulty => "FAULTY",
    RequestReceived => "REQUEST_RECEIVED",
});

impl VolumeBackupLifecycleState {
    /// States that mean the backup has been deleted
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

/// Backup kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeBackupType {
    Full,
    Incremental,
}

string_enum!(VolumeBackupType {
    Full => "FULL",
    Incremental => "INCREMENTAL",
});

impl Default for VolumeBackupType {
    fn default() -> Self {
        Self::Incremental
    }
}

/// How a backup came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeBackupSourceType {
    Manual,
    Scheduled,
}

string_enum!(VolumeBackupSourceType {
    Manual => "MANUAL",
    Scheduled => "SCHEDULED",
});

/// Block volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub compartment_id: String,
    pub availability_domain: String,
    pub display_name: String,
    pub size_in_gbs: i64,
    pub lifecycle_state: VolumeLifecycleState,
    #[serde(default)]
    pub freeform_tags: FreeformTags,
    #[serde(default)]
    pub defined_tags: DefinedTags,
    pub time_created: DateTime<Utc>,
}

/// Point-in-time backup of a block volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeBackup {
    pub id: String,
    pub compartment_id: String,
    pub volume_id: String,
    pub display_name: String,
    #[serde(default)]
    pub freeform_tags: FreeformTags,
    #[serde(default)]
    pub defined_tags: DefinedTags,
    pub lifecycle_state: VolumeBackupLifecycleState,
    #[serde(rename = "type")]
    pub backup_type: VolumeBackupType,
    pub source_type: VolumeBackupSourceType,
    pub time_created: DateTime<Utc>,
    pub time_request_received: Option<DateTime<Utc>>,
    pub expiration_time: Option<DateTime<Utc>>,
    pub size_in_gbs: Option<i64>,
    pub unique_size_in_gbs: Option<i64>,
}

/// Parameters for creating a volume
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVolumeDetails {
    pub compartment_id: String,
    pub availability_domain: String,
    pub display_name: Option<String>,
    pub size_in_gbs: Option<i64>,
    pub freeform_tags: Option<FreeformTags>,
    pub defined_tags: Option<DefinedTags>,
}

/// Mutable volume attributes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateVolumeDetails {
    pub display_name: Option<String>,
    pub freeform_tags: Option<FreeformTags>,
    pub defined_tags: Option<DefinedTags>,
}

impl UpdateVolumeDetails {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.freeform_tags.is_none() && self.defined_tags.is_none()
    }
}

/// Parameters for creating a volume backup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVolumeBackupDetails {
    pub volume_id: String,
    pub display_name: Option<String>,
    pub freeform_tags: Option<FreeformTags>,
    pub defined_tags: Option<DefinedTags>,
    pub backup_type: Option<VolumeBackupType>,
}

/// Mutable volume backup attributes.
///
/// `None` leaves the attribute untouched, `Some` replaces it wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateVolumeBackupDetails {
    pub display_name: Option<String>,
    pub freeform_tags: Option<FreeformTags>,
    pub defined_tags: Option<DefinedTags>,
}

impl UpdateVolumeBackupDetails {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.freeform_tags.is_none() && self.defined_tags.is_none()
    }
}

/// Server-side filters for listing volume backups
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListVolumeBackupsRequest {
    pub compartment_id: String,
    pub volume_id: Option<String>,
    pub display_name: Option<String>,
    pub lifecycle_state: Option<VolumeBackupLifecycleState>,
    pub limit: Option<usize>,
    pub page: Option<String>,
}

/// One page of a list call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page: Option<String>,
}
